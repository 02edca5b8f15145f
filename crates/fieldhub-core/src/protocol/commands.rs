//! Outbound hub commands
//!
//! Every command is a single line of plain text; `deleteNode` carries the
//! target id after a space.

use std::fmt;

/// Commands the manager sends to the hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubCommand {
    /// Handshake probe; a live hub answers with its `FW_` banner
    Hello,
    /// Request a full node-list refresh (JSON array response)
    GetListDevice,
    /// Request an immediate telemetry sweep of all nodes
    GetDataNow,
    /// Put the hub into registration (pairing) mode
    RegisterNewNode,
    /// Leave registration mode without pairing
    CancelRegister,
    /// Unpair a node by id
    DeleteNode(String),
}

impl HubCommand {
    /// Wire encoding of the command, without the line terminator
    pub fn wire(&self) -> String {
        match self {
            HubCommand::Hello => "helloMaster".to_string(),
            HubCommand::GetListDevice => "getListDevice".to_string(),
            HubCommand::GetDataNow => "getDataNow".to_string(),
            HubCommand::RegisterNewNode => "registerNewNode".to_string(),
            HubCommand::CancelRegister => "cancelRegister".to_string(),
            HubCommand::DeleteNode(id) => format!("deleteNode {}", id),
        }
    }
}

impl fmt::Display for HubCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire())
    }
}
