use rkyv::{Archive, Deserialize, Serialize};

use crate::document::TeamDocument;
use crate::patch::TeamPatch;

pub const ERROR_INVALID_TEAM: &str = "invalid_team";
pub const ERROR_NOT_FOUND: &str = "not_found";
pub const ERROR_INVALID_PATCH: &str = "invalid_patch";
pub const ERROR_STORAGE: &str = "storage";

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub enum ClientMsg {
    Get {
        request_id: u64,
        team: String,
    },
    Create {
        request_id: u64,
        team: String,
        document: TeamDocument,
    },
    Update {
        request_id: u64,
        team: String,
        patch: TeamPatch,
    },
    Subscribe {
        team: String,
    },
    Unsubscribe {
        team: String,
    },
    Ping {
        nonce: Option<u64>,
    },
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub enum ServerMsg {
    Document {
        request_id: u64,
        document: Option<TeamDocument>,
    },
    Created {
        request_id: u64,
        created: bool,
        revision: u64,
    },
    Ack {
        request_id: u64,
        revision: u64,
    },
    /// Full document pushed to subscribers after every accepted write.
    Snapshot {
        team: String,
        document: Option<TeamDocument>,
    },
    Error {
        request_id: Option<u64>,
        code: String,
        message: String,
    },
    Pong {
        nonce: Option<u64>,
    },
}

impl ServerMsg {
    pub fn request_id(&self) -> Option<u64> {
        match self {
            ServerMsg::Document { request_id, .. }
            | ServerMsg::Created { request_id, .. }
            | ServerMsg::Ack { request_id, .. } => Some(*request_id),
            ServerMsg::Error { request_id, .. } => *request_id,
            ServerMsg::Snapshot { .. } | ServerMsg::Pong { .. } => None,
        }
    }
}
