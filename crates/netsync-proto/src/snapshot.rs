//! Room state sent to a client when it joins.

use serde::{Deserialize, Serialize};

use crate::ClientNo;
use crate::codec::CodecError;

/// Full room state at join time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    /// Every connected client, including the one being welcomed.
    pub clients: Vec<ClientNo>,
    /// Global variables as `(name, value)`.
    pub globals: Vec<(String, String)>,
    /// Client variables grouped by owner.
    pub client_variables: Vec<(ClientNo, Vec<(String, String)>)>,
}

impl RoomSnapshot {
    /// Serialize the snapshot to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        postcard::to_allocvec(self).map_err(|e| CodecError::Snapshot(e.to_string()))
    }

    /// Deserialize a snapshot from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        postcard::from_bytes(data).map_err(|e| CodecError::Snapshot(e.to_string()))
    }
}
