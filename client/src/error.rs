//! Error types for the sync core.
//!
//! Nothing here is fatal to the process. Remote-call failures are logged at
//! the failure site and handed back so callers can inspect them; most callers
//! drop them on purpose because position sync heals itself on the next tick.

use shared::EventKind;
use thiserror::Error;

use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, SyncError>;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SyncError {
    /// A remote create/update/delete/list call failed.
    #[error("backend call failed: {0}")]
    Backend(String),

    /// The requested record does not exist (or was already cleaned up).
    #[error("record not found: {0}")]
    NotFound(String),

    /// Only durable kinds may be written to the event table.
    #[error("event kind {0} is not durable")]
    NotDurable(EventKind),

    /// An inbound or outbound payload could not be (de)serialized.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SyncError::Backend(_) => "sync_backend",
            SyncError::NotFound(_) => "sync_not_found",
            SyncError::NotDurable(_) => "sync_not_durable",
            SyncError::MalformedPayload(_) => "sync_malformed_payload",
            SyncError::Transport(_) => "sync_transport",
            SyncError::Config(_) => "sync_config",
        }
    }
}
