use thiserror::Error;

use crate::remote::RemoteError;
use crate::types::ActionKind;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote call failed: {0}")]
    Connectivity(#[from] RemoteError),
    #[error("{0} is not cached locally (offline mode)")]
    NotFoundOffline(String),
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Local write rolled back: {0:#}")]
    PartialWrite(anyhow::Error),
    #[error(
        "Replay halted at pending action {action_id} ({kind}): {reason}; {remaining} action(s) still queued"
    )]
    ReplayHalt {
        action_id: i64,
        kind: ActionKind,
        reason: String,
        remaining: usize,
    },
    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl SyncError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SyncError::Validation(msg.into())
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, SyncError::Connectivity(_))
    }
}

/// Marker attached to storage errors raised by an aborted multi-row
/// transaction.
#[derive(Error, Debug)]
#[error("transaction aborted while {0}")]
pub struct PartialWrite(pub &'static str);

/// Raised by the store when a pending action fails boundary validation.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct InvalidAction(pub String);

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(invalid) = err.downcast_ref::<InvalidAction>() {
            return SyncError::Validation(invalid.0.clone());
        }
        if err.downcast_ref::<PartialWrite>().is_some() {
            SyncError::PartialWrite(err)
        } else {
            SyncError::Storage(err)
        }
    }
}
