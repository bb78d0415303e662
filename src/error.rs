//! Error type shared by the engines and facades

use std::path::PathBuf;
use thiserror::Error;

use crate::task::TaskState;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server responded with status {status}")]
    Status { status: u16 },

    #[error("task is stopped ({0})")]
    Stopped(TaskState),

    #[error("no readable source for file parameter `{0}`")]
    MissingSource(String),

    #[error("destination {0:?} is used by another task")]
    DestinationInUse(PathBuf),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("managers must be created inside a tokio runtime")]
    NoRuntime,
}

impl TransferError {
    /// True when the error only reflects a local stop request.
    pub fn is_stopped(&self) -> bool {
        match self {
            TransferError::Stopped(_) => true,
            TransferError::Io(e) => e.kind() == std::io::ErrorKind::Interrupted,
            _ => false,
        }
    }
}

pub type Result<T, E = TransferError> = std::result::Result<T, E>;
