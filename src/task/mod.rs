//! Task identity, the contract shared by uploads and downloads, and the
//! payloads handed to listeners when a task ends.

pub mod state;

use range_dl::ResponseMeta;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::download::DownloadTask;
use crate::error::TransferError;
use crate::upload::UploadTask;

pub use state::{StopReason, TaskControl, TaskState};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// What the registry and the scheduler need from any transfer task.
pub trait NetworkTask: Send + Sync + 'static {
    fn control(&self) -> &TaskControl;

    fn url(&self) -> &str;

    /// Local files this task writes to or reads from. Two live tasks never
    /// share one.
    fn destinations(&self) -> Vec<PathBuf>;

    fn id(&self) -> &TaskId {
        self.control().id()
    }

    fn state(&self) -> TaskState {
        self.control().state()
    }

    /// Called when the registry accepts the task for a new invocation.
    fn on_resubmit(&self) {}
}

/// Either kind of task, for code that handles both.
#[derive(Debug, Clone)]
pub enum TransferTask {
    Download(Arc<DownloadTask>),
    Upload(Arc<UploadTask>),
}

impl TransferTask {
    pub fn control(&self) -> &TaskControl {
        match self {
            TransferTask::Download(task) => task.control(),
            TransferTask::Upload(task) => task.control(),
        }
    }

    pub fn id(&self) -> &TaskId {
        self.control().id()
    }

    pub fn state(&self) -> TaskState {
        self.control().state()
    }

    pub fn url(&self) -> &str {
        match self {
            TransferTask::Download(task) => task.url(),
            TransferTask::Upload(task) => task.url(),
        }
    }
}

impl From<Arc<DownloadTask>> for TransferTask {
    fn from(task: Arc<DownloadTask>) -> Self {
        TransferTask::Download(task)
    }
}

impl From<Arc<UploadTask>> for TransferTask {
    fn from(task: Arc<UploadTask>) -> Self {
        TransferTask::Upload(task)
    }
}

/// Response details handed to listeners.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseInfo {
    #[serde(flatten)]
    pub meta: ResponseMeta,
    /// Captured for uploads and rejected requests; downloads stream it to disk.
    #[serde(skip)]
    pub body: Option<Vec<u8>>,
}

impl ResponseInfo {
    pub fn status(&self) -> u16 {
        self.meta.status
    }

    pub fn body_text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|body| String::from_utf8_lossy(body).into_owned())
    }
}

/// Why a task ended without success.
///
/// Both fields empty means the task was stopped before any request was made.
#[derive(Debug, Default)]
pub struct TaskFailure {
    pub error: Option<TransferError>,
    pub response: Option<ResponseInfo>,
}

impl TaskFailure {
    pub fn forced() -> Self {
        Self::default()
    }

    pub fn is_forced(&self) -> bool {
        self.error.is_none() && self.response.is_none()
    }
}

impl From<TransferError> for TaskFailure {
    fn from(error: TransferError) -> Self {
        Self {
            error: Some(error),
            response: None,
        }
    }
}

impl From<std::io::Error> for TaskFailure {
    fn from(error: std::io::Error) -> Self {
        TransferError::from(error).into()
    }
}

impl From<reqwest::Error> for TaskFailure {
    fn from(error: reqwest::Error) -> Self {
        TransferError::from(error).into()
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.error, &self.response) {
            (Some(error), _) => write!(f, "{}", error),
            (None, Some(response)) => write!(f, "server responded with status {}", response.status()),
            (None, None) => write!(f, "stopped before start"),
        }
    }
}
