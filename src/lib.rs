//! Lane-limited, resumable HTTP transfers.
//!
//! [`DownloadManager`] and [`UploadManager`] admit tasks into a registry that
//! bounds how many run at once ("lanes"), rejects duplicates and tasks
//! clashing on a local file, and starts waiting tasks as lanes free up.
//! Downloads resume from the bytes already on disk with a `Range` request and
//! fall back once to a full request when the resumed one fails. Uploads send
//! a multipart form and report progress per file.
//!
//! Every task moves through [`TaskState`]; progress is throttled and passed
//! to listeners, to the [`NotificationBridge`] and to [`TaskEvent`]
//! subscribers.

pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod manager;
pub mod notify;
pub mod progress;
pub mod registry;
pub mod task;
pub mod upload;

mod scheduler;

pub use config::ManagerConfig;
pub use download::{DownloadListener, DownloadManager, DownloadTask};
pub use error::{Result, TransferError};
pub use events::TaskEvent;
pub use manager::TransferManager;
pub use notify::{NotificationBridge, NotificationContent, NotificationOptions};
pub use progress::Progress;
pub use task::{NetworkTask, ResponseInfo, TaskFailure, TaskId, TaskState, TransferTask};
pub use upload::{FileParameter, UploadListener, UploadManager, UploadTask};
