//! Resumable file downloads
//!
//! - Range-based resume from whatever is already on disk
//! - One fallback retry without `Range` when a resumed request fails
//! - Fixed-size chunk streaming with throttled progress
//! - Pause/Cancel via cooperative stop checks

mod manager;
mod types;
mod worker;

pub use manager::{DownloadManager, DownloadManagerBuilder};
pub use types::{DownloadListener, DownloadTask, DownloadTaskBuilder, RequestHook};
