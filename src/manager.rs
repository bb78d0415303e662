//! One entry point for both directions

use std::sync::Arc;

use crate::config::ManagerConfig;
use crate::download::DownloadManager;
use crate::error::Result;
use crate::task::{TaskId, TransferTask};
use crate::upload::UploadManager;

/// Pairs a download and an upload manager and routes [`TransferTask`]s to
/// the one that owns their direction. Each side keeps its own lane quota.
pub struct TransferManager {
    downloads: DownloadManager,
    uploads: UploadManager,
}

impl TransferManager {
    /// Builds both sides with their default configurations.
    pub fn new() -> Result<Self> {
        Ok(Self {
            downloads: DownloadManager::new(ManagerConfig::for_downloads())?,
            uploads: UploadManager::new(ManagerConfig::for_uploads())?,
        })
    }

    pub fn from_parts(downloads: DownloadManager, uploads: UploadManager) -> Self {
        Self { downloads, uploads }
    }

    pub fn downloads(&self) -> &DownloadManager {
        &self.downloads
    }

    pub fn uploads(&self) -> &UploadManager {
        &self.uploads
    }

    pub fn submit(&self, task: impl Into<TransferTask>) -> bool {
        match task.into() {
            TransferTask::Download(task) => self.downloads.submit(task),
            TransferTask::Upload(task) => self.uploads.submit(task),
        }
    }

    pub fn cancel(&self, task: &TransferTask) -> bool {
        match task {
            TransferTask::Download(task) => self.downloads.cancel(task),
            TransferTask::Upload(task) => self.uploads.cancel(task),
        }
    }

    pub fn pause(&self, task: &TransferTask) -> bool {
        match task {
            TransferTask::Download(task) => self.downloads.pause(task),
            TransferTask::Upload(task) => self.uploads.pause(task),
        }
    }

    pub fn fail(&self, task: &TransferTask) -> bool {
        match task {
            TransferTask::Download(task) => self.downloads.fail(task),
            TransferTask::Upload(task) => self.uploads.fail(task),
        }
    }

    pub async fn remove(&self, task: &TransferTask, cancel_if_running: bool, clear_notification: bool) -> bool {
        match task {
            TransferTask::Download(task) => {
                self.downloads
                    .remove(task, cancel_if_running, clear_notification)
                    .await
            }
            TransferTask::Upload(task) => {
                self.uploads
                    .remove(task, cancel_if_running, clear_notification)
                    .await
            }
        }
    }

    pub fn find_by_id(&self, id: &TaskId) -> Option<TransferTask> {
        self.downloads
            .find_by_id(id)
            .map(TransferTask::from)
            .or_else(|| self.uploads.find_by_id(id).map(TransferTask::from))
    }

    /// Cancels everything on both sides; returns how many tasks stopped.
    pub fn cancel_all(&self, clear_notification: bool) -> usize {
        self.downloads.cancel_all(clear_notification) + self.uploads.cancel_all(clear_notification)
    }

    pub fn running_count(&self) -> usize {
        self.downloads.running_count() + self.uploads.running_count()
    }
}
