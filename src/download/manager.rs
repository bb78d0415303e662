//! Download manager facade

use reqwest::Client;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::ManagerConfig;
use crate::error::Result;
use crate::events::{self, TaskEvent};
use crate::notify::{NoopNotifications, NotificationBridge};
use crate::scheduler::Scheduler;
use crate::task::{NetworkTask, StopReason, TaskId, TaskState};

use super::types::{DownloadListener, DownloadTask, RequestHook};
use super::worker::DownloadEngine;

/// Runs download tasks with at most `lanes` of them transferring at once.
pub struct DownloadManager {
    scheduler: Arc<Scheduler<DownloadEngine>>,
    config: ManagerConfig,
}

pub struct DownloadManagerBuilder {
    config: ManagerConfig,
    client: Option<Client>,
    listener: Option<Arc<dyn DownloadListener>>,
    notifications: Option<Arc<dyn NotificationBridge>>,
    request_hook: Option<RequestHook>,
}

impl DownloadManagerBuilder {
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Manager-wide listener, called after each task's own listener.
    pub fn listener(mut self, listener: Arc<dyn DownloadListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn notifications(mut self, bridge: Arc<dyn NotificationBridge>) -> Self {
        self.notifications = Some(bridge);
        self
    }

    /// Applied to tasks that have no request hook of their own.
    pub fn request_hook(mut self, hook: RequestHook) -> Self {
        self.request_hook = Some(hook);
        self
    }

    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<DownloadManager> {
        let client = match self.client {
            Some(client) => client,
            None => self.config.build_client()?,
        };
        let engine = DownloadEngine {
            client,
            chunk_size: self.config.chunk_size,
            progress_interval: self.config.progress_interval(),
            listener: self.listener,
            notifications: self
                .notifications
                .unwrap_or_else(|| Arc::new(NoopNotifications)),
            notification_options: self.config.notification.clone(),
            request_hook: self.request_hook,
            events: events::channel(),
        };
        Ok(DownloadManager {
            scheduler: Scheduler::new(engine, self.config.lanes)?,
            config: self.config,
        })
    }
}

impl DownloadManager {
    pub fn new(config: ManagerConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ManagerConfig) -> DownloadManagerBuilder {
        DownloadManagerBuilder {
            config,
            client: None,
            listener: None,
            notifications: None,
            request_hook: None,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Admits and starts (or queues) a task. `false` when it clashes with a
    /// live task by id or destination file.
    pub fn submit(&self, task: Arc<DownloadTask>) -> bool {
        self.scheduler.submit(task)
    }

    /// Returns how many tasks were admitted.
    pub fn submit_all(&self, tasks: impl IntoIterator<Item = Arc<DownloadTask>>) -> usize {
        tasks
            .into_iter()
            .filter(|task| self.submit(task.clone()))
            .count()
    }

    pub fn cancel(&self, task: &Arc<DownloadTask>) -> bool {
        self.scheduler.stop(task, TaskState::Cancel, StopReason::Human)
    }

    /// Keeps the partial file; resubmitting the task resumes from it.
    pub fn pause(&self, task: &Arc<DownloadTask>) -> bool {
        self.scheduler.stop(task, TaskState::Pause, StopReason::Human)
    }

    pub fn fail(&self, task: &Arc<DownloadTask>) -> bool {
        self.scheduler.stop(task, TaskState::Failure, StopReason::Human)
    }

    /// Removes `task` once no engine runs it. A waiting task is cancelled and
    /// removed; a dispatched or running one needs `cancel_if_running`.
    pub async fn remove(&self, task: &DownloadTask, cancel_if_running: bool, clear_notification: bool) -> bool {
        self.scheduler
            .remove(task.id(), cancel_if_running, clear_notification)
            .await
    }

    /// Resolves once no engine invocation is running `task`.
    pub async fn wait_idle(&self, task: &DownloadTask) {
        task.control().wait_idle().await
    }

    pub async fn clear(&self, cancel: bool, clear_notification: bool) -> usize {
        self.scheduler.clear(cancel, clear_notification).await
    }

    pub fn cancel_all(&self, clear_notification: bool) -> usize {
        self.scheduler.cancel_all(clear_notification)
    }

    pub fn find_by_url(&self, url: &str) -> Option<Arc<DownloadTask>> {
        self.scheduler.registry().find_by_url(url)
    }

    pub fn find_by_id(&self, id: &TaskId) -> Option<Arc<DownloadTask>> {
        self.scheduler.registry().find_by_id(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.scheduler.registry().contains(id)
    }

    pub fn tasks(&self) -> Vec<Arc<DownloadTask>> {
        self.scheduler.registry().tasks()
    }

    pub fn tasks_in_state(&self, state: TaskState) -> Vec<Arc<DownloadTask>> {
        self.scheduler.registry().tasks_in_state(state)
    }

    pub fn running_count(&self) -> usize {
        self.scheduler.registry().running_count()
    }

    pub fn lanes(&self) -> i32 {
        self.scheduler.registry().lanes()
    }

    /// Changes the quota; waiting tasks start if room opened up.
    pub fn set_lanes(&self, lanes: i32) {
        self.scheduler.set_lanes(lanes)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.scheduler.subscribe()
    }
}
