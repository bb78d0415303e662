//! Upload manager facade

use reqwest::Client;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::ManagerConfig;
use crate::error::Result;
use crate::events::{self, TaskEvent};
use crate::notify::{NoopNotifications, NotificationBridge};
use crate::scheduler::Scheduler;
use crate::task::{NetworkTask, StopReason, TaskId, TaskState};

use super::source::{ContentResolver, FsResolver};
use super::types::{FormHook, UploadListener, UploadRequestHook, UploadTask};
use super::worker::UploadEngine;

/// Runs upload tasks with at most `lanes` of them sending at once.
pub struct UploadManager {
    scheduler: Arc<Scheduler<UploadEngine>>,
    config: ManagerConfig,
}

pub struct UploadManagerBuilder {
    config: ManagerConfig,
    client: Option<Client>,
    listener: Option<Arc<dyn UploadListener>>,
    notifications: Option<Arc<dyn NotificationBridge>>,
    resolver: Option<Arc<dyn ContentResolver>>,
    request_hook: Option<UploadRequestHook>,
    form_hook: Option<FormHook>,
}

impl UploadManagerBuilder {
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Manager-wide listener, called after each task's own listener.
    pub fn listener(mut self, listener: Arc<dyn UploadListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn notifications(mut self, bridge: Arc<dyn NotificationBridge>) -> Self {
        self.notifications = Some(bridge);
        self
    }

    /// Opens [`FileSource::Uri`](super::FileSource::Uri) parameters. Defaults
    /// to [`FsResolver`].
    pub fn resolver(mut self, resolver: Arc<dyn ContentResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn request_hook(mut self, hook: UploadRequestHook) -> Self {
        self.request_hook = Some(hook);
        self
    }

    pub fn form_hook(mut self, hook: FormHook) -> Self {
        self.form_hook = Some(hook);
        self
    }

    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<UploadManager> {
        let client = match self.client {
            Some(client) => client,
            None => self.config.build_client()?,
        };
        let engine = UploadEngine {
            client,
            chunk_size: self.config.chunk_size,
            progress_interval: self.config.progress_interval(),
            listener: self.listener,
            notifications: self
                .notifications
                .unwrap_or_else(|| Arc::new(NoopNotifications)),
            notification_options: self.config.notification.clone(),
            resolver: self.resolver.unwrap_or_else(|| Arc::new(FsResolver)),
            request_hook: self.request_hook,
            form_hook: self.form_hook,
            events: events::channel(),
        };
        Ok(UploadManager {
            scheduler: Scheduler::new(engine, self.config.lanes)?,
            config: self.config,
        })
    }
}

impl UploadManager {
    pub fn new(config: ManagerConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ManagerConfig) -> UploadManagerBuilder {
        UploadManagerBuilder {
            config,
            client: None,
            listener: None,
            notifications: None,
            resolver: None,
            request_hook: None,
            form_hook: None,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Admits and starts (or queues) a task. `false` when it clashes with a
    /// live task by id or by a local source file.
    pub fn submit(&self, task: Arc<UploadTask>) -> bool {
        self.scheduler.submit(task)
    }

    pub fn submit_all(&self, tasks: impl IntoIterator<Item = Arc<UploadTask>>) -> usize {
        tasks
            .into_iter()
            .filter(|task| self.submit(task.clone()))
            .count()
    }

    pub fn cancel(&self, task: &Arc<UploadTask>) -> bool {
        self.scheduler.stop(task, TaskState::Cancel, StopReason::Human)
    }

    pub fn pause(&self, task: &Arc<UploadTask>) -> bool {
        self.scheduler.stop(task, TaskState::Pause, StopReason::Human)
    }

    pub fn fail(&self, task: &Arc<UploadTask>) -> bool {
        self.scheduler.stop(task, TaskState::Failure, StopReason::Human)
    }

    /// Removes `task` once no engine runs it. A waiting task is cancelled and
    /// removed; a dispatched or running one needs `cancel_if_running`.
    pub async fn remove(&self, task: &UploadTask, cancel_if_running: bool, clear_notification: bool) -> bool {
        self.scheduler
            .remove(task.id(), cancel_if_running, clear_notification)
            .await
    }

    /// Resolves once no engine invocation is running `task`.
    pub async fn wait_idle(&self, task: &UploadTask) {
        task.control().wait_idle().await
    }

    pub async fn clear(&self, cancel: bool, clear_notification: bool) -> usize {
        self.scheduler.clear(cancel, clear_notification).await
    }

    pub fn cancel_all(&self, clear_notification: bool) -> usize {
        self.scheduler.cancel_all(clear_notification)
    }

    pub fn find_by_url(&self, url: &str) -> Option<Arc<UploadTask>> {
        self.scheduler.registry().find_by_url(url)
    }

    pub fn find_by_id(&self, id: &TaskId) -> Option<Arc<UploadTask>> {
        self.scheduler.registry().find_by_id(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.scheduler.registry().contains(id)
    }

    pub fn tasks(&self) -> Vec<Arc<UploadTask>> {
        self.scheduler.registry().tasks()
    }

    pub fn tasks_in_state(&self, state: TaskState) -> Vec<Arc<UploadTask>> {
        self.scheduler.registry().tasks_in_state(state)
    }

    pub fn running_count(&self) -> usize {
        self.scheduler.registry().running_count()
    }

    pub fn lanes(&self) -> i32 {
        self.scheduler.registry().lanes()
    }

    pub fn set_lanes(&self, lanes: i32) {
        self.scheduler.set_lanes(lanes)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.scheduler.subscribe()
    }
}
