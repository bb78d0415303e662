//! Upload worker - multipart form streaming with per-file progress and
//! per-file outcomes

use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use range_dl::{ChunkReader, ResponseMeta};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;
use crate::events::{emit, TaskEvent};
use crate::notify::{NotificationBridge, NotificationOptions, Placeholders};
use crate::progress::{Progress, ProgressThrottle};
use crate::registry::TaskRegistry;
use crate::scheduler::{Engine, RunOutcome};
use crate::task::{NetworkTask, ResponseInfo, TaskFailure, TaskState};

use super::source::{open_source, BoxedReader, ContentResolver, OpenedSource};
use super::types::{
    FileParameter, FormHook, UploadListener, UploadParameter, UploadRequestHook, UploadTask,
};

pub(crate) struct UploadEngine {
    pub(crate) client: Client,
    pub(crate) chunk_size: usize,
    pub(crate) progress_interval: Duration,
    pub(crate) listener: Option<Arc<dyn UploadListener>>,
    pub(crate) notifications: Arc<dyn NotificationBridge>,
    pub(crate) notification_options: Option<NotificationOptions>,
    pub(crate) resolver: Arc<dyn ContentResolver>,
    pub(crate) request_hook: Option<UploadRequestHook>,
    pub(crate) form_hook: Option<FormHook>,
    pub(crate) events: broadcast::Sender<TaskEvent>,
}

/// Body of one file part. Reads the source chunk by chunk, checking the
/// task's stop flag and reporting progress as the HTTP client pulls.
struct FileStream {
    engine: Arc<UploadEngine>,
    task: Arc<UploadTask>,
    index: usize,
    reader: ChunkReader<BoxedReader>,
    total: i64,
    current: i64,
    throttle: ProgressThrottle,
    started: bool,
    done: bool,
}

impl FileStream {
    async fn next_chunk(&mut self) -> Option<io::Result<Vec<u8>>> {
        if self.done {
            return None;
        }
        let file = self.task.file_at(self.index)?;
        // First pull: the file starts, progress begins at the breakpoint
        if !self.started {
            self.started = true;
            file.set_state(TaskState::Running);
            self.engine.file_progress(
                &self.task,
                file,
                &mut self.throttle,
                Progress::new(self.total, self.current),
                false,
            );
        }

        // Stop requested between chunks
        if self.task.control().is_stop() {
            self.done = true;
            let error = TransferError::Stopped(self.task.state());
            self.engine.file_failed(&self.task, file, Some(&error));
            return Some(Err(io::Error::new(io::ErrorKind::Interrupted, error.to_string())));
        }

        match self.reader.next_chunk().await {
            Ok(Some(chunk)) => {
                let chunk = chunk.to_vec();
                self.current += chunk.len() as i64;
                self.engine.file_progress(
                    &self.task,
                    file,
                    &mut self.throttle,
                    Progress::new(self.total, self.current),
                    false,
                );
                Some(Ok(chunk))
            }
            Ok(None) => {
                // Source exhausted; unknown lengths settle on what was sent
                self.done = true;
                let total = if self.total > 0 { self.total } else { self.current };
                self.engine.file_progress(
                    &self.task,
                    file,
                    &mut self.throttle,
                    Progress::new(total, self.current),
                    true,
                );
                self.engine.file_succeeded(&self.task, file);
                None
            }
            Err(e) => {
                self.done = true;
                let error = TransferError::Io(io::Error::new(e.kind(), e.to_string()));
                self.engine.file_failed(&self.task, file, Some(&error));
                Some(Err(e))
            }
        }
    }
}

impl UploadEngine {
    fn listeners<'a>(&'a self, task: &'a UploadTask) -> impl Iterator<Item = &'a Arc<dyn UploadListener>> {
        task.listener().into_iter().chain(self.listener.iter())
    }

    fn file_progress(
        &self,
        task: &UploadTask,
        file: &FileParameter,
        throttle: &mut ProgressThrottle,
        progress: Progress,
        is_final: bool,
    ) {
        let now = tokio::time::Instant::now().into_std();
        if !throttle.should_emit(progress, is_final, now) {
            return;
        }
        file.set_current_progress(progress);
        for listener in self.listeners(task) {
            listener.on_progress(task, file, progress);
        }
        emit(
            &self.events,
            TaskEvent::progress(task.id(), Some(file.name()), progress),
        );
        self.refresh_file_notification(task, file);
    }

    fn file_succeeded(&self, task: &UploadTask, file: &FileParameter) {
        debug!("upload_file_finish: {} file={}", task.id(), file.name());
        file.set_state(TaskState::Success);
        for listener in self.listeners(task) {
            listener.on_file_success(task, file);
        }
        self.refresh_file_notification(task, file);
    }

    /// A file that did not make it takes the task's stop state, or
    /// `Failure` when nobody stopped the task.
    fn file_failed(&self, task: &UploadTask, file: &FileParameter, error: Option<&TransferError>) {
        let state = task.state();
        file.set_state(if state.is_stop() && state != TaskState::Success {
            state
        } else {
            TaskState::Failure
        });
        debug!(
            "upload_file_failed: {} file={} state={}",
            task.id(),
            file.name(),
            file.state()
        );
        for listener in self.listeners(task) {
            listener.on_file_failure(task, file, error);
        }
        self.refresh_file_notification(task, file);
    }

    /// Fails every file the request did not get through.
    fn settle_files(&self, task: &UploadTask, error: Option<&TransferError>) {
        for file in task.files() {
            if !file.state().is_stop() {
                self.file_failed(task, file, error);
            }
        }
    }

    fn refresh_file_notification(&self, task: &UploadTask, file: &FileParameter) {
        // a file that has not started shows the task's state
        let state = match file.state() {
            TaskState::None => task.state(),
            state => state,
        };
        let show_name = task.show_name().unwrap_or(file.display_name());
        file.notification.publish(
            self.notifications.as_ref(),
            file.notification_options()
                .or(task.notification_options())
                .or(self.notification_options.as_ref()),
            state,
            &Placeholders {
                file_name: file.file_name(),
                show_name,
                progress: file.current_progress(),
            },
        );
    }

    async fn run(self: Arc<Self>, task: Arc<UploadTask>) -> RunOutcome {
        let Some(token) = task.control().begin() else {
            debug!("upload_skip: {} stopped before start", task.id());
            return RunOutcome::Skipped;
        };
        info!(
            "upload_start: {} url={} files={}",
            task.id(),
            task.url(),
            task.files().count()
        );
        emit(
            &self.events,
            TaskEvent::StatusChanged {
                task_id: task.id().clone(),
                status: TaskState::Running,
                error: None,
            },
        );
        self.refresh_notification(&task);

        match self.clone().attempt(&task, &token).await {
            Ok(response) if task.control().succeed() => {
                info!(
                    "upload_finish: {} status={}",
                    task.id(),
                    response.status()
                );
                for listener in self.listeners(&task) {
                    listener.on_success(&task, &response);
                }
                RunOutcome::Finished { error: None }
            }
            Ok(response) => {
                let failure = TaskFailure {
                    error: Some(TransferError::Stopped(task.state())),
                    response: Some(response),
                };
                self.finish_failed(&task, failure)
            }
            Err(failure) => self.finish_failed(&task, failure),
        }
    }

    fn finish_failed(&self, task: &UploadTask, failure: TaskFailure) -> RunOutcome {
        let state = task.control().fail_if_not_stop();
        if state == TaskState::Failure {
            warn!("upload_failed: {} error={}", task.id(), failure);
        } else {
            info!("upload_stopped: {} state={}", task.id(), state);
        }
        self.settle_files(task, failure.error.as_ref());
        let error = failure.to_string();
        for listener in self.listeners(task) {
            listener.on_failure(task, &failure);
        }
        RunOutcome::Finished { error: Some(error) }
    }

    fn file_part(
        self: &Arc<Self>,
        task: &Arc<UploadTask>,
        index: usize,
        file: &FileParameter,
        opened: OpenedSource,
        interval: Duration,
    ) -> Result<Part, TransferError> {
        file.set_content_length(opened.content_length);
        // Resumed local files only send what follows the breakpoint
        let remaining = opened
            .content_length
            .map(|length| length.saturating_sub(opened.offset));
        let stream = FileStream {
            engine: self.clone(),
            task: task.clone(),
            index,
            reader: ChunkReader::new(opened.reader, self.chunk_size),
            total: opened.content_length.map(|len| len as i64).unwrap_or(-1),
            current: opened.offset as i64,
            throttle: ProgressThrottle::new(interval),
            started: false,
            done: false,
        };
        let body = Body::wrap_stream(futures_util::stream::unfold(stream, |mut stream| async move {
            let item = stream.next_chunk().await?;
            Some((item, stream))
        }));
        let part = match remaining {
            Some(length) => Part::stream_with_length(body, length),
            None => Part::stream(body),
        };
        Ok(part
            .file_name(file.file_name().to_string())
            .mime_str(file.mime_type())?)
    }

    async fn build_form(self: &Arc<Self>, task: &Arc<UploadTask>) -> Result<Form, TaskFailure> {
        let interval = task.progress_interval().unwrap_or(self.progress_interval);
        let mut form = Form::new();
        for (index, param) in task.parameters().iter().enumerate() {
            let Some(file) = task.file_at(index) else {
                if let UploadParameter::Text { name, value } = param {
                    form = form.text(name.clone(), value.clone());
                }
                continue;
            };
            let opened = open_source(
                file.source(),
                file.name(),
                file.breakpoint(),
                file.content_length(),
                self.resolver.as_ref(),
            )
            .await;
            let part = opened.and_then(|opened| self.file_part(task, index, file, opened, interval));
            match part {
                Ok(part) => form = form.part(file.name().to_string(), part),
                Err(error) => {
                    self.file_failed(task, file, Some(&error));
                    return Err(error.into());
                }
            }
        }
        if let Some(hook) = task.form_hook().or(self.form_hook.as_ref()) {
            form = hook(form, task.as_ref());
        }
        Ok(form)
    }

    async fn attempt(
        self: Arc<Self>,
        task: &Arc<UploadTask>,
        token: &CancellationToken,
    ) -> Result<ResponseInfo, TaskFailure> {
        // Open every source before anything goes on the wire
        let form = self.build_form(task).await?;

        let client = task.client().unwrap_or(&self.client);
        let mut request = client.post(task.url()).multipart(form);
        if let Some(hook) = task.request_hook().or(self.request_hook.as_ref()) {
            request = hook(request, task.as_ref());
        }

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(TransferError::Stopped(task.state()).into()),
            response = request.send() => response?,
        };
        // Keep the whole response body for the terminal callback
        let meta = ResponseMeta::from_response(&response);
        let body = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(TransferError::Stopped(task.state()).into()),
            body = response.bytes() => body?.to_vec(),
        };
        let info = ResponseInfo {
            meta,
            body: Some(body),
        };
        if !info.meta.is_success() {
            return Err(TaskFailure {
                error: Some(TransferError::Status {
                    status: info.meta.status,
                }),
                response: Some(info),
            });
        }
        Ok(info)
    }
}

impl Engine for UploadEngine {
    type Task = UploadTask;

    fn transfer(
        self: Arc<Self>,
        task: Arc<UploadTask>,
        _peers: Arc<TaskRegistry<UploadTask>>,
    ) -> BoxFuture<'static, RunOutcome> {
        Box::pin(self.run(task))
    }

    fn deliver_forced_stop(&self, task: &UploadTask) {
        self.settle_files(task, None);
        let failure = TaskFailure::forced();
        for listener in self.listeners(task) {
            listener.on_failure(task, &failure);
        }
    }

    fn refresh_notification(&self, task: &UploadTask) {
        for file in task.files() {
            self.refresh_file_notification(task, file);
        }
    }

    fn clear_notification(&self, task: &UploadTask) {
        let stopped = task.control().is_stop();
        for file in task.files() {
            file.notification.clear(self.notifications.as_ref(), stopped);
        }
    }

    fn events(&self) -> &broadcast::Sender<TaskEvent> {
        &self.events
    }
}
