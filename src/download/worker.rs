//! Download worker - ranged resume, fallback retry, chunked streaming and
//! throttled progress

use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use range_dl::ResponseMeta;
use reqwest::Client;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;
use crate::events::{emit, TaskEvent};
use crate::notify::{NotificationBridge, NotificationOptions, Placeholders};
use crate::progress::{Progress, ProgressThrottle};
use crate::registry::TaskRegistry;
use crate::scheduler::{Engine, RunOutcome};
use crate::task::{NetworkTask, ResponseInfo, TaskFailure, TaskState};

use super::types::{DownloadListener, DownloadTask, FileNameChoice, RequestHook};

/// Longest error body kept for listeners.
const MAX_ERROR_BODY: usize = 64 * 1024;

pub(crate) struct DownloadEngine {
    pub(crate) client: Client,
    pub(crate) chunk_size: usize,
    pub(crate) progress_interval: Duration,
    pub(crate) listener: Option<Arc<dyn DownloadListener>>,
    pub(crate) notifications: Arc<dyn NotificationBridge>,
    pub(crate) notification_options: Option<NotificationOptions>,
    pub(crate) request_hook: Option<RequestHook>,
    pub(crate) events: broadcast::Sender<TaskEvent>,
}

/// Runs `fut` unless the task's abort token fires first.
async fn unless_stopped<F, T>(task: &DownloadTask, token: &CancellationToken, fut: F) -> Result<T, TaskFailure>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(stopped(task)),
        out = fut => Ok(out),
    }
}

fn stopped(task: &DownloadTask) -> TaskFailure {
    TransferError::Stopped(task.state()).into()
}

impl DownloadEngine {
    fn listeners<'a>(&'a self, task: &'a DownloadTask) -> impl Iterator<Item = &'a Arc<dyn DownloadListener>> {
        task.listener().into_iter().chain(self.listener.iter())
    }

    fn notification_options<'a>(&'a self, task: &'a DownloadTask) -> Option<&'a NotificationOptions> {
        task.notification_options()
            .or(self.notification_options.as_ref())
    }

    fn report_progress(
        &self,
        task: &DownloadTask,
        throttle: &mut ProgressThrottle,
        progress: Progress,
        is_final: bool,
    ) {
        let now = tokio::time::Instant::now().into_std();
        if !throttle.should_emit(progress, is_final, now) {
            return;
        }
        task.set_current_progress(progress);
        for listener in self.listeners(task) {
            listener.on_progress(task, progress);
        }
        emit(&self.events, TaskEvent::progress(task.id(), None, progress));
        self.refresh_notification(task);
    }

    async fn run(&self, task: Arc<DownloadTask>, peers: &TaskRegistry<DownloadTask>) -> RunOutcome {
        let Some(token) = task.control().begin() else {
            debug!("download_skip: {} stopped before start", task.id());
            return RunOutcome::Skipped;
        };
        info!("download_start: {} url={}", task.id(), task.url());
        emit(
            &self.events,
            TaskEvent::StatusChanged {
                task_id: task.id().clone(),
                status: TaskState::Running,
                error: None,
            },
        );
        self.refresh_notification(&task);

        let interval = task.progress_interval().unwrap_or(self.progress_interval);
        let breakpoint = task.breakpoint().await;

        let mut throttle = ProgressThrottle::new(interval);
        let mut result = self.attempt(&task, peers, &token, &mut throttle, false).await;

        // A failed resume gets exactly one retry from scratch, unless the
        // failure came from a stop request
        if let Err(failure) = &result {
            let stopped = failure.error.as_ref().is_some_and(TransferError::is_stopped);
            if task.is_breakpoint_resume() && breakpoint > 0 && !stopped && !task.control().is_stop() {
                warn!(
                    "download_range_fallback: {} breakpoint={} error={}",
                    task.id(),
                    breakpoint,
                    failure
                );
                throttle = ProgressThrottle::new(interval);
                result = self.attempt(&task, peers, &token, &mut throttle, true).await;
            }
        }

        match result {
            Ok(response) if task.control().succeed() => {
                info!(
                    "download_finish: {} path={:?} bytes={}",
                    task.id(),
                    task.save_path(),
                    task.current_progress().map(|p| p.current).unwrap_or(0)
                );
                for listener in self.listeners(&task) {
                    listener.on_success(&task, Some(&response));
                }
                RunOutcome::Finished { error: None }
            }
            Ok(response) => {
                // stopped after the last byte arrived; the stop wins
                let failure = TaskFailure {
                    error: Some(TransferError::Stopped(task.state())),
                    response: Some(response),
                };
                self.finish_failed(&task, failure)
            }
            Err(failure) => self.finish_failed(&task, failure),
        }
    }

    fn finish_failed(&self, task: &DownloadTask, failure: TaskFailure) -> RunOutcome {
        let state = task.control().fail_if_not_stop();
        if state == TaskState::Failure {
            warn!("download_failed: {} error={}", task.id(), failure);
        } else {
            info!("download_stopped: {} state={}", task.id(), state);
        }
        let error = failure.to_string();
        for listener in self.listeners(task) {
            listener.on_failure(task, &failure);
        }
        RunOutcome::Finished { error: Some(error) }
    }

    /// One request/stream cycle. `is_retry` marks the single fallback attempt
    /// made without a `Range` header.
    async fn attempt(
        &self,
        task: &DownloadTask,
        peers: &TaskRegistry<DownloadTask>,
        token: &CancellationToken,
        throttle: &mut ProgressThrottle,
        is_retry: bool,
    ) -> Result<ResponseInfo, TaskFailure> {
        let breakpoint = task.breakpoint().await;
        let use_range = task.is_breakpoint_resume() && !is_retry && breakpoint > 0;
        let mut current: i64 = if use_range { breakpoint as i64 } else { 0 };

        // Ask only for the missing tail when resuming
        let client = task.client().unwrap_or(&self.client);
        let mut request = client.get(task.url());
        if use_range {
            request = range_dl::with_range(request, breakpoint);
        }
        if let Some(hook) = task.request_hook().or(self.request_hook.as_ref()) {
            request = hook(request, task);
        }

        debug!(
            "download_request: {} range={} retry={}",
            task.id(),
            use_range,
            is_retry
        );
        let response = unless_stopped(task, token, request.send()).await??;
        let meta = ResponseMeta::from_response(&response);

        // Error statuses carry a capped body for the failure callback
        if !meta.is_success() {
            let body = unless_stopped(task, token, response.bytes())
                .await?
                .ok()
                .map(|bytes| bytes[..bytes.len().min(MAX_ERROR_BODY)].to_vec());
            return Err(TaskFailure {
                error: Some(TransferError::Status {
                    status: meta.status,
                }),
                response: Some(ResponseInfo { meta, body }),
            });
        }

        let mut total: i64 = meta.content_length.map(|len| len as i64).unwrap_or(-1);

        // The retry shows the partial file was already the whole thing
        if is_retry && task.is_breakpoint_resume() && breakpoint > 0 && total == breakpoint as i64 {
            info!(
                "download_already_complete: {} bytes={}",
                task.id(),
                breakpoint
            );
            self.report_progress(task, throttle, Progress::new(total, total), true);
            return Ok(ResponseInfo { meta, body: None });
        }

        let mut file = if breakpoint > 0 {
            // Range ignored, resume disabled or falling back: start over
            if !task.is_breakpoint_resume() || is_retry || !meta.accepts_ranges {
                if let Some(path) = task.save_path() {
                    debug!("download_discard_partial: {} path={:?}", task.id(), path);
                    match tokio::fs::remove_file(&path).await {
                        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
                        _ => {}
                    }
                }
                current = 0;
            } else if total > 0 {
                total += current;
            }
            let path = task
                .save_path()
                .ok_or_else(|| TransferError::InvalidUrl(task.url().to_string()))?;
            open_append(&path, false).await?
        } else {
            self.claim_destination(task, peers, meta.file_name.as_deref())
                .await?
        };

        self.report_progress(task, throttle, Progress::new(total, current), false);

        let mut reader = range_dl::response_reader(response, self.chunk_size);
        let copied = self
            .copy_body(task, token, throttle, &mut reader, &mut file, total, &mut current)
            .await;
        let flushed = file.flush().await;
        drop(file);
        copied?;
        flushed?;

        self.report_progress(task, throttle, Progress::new(current, current), true);
        Ok(ResponseInfo { meta, body: None })
    }

    /// Settles the file name and opens it. The name is reserved against
    /// live tasks under the registry lock; a derived name must also not
    /// exist on disk yet, which `create_new` checks atomically.
    async fn claim_destination(
        &self,
        task: &DownloadTask,
        peers: &TaskRegistry<DownloadTask>,
        response_name: Option<&str>,
    ) -> Result<File, TaskFailure> {
        let choice = task.file_name_choice(response_name);
        let fresh = matches!(choice, FileNameChoice::Fresh { .. });
        let mut n = 0;
        loop {
            let name = choice.nth(n);
            n += 1;
            let path = task.save_dir().join(&name);
            let reserved =
                peers.reserve_destination(task, &path, || task.set_full_file_name(Some(name.clone())));
            if !reserved {
                if fresh {
                    continue;
                }
                return Err(TransferError::DestinationInUse(path).into());
            }
            match open_append(&path, fresh).await {
                Ok(file) => {
                    debug!("download_destination: {} path={:?}", task.id(), path);
                    return Ok(file);
                }
                Err(e) if fresh && e.kind() == io::ErrorKind::AlreadyExists => {
                    task.set_full_file_name(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn copy_body<R: AsyncRead + Unpin>(
        &self,
        task: &DownloadTask,
        token: &CancellationToken,
        throttle: &mut ProgressThrottle,
        reader: &mut range_dl::ChunkReader<R>,
        file: &mut tokio::fs::File,
        total: i64,
        current: &mut i64,
    ) -> Result<(), TaskFailure> {
        loop {
            if task.control().is_stop() {
                return Err(stopped(task));
            }
            let Some(chunk) = unless_stopped(task, token, reader.next_chunk()).await?? else {
                return Ok(());
            };
            file.write_all(chunk).await?;
            *current += chunk.len() as i64;
            self.report_progress(task, throttle, Progress::new(total, *current), false);
        }
    }
}

async fn open_append(path: &std::path::Path, create_new: bool) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut options = OpenOptions::new();
    options.append(true);
    if create_new {
        options.create_new(true);
    } else {
        options.create(true);
    }
    options.open(path).await
}

impl Engine for DownloadEngine {
    type Task = DownloadTask;

    fn transfer(
        self: Arc<Self>,
        task: Arc<DownloadTask>,
        peers: Arc<TaskRegistry<DownloadTask>>,
    ) -> BoxFuture<'static, RunOutcome> {
        Box::pin(async move { self.run(task, &peers).await })
    }

    fn deliver_forced_stop(&self, task: &DownloadTask) {
        let failure = TaskFailure::forced();
        for listener in self.listeners(task) {
            listener.on_failure(task, &failure);
        }
    }

    fn refresh_notification(&self, task: &DownloadTask) {
        let file_name = task.full_file_name().unwrap_or_default();
        let show_name = task.show_name();
        task.notification.publish(
            self.notifications.as_ref(),
            self.notification_options(task),
            task.state(),
            &Placeholders {
                file_name: &file_name,
                show_name: &show_name,
                progress: task.current_progress(),
            },
        );
    }

    fn clear_notification(&self, task: &DownloadTask) {
        task.notification
            .clear(self.notifications.as_ref(), task.control().is_stop());
    }

    fn events(&self) -> &broadcast::Sender<TaskEvent> {
        &self.events
    }
}
