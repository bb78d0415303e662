//! Dispatch core shared by the download and upload managers: admission,
//! spawning engine invocations, stop handling and requeueing.

use futures_util::future::BoxFuture;
use log::{info, warn};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::error::{Result, TransferError};
use crate::events::{emit, TaskEvent};
use crate::registry::{Admission, TaskRegistry};
use crate::task::state::StopOutcome;
use crate::task::{NetworkTask, StopReason, TaskId, TaskState};

/// How an engine invocation ended.
pub(crate) enum RunOutcome {
    /// The task was stopped before the engine could start it.
    Skipped,
    Finished { error: Option<String> },
}

/// One direction of transfer (download or upload).
pub(crate) trait Engine: Send + Sync + 'static {
    type Task: NetworkTask;

    /// Runs one invocation and delivers exactly one terminal callback.
    /// `peers` is the registry the task was admitted to, for destinations
    /// settled mid-transfer.
    fn transfer(
        self: Arc<Self>,
        task: Arc<Self::Task>,
        peers: Arc<TaskRegistry<Self::Task>>,
    ) -> BoxFuture<'static, RunOutcome>;

    /// Failure callbacks for a task stopped while no engine was running it.
    fn deliver_forced_stop(&self, task: &Self::Task);

    fn refresh_notification(&self, task: &Self::Task);

    fn clear_notification(&self, task: &Self::Task);

    fn events(&self) -> &broadcast::Sender<TaskEvent>;
}

pub(crate) struct Scheduler<E: Engine> {
    engine: Arc<E>,
    registry: Arc<TaskRegistry<E::Task>>,
    runtime: Handle,
}

impl<E: Engine> Scheduler<E> {
    pub(crate) fn new(engine: E, lanes: i32) -> Result<Arc<Self>> {
        let runtime = Handle::try_current().map_err(|_| TransferError::NoRuntime)?;
        Ok(Arc::new(Self {
            engine: Arc::new(engine),
            registry: Arc::new(TaskRegistry::new(lanes)),
            runtime,
        }))
    }

    pub(crate) fn registry(&self) -> &TaskRegistry<E::Task> {
        &self.registry
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.engine.events().subscribe()
    }

    pub(crate) fn submit(self: &Arc<Self>, task: Arc<E::Task>) -> bool {
        let Some(admission) = self.registry.submit(&task) else {
            return false;
        };
        self.engine.refresh_notification(&task);
        self.report_state(&task, None);
        if admission == Admission::Dispatch {
            self.dispatch(task);
        }
        true
    }

    fn dispatch(self: &Arc<Self>, task: Arc<E::Task>) {
        task.control().set_busy(true);
        let scheduler = self.clone();
        let peers = self.registry.clone();
        self.runtime.spawn(async move {
            let outcome = scheduler.engine.clone().transfer(task.clone(), peers).await;
            task.control().set_busy(false);
            if let RunOutcome::Finished { error } = outcome {
                scheduler.state_changed(&task, error);
            }
        });
    }

    fn report_state(&self, task: &E::Task, error: Option<String>) {
        emit(
            self.engine.events(),
            TaskEvent::StatusChanged {
                task_id: task.id().clone(),
                status: task.state(),
                error,
            },
        );
    }

    /// Publishes a transition and, when the task stopped on its own or by a
    /// single stop request, promotes waiting tasks into the freed lane.
    fn state_changed(self: &Arc<Self>, task: &Arc<E::Task>, error: Option<String>) {
        self.engine.refresh_notification(task);
        self.report_state(task, error);

        let control = task.control();
        if control.is_stop() && control.stop_reason() != Some(StopReason::HumanAll) {
            self.start_promoted(self.registry.requeue_waiting());
        }
    }

    fn start_promoted(self: &Arc<Self>, promoted: Vec<Arc<E::Task>>) {
        for task in promoted {
            self.report_state(&task, None);
            self.dispatch(task);
        }
    }

    /// Moves a task to the stopped state `target`.
    ///
    /// A running engine is signalled and reports the outcome itself; a task
    /// with no engine gets its failure callbacks right here.
    pub(crate) fn stop(self: &Arc<Self>, task: &Arc<E::Task>, target: TaskState, reason: StopReason) -> bool {
        match task.control().request_stop(target, reason) {
            StopOutcome::Signalled => {
                info!("task_stop_signalled: {} target={}", task.id(), target);
                true
            }
            StopOutcome::Forced => {
                info!("task_stop_forced: {} target={}", task.id(), target);
                self.engine.deliver_forced_stop(task);
                self.state_changed(task, None);
                true
            }
            StopOutcome::AlreadyStopped => false,
        }
    }

    /// Removes a task. A parked (`Wait`) task is cancelled and removed. A
    /// dispatched or running one is only removed when `cancel_if_running` is
    /// set, and then only after its engine has exited.
    pub(crate) async fn remove(
        self: &Arc<Self>,
        id: &TaskId,
        cancel_if_running: bool,
        clear_notification: bool,
    ) -> bool {
        let Some(task) = self.registry.find_by_id(id) else {
            return false;
        };
        if !task.control().is_stop() {
            // parked tasks hold no lane and write nothing yet
            if !cancel_if_running && task.state() != TaskState::Wait {
                warn!("task_remove_refused: {} state={}", id, task.state());
                return false;
            }
            self.stop(&task, TaskState::Cancel, StopReason::Human);
        }
        self.detach(&task, clear_notification).await
    }

    async fn detach(&self, task: &Arc<E::Task>, clear_notification: bool) -> bool {
        task.control().wait_idle().await;
        if clear_notification {
            self.engine.clear_notification(task);
        }
        let removed = self.registry.remove(task.id()).is_some();
        if removed {
            emit(
                self.engine.events(),
                TaskEvent::Removed {
                    task_id: task.id().clone(),
                },
            );
        }
        removed
    }

    /// Removes every stopped task, cancelling live ones first when asked.
    /// Bulk cancellation does not promote waiting tasks.
    pub(crate) async fn clear(self: &Arc<Self>, cancel: bool, clear_notification: bool) -> usize {
        let tasks = self.registry.tasks();
        if cancel {
            for task in &tasks {
                self.stop(task, TaskState::Cancel, StopReason::HumanAll);
            }
        }
        let mut removed = 0;
        for task in &tasks {
            if task.control().is_stop() && self.detach(task, clear_notification).await {
                removed += 1;
            }
        }
        info!("task_clear: removed={} cancel={}", removed, cancel);
        removed
    }

    /// Cancels every live task without promoting waiting ones.
    pub(crate) fn cancel_all(self: &Arc<Self>, clear_notification: bool) -> usize {
        let mut cancelled = 0;
        for task in self.registry.tasks() {
            if self.stop(&task, TaskState::Cancel, StopReason::HumanAll) {
                cancelled += 1;
            }
            if clear_notification {
                self.engine.clear_notification(&task);
            }
        }
        info!("task_cancel_all: cancelled={}", cancelled);
        cancelled
    }

    pub(crate) fn set_lanes(self: &Arc<Self>, lanes: i32) {
        info!("lanes_changed: lanes={}", lanes);
        let promoted = self.registry.set_lanes(lanes);
        self.start_promoted(promoted);
    }
}
