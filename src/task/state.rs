//! Task lifecycle states and the per-task control block

use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    #[default]
    None,
    Wait,
    Running,
    Pause,
    Cancel,
    Failure,
    Success,
}

impl TaskState {
    /// Terminal for the current invocation.
    pub fn is_stop(self) -> bool {
        matches!(
            self,
            TaskState::Pause | TaskState::Cancel | TaskState::Failure | TaskState::Success
        )
    }

    pub fn is_running(self) -> bool {
        self == TaskState::Running
    }

    /// Admitted tasks hold a lane from dispatch until they stop.
    pub(crate) fn occupies_lane(self) -> bool {
        matches!(self, TaskState::None | TaskState::Running)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::None => write!(f, "none"),
            TaskState::Wait => write!(f, "wait"),
            TaskState::Running => write!(f, "running"),
            TaskState::Pause => write!(f, "pause"),
            TaskState::Cancel => write!(f, "cancel"),
            TaskState::Failure => write!(f, "failure"),
            TaskState::Success => write!(f, "success"),
        }
    }
}

impl From<&str> for TaskState {
    fn from(value: &str) -> Self {
        match value {
            "wait" => TaskState::Wait,
            "running" => TaskState::Running,
            "pause" => TaskState::Pause,
            "cancel" => TaskState::Cancel,
            "failure" => TaskState::Failure,
            "success" => TaskState::Success,
            _ => TaskState::None,
        }
    }
}

/// Who asked a task to stop. Bulk stops do not promote waiting tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Human,
    HumanAll,
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopOutcome {
    /// The engine was running and has been signalled; it delivers the callbacks.
    Signalled,
    /// No engine was running; the caller must deliver the failure callbacks.
    Forced,
    AlreadyStopped,
}

struct ControlInner {
    state: TaskState,
    reason: Option<StopReason>,
    abort: CancellationToken,
}

/// Identity, state and abort handle of one task.
///
/// All transitions go through here so that only the moves of the lifecycle
/// (`None -> Wait -> None -> Running -> stopped`) can ever happen.
pub struct TaskControl {
    id: TaskId,
    inner: Mutex<ControlInner>,
    busy: watch::Sender<bool>,
}

impl TaskControl {
    pub fn new(id: TaskId) -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            id,
            inner: Mutex::new(ControlInner {
                state: TaskState::None,
                reason: None,
                abort: CancellationToken::new(),
            }),
            busy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, inner: &mut ControlInner, to: TaskState) {
        debug!("task_state: {} {} -> {}", self.id, inner.state, to);
        inner.state = to;
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn state(&self) -> TaskState {
        self.lock().state
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.lock().reason
    }

    pub fn is_stop(&self) -> bool {
        self.state().is_stop()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Whether an engine invocation for this task is still alive.
    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    /// Resolves once no engine invocation is alive.
    pub async fn wait_idle(&self) {
        let mut rx = self.busy.subscribe();
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    pub(crate) fn set_busy(&self, busy: bool) {
        self.busy.send_replace(busy);
    }

    /// `None -> Running`. Returns the abort token of this invocation, or
    /// `None` when the task was stopped before its engine got going.
    pub(crate) fn begin(&self) -> Option<CancellationToken> {
        let mut inner = self.lock();
        if inner.state != TaskState::None {
            return None;
        }
        self.transition(&mut inner, TaskState::Running);
        Some(inner.abort.clone())
    }

    /// `None -> Wait`.
    pub(crate) fn park(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != TaskState::None {
            return false;
        }
        self.transition(&mut inner, TaskState::Wait);
        true
    }

    /// `Wait -> None`.
    pub(crate) fn wake(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != TaskState::Wait {
            return false;
        }
        self.transition(&mut inner, TaskState::None);
        true
    }

    /// Starts a new invocation of a stopped task. Refused while the previous
    /// engine invocation is still alive.
    pub(crate) fn rearm(&self) -> bool {
        if self.is_busy() {
            return false;
        }
        let mut inner = self.lock();
        if !inner.state.is_stop() {
            return inner.state == TaskState::None;
        }
        self.transition(&mut inner, TaskState::None);
        inner.reason = None;
        inner.abort = CancellationToken::new();
        true
    }

    pub(crate) fn request_stop(&self, target: TaskState, reason: StopReason) -> StopOutcome {
        debug_assert!(target.is_stop());
        let mut inner = self.lock();
        match inner.state {
            TaskState::Running => {
                self.transition(&mut inner, target);
                inner.reason = Some(reason);
                inner.abort.cancel();
                StopOutcome::Signalled
            }
            TaskState::None | TaskState::Wait => {
                self.transition(&mut inner, target);
                inner.reason = Some(reason);
                StopOutcome::Forced
            }
            _ => StopOutcome::AlreadyStopped,
        }
    }

    /// `Running -> Success`; false if something stopped the task first.
    pub(crate) fn succeed(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != TaskState::Running {
            return false;
        }
        self.transition(&mut inner, TaskState::Success);
        true
    }

    /// `Running -> Failure` unless already stopped. Returns the resulting state.
    pub(crate) fn fail_if_not_stop(&self) -> TaskState {
        let mut inner = self.lock();
        if inner.state == TaskState::Running {
            self.transition(&mut inner, TaskState::Failure);
        }
        inner.state
    }
}

impl std::fmt::Debug for TaskControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskControl")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("busy", &self.is_busy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control() -> TaskControl {
        TaskControl::new(TaskId::new())
    }

    #[test]
    fn task_state_display_matches_expected_strings() {
        assert_eq!(TaskState::None.to_string(), "none");
        assert_eq!(TaskState::Wait.to_string(), "wait");
        assert_eq!(TaskState::Running.to_string(), "running");
        assert_eq!(TaskState::Pause.to_string(), "pause");
        assert_eq!(TaskState::Cancel.to_string(), "cancel");
        assert_eq!(TaskState::Failure.to_string(), "failure");
        assert_eq!(TaskState::Success.to_string(), "success");
    }

    #[test]
    fn task_state_from_str_round_trips_display() {
        for state in [
            TaskState::Wait,
            TaskState::Running,
            TaskState::Pause,
            TaskState::Cancel,
            TaskState::Failure,
            TaskState::Success,
        ] {
            assert_eq!(TaskState::from(state.to_string().as_str()), state);
        }
        assert_eq!(TaskState::from("bogus"), TaskState::None);
    }

    #[test]
    fn stop_classification() {
        assert!(!TaskState::None.is_stop());
        assert!(!TaskState::Wait.is_stop());
        assert!(!TaskState::Running.is_stop());
        assert!(TaskState::Pause.is_stop());
        assert!(TaskState::Success.is_stop());
        assert!(TaskState::Running.is_running());
        assert!(!TaskState::None.is_running());
    }

    #[test]
    fn begin_only_from_none() {
        let c = control();
        assert!(c.begin().is_some());
        assert_eq!(c.state(), TaskState::Running);
        assert!(c.begin().is_none());
    }

    #[test]
    fn stop_running_task_signals_abort_token() {
        let c = control();
        let token = c.begin().unwrap();
        assert_eq!(
            c.request_stop(TaskState::Pause, StopReason::Human),
            StopOutcome::Signalled
        );
        assert!(token.is_cancelled());
        assert_eq!(c.state(), TaskState::Pause);
        assert_eq!(c.stop_reason(), Some(StopReason::Human));
    }

    #[test]
    fn stop_waiting_task_is_forced() {
        let c = control();
        assert!(c.park());
        assert_eq!(
            c.request_stop(TaskState::Cancel, StopReason::HumanAll),
            StopOutcome::Forced
        );
        assert_eq!(c.state(), TaskState::Cancel);
    }

    #[test]
    fn stopped_task_ignores_further_stops_and_success() {
        let c = control();
        c.begin();
        c.request_stop(TaskState::Cancel, StopReason::Human);
        assert_eq!(
            c.request_stop(TaskState::Pause, StopReason::Human),
            StopOutcome::AlreadyStopped
        );
        assert!(!c.succeed());
        assert_eq!(c.fail_if_not_stop(), TaskState::Cancel);
    }

    #[test]
    fn rearm_resets_stopped_task_with_fresh_token() {
        let c = control();
        let first = c.begin().unwrap();
        c.request_stop(TaskState::Pause, StopReason::Human);
        assert!(c.rearm());
        assert_eq!(c.state(), TaskState::None);
        assert_eq!(c.stop_reason(), None);
        let second = c.begin().unwrap();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[test]
    fn rearm_refused_while_engine_alive() {
        let c = control();
        c.begin();
        c.set_busy(true);
        c.request_stop(TaskState::Pause, StopReason::Human);
        assert!(!c.rearm());
        c.set_busy(false);
        assert!(c.rearm());
    }

    #[tokio::test]
    async fn wait_idle_resolves_after_busy_cleared() {
        let c = std::sync::Arc::new(control());
        c.set_busy(true);
        let waiter = {
            let c = c.clone();
            tokio::spawn(async move { c.wait_idle().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        c.set_busy(false);
        waiter.await.unwrap();
    }
}
