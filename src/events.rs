//! Event payloads broadcast to UI observers

use serde::Serialize;
use tokio::sync::broadcast;

use crate::progress::Progress;
use crate::task::{TaskId, TaskState};

/// Capacity of each manager's event channel; slow subscribers lag, they
/// never block an engine.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    StatusChanged {
        task_id: TaskId,
        status: TaskState,
        error: Option<String>,
    },
    Progress {
        task_id: TaskId,
        /// Form field name for upload file parts.
        parameter: Option<String>,
        percent: u32,
        current: i64,
        total: i64,
    },
    Removed {
        task_id: TaskId,
    },
}

impl TaskEvent {
    pub fn progress(task_id: &TaskId, parameter: Option<&str>, progress: Progress) -> Self {
        TaskEvent::Progress {
            task_id: task_id.clone(),
            parameter: parameter.map(|name| name.to_string()),
            percent: progress.percentage(),
            current: progress.current,
            total: progress.total,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        match self {
            TaskEvent::StatusChanged { task_id, .. }
            | TaskEvent::Progress { task_id, .. }
            | TaskEvent::Removed { task_id } => task_id,
        }
    }
}

pub(crate) fn channel() -> broadcast::Sender<TaskEvent> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}

/// Sends without caring whether anyone listens.
pub(crate) fn emit(events: &broadcast::Sender<TaskEvent>, event: TaskEvent) {
    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_with_tag_and_lowercase_state() {
        let event = TaskEvent::StatusChanged {
            task_id: TaskId::from("t1"),
            status: TaskState::Pause,
            error: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status_changed");
        assert_eq!(json["task_id"], "t1");
        assert_eq!(json["status"], "pause");
    }

    #[test]
    fn progress_event_carries_percent() {
        let event = TaskEvent::progress(&TaskId::from("t2"), Some("file"), Progress::new(200, 50));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["percent"], 25);
        assert_eq!(json["parameter"], "file");
        assert_eq!(event.task_id().as_str(), "t2");
    }
}
