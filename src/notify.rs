//! Notification bridge: renders task state into platform-neutral content and
//! hands it to whatever displays it.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::OnceLock;

use crate::progress::Progress;
use crate::task::TaskState;

pub type NotificationId = i32;

/// Titles longer than this are shortened to `start..end`.
const TITLE_MAX_CHARS: usize = 20;

static NEXT_NOTIFICATION_ID: AtomicI32 = AtomicI32::new(1000);

/// Display side of notifications. Implementations must not block.
pub trait NotificationBridge: Send + Sync {
    fn show(&self, id: NotificationId, content: &NotificationContent);
    fn cancel(&self, id: NotificationId);
}

/// Bridge that drops everything, used when no bridge is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifications;

impl NotificationBridge for NoopNotifications {
    fn show(&self, _id: NotificationId, _content: &NotificationContent) {}
    fn cancel(&self, _id: NotificationId) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NotificationProgress {
    pub max: u32,
    pub current: u32,
    pub indeterminate: bool,
}

impl NotificationProgress {
    pub const COMPLETED: Self = Self {
        max: 100,
        current: 100,
        indeterminate: false,
    };

    fn of(progress: Progress) -> Self {
        Self {
            max: 100,
            current: progress.percentage().min(100),
            indeterminate: progress.is_indeterminate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationContent {
    pub state: TaskState,
    pub title: String,
    pub text: String,
    pub progress: Option<NotificationProgress>,
    pub ongoing: bool,
    pub auto_cancel: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Show(NotificationContent),
    Cancel,
    Skip,
}

/// Values substituted into templates: `{fileName}`, `{showName}`, `{length}`,
/// `{percentage}`.
#[derive(Debug, Clone, Copy)]
pub struct Placeholders<'a> {
    pub file_name: &'a str,
    pub show_name: &'a str,
    pub progress: Option<Progress>,
}

/// How a task's notification looks in each state. Immutable once built;
/// task-level options replace manager-level ones wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationOptions {
    pub enabled: bool,
    pub notification_id: Option<NotificationId>,
    pub title: String,
    pub progress_text: String,
    pub wait_text: String,
    pub success_text: String,
    pub failure_text: String,
    pub pause_text: String,
    pub cancel_text: String,
    /// States in which the notification is removed instead of updated.
    pub auto_cancel_on: Vec<TaskState>,
    /// When false, `title` and `progress_text` are shown verbatim.
    pub format_content: bool,
    pub ongoing: Option<bool>,
    pub auto_cancel: Option<bool>,
}

impl Default for NotificationOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            notification_id: None,
            title: "{showName}".to_string(),
            progress_text: "{length} | {percentage}".to_string(),
            wait_text: "Waiting".to_string(),
            success_text: "Completed".to_string(),
            failure_text: "Failed".to_string(),
            pause_text: "Paused".to_string(),
            cancel_text: "Cancelled".to_string(),
            auto_cancel_on: vec![TaskState::Cancel],
            format_content: true,
            ongoing: None,
            auto_cancel: None,
        }
    }
}

impl NotificationOptions {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    fn format(&self, template: &str, values: &Placeholders<'_>) -> String {
        let progress = values.progress.unwrap_or(Progress::new(-1, 0));
        template
            .replace("{fileName}", values.file_name)
            .replace("{showName}", values.show_name)
            .replace("{length}", &progress.length_string())
            .replace("{percentage}", &progress.percentage_string())
    }

    pub fn render(&self, state: TaskState, values: &Placeholders<'_>) -> Rendered {
        if !self.enabled || self.auto_cancel_on.contains(&state) {
            return Rendered::Cancel;
        }
        if state == TaskState::None {
            return Rendered::Skip;
        }

        let running = state.is_running();
        let ongoing = self.ongoing.unwrap_or(running);
        let auto_cancel = self.auto_cancel.unwrap_or(!running);

        if !self.format_content {
            return Rendered::Show(NotificationContent {
                state,
                title: self.title.clone(),
                text: self.progress_text.clone(),
                progress: None,
                ongoing,
                auto_cancel,
            });
        }

        let title = abbreviate(&self.format(&self.title, values), TITLE_MAX_CHARS);
        let determinate = values.progress.filter(|p| !p.is_indeterminate());
        let (text, progress) = match state {
            TaskState::Running => (
                self.format(&self.progress_text, values),
                Some(
                    values
                        .progress
                        .map(NotificationProgress::of)
                        .unwrap_or(NotificationProgress {
                            max: 100,
                            current: 0,
                            indeterminate: true,
                        }),
                ),
            ),
            TaskState::Wait => (self.format(&self.wait_text, values), None),
            TaskState::Success => (
                self.format(&self.success_text, values),
                Some(NotificationProgress::COMPLETED),
            ),
            TaskState::Failure => (
                self.format(&self.failure_text, values),
                determinate.map(NotificationProgress::of),
            ),
            TaskState::Pause => (
                self.format(&self.pause_text, values),
                determinate.map(NotificationProgress::of),
            ),
            TaskState::Cancel => (
                self.format(&self.cancel_text, values),
                determinate.map(NotificationProgress::of),
            ),
            TaskState::None => return Rendered::Skip,
        };

        Rendered::Show(NotificationContent {
            state,
            title,
            text,
            progress,
            ongoing,
            auto_cancel,
        })
    }
}

/// Shortens `text` to `max_chars` characters as `start..end`.
pub fn abbreviate(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }
    let head = max_chars / 2;
    let tail = max_chars - head;
    let start: String = chars[..head].iter().collect();
    let end: String = chars[chars.len() - tail..].iter().collect();
    format!("{}..{}", start, end)
}

/// Per-task notification handle: a lazily assigned id and a kill switch.
#[derive(Debug, Default)]
pub(crate) struct NotificationSlot {
    id: OnceLock<NotificationId>,
    disabled: AtomicBool,
}

impl NotificationSlot {
    fn id_for(&self, options: &NotificationOptions) -> NotificationId {
        *self.id.get_or_init(|| {
            options
                .notification_id
                .unwrap_or_else(|| NEXT_NOTIFICATION_ID.fetch_add(1, Ordering::Relaxed))
        })
    }

    /// Renders and publishes, or cancels when the slot was disabled.
    pub(crate) fn publish(
        &self,
        bridge: &dyn NotificationBridge,
        options: Option<&NotificationOptions>,
        state: TaskState,
        values: &Placeholders<'_>,
    ) {
        if self.disabled.load(Ordering::SeqCst) {
            if let Some(id) = self.id.get() {
                bridge.cancel(*id);
            }
            return;
        }
        let Some(options) = options else {
            return;
        };
        match options.render(state, values) {
            Rendered::Show(content) => bridge.show(self.id_for(options), &content),
            Rendered::Cancel => {
                if let Some(id) = self.id.get() {
                    bridge.cancel(*id);
                }
            }
            Rendered::Skip => {}
        }
    }

    /// Stopped tasks lose their notification now; running ones stop
    /// publishing and lose it on their next update.
    pub(crate) fn clear(&self, bridge: &dyn NotificationBridge, stopped: bool) {
        self.disabled.store(true, Ordering::SeqCst);
        if stopped {
            if let Some(id) = self.id.get() {
                bridge.cancel(*id);
            }
        }
    }

    pub(crate) fn enable(&self) {
        self.disabled.store(false, Ordering::SeqCst);
    }
}
