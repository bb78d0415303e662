//! Ordered task collection with admission rules and the lane quota

use log::{debug, info, warn};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::task::{NetworkTask, TaskId, TaskState};

/// What the caller must do with a task the registry accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A lane was reserved; start the engine.
    Dispatch,
    /// No lane free; the task is parked in `Wait`.
    Wait,
}

struct RegistryInner<T> {
    tasks: Vec<Arc<T>>,
    lanes: i32,
}

impl<T: NetworkTask> RegistryInner<T> {
    /// Lanes held by admitted tasks: running ones plus those dispatched but
    /// not yet started.
    fn occupied_lanes(&self) -> usize {
        self.tasks
            .iter()
            .filter(|task| task.state().occupies_lane())
            .count()
    }

    fn free_lanes(&self) -> usize {
        if self.lanes <= 0 {
            return usize::MAX;
        }
        (self.lanes as usize).saturating_sub(self.occupied_lanes())
    }
}

/// Insertion-ordered set of tasks, unique by id.
///
/// Every method runs under one lock so admission, removal and requeueing
/// never interleave.
pub struct TaskRegistry<T> {
    inner: Mutex<RegistryInner<T>>,
}

impl<T: NetworkTask> TaskRegistry<T> {
    pub fn new(lanes: i32) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                tasks: Vec::new(),
                lanes,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits `task`, or returns `None` without side effects when it clashes
    /// with a live task (same id, or a shared destination file).
    ///
    /// A stopped task with the same id is replaced in place and the new
    /// submission starts from `None`.
    pub fn submit(&self, task: &Arc<T>) -> Option<Admission> {
        let mut inner = self.lock();
        let id = task.id();
        let destinations = task.destinations();

        if let Some(other) = inner.tasks.iter().find(|other| {
            other.id() != id
                && !other.state().is_stop()
                && other
                    .destinations()
                    .iter()
                    .any(|path| destinations.contains(path))
        }) {
            warn!("task_rejected: {} destination in use by {}", id, other.id());
            return None;
        }

        let slot = inner.tasks.iter().position(|other| other.id() == id);
        if let Some(index) = slot {
            let existing = &inner.tasks[index];
            if !existing.state().is_stop() || existing.control().is_busy() {
                warn!(
                    "task_rejected: {} already registered state={}",
                    id,
                    existing.state()
                );
                return None;
            }
        }

        if !task.control().rearm() {
            warn!("task_rejected: {} not resubmittable state={}", id, task.state());
            return None;
        }

        task.on_resubmit();
        match slot {
            Some(index) => inner.tasks[index] = task.clone(),
            None => inner.tasks.push(task.clone()),
        }

        // the new task is in `None` and already counted
        let occupied = inner.occupied_lanes();
        if inner.lanes <= 0 || occupied <= inner.lanes as usize {
            info!(
                "task_admitted: {} lanes={} occupied={}",
                id, inner.lanes, occupied
            );
            Some(Admission::Dispatch)
        } else {
            task.control().park();
            info!("task_waiting: {} lanes={} occupied={}", id, inner.lanes, occupied - 1);
            Some(Admission::Wait)
        }
    }

    /// Runs `claim` unless another live task already writes to `path`.
    ///
    /// Used for destinations only known after admission; `claim` records
    /// the path on `task` while the lock is held so the next check sees it.
    pub fn reserve_destination(&self, task: &T, path: &Path, claim: impl FnOnce()) -> bool {
        let inner = self.lock();
        if let Some(other) = inner.tasks.iter().find(|other| {
            other.id() != task.id()
                && !other.state().is_stop()
                && other.destinations().iter().any(|taken| taken == path)
        }) {
            debug!("destination_taken: {} path={:?} by {}", task.id(), path, other.id());
            return false;
        }
        claim();
        true
    }

    pub fn remove(&self, id: &TaskId) -> Option<Arc<T>> {
        let mut inner = self.lock();
        let index = inner.tasks.iter().position(|task| task.id() == id)?;
        debug!("task_removed: {}", id);
        Some(inner.tasks.remove(index))
    }

    /// Promotes waiting tasks to `None`, oldest first, up to the free quota.
    /// The caller dispatches the returned tasks.
    pub fn requeue_waiting(&self) -> Vec<Arc<T>> {
        let inner = self.lock();
        let mut free = inner.free_lanes();
        let mut promoted = Vec::new();
        for task in &inner.tasks {
            if free == 0 {
                break;
            }
            if task.control().wake() {
                promoted.push(task.clone());
                free -= 1;
            }
        }
        if !promoted.is_empty() {
            info!(
                "queue_check: promoted={} lanes={}",
                promoted.len(),
                inner.lanes
            );
        }
        promoted
    }

    /// Changes the quota and promotes waiting tasks into any new room.
    pub fn set_lanes(&self, lanes: i32) -> Vec<Arc<T>> {
        self.lock().lanes = lanes;
        self.requeue_waiting()
    }

    pub fn lanes(&self) -> i32 {
        self.lock().lanes
    }

    /// Tasks currently in `Running`.
    pub fn running_count(&self) -> usize {
        self.lock()
            .tasks
            .iter()
            .filter(|task| task.state().is_running())
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }

    pub fn tasks(&self) -> Vec<Arc<T>> {
        self.lock().tasks.clone()
    }

    pub fn tasks_in_state(&self, state: TaskState) -> Vec<Arc<T>> {
        self.lock()
            .tasks
            .iter()
            .filter(|task| task.state() == state)
            .cloned()
            .collect()
    }

    pub fn find_by_url(&self, url: &str) -> Option<Arc<T>> {
        self.lock().tasks.iter().find(|task| task.url() == url).cloned()
    }

    pub fn find_by_id(&self, id: &TaskId) -> Option<Arc<T>> {
        self.lock().tasks.iter().find(|task| task.id() == id).cloned()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.lock().tasks.iter().any(|task| task.id() == id)
    }
}
