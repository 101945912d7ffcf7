//! In-memory subscription state.
//!
//! Two independent kinds of subscription live here:
//!
//! - **Tasks**: `task_id` → [`TaskHandlers`]. Last registration wins.
//!   Entries stay resident after `task_unsubscribe`; dispatch for an id the
//!   hub no longer reports simply never happens.
//! - **Documents**: the open-documents sequence of [`DocKey`]s, guarded by
//!   the client-wide [`ThrottleGuard`].
//!
//! The registry never talks to the channel; the coordinator emits frames
//! after a successful mutation.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use crate::protocol::{DocKey, TaskUpdate};
use crate::throttle::ThrottleGuard;

/// Callback invoked with a task event payload.
pub type TaskHandler = Box<dyn FnMut(&TaskUpdate) + Send>;

/// Caller-supplied handler set for one task.
///
/// ```
/// use desk_realtime::TaskHandlers;
///
/// let handlers = TaskHandlers::new()
///     .on("progress", |update| println!("{} running", update.task_id))
///     .callback(|update| println!("{} finished", update.task_id))
///     .always(|_| {});
/// assert!(handlers.has_status("Progress"));
/// ```
#[derive(Default)]
pub struct TaskHandlers {
    by_status: HashMap<String, TaskHandler>,
    callback: Option<TaskHandler>,
    always: Option<TaskHandler>,
    error: Option<TaskHandler>,
}

impl TaskHandlers {
    /// Empty handler set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler for one status. Status names are matched case-insensitively.
    pub fn on(mut self, status: &str, handler: impl FnMut(&TaskUpdate) + Send + 'static) -> Self {
        self.by_status
            .insert(status.to_lowercase(), Box::new(handler));
        self
    }

    /// Generic success handler, fired on `success` after the status handler.
    pub fn callback(mut self, handler: impl FnMut(&TaskUpdate) + Send + 'static) -> Self {
        self.callback = Some(Box::new(handler));
        self
    }

    /// Fired on every dispatched event.
    pub fn always(mut self, handler: impl FnMut(&TaskUpdate) + Send + 'static) -> Self {
        self.always = Some(Box::new(handler));
        self
    }

    /// Fired when the payload carries a status code above 400.
    pub fn error(mut self, handler: impl FnMut(&TaskUpdate) + Send + 'static) -> Self {
        self.error = Some(Box::new(handler));
        self
    }

    /// Whether a handler is set for `status` (any case).
    pub fn has_status(&self, status: &str) -> bool {
        self.by_status.contains_key(&status.to_lowercase())
    }

    /// Lowercased status names with a handler.
    pub fn statuses(&self) -> impl Iterator<Item = &str> {
        self.by_status.keys().map(String::as_str)
    }

    /// Whether a success callback is set.
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Whether an `always` handler is set.
    pub fn has_always(&self) -> bool {
        self.always.is_some()
    }

    /// Whether an error handler is set.
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub(crate) fn status_mut(&mut self, status: &str) -> Option<&mut TaskHandler> {
        self.by_status.get_mut(status)
    }

    pub(crate) fn callback_mut(&mut self) -> Option<&mut TaskHandler> {
        self.callback.as_mut()
    }

    pub(crate) fn always_mut(&mut self) -> Option<&mut TaskHandler> {
        self.always.as_mut()
    }

    pub(crate) fn error_mut(&mut self) -> Option<&mut TaskHandler> {
        self.error.as_mut()
    }
}

impl fmt::Debug for TaskHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut statuses: Vec<&str> = self.statuses().collect();
        statuses.sort_unstable();
        f.debug_struct("TaskHandlers")
            .field("statuses", &statuses)
            .field("callback", &self.has_callback())
            .field("always", &self.has_always())
            .field("error", &self.has_error())
            .finish()
    }
}

/// Task and document subscriptions of one client.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    tasks: HashMap<String, TaskHandlers>,
    open_docs: Vec<DocKey>,
    throttle: ThrottleGuard,
}

impl SubscriptionRegistry {
    /// Empty registry gated by `throttle`.
    pub fn new(throttle: ThrottleGuard) -> Self {
        Self {
            tasks: HashMap::new(),
            open_docs: Vec::new(),
            throttle,
        }
    }

    /// Store handlers for a task. Returns `true` if an earlier set was replaced.
    pub fn insert_task(&mut self, task_id: impl Into<String>, handlers: TaskHandlers) -> bool {
        self.tasks.insert(task_id.into(), handlers).is_some()
    }

    /// Whether handlers are stored for `task_id`.
    pub fn has_task(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    /// Handlers of one task, for dispatch.
    pub fn task_handlers_mut(&mut self, task_id: &str) -> Option<&mut TaskHandlers> {
        self.tasks.get_mut(task_id)
    }

    /// Number of tasks with stored handlers.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Admit a document subscribe at `now`.
    ///
    /// On admission the key is appended to the open-documents sequence and
    /// the throttle is re-armed. A refused call leaves everything untouched.
    pub fn admit_document(&mut self, key: DocKey, now: Instant) -> bool {
        if !self.throttle.try_admit(now) {
            return false;
        }
        self.open_docs.push(key);
        true
    }

    /// Drop every entry for `key`. Returns the number removed.
    pub fn forget_document(&mut self, key: &DocKey) -> usize {
        let before = self.open_docs.len();
        self.open_docs.retain(|open| open != key);
        before - self.open_docs.len()
    }

    /// Whether `key` is in the open-documents sequence.
    pub fn is_document_open(&self, key: &DocKey) -> bool {
        self.open_docs.contains(key)
    }

    /// Open documents in subscribe order, duplicates included.
    pub fn open_documents(&self) -> &[DocKey] {
        &self.open_docs
    }

    /// The document subscribe gate.
    pub fn throttle(&self) -> &ThrottleGuard {
        &self.throttle
    }

    /// Forget the open-documents sequence and disarm the throttle.
    pub fn clear_documents(&mut self) {
        self.open_docs.clear();
        self.throttle.reset();
    }

    /// Forget every task and document.
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.clear_documents();
    }
}
