//! Routing of inbound task events to their handler sets.
//!
//! For one event, in order:
//!
//! 1. status handler (`handlers[status]`)
//! 2. `callback`, only when status is `success`
//! 3. [`UiBridge::cleanup`]
//! 4. `always`
//! 5. `error`, when the payload's status code is above 400
//!
//! Nothing here fails: unknown tasks and empty payloads are dropped.

use serde_json::Value;

use crate::protocol::TaskUpdate;
use crate::registry::SubscriptionRegistry;
use crate::ui::UiBridge;

const STATUS_PROGRESS: &str = "progress";
const STATUS_SUCCESS: &str = "success";

/// Which inbound task event is being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEventKind {
    /// `task_status_change`; the status comes from the payload
    StatusChange,
    /// `task_progress`; the status is always `progress`
    Progress,
}

/// What happened to one inbound task event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Absent, null or unreadable payload
    Discarded,
    /// No handlers registered for the task id
    NoSubscription,
    /// Handlers looked up; `invoked` callbacks ran (cleanup not counted)
    Delivered { invoked: usize },
}

/// Dispatch one task event against the registry.
pub fn dispatch_task_event(
    registry: &mut SubscriptionRegistry,
    ui: &mut dyn UiBridge,
    kind: TaskEventKind,
    payload: Option<&Value>,
) -> Dispatch {
    let update = match payload.map(TaskUpdate::from_payload) {
        Some(Ok(Some(update))) => update,
        Some(Err(e)) => {
            log::debug!("Discarding unreadable task payload: {e}");
            return Dispatch::Discarded;
        }
        _ => return Dispatch::Discarded,
    };

    let status = match kind {
        TaskEventKind::Progress => STATUS_PROGRESS.to_string(),
        TaskEventKind::StatusChange => match &update.status {
            Some(status) => status.to_lowercase(),
            None => {
                log::debug!("Discarding status change without status for {}", update.task_id);
                return Dispatch::Discarded;
            }
        },
    };

    let Some(handlers) = registry.task_handlers_mut(&update.task_id) else {
        log::trace!("No subscription for task {}", update.task_id);
        return Dispatch::NoSubscription;
    };

    let mut invoked = 0;

    if let Some(handler) = handlers.status_mut(&status) {
        handler(&update);
        invoked += 1;
    }

    if status == STATUS_SUCCESS {
        if let Some(callback) = handlers.callback_mut() {
            callback(&update);
            invoked += 1;
        }
    }

    ui.cleanup(handlers, &update);

    if let Some(always) = handlers.always_mut() {
        always(&update);
        invoked += 1;
    }

    if update.is_error() {
        if let Some(error) = handlers.error_mut() {
            error(&update);
            invoked += 1;
        }
    }

    Dispatch::Delivered { invoked }
}
