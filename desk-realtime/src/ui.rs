//! Boundary to the host UI layer.
//!
//! The client never renders anything. Message dialogs, progress bars and
//! per-request cleanup are forwarded to a [`UiBridge`] supplied by the host.

use serde_json::Value;

use crate::protocol::TaskUpdate;
use crate::registry::TaskHandlers;

const DEFAULT_PROGRESS_TITLE: &str = "Progress";

/// Receiver for UI-facing notifications.
pub trait UiBridge: Send {
    /// Relay of an inbound `msgprint` event.
    fn msgprint(&mut self, message: &Value);

    /// Relay of an inbound `progress` event with a usable percent.
    fn show_progress(&mut self, notice: &ProgressNotice);

    /// Release request-scoped resources tied to a task. Called on every
    /// dispatched task event, before the `always` handler.
    fn cleanup(&mut self, handlers: &TaskHandlers, update: &TaskUpdate) {
        let _ = (handlers, update);
    }
}

/// Bridge that writes everything to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBridge;

impl UiBridge for LogBridge {
    fn msgprint(&mut self, message: &Value) {
        log::info!("msgprint: {message}");
    }

    fn show_progress(&mut self, notice: &ProgressNotice) {
        log::info!("{}: {:.1}%", notice.title, notice.percent);
    }
}

/// A progress bar update derived from a `progress` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressNotice {
    pub title: String,
    pub percent: f64,
    /// Always 100
    pub max: f64,
    pub description: Option<String>,
    pub hide_on_completion: bool,
    /// The inbound payload, with `percent` filled in when it was computed
    pub payload: Value,
}

impl ProgressNotice {
    /// Build a notice from a `progress` payload.
    ///
    /// A two-element `progress` pair overrides any `percent` the hub sent.
    /// Returns `None` when no non-zero finite percent results.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let mut payload = payload.clone();
        let object = payload.as_object_mut()?;

        if let Some(percent) = object.get("progress").and_then(progress_percent) {
            object.insert("percent".to_string(), Value::from(percent));
        }

        let percent = object.get("percent").and_then(as_number)?;
        if percent == 0.0 || !percent.is_finite() {
            return None;
        }

        let title = object
            .get("title")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_PROGRESS_TITLE)
            .to_string();
        let description = object
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);

        Some(Self {
            title,
            percent,
            max: 100.0,
            description,
            hide_on_completion: true,
            payload,
        })
    }
}

/// `done / total * 100` for a `[done, total]` pair.
pub fn progress_percent(progress: &Value) -> Option<f64> {
    let [done, total] = progress.as_array()?.as_slice() else {
        return None;
    };
    let percent = as_number(done)? / as_number(total)? * 100.0;
    percent.is_finite().then_some(percent)
}

/// Numbers and numeric strings.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
