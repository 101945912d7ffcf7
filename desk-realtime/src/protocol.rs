//! Wire vocabulary shared with the realtime hub.
//!
//! Every message is a named event carrying positional JSON arguments.
//! On the WebSocket adapter a frame travels as one text message:
//!
//! ```text
//! ┌───────────────┬──────────┬──────────┬─────┐
//! │ event name    │ arg 0    │ arg 1    │ ... │
//! │ JSON string   │ any JSON │ any JSON │     │
//! └───────────────┴──────────┴──────────┴─────┘
//!   ["doc_subscribe", "ToDo", "TD-0001"]
//! ```

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Event names understood by the hub.
pub mod events {
    // Outbound
    pub const TASK_SUBSCRIBE: &str = "task_subscribe";
    pub const TASK_UNSUBSCRIBE: &str = "task_unsubscribe";
    pub const PROGRESS_SUBSCRIBE: &str = "progress_subscribe";
    pub const DOCTYPE_SUBSCRIBE: &str = "doctype_subscribe";
    pub const DOCTYPE_UNSUBSCRIBE: &str = "doctype_unsubscribe";
    pub const DOC_SUBSCRIBE: &str = "doc_subscribe";
    pub const DOC_UNSUBSCRIBE: &str = "doc_unsubscribe";
    pub const DOC_OPEN: &str = "doc_open";
    pub const DOC_CLOSE: &str = "doc_close";
    pub const DOC_TYPING: &str = "doc_typing";
    pub const DOC_STOPPED_TYPING: &str = "doc_stopped_typing";

    // Inbound
    pub const MSGPRINT: &str = "msgprint";
    pub const PROGRESS: &str = "progress";
    pub const TASK_STATUS_CHANGE: &str = "task_status_change";
    pub const TASK_PROGRESS: &str = "task_progress";
}

/// One named event with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub event: String,
    pub args: Vec<Value>,
}

impl Frame {
    /// Frame with arbitrary event name and arguments.
    pub fn new(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            event: event.into(),
            args,
        }
    }

    fn with_str(event: &str, arg: &str) -> Self {
        Self::new(event, vec![Value::from(arg)])
    }

    fn with_doc(event: &str, key: &DocKey) -> Self {
        Self::new(
            event,
            vec![Value::from(key.doctype.as_str()), Value::from(key.docname.as_str())],
        )
    }

    /// `["task_subscribe", task_id]`
    pub fn task_subscribe(task_id: &str) -> Self {
        Self::with_str(events::TASK_SUBSCRIBE, task_id)
    }

    /// Stop status updates for a task.
    pub fn task_unsubscribe(task_id: &str) -> Self {
        Self::with_str(events::TASK_UNSUBSCRIBE, task_id)
    }

    /// Subscribe to progress of a task.
    pub fn progress_subscribe(task_id: &str) -> Self {
        Self::with_str(events::PROGRESS_SUBSCRIBE, task_id)
    }

    /// Subscribe to list updates of a doctype.
    pub fn doctype_subscribe(doctype: &str) -> Self {
        Self::with_str(events::DOCTYPE_SUBSCRIBE, doctype)
    }

    /// Stop list updates of a doctype.
    pub fn doctype_unsubscribe(doctype: &str) -> Self {
        Self::with_str(events::DOCTYPE_UNSUBSCRIBE, doctype)
    }

    /// `["doc_subscribe", doctype, docname]`
    pub fn doc_subscribe(key: &DocKey) -> Self {
        Self::with_doc(events::DOC_SUBSCRIBE, key)
    }

    /// Stop updates for a document.
    pub fn doc_unsubscribe(key: &DocKey) -> Self {
        Self::with_doc(events::DOC_UNSUBSCRIBE, key)
    }

    /// Presence: viewing a document.
    pub fn doc_open(key: &DocKey) -> Self {
        Self::with_doc(events::DOC_OPEN, key)
    }

    /// Presence: left a document.
    pub fn doc_close(key: &DocKey) -> Self {
        Self::with_doc(events::DOC_CLOSE, key)
    }

    /// Typing started in a document.
    pub fn doc_typing(key: &DocKey) -> Self {
        Self::with_doc(events::DOC_TYPING, key)
    }

    /// Typing stopped in a document.
    pub fn doc_stopped_typing(key: &DocKey) -> Self {
        Self::with_doc(events::DOC_STOPPED_TYPING, key)
    }

    /// First argument, which carries the payload for every inbound event.
    pub fn payload(&self) -> Option<&Value> {
        self.args.first()
    }

    /// Serialize to the JSON array text format.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let mut items = Vec::with_capacity(self.args.len() + 1);
        items.push(Value::from(self.event.as_str()));
        items.extend(self.args.iter().cloned());
        Ok(serde_json::to_string(&Value::Array(items))?)
    }

    /// Parse the JSON array text format.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let Value::Array(mut items) = serde_json::from_str(text)? else {
            return Err(ProtocolError::NotAnArray);
        };
        if items.is_empty() {
            return Err(ProtocolError::MissingEventName);
        }
        let args = items.split_off(1);
        match items.pop() {
            Some(Value::String(event)) => Ok(Self { event, args }),
            _ => Err(ProtocolError::MissingEventName),
        }
    }
}

/// Composite key of a document subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocKey {
    pub doctype: String,
    pub docname: String,
}

impl DocKey {
    /// Key for one document.
    pub fn new(doctype: impl Into<String>, docname: impl Into<String>) -> Self {
        Self {
            doctype: doctype.into(),
            docname: docname.into(),
        }
    }

    /// Both parts are required for a subscription.
    pub fn is_complete(&self) -> bool {
        !self.doctype.is_empty() && !self.docname.is_empty()
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.doctype, self.docname)
    }
}

/// Payload of `task_status_change` and `task_progress`.
///
/// Fields the client does not interpret are kept in `extra` and handed to
/// handlers untouched. A numeric `task_id` is read as its decimal string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskUpdate {
    #[serde(deserialize_with = "task_id_from_json")]
    pub task_id: String,
    #[serde(default)]
    pub status: Option<String>,
    /// HTTP-like status code of the underlying request. Anything other than
    /// a JSON number counts as no code.
    #[serde(default, deserialize_with = "number_or_none")]
    pub status_code: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskUpdate {
    /// Update for `task_id` with no status or code.
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: None,
            status_code: None,
            extra: Map::new(),
        }
    }

    /// Set the status code.
    pub fn with_status_code(mut self, code: f64) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Parse an inbound payload. `null` means "no payload" and yields `None`.
    pub fn from_payload(value: &Value) -> Result<Option<Self>, ProtocolError> {
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(Self::deserialize(value)?))
    }

    /// The hub signalled a failed request.
    pub fn is_error(&self) -> bool {
        self.status_code.is_some_and(|code| code > 400.0)
    }
}

fn task_id_from_json<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(D::Error::custom(format!(
            "task_id must be a string or number, got {other}"
        ))),
    }
}

fn number_or_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(Value::as_f64))
}

/// Protocol and transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Frame is not a JSON array")]
    NotAnArray,
    #[error("Frame has no event name")]
    MissingEventName,
    #[error("Invalid credentials header: {0}")]
    InvalidCredentials(String),
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}
