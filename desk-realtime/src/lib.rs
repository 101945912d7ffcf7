//! # desk-realtime: realtime client for the desk
//!
//! One long-lived client per desk session. It opens a persistent channel to
//! the realtime hub, keeps track of task and document subscriptions, and
//! routes inbound events to caller handlers and the UI.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   JSON-array frames   ┌──────────────┐
//! │ RealtimeClient │ ◄───────────────────► │ realtime hub │
//! │ (coordinator)  │      WebSocket        │  (external)  │
//! └───┬────────┬───┘                       └──────────────┘
//!     │        │
//!     ▼        ▼
//! ┌────────┐ ┌──────────────────────┐
//! │UiBridge│ │ SubscriptionRegistry │
//! │        │ │ tasks · open docs ·  │
//! └────────┘ │ ThrottleGuard        │
//!            └──────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Frames, event names and typed payloads
//! - [`channel`]: Channel abstraction and the WebSocket transport
//! - [`registry`]: Task handler sets and open documents
//! - [`throttle`]: Cooldown gate for document subscribes
//! - [`dispatch`]: Task event routing
//! - [`ui`]: UI bridge and progress notices
//! - [`config`]: Client configuration
//! - [`session`]: The coordinator and form lifecycle hooks

pub mod protocol;
pub mod channel;
pub mod registry;
pub mod throttle;
pub mod dispatch;
pub mod ui;
pub mod config;
pub mod session;

// Re-exports for convenience
pub use protocol::{events, DocKey, Frame, ProtocolError, TaskUpdate};
pub use channel::{
    Channel, ChannelEvent, ConnectOptions, Connection, ConnectionState, Connector, ListenerId,
    WsConnector,
};
pub use registry::{SubscriptionRegistry, TaskHandler, TaskHandlers};
pub use throttle::ThrottleGuard;
pub use dispatch::{dispatch_task_event, Dispatch, TaskEventKind};
pub use ui::{LogBridge, ProgressNotice, UiBridge};
pub use config::{ConfigError, RealtimeConfig};
pub use session::{FormEvent, FormRef, RealtimeClient};
