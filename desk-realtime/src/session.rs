//! Session coordinator: the one realtime client of a desk session.
//!
//! Owns the channel, the connection state and the subscription registry.
//! Every operation is fire-and-forget and infallible from the caller's
//! point of view; failures end up in the log.
//!
//! ```text
//!  caller / form hooks                     inbound ChannelEvent
//!        │                                        │
//!        ▼                                        ▼
//!  subscribe_* / notify_*            handle_channel_event()
//!        │  (throttle, registry)                  │
//!        ▼                                        ├── msgprint / progress ──► UiBridge
//!  Channel::emit(Frame)                           ├── task_* ──► dispatch ──► TaskHandlers
//!                                                 └── raw listeners
//! ```

use std::time::Instant;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::channel::{
    Channel, ChannelEvent, ConnectionState, Connector, Listener, ListenerId, ListenerTable,
    WsConnector,
};
use crate::config::RealtimeConfig;
use crate::dispatch::{dispatch_task_event, Dispatch, TaskEventKind};
use crate::protocol::{events, DocKey, Frame};
use crate::registry::{SubscriptionRegistry, TaskHandlers};
use crate::throttle::ThrottleGuard;
use crate::ui::{LogBridge, ProgressNotice, UiBridge};

/// A form as seen by the lifecycle hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormRef {
    pub doctype: String,
    pub docname: String,
    /// Unsaved form, or no document loaded yet
    pub is_new: bool,
}

impl FormRef {
    /// A form showing a saved document.
    pub fn saved(doctype: impl Into<String>, docname: impl Into<String>) -> Self {
        Self {
            doctype: doctype.into(),
            docname: docname.into(),
            is_new: false,
        }
    }

    /// A new, not yet saved form.
    pub fn unsaved(doctype: impl Into<String>, docname: impl Into<String>) -> Self {
        Self {
            is_new: true,
            ..Self::saved(doctype, docname)
        }
    }

    /// Subscription key of the form's document.
    pub fn key(&self) -> DocKey {
        DocKey::new(self.doctype.as_str(), self.docname.as_str())
    }
}

/// Form lifecycle triggers raised by the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormEvent {
    Load(FormRef),
    Rename(FormRef),
    Refresh(FormRef),
    Unload(FormRef),
    Typing(FormRef),
    StoppedTyping(FormRef),
}

/// The realtime client.
pub struct RealtimeClient {
    config: RealtimeConfig,
    connector: Box<dyn Connector>,
    ui: Box<dyn UiBridge>,
    state: ConnectionState,
    channel: Option<Box<dyn Channel>>,
    events: Option<mpsc::Receiver<ChannelEvent>>,
    registry: SubscriptionRegistry,
    listeners: ListenerTable,
}

impl RealtimeClient {
    /// Client using the WebSocket connector and logging UI bridge.
    pub fn new(config: RealtimeConfig) -> Self {
        Self::with_parts(config, Box::new(WsConnector), Box::new(LogBridge))
    }

    /// Client with a custom connector and UI bridge.
    pub fn with_parts(
        config: RealtimeConfig,
        connector: Box<dyn Connector>,
        ui: Box<dyn UiBridge>,
    ) -> Self {
        let registry =
            SubscriptionRegistry::new(ThrottleGuard::new(config.doc_subscribe_cooldown()));
        Self {
            config,
            connector,
            ui,
            state: ConnectionState::Disconnected,
            channel: None,
            events: None,
            registry,
            listeners: ListenerTable::new(),
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Open the channel.
    ///
    /// No-op when realtime is disabled or a channel already exists. When no
    /// channel can be constructed the client stays `Disconnected` and this
    /// may be called again later.
    pub fn initialize(&mut self, port: u16) {
        if self.config.disable_async {
            log::debug!("Realtime disabled; skipping channel setup");
            return;
        }
        if self.channel.is_some() {
            return;
        }

        let host = self.config.host(port);
        let Some(secure) = self.config.secure() else {
            log::warn!("Unable to connect to {host}");
            return;
        };

        self.state = ConnectionState::Connecting;
        let options = self.config.connect_options(secure);
        match self.connector.connect(&host, &options) {
            Some(connection) => {
                log::info!("Realtime channel opened to {host}");
                self.channel = Some(connection.channel);
                self.events = Some(connection.events);
            }
            None => {
                log::warn!("Unable to connect to {host}");
                self.state = ConnectionState::Disconnected;
            }
        }
    }

    /// [`initialize`](Self::initialize) with the configured `default_port`.
    pub fn initialize_default(&mut self) {
        self.initialize(self.config.default_port);
    }

    /// Close the channel once every queued frame has been written, wait for
    /// the transport to stop, then [`shutdown`](Self::shutdown).
    ///
    /// Inbound frames arriving meanwhile are dropped.
    pub async fn close(&mut self) {
        if let Some(channel) = &self.channel {
            channel.close();
        }
        if let Some(events) = self.events.as_mut() {
            while let Some(event) = events.recv().await {
                if event == ChannelEvent::Disconnected {
                    break;
                }
            }
        }
        self.shutdown();
    }

    /// Close the channel and forget every subscription and listener.
    pub fn shutdown(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.events = None;
        self.state = ConnectionState::Disconnected;
        self.registry.clear();
        self.listeners.clear();
        log::info!("Realtime client shut down");
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a channel is open or being (re)connected.
    pub fn has_channel(&self) -> bool {
        self.channel.is_some()
    }

    /// Configuration the client was built with.
    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Read access to task and document subscriptions.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Wait for the next channel event and handle it.
    ///
    /// Returns `false` once there is no channel or it has stopped for good.
    pub async fn process_next(&mut self) -> bool {
        let Some(events) = self.events.as_mut() else {
            return false;
        };
        let next = events.recv().await;
        match next {
            Some(event) => {
                self.handle_channel_event(event);
                true
            }
            None => {
                self.channel_lost();
                false
            }
        }
    }

    /// Apply one channel event.
    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                log::debug!("Realtime state: {:?} -> Connected", self.state);
                self.state = ConnectionState::Connected;
            }
            ChannelEvent::Reconnecting { attempt } => {
                log::info!("Realtime channel reconnecting (attempt {attempt})");
                self.state = ConnectionState::Reconnecting;
            }
            ChannelEvent::Disconnected => self.channel_lost(),
            ChannelEvent::Frame(frame) => self.handle_frame(frame),
        }
    }

    /// The transport has stopped. The next channel starts without any
    /// document subscriptions; task handlers are kept.
    fn channel_lost(&mut self) {
        if self.channel.is_some() {
            log::warn!("Realtime channel closed");
        }
        self.channel = None;
        self.events = None;
        self.state = ConnectionState::Disconnected;
        self.registry.clear_documents();
    }

    /// Route one inbound frame: built-in relays first, then raw listeners.
    pub fn handle_frame(&mut self, frame: Frame) {
        match frame.event.as_str() {
            events::MSGPRINT => {
                if let Some(message) = frame.payload() {
                    self.ui.msgprint(message);
                }
            }
            events::PROGRESS => {
                if let Some(notice) = frame.payload().and_then(ProgressNotice::from_payload) {
                    self.ui.show_progress(&notice);
                }
            }
            events::TASK_STATUS_CHANGE => {
                self.dispatch(TaskEventKind::StatusChange, frame.payload());
            }
            events::TASK_PROGRESS => {
                self.dispatch(TaskEventKind::Progress, frame.payload());
            }
            _ => {}
        }
        self.listeners.deliver(&frame);
    }

    fn dispatch(&mut self, kind: TaskEventKind, payload: Option<&Value>) -> Dispatch {
        dispatch_task_event(&mut self.registry, self.ui.as_mut(), kind, payload)
    }

    // ─── Raw channel access ──────────────────────────────────────────────

    /// Listen for a raw inbound event. Returns `None` without a channel.
    pub fn on(
        &mut self,
        event: impl Into<String>,
        listener: impl FnMut(&[Value]) + Send + 'static,
    ) -> Option<ListenerId> {
        if self.channel.is_none() {
            return None;
        }
        let listener: Listener = Box::new(listener);
        Some(self.listeners.on(event, listener))
    }

    /// Remove a raw listener. Returns `false` if it was not registered.
    pub fn off(&mut self, event: &str, id: ListenerId) -> bool {
        self.listeners.off(event, id)
    }

    /// Emit an arbitrary event.
    pub fn publish(&self, event: &str, message: Value) {
        self.emit(Frame::new(event, vec![message]));
    }

    fn emit(&self, frame: Frame) {
        match &self.channel {
            Some(channel) => channel.emit(frame),
            None => log::debug!("No realtime channel; dropping {}", frame.event),
        }
    }

    // ─── Tasks ───────────────────────────────────────────────────────────

    /// Register handlers for a task and subscribe to its status and
    /// progress. Re-subscribing replaces the earlier handlers.
    pub fn subscribe_task(&mut self, task_id: &str, handlers: TaskHandlers) {
        if self.registry.insert_task(task_id, handlers) {
            log::debug!("Replacing handlers for task {task_id}");
        }
        self.emit(Frame::task_subscribe(task_id));
        self.emit(Frame::progress_subscribe(task_id));
    }

    /// Subscribe to status updates without registering handlers.
    pub fn watch_task(&self, task_id: &str) {
        self.emit(Frame::task_subscribe(task_id));
    }

    /// Stop server-side updates for a task. The handler entry stays until
    /// it is replaced or the client shuts down.
    pub fn unsubscribe_task(&self, task_id: &str) {
        self.emit(Frame::task_unsubscribe(task_id));
    }

    // ─── Doctypes ────────────────────────────────────────────────────────

    /// Subscribe to list-level updates for a doctype.
    pub fn subscribe_doctype(&self, doctype: &str) {
        self.emit(Frame::doctype_subscribe(doctype));
    }

    /// Stop list-level updates for a doctype.
    pub fn unsubscribe_doctype(&self, doctype: &str) {
        self.emit(Frame::doctype_unsubscribe(doctype));
    }

    // ─── Documents ───────────────────────────────────────────────────────

    /// Subscribe to one document, at most once per cooldown across all
    /// documents. Callers check [`SubscriptionRegistry::is_document_open`]
    /// first; the form-load hook does.
    pub fn subscribe_document(&mut self, doctype: &str, docname: &str) {
        let key = DocKey::new(doctype, docname);
        if !key.is_complete() {
            log::debug!("Ignoring document subscribe with incomplete key {key:?}");
            return;
        }
        if !self.registry.admit_document(key.clone(), Instant::now()) {
            log::debug!(
                "throttled: doc_subscribe {key} within {:?}",
                self.registry.throttle().cooldown()
            );
            return;
        }
        self.emit(Frame::doc_subscribe(&key));
    }

    /// Unsubscribe from a document and drop every open entry for it.
    pub fn unsubscribe_document(&mut self, doctype: &str, docname: &str) {
        let key = DocKey::new(doctype, docname);
        self.emit(Frame::doc_unsubscribe(&key));
        let removed = self.registry.forget_document(&key);
        log::debug!("Unsubscribed {key}; dropped {removed} open entries");
    }

    /// Announce that this client is viewing a document.
    pub fn notify_document_open(&self, doctype: &str, docname: &str) {
        self.emit(Frame::doc_open(&DocKey::new(doctype, docname)));
    }

    /// Announce that this client left a document.
    pub fn notify_document_close(&self, doctype: &str, docname: &str) {
        self.emit(Frame::doc_close(&DocKey::new(doctype, docname)));
    }

    /// Announce that this client started typing in a document.
    pub fn notify_typing(&self, doctype: &str, docname: &str) {
        self.emit(Frame::doc_typing(&DocKey::new(doctype, docname)));
    }

    /// Announce that this client stopped typing in a document.
    pub fn notify_stopped_typing(&self, doctype: &str, docname: &str) {
        self.emit(Frame::doc_stopped_typing(&DocKey::new(doctype, docname)));
    }

    // ─── UI hooks ────────────────────────────────────────────────────────

    /// React to a form lifecycle trigger. Hooks are only live while a
    /// channel exists.
    pub fn handle_form_event(&mut self, event: &FormEvent) {
        if self.channel.is_none() {
            return;
        }
        match event {
            FormEvent::Load(form) | FormEvent::Rename(form) => {
                if form.is_new || self.registry.is_document_open(&form.key()) {
                    return;
                }
                self.subscribe_document(&form.doctype, &form.docname);
            }
            FormEvent::Refresh(form) => {
                if !form.is_new {
                    self.notify_document_open(&form.doctype, &form.docname);
                }
            }
            FormEvent::Unload(form) => {
                if !form.is_new {
                    self.notify_document_close(&form.doctype, &form.docname);
                }
            }
            FormEvent::Typing(form) => self.notify_typing(&form.doctype, &form.docname),
            FormEvent::StoppedTyping(form) => {
                self.notify_stopped_typing(&form.doctype, &form.docname)
            }
        }
    }

    /// The page is going away; close the current form, if it is saved.
    pub fn handle_page_unload(&mut self, current: Option<&FormRef>) {
        if self.channel.is_none() {
            return;
        }
        if let Some(form) = current.filter(|form| !form.is_new) {
            self.notify_document_close(&form.doctype, &form.docname);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ConnectOptions, Connection};
    use crate::protocol::TaskUpdate;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type Sent = Arc<Mutex<Vec<Frame>>>;
    type Trace = Arc<Mutex<Vec<String>>>;

    struct RecordingChannel {
        sent: Sent,
        closed: Arc<AtomicUsize>,
    }

    impl Channel for RecordingChannel {
        fn emit(&self, frame: Frame) {
            self.sent.lock().unwrap().push(frame);
        }

        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Connector that hands out recording channels and keeps the event
    /// senders so tests can feed inbound events.
    #[derive(Clone, Default)]
    struct MockConnector {
        sent: Sent,
        closed: Arc<AtomicUsize>,
        connects: Arc<Mutex<Vec<(String, ConnectOptions)>>>,
        senders: Arc<Mutex<Vec<mpsc::Sender<ChannelEvent>>>>,
        refuse: bool,
    }

    impl Connector for MockConnector {
        fn connect(&self, host: &str, options: &ConnectOptions) -> Option<Connection> {
            self.connects
                .lock()
                .unwrap()
                .push((host.to_string(), options.clone()));
            if self.refuse {
                return None;
            }
            let (tx, rx) = mpsc::channel(16);
            self.senders.lock().unwrap().push(tx);
            Some(Connection {
                channel: Box::new(RecordingChannel {
                    sent: self.sent.clone(),
                    closed: self.closed.clone(),
                }),
                events: rx,
            })
        }
    }

    impl MockConnector {
        fn sent_events(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|f| f.event.clone()).collect()
        }

        fn count(&self, event: &str) -> usize {
            self.sent.lock().unwrap().iter().filter(|f| f.event == event).count()
        }

        fn connect_count(&self) -> usize {
            self.connects.lock().unwrap().len()
        }
    }

    struct TraceUi(Trace);

    impl UiBridge for TraceUi {
        fn msgprint(&mut self, message: &Value) {
            self.0.lock().unwrap().push(format!("msgprint:{message}"));
        }

        fn show_progress(&mut self, notice: &ProgressNotice) {
            self.0
                .lock()
                .unwrap()
                .push(format!("progress:{}:{}", notice.title, notice.percent));
        }

        fn cleanup(&mut self, _handlers: &TaskHandlers, update: &TaskUpdate) {
            self.0.lock().unwrap().push(format!("cleanup:{}", update.task_id));
        }
    }

    fn client_with(config: RealtimeConfig) -> (RealtimeClient, MockConnector, Trace) {
        let connector = MockConnector::default();
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        let client = RealtimeClient::with_parts(
            config,
            Box::new(connector.clone()),
            Box::new(TraceUi(trace.clone())),
        );
        (client, connector, trace)
    }

    fn connected_client() -> (RealtimeClient, MockConnector, Trace) {
        let (mut client, connector, trace) =
            client_with(RealtimeConfig::for_origin("https://erp.example.com"));
        client.initialize(9000);
        client.handle_channel_event(ChannelEvent::Connected);
        (client, connector, trace)
    }

    fn step(trace: &Trace, name: &'static str) -> impl FnMut(&TaskUpdate) + Send + 'static {
        let trace = trace.clone();
        move |_| trace.lock().unwrap().push(name.to_string())
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    #[test]
    fn test_initialize_is_idempotent() {
        let (mut client, connector, _) =
            client_with(RealtimeConfig::for_origin("https://erp.example.com"));
        client.initialize(9000);
        client.initialize(9000);

        assert_eq!(connector.connect_count(), 1);
        assert_eq!(client.state(), ConnectionState::Connecting);
        let (host, options) = connector.connects.lock().unwrap()[0].clone();
        assert_eq!(host, "https://erp.example.com");
        assert!(options.secure);
        assert_eq!(options.reconnection_attempts, 3);
    }

    #[test]
    fn test_initialize_disabled() {
        let config = RealtimeConfig {
            disable_async: true,
            ..RealtimeConfig::default()
        };
        let (mut client, connector, _) = client_with(config);
        client.initialize(9000);

        assert_eq!(connector.connect_count(), 0);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.has_channel());
    }

    #[test]
    fn test_initialize_unsupported_scheme() {
        let (mut client, connector, _) = client_with(RealtimeConfig::for_origin("file:///desk"));
        client.initialize(9000);

        assert_eq!(connector.connect_count(), 0);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_initialize_failure_can_retry() {
        let connector = MockConnector {
            refuse: true,
            ..MockConnector::default()
        };
        let mut client = RealtimeClient::with_parts(
            RealtimeConfig::default(),
            Box::new(connector.clone()),
            Box::new(LogBridge),
        );

        client.initialize(9000);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.has_channel());

        client.initialize(9000);
        assert_eq!(connector.connect_count(), 2);
    }

    #[test]
    fn test_dev_server_host() {
        let config = RealtimeConfig {
            dev_server: true,
            ..RealtimeConfig::for_origin("http://localhost:8000")
        };
        let (mut client, connector, _) = client_with(config);
        client.initialize(9000);

        let (host, options) = connector.connects.lock().unwrap()[0].clone();
        assert_eq!(host, "http://localhost:9000");
        assert!(!options.secure);
    }

    #[test]
    fn test_initialize_default_uses_default_port() {
        let config = RealtimeConfig {
            dev_server: true,
            default_port: 9100,
            ..RealtimeConfig::for_origin("http://localhost:8000")
        };
        let (mut client, connector, _) = client_with(config);
        client.initialize_default();

        let (host, _) = connector.connects.lock().unwrap()[0].clone();
        assert_eq!(host, "http://localhost:9100");
    }

    #[tokio::test]
    async fn test_close_waits_for_transport_stop() {
        let (mut client, connector, trace) = connected_client();
        let tx = connector.senders.lock().unwrap()[0].clone();
        tx.send(ChannelEvent::Frame(Frame::new(events::MSGPRINT, vec![json!("late")])))
            .await
            .unwrap();
        tx.send(ChannelEvent::Disconnected).await.unwrap();

        client.close().await;

        assert!(connector.closed.load(Ordering::SeqCst) >= 1);
        assert!(!client.has_channel());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(trace.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_without_channel() {
        let (mut client, connector, _) = client_with(RealtimeConfig::default());
        client.close().await;
        assert_eq!(connector.closed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_state_follows_channel_events() {
        let (mut client, _, _) = connected_client();
        assert_eq!(client.state(), ConnectionState::Connected);

        client.handle_channel_event(ChannelEvent::Reconnecting { attempt: 1 });
        assert_eq!(client.state(), ConnectionState::Reconnecting);

        client.handle_channel_event(ChannelEvent::Connected);
        assert_eq!(client.state(), ConnectionState::Connected);

        client.handle_channel_event(ChannelEvent::Disconnected);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.has_channel());
    }

    #[test]
    fn test_channel_loss_allows_fresh_document_subscribe() {
        let (mut client, connector, _) = connected_client();
        client.handle_form_event(&FormEvent::Load(FormRef::saved("ToDo", "TD-1")));
        client.handle_channel_event(ChannelEvent::Disconnected);
        assert!(client.registry().open_documents().is_empty());

        client.initialize(9000);
        client.handle_form_event(&FormEvent::Load(FormRef::saved("ToDo", "TD-1")));
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(connector.count(events::DOC_SUBSCRIBE), 2);
    }

    #[test]
    fn test_shutdown_clears_everything() {
        let (mut client, connector, _) = connected_client();
        client.subscribe_task("t1", TaskHandlers::new());
        client.subscribe_document("ToDo", "TD-1");
        client.on("custom", |_| {}).unwrap();

        client.shutdown();

        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.has_channel());
        assert_eq!(client.registry().task_count(), 0);
        assert!(client.registry().open_documents().is_empty());

        client.initialize(9000);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_process_next_reads_connection_events() {
        let (mut client, connector, trace) =
            client_with(RealtimeConfig::for_origin("http://localhost:8000"));
        client.initialize(9000);
        let tx = connector.senders.lock().unwrap()[0].clone();

        tx.send(ChannelEvent::Connected).await.unwrap();
        tx.send(ChannelEvent::Frame(Frame::new(events::MSGPRINT, vec![json!("Saved")])))
            .await
            .unwrap();
        drop(tx);
        connector.senders.lock().unwrap().clear();

        assert!(client.process_next().await);
        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(client.process_next().await);
        assert_eq!(*trace.lock().unwrap(), vec![r#"msgprint:"Saved""#]);

        assert!(!client.process_next().await);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.process_next().await);
    }

    // ─── Tasks ───────────────────────────────────────────────────────────

    #[test]
    fn test_subscribe_task_emits_both_subscriptions() {
        let (mut client, connector, _) = connected_client();
        client.subscribe_task("t1", TaskHandlers::new());

        assert_eq!(
            connector.sent_events(),
            vec![events::TASK_SUBSCRIBE, events::PROGRESS_SUBSCRIBE]
        );
        assert_eq!(connector.sent.lock().unwrap()[0].args, vec![json!("t1")]);
        assert!(client.registry().has_task("t1"));
    }

    #[test]
    fn test_resubscribe_task_replaces_and_resends() {
        let (mut client, connector, trace) = connected_client();
        client.subscribe_task("t1", TaskHandlers::new().on("running", step(&trace, "first")));
        client.subscribe_task("t1", TaskHandlers::new().on("running", step(&trace, "second")));

        assert_eq!(connector.count(events::TASK_SUBSCRIBE), 2);
        assert_eq!(client.registry().task_count(), 1);

        client.handle_frame(Frame::new(
            events::TASK_STATUS_CHANGE,
            vec![json!({"task_id": "t1", "status": "Running"})],
        ));
        assert_eq!(*trace.lock().unwrap(), vec!["second", "cleanup:t1"]);
    }

    #[test]
    fn test_status_change_dispatch_order() {
        let (mut client, _, trace) = connected_client();
        client.subscribe_task(
            "t1",
            TaskHandlers::new()
                .on("completed", step(&trace, "completed"))
                .always(step(&trace, "always")),
        );

        client.handle_frame(Frame::new(
            events::TASK_STATUS_CHANGE,
            vec![json!({"task_id": "t1", "status": "COMPLETED"})],
        ));

        assert_eq!(*trace.lock().unwrap(), vec!["completed", "cleanup:t1", "always"]);
    }

    #[test]
    fn test_task_progress_dispatch() {
        let (mut client, _, trace) = connected_client();
        client.subscribe_task("t1", TaskHandlers::new().on("progress", step(&trace, "progress")));

        client.handle_frame(Frame::new(
            events::TASK_PROGRESS,
            vec![json!({"task_id": "t1", "progress": [1, 3]})],
        ));

        assert_eq!(*trace.lock().unwrap(), vec!["progress", "cleanup:t1"]);
    }

    #[test]
    fn test_unknown_task_is_ignored() {
        let (mut client, _, trace) = connected_client();
        client.subscribe_task("t1", TaskHandlers::new().always(step(&trace, "always")));

        client.handle_frame(Frame::new(
            events::TASK_STATUS_CHANGE,
            vec![json!({"task_id": "t2", "status": "Success"})],
        ));
        client.handle_frame(Frame::new(events::TASK_STATUS_CHANGE, Vec::new()));
        client.handle_frame(Frame::new(events::TASK_PROGRESS, vec![Value::Null]));

        assert!(trace.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unsubscribe_task_keeps_handlers() {
        let (mut client, connector, trace) = connected_client();
        client.subscribe_task("t1", TaskHandlers::new().always(step(&trace, "always")));
        client.unsubscribe_task("t1");

        assert_eq!(connector.count(events::TASK_UNSUBSCRIBE), 1);
        assert!(client.registry().has_task("t1"));

        client.handle_frame(Frame::new(
            events::TASK_STATUS_CHANGE,
            vec![json!({"task_id": "t1", "status": "Success"})],
        ));
        assert_eq!(*trace.lock().unwrap(), vec!["cleanup:t1", "always"]);
    }

    #[test]
    fn test_watch_task_emits_only_status_subscribe() {
        let (client, connector, _) = connected_client();
        client.watch_task("t9");
        assert_eq!(connector.sent_events(), vec![events::TASK_SUBSCRIBE]);
        assert!(!client.registry().has_task("t9"));
    }

    // ─── Doctypes & documents ────────────────────────────────────────────

    #[test]
    fn test_doctype_pass_through() {
        let (client, connector, _) = connected_client();
        client.subscribe_doctype("ToDo");
        client.unsubscribe_doctype("ToDo");

        assert_eq!(
            connector.sent_events(),
            vec![events::DOCTYPE_SUBSCRIBE, events::DOCTYPE_UNSUBSCRIBE]
        );
        assert_eq!(connector.sent.lock().unwrap()[1].args, vec![json!("ToDo")]);
    }

    #[test]
    fn test_document_subscribe_throttled() {
        let (mut client, connector, _) = connected_client();
        client.subscribe_document("ToDo", "TD-1");
        client.subscribe_document("ToDo", "TD-1");
        client.subscribe_document("Note", "N-1");

        assert_eq!(connector.count(events::DOC_SUBSCRIBE), 1);
        assert_eq!(
            client.registry().open_documents(),
            &[DocKey::new("ToDo", "TD-1")]
        );
        assert_eq!(
            connector.sent.lock().unwrap()[0].args,
            vec![json!("ToDo"), json!("TD-1")]
        );
    }

    #[test]
    fn test_document_subscribe_after_cooldown() {
        let (mut client, connector, _) = client_with(RealtimeConfig {
            doc_subscribe_cooldown_ms: 20,
            ..RealtimeConfig::default()
        });
        client.initialize(9000);

        client.subscribe_document("ToDo", "TD-1");
        std::thread::sleep(Duration::from_millis(30));
        client.subscribe_document("ToDo", "TD-1");

        assert_eq!(connector.count(events::DOC_SUBSCRIBE), 2);
        assert_eq!(client.registry().open_documents().len(), 2);

        client.unsubscribe_document("ToDo", "TD-1");
        assert_eq!(connector.count(events::DOC_UNSUBSCRIBE), 1);
        assert!(client.registry().open_documents().is_empty());
    }

    #[test]
    fn test_document_subscribe_requires_both_parts() {
        let (mut client, connector, _) = connected_client();
        client.subscribe_document("ToDo", "");
        client.subscribe_document("", "TD-1");
        assert_eq!(connector.count(events::DOC_SUBSCRIBE), 0);

        // The refused calls did not arm the throttle.
        client.subscribe_document("ToDo", "TD-1");
        assert_eq!(connector.count(events::DOC_SUBSCRIBE), 1);
    }

    #[test]
    fn test_presence_and_typing_pass_through() {
        let (client, connector, _) = connected_client();
        client.notify_document_open("ToDo", "TD-1");
        client.notify_document_open("ToDo", "TD-1");
        client.notify_document_close("ToDo", "TD-1");
        client.notify_typing("ToDo", "TD-1");
        client.notify_stopped_typing("ToDo", "TD-1");

        assert_eq!(
            connector.sent_events(),
            vec![
                events::DOC_OPEN,
                events::DOC_OPEN,
                events::DOC_CLOSE,
                events::DOC_TYPING,
                events::DOC_STOPPED_TYPING,
            ]
        );
        assert!(client.registry().open_documents().is_empty());
    }

    // ─── Form hooks ──────────────────────────────────────────────────────

    #[test]
    fn test_form_load_skips_open_documents() {
        let (mut client, connector, _) = client_with(RealtimeConfig {
            doc_subscribe_cooldown_ms: 0,
            ..RealtimeConfig::default()
        });
        client.initialize(9000);

        let form = FormRef::saved("ToDo", "TD-1");
        client.handle_form_event(&FormEvent::Load(form.clone()));
        client.handle_form_event(&FormEvent::Rename(form.clone()));
        client.handle_form_event(&FormEvent::Load(form));

        assert_eq!(connector.count(events::DOC_SUBSCRIBE), 1);
        assert_eq!(client.registry().open_documents().len(), 1);
    }

    #[test]
    fn test_form_hooks_skip_new_forms() {
        let (mut client, connector, _) = connected_client();
        let form = FormRef::unsaved("ToDo", "new-todo-1");
        client.handle_form_event(&FormEvent::Load(form.clone()));
        client.handle_form_event(&FormEvent::Refresh(form.clone()));
        client.handle_form_event(&FormEvent::Unload(form.clone()));
        client.handle_page_unload(Some(&form));

        assert!(connector.sent_events().is_empty());
    }

    #[test]
    fn test_form_hooks_map_to_operations() {
        let (mut client, connector, _) = connected_client();
        let form = FormRef::saved("ToDo", "TD-1");
        client.handle_form_event(&FormEvent::Load(form.clone()));
        client.handle_form_event(&FormEvent::Refresh(form.clone()));
        client.handle_form_event(&FormEvent::Typing(form.clone()));
        client.handle_form_event(&FormEvent::StoppedTyping(form.clone()));
        client.handle_form_event(&FormEvent::Unload(form.clone()));
        client.handle_page_unload(Some(&form));
        client.handle_page_unload(None);

        assert_eq!(
            connector.sent_events(),
            vec![
                events::DOC_SUBSCRIBE,
                events::DOC_OPEN,
                events::DOC_TYPING,
                events::DOC_STOPPED_TYPING,
                events::DOC_CLOSE,
                events::DOC_CLOSE,
            ]
        );
        // Unload closes presence but keeps the subscription.
        assert!(client.registry().is_document_open(&form.key()));
    }

    #[test]
    fn test_form_hooks_inactive_without_channel() {
        let (mut client, connector, _) = client_with(RealtimeConfig::default());
        client.handle_form_event(&FormEvent::Load(FormRef::saved("ToDo", "TD-1")));
        assert!(connector.sent_events().is_empty());
        assert!(client.registry().open_documents().is_empty());
    }

    // ─── Relays & raw listeners ──────────────────────────────────────────

    #[test]
    fn test_progress_relay_percent() {
        let (mut client, _, trace) = connected_client();
        client.handle_frame(Frame::new(
            events::PROGRESS,
            vec![json!({"progress": [30, 120], "title": "Import"})],
        ));
        client.handle_frame(Frame::new(events::PROGRESS, vec![json!({"progress": [0, 5]})]));

        assert_eq!(*trace.lock().unwrap(), vec!["progress:Import:25"]);
    }

    #[test]
    fn test_raw_listeners_receive_all_frames() {
        let (mut client, _, _) = connected_client();
        let seen = Arc::new(AtomicUsize::new(0));

        let hits = seen.clone();
        let id = client
            .on(events::MSGPRINT, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let hits = seen.clone();
        client
            .on("list_update", move |args| {
                assert_eq!(args, [json!({"doctype": "ToDo"})]);
                hits.fetch_add(10, Ordering::SeqCst);
            })
            .unwrap();

        client.handle_frame(Frame::new(events::MSGPRINT, vec![json!("hi")]));
        client.handle_frame(Frame::new("list_update", vec![json!({"doctype": "ToDo"})]));
        assert_eq!(seen.load(Ordering::SeqCst), 11);

        assert!(client.off(events::MSGPRINT, id));
        client.handle_frame(Frame::new(events::MSGPRINT, vec![json!("hi")]));
        assert_eq!(seen.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_on_without_channel() {
        let (mut client, _, _) = client_with(RealtimeConfig::default());
        assert!(client.on("anything", |_| {}).is_none());
    }

    #[test]
    fn test_publish() {
        let (client, connector, _) = connected_client();
        client.publish("custom_event", json!({"a": 1}));
        let sent = connector.sent.lock().unwrap();
        assert_eq!(sent[0], Frame::new("custom_event", vec![json!({"a": 1})]));
    }

    #[test]
    fn test_emits_without_channel_are_dropped() {
        let (mut client, connector, _) = client_with(RealtimeConfig::default());
        client.subscribe_task("t1", TaskHandlers::new());
        client.publish("custom_event", json!(null));
        assert!(connector.sent_events().is_empty());
        assert!(client.registry().has_task("t1"));
    }
}
