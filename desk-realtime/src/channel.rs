//! Channel abstraction and the WebSocket adapter.
//!
//! The coordinator never touches sockets directly. It asks a [`Connector`]
//! for a [`Connection`]: a [`Channel`] handle for fire-and-forget emits
//! plus a receiver of [`ChannelEvent`]s (lifecycle changes and inbound
//! frames, in arrival order).
//!
//! ```text
//!  RealtimeClient ── emit(Frame) ──► WsChannel ──► outgoing queue ─┐
//!        ▲                                                         ▼
//!        │                                               transport task
//!        └──────── mpsc<ChannelEvent> ◄──────────────── (connect, pump,
//!                                                         reconnect)
//! ```
//!
//! Reconnection lives entirely inside the transport task: after a lost
//! connection or a failed attempt it retries up to
//! `reconnection_attempts` times, then reports [`ChannelEvent::Disconnected`]
//! and stops.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::protocol::{Frame, ProtocolError};

/// Events buffered between the transport task and the coordinator.
const EVENT_CAPACITY: usize = 256;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Signals delivered by a channel to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Socket is open (first connect or after a reconnect)
    Connected,
    /// Connection lost or attempt failed; retry `attempt` is pending
    Reconnecting { attempt: u32 },
    /// Transport gave up or was closed locally; no further events follow
    Disconnected,
    /// Inbound named event
    Frame(Frame),
}

/// Outbound half of an open channel.
pub trait Channel: Send {
    /// Queue a frame for delivery. Never blocks, never fails; frames sent
    /// after the transport has stopped are lost.
    fn emit(&self, frame: Frame);

    /// Ask the transport to close the socket and stop reconnecting.
    fn close(&self);
}

/// A freshly opened channel and its event stream.
pub struct Connection {
    pub channel: Box<dyn Channel>,
    pub events: mpsc::Receiver<ChannelEvent>,
}

/// Options handed to the connector.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    /// TLS requested by the page scheme
    pub secure: bool,
    /// Send credentials with the handshake
    pub with_credentials: bool,
    /// Cookie header value sent when `with_credentials` is set
    pub credentials: Option<String>,
    /// Path appended to the host
    pub path: String,
    pub reconnection_attempts: u32,
    pub reconnection_delay: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            secure: false,
            with_credentials: true,
            credentials: None,
            path: "/socket.io/".to_string(),
            reconnection_attempts: 3,
            reconnection_delay: Duration::from_millis(1000),
        }
    }
}

/// Opens channels. Returns `None` when no channel can be constructed for
/// the given host.
pub trait Connector: Send {
    fn connect(&self, host: &str, options: &ConnectOptions) -> Option<Connection>;
}

// ─── Raw listeners ────────────────────────────────────────────────────────────

/// Callback for a raw inbound event; receives the frame arguments.
pub type Listener = Box<dyn FnMut(&[Value]) + Send>;

/// Handle returned by [`ListenerTable::on`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Event name → listeners, invoked in registration order.
#[derive(Default)]
pub struct ListenerTable {
    next_id: u64,
    listeners: HashMap<String, Vec<(ListenerId, Listener)>>,
}

impl ListenerTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `event`.
    pub fn on(&mut self, event: impl Into<String>, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners
            .entry(event.into())
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered for `event`.
    pub fn off(&mut self, event: &str, id: ListenerId) -> bool {
        let Some(entries) = self.listeners.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.listeners.remove(event);
        }
        removed
    }

    /// Invoke every listener registered for the frame's event.
    /// Returns the number of listeners invoked.
    pub fn deliver(&mut self, frame: &Frame) -> usize {
        match self.listeners.get_mut(&frame.event) {
            Some(entries) => {
                for (_, listener) in entries.iter_mut() {
                    listener(&frame.args);
                }
                entries.len()
            }
            None => 0,
        }
    }

    /// Total number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.values().map(Vec::len).sum()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Remove every listener.
    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

// ─── WebSocket adapter ───────────────────────────────────────────────────────

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Outgoing {
    Frame(Frame),
    Close,
}

/// Channel handle backed by a transport task.
pub struct WsChannel {
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl Channel for WsChannel {
    fn emit(&self, frame: Frame) {
        let event = frame.event.clone();
        if self.outgoing.send(Outgoing::Frame(frame)).is_err() {
            log::debug!("Transport stopped; dropping outbound {event}");
        }
    }

    fn close(&self) {
        let _ = self.outgoing.send(Outgoing::Close);
    }
}

/// Connector speaking JSON-array frames over a WebSocket.
///
/// Must be used from within a tokio runtime; the transport task is spawned
/// on the current runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, host: &str, options: &ConnectOptions) -> Option<Connection> {
        let url = websocket_url(host, &options.path)?;
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("No async runtime for realtime transport: {e}");
                return None;
            }
        };

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        runtime.spawn(run_transport(url, options.clone(), out_rx, event_tx));

        Some(Connection {
            channel: Box::new(WsChannel { outgoing: out_tx }),
            events: event_rx,
        })
    }
}

/// Map an `http(s)://host[:port]` origin to its WebSocket URL.
/// Returns `None` for any other scheme.
pub fn websocket_url(host: &str, path: &str) -> Option<String> {
    let (scheme, rest) = if let Some(rest) = host.strip_prefix("https://") {
        ("wss", rest)
    } else if let Some(rest) = host.strip_prefix("http://") {
        ("ws", rest)
    } else {
        return None;
    };
    let rest = rest.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    Some(format!("{scheme}://{rest}/{path}"))
}

enum PumpExit {
    /// Closed locally or the owner went away
    Closed,
    /// Remote close or socket error
    Lost,
}

async fn run_transport(
    url: String,
    options: ConnectOptions,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::Sender<ChannelEvent>,
) {
    let mut attempt = 0u32;

    loop {
        let opened = tokio::select! {
            result = open_socket(&url, &options) => result,
            _ = events.closed() => return,
        };

        match opened {
            Ok(ws) => {
                attempt = 0;
                log::info!("Realtime channel connected to {url}");
                if events.send(ChannelEvent::Connected).await.is_err() {
                    return;
                }
                match pump(ws, &mut outgoing, &events).await {
                    PumpExit::Closed => {
                        let _ = events.send(ChannelEvent::Disconnected).await;
                        return;
                    }
                    PumpExit::Lost => log::warn!("Realtime channel to {url} lost"),
                }
            }
            Err(e) => log::warn!("Connect to {url} failed: {e}"),
        }

        if attempt >= options.reconnection_attempts {
            log::warn!("Giving up on {url} after {attempt} reconnection attempts");
            let _ = events.send(ChannelEvent::Disconnected).await;
            return;
        }
        attempt += 1;
        if events
            .send(ChannelEvent::Reconnecting { attempt })
            .await
            .is_err()
        {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(options.reconnection_delay) => {}
            _ = events.closed() => return,
        }
    }
}

async fn open_socket(url: &str, options: &ConnectOptions) -> Result<WsStream, ProtocolError> {
    let mut request = url.into_client_request()?;
    if options.with_credentials {
        if let Some(cookie) = &options.credentials {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| ProtocolError::InvalidCredentials(e.to_string()))?;
            request.headers_mut().insert(COOKIE, value);
        }
    }
    let (stream, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

async fn pump(
    ws: WsStream,
    outgoing: &mut mpsc::UnboundedReceiver<Outgoing>,
    events: &mpsc::Sender<ChannelEvent>,
) -> PumpExit {
    let (mut writer, mut reader) = ws.split();

    loop {
        tokio::select! {
            out = outgoing.recv() => match out {
                Some(Outgoing::Frame(frame)) => {
                    let text = match frame.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            log::warn!("Failed to encode {}: {e}", frame.event);
                            continue;
                        }
                    };
                    if writer.send(Message::Text(text.into())).await.is_err() {
                        return PumpExit::Lost;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = writer.send(Message::Close(None)).await;
                    return PumpExit::Closed;
                }
            },
            msg = reader.next() => match msg {
                Some(Ok(Message::Text(text))) => match Frame::decode(text.as_str()) {
                    Ok(frame) => {
                        if events.send(ChannelEvent::Frame(frame)).await.is_err() {
                            let _ = writer.send(Message::Close(None)).await;
                            return PumpExit::Closed;
                        }
                    }
                    Err(e) => log::warn!("Dropping malformed frame: {e}"),
                },
                Some(Ok(Message::Close(_))) | None => return PumpExit::Lost,
                Some(Err(e)) => {
                    log::warn!("WebSocket error: {e}");
                    return PumpExit::Lost;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}
