use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::protocol::{
    ClientFrame, ClientRequest, EventKind, SendAck, ServerEvent, ServerFrame,
};
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::{config::ClientSettings, error::SyncError, lock_unpoisoned};

pub type EventHandler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    /// Connected again after a drop; callers must resync.
    Reconnected,
}

/// Subscribe/send surface of the realtime transport.
#[async_trait]
pub trait EventChannel: Send + Sync {
    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Subscription;

    /// Sends and waits for the matching acknowledgment, bounded by the send
    /// timeout. Never retried.
    async fn send(&self, request: ClientRequest) -> Result<SendAck, SyncError>;

    /// Fire-and-forget, for typing indicators and read receipts.
    fn emit(&self, request: ClientRequest) -> Result<(), SyncError>;

    fn is_connected(&self) -> bool;

    fn connection_events(&self) -> broadcast::Receiver<ConnectionState>;
}

/// Maps an acknowledgment payload onto the send result.
pub fn ack_into_result(request: &'static str, ack: SendAck) -> Result<SendAck, SyncError> {
    if ack.success {
        return Ok(ack);
    }
    Err(SyncError::SendRejected {
        request,
        reason: ack
            .error
            .unwrap_or_else(|| "rejected without reason".to_string()),
    })
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(u64, EventHandler)>>,
}

/// Handler table shared by channel implementations.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl SubscriptionRegistry {
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Subscription {
        let mut inner = lock_unpoisoned(&self.inner);
        inner.next_id += 1;
        let id = inner.next_id;
        inner.handlers.entry(kind).or_default().push((id, handler));
        Subscription {
            registry: Arc::downgrade(&self.inner),
            kind,
            id,
        }
    }

    /// Runs every handler for the event's kind. Handlers are invoked outside
    /// the registry lock so they may subscribe or unsubscribe.
    pub fn dispatch(&self, event: &ServerEvent) -> usize {
        let handlers: Vec<EventHandler> = lock_unpoisoned(&self.inner)
            .handlers
            .get(&event.kind())
            .map(|entries| entries.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn handler_count(&self) -> usize {
        lock_unpoisoned(&self.inner)
            .handlers
            .values()
            .map(Vec::len)
            .sum()
    }
}

/// Scoped registration; dropping it unsubscribes the handler.
pub struct Subscription {
    registry: Weak<Mutex<RegistryInner>>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut inner = lock_unpoisoned(&registry);
        if let Some(entries) = inner.handlers.get_mut(&self.kind) {
            entries.retain(|(id, _)| *id != self.id);
            if entries.is_empty() {
                inner.handlers.remove(&self.kind);
            }
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct ChannelShared {
    registry: SubscriptionRegistry,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending_acks: Mutex<HashMap<u64, oneshot::Sender<SendAck>>>,
    next_request_id: AtomicU64,
    connected: AtomicBool,
    connection_tx: broadcast::Sender<ConnectionState>,
    send_timeout: Duration,
}

impl ChannelShared {
    fn enqueue(&self, frame: &ClientFrame) -> Result<(), SyncError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::TransportUnavailable);
        }
        let text = serde_json::to_string(frame)?;
        let outbound = lock_unpoisoned(&self.outbound);
        let Some(tx) = outbound.as_ref() else {
            return Err(SyncError::TransportUnavailable);
        };
        tx.send(text).map_err(|_| SyncError::TransportUnavailable)
    }

    fn on_text(&self, text: &str) {
        match serde_json::from_str::<ServerFrame>(text) {
            Ok(ServerFrame::Event { event }) => {
                if self.registry.dispatch(&event) == 0 {
                    debug!(kind = ?event.kind(), "transport: no handler for event");
                }
            }
            Ok(ServerFrame::Ack(ack)) => {
                let waiter = lock_unpoisoned(&self.pending_acks).remove(&ack.request_id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(ack);
                    }
                    None => debug!(request_id = ack.request_id, "transport: late ack ignored"),
                }
            }
            Err(err) => warn!("transport: invalid server frame: {err}"),
        }
    }

    async fn run_connection(&self, stream: WsStream, state: ConnectionState) {
        let (mut writer, mut reader) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        *lock_unpoisoned(&self.outbound) = Some(tx);
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.connection_tx.send(state);

        loop {
            tokio::select! {
                frame = reader.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.on_text(&text),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("transport: websocket receive failed: {err}");
                        break;
                    }
                },
                outgoing = rx.recv() => match outgoing {
                    Some(text) => {
                        if let Err(err) = writer.send(Message::Text(text)).await {
                            warn!("transport: websocket send failed: {err}");
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        self.mark_disconnected();
    }

    /// Drops the writer and every ack waiter; waiters observe a closed slot.
    fn mark_disconnected(&self) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        lock_unpoisoned(&self.outbound).take();
        lock_unpoisoned(&self.pending_acks).clear();
        if was_connected {
            let _ = self.connection_tx.send(ConnectionState::Disconnected);
        }
    }
}

/// Websocket event channel with JSON text frames and automatic reconnect.
pub struct WsEventChannel {
    shared: Arc<ChannelShared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl WsEventChannel {
    /// Starts connecting in the background and returns immediately; poll
    /// `is_connected` or watch `connection_events` for readiness.
    pub fn connect(ws_url: String, settings: &ClientSettings) -> Arc<Self> {
        let (connection_tx, _) = broadcast::channel(16);
        let shared = Arc::new(ChannelShared {
            registry: SubscriptionRegistry::default(),
            outbound: Mutex::new(None),
            pending_acks: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            connection_tx,
            send_timeout: settings.send_timeout,
        });
        let supervisor = tokio::spawn(supervise(
            Arc::clone(&shared),
            ws_url,
            settings.reconnect_delay,
        ));
        Arc::new(Self {
            shared,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }

    /// Stops reconnecting and drops the current connection.
    pub fn close(&self) {
        if let Some(handle) = lock_unpoisoned(&self.supervisor).take() {
            handle.abort();
        }
        self.shared.mark_disconnected();
    }
}

async fn supervise(shared: Arc<ChannelShared>, ws_url: String, reconnect_delay: Duration) {
    let mut connected_before = false;
    loop {
        match connect_async(ws_url.as_str()).await {
            Ok((stream, _)) => {
                let state = if connected_before {
                    ConnectionState::Reconnected
                } else {
                    ConnectionState::Connected
                };
                connected_before = true;
                info!(%ws_url, ?state, "transport: websocket connected");
                shared.run_connection(stream, state).await;
                warn!(%ws_url, "transport: websocket closed; reconnecting");
            }
            Err(err) => warn!(%ws_url, "transport: failed to connect websocket: {err}"),
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

impl Drop for WsEventChannel {
    fn drop(&mut self) {
        if let Some(handle) = lock_unpoisoned(&self.supervisor).take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl EventChannel for WsEventChannel {
    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Subscription {
        self.shared.registry.subscribe(kind, handler)
    }

    async fn send(&self, request: ClientRequest) -> Result<SendAck, SyncError> {
        let name = request.name();
        let request_id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock_unpoisoned(&self.shared.pending_acks).insert(request_id, tx);

        let frame = ClientFrame {
            request_id: Some(request_id),
            request,
        };
        if let Err(err) = self.shared.enqueue(&frame) {
            lock_unpoisoned(&self.shared.pending_acks).remove(&request_id);
            return Err(err);
        }

        match tokio::time::timeout(self.shared.send_timeout, rx).await {
            Ok(Ok(ack)) => ack_into_result(name, ack),
            Ok(Err(_)) => Err(SyncError::TransportUnavailable),
            Err(_) => {
                lock_unpoisoned(&self.shared.pending_acks).remove(&request_id);
                Err(SyncError::SendTimeout {
                    request: name,
                    after: self.shared.send_timeout,
                })
            }
        }
    }

    fn emit(&self, request: ClientRequest) -> Result<(), SyncError> {
        self.shared.enqueue(&ClientFrame {
            request_id: None,
            request,
        })
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionState> {
        self.shared.connection_tx.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
