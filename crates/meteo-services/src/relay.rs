//! Event relay between the message bus and local subscribers.
//!
//! Outbound: [`Relay::publish`] sends an event on the bus subject and reports
//! whether it went out. A missing bus is a `false`, never an error, and
//! [`Relay::dispatch`] falls back to the local broadcaster in that case.
//!
//! Inbound: every message on the subject is echoed locally as
//! `nats_received`. `external_weather` messages with a city and a temperature
//! are also stored and announced as `created_from_nats`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use meteo_core::BusConfig;

use crate::broadcast::Broadcaster;
use crate::event::{Event, EventMeta, ExternalReading, SOURCE_NATS};
use crate::store::ReadingStore;

/// Bus errors. None of them are fatal to the process.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Bus connection failed: {0}")]
    Connect(String),

    #[error("Bus subscribe failed: {0}")]
    Subscribe(String),

    #[error("Bus publish failed: {0}")]
    Publish(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Raw payloads received on the bus subject.
pub type InboundStream = BoxStream<'static, Vec<u8>>;

/// Outbound side of a bus connection, bound to one subject.
#[async_trait]
pub trait BusTransport: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn publish(&self, payload: Vec<u8>) -> Result<(), RelayError>;

    async fn close(&self);
}

/// NATS connection publishing to and subscribed on a single subject.
pub struct NatsTransport {
    client: async_nats::Client,
    subject: String,
}

impl NatsTransport {
    /// Connect and subscribe to `config.subject`.
    ///
    /// # Errors
    /// Returns `RelayError::Connect` when no server is reachable.
    pub async fn connect(config: &BusConfig) -> Result<(Self, InboundStream), RelayError> {
        let client = async_nats::ConnectOptions::new()
            .name(&config.client_name)
            .connection_timeout(config.connect_timeout())
            .connect(config.url.as_str())
            .await
            .map_err(|e| RelayError::Connect(e.to_string()))?;

        let subscriber = client
            .subscribe(config.subject.clone())
            .await
            .map_err(|e| RelayError::Subscribe(e.to_string()))?;
        let inbound = subscriber.map(|message| message.payload.to_vec()).boxed();

        Ok((
            Self {
                client,
                subject: config.subject.clone(),
            },
            inbound,
        ))
    }
}

#[async_trait]
impl BusTransport for NatsTransport {
    fn is_connected(&self) -> bool {
        matches!(
            self.client.connection_state(),
            async_nats::connection::State::Connected
        )
    }

    async fn publish(&self, payload: Vec<u8>) -> Result<(), RelayError> {
        self.client
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| RelayError::Publish(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.client.flush().await {
            tracing::warn!("Failed to flush bus connection on close: {}", e);
        }
    }
}

struct Link {
    transport: Arc<dyn BusTransport>,
    cancel: CancellationToken,
    listener: JoinHandle<()>,
}

/// `generation` is bumped by `close()` so a connect that started earlier
/// cannot install its link afterwards.
#[derive(Default)]
struct LinkSlot {
    connecting: bool,
    generation: u64,
    link: Option<Link>,
}

/// Stores external readings and echoes inbound traffic to local subscribers.
#[derive(Clone)]
struct InboundHandler {
    store: Arc<dyn ReadingStore>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl InboundHandler {
    async fn handle(&self, data: &[u8]) {
        let payload: serde_json::Value = match serde_json::from_slice(data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Dropping undecodable bus message: {}", e);
                return;
            }
        };

        let kind = payload
            .get("event")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("<none>");
        tracing::info!("Bus message received: {}", kind);

        if kind == "external_weather" {
            self.ingest(&payload).await;
        }

        self.broadcaster.broadcast(&Event::NatsReceived { payload });
    }

    async fn ingest(&self, payload: &serde_json::Value) {
        let item = payload
            .get("item")
            .map(ExternalReading::from_value)
            .unwrap_or_default();

        let Some(draft) = item.into_draft() else {
            tracing::warn!("external_weather message is missing city or temperature, not stored");
            return;
        };
        let source = payload
            .pointer("/meta/source")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(SOURCE_NATS);

        match self.store.create(draft).await {
            Ok(reading) => {
                tracing::info!("Stored reading {} for {} from bus", reading.id, reading.city);
                self.broadcaster.broadcast(&Event::CreatedFromNats {
                    item: reading,
                    meta: EventMeta::new(source),
                });
            }
            Err(e) => tracing::warn!("Failed to store external reading: {}", e),
        }
    }
}

async fn listen(handler: InboundHandler, mut inbound: InboundStream, cancel: CancellationToken) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = inbound.next() => message,
        };

        match message {
            Some(payload) => handler.handle(&payload).await,
            None => {
                tracing::warn!("Bus subscription ended");
                break;
            }
        }
    }
    tracing::debug!("Bus listener stopped");
}

/// Publishes events to the bus, falling back to local broadcast, and ingests
/// inbound bus traffic.
pub struct Relay {
    config: BusConfig,
    inbound: InboundHandler,
    slot: Mutex<LinkSlot>,
}

impl Relay {
    pub fn new(
        config: BusConfig,
        store: Arc<dyn ReadingStore>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            config,
            inbound: InboundHandler { store, broadcaster },
            slot: Mutex::new(LinkSlot::default()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        let slot = self.slot.lock();
        match &slot.link {
            Some(link) if link.transport.is_connected() => ConnectionState::Connected,
            _ if slot.connecting => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Connect to the configured bus and start the inbound listener.
    ///
    /// Idempotent. A failure is logged and leaves the relay in local-only
    /// mode; the return value tells whether the bus is connected.
    pub async fn connect(&self) -> bool {
        let generation = {
            let mut slot = self.slot.lock();
            if let Some(link) = &slot.link {
                return link.transport.is_connected();
            }
            if slot.connecting {
                return false;
            }
            slot.connecting = true;
            slot.generation
        };

        match NatsTransport::connect(&self.config).await {
            Ok((transport, inbound)) => {
                let transport = Arc::new(transport);
                if !self.install(transport.clone(), inbound, Some(generation)) {
                    tracing::info!("Relay closed while connecting, dropping bus connection");
                    transport.close().await;
                    return false;
                }
                tracing::info!(
                    "Connected to bus at {}, subscribed to {}",
                    self.config.url,
                    self.config.subject
                );
                true
            }
            Err(e) => {
                let mut slot = self.slot.lock();
                if slot.generation == generation {
                    slot.connecting = false;
                }
                drop(slot);
                tracing::warn!(
                    "Bus unavailable at {} ({}), continuing with local broadcast only",
                    self.config.url,
                    e
                );
                false
            }
        }
    }

    /// Bind an established transport and spawn the listener for `inbound`.
    ///
    /// Replaces any previous link.
    pub fn attach(&self, transport: Arc<dyn BusTransport>, inbound: InboundStream) {
        self.install(transport, inbound, None);
    }

    /// Install a link unless the slot moved past `expected` generation.
    fn install(
        &self,
        transport: Arc<dyn BusTransport>,
        inbound: InboundStream,
        expected: Option<u64>,
    ) -> bool {
        let previous = {
            let mut slot = self.slot.lock();
            if expected.is_some_and(|generation| generation != slot.generation) {
                return false;
            }

            let cancel = CancellationToken::new();
            let listener = tokio::spawn(listen(self.inbound.clone(), inbound, cancel.clone()));
            slot.connecting = false;
            slot.link.replace(Link {
                transport,
                cancel,
                listener,
            })
        };

        if let Some(previous) = previous {
            previous.cancel.cancel();
            tokio::spawn(async move { previous.transport.close().await });
        }
        true
    }

    /// Stop the listener and close the bus connection. Idempotent.
    pub async fn close(&self) {
        let link = {
            let mut slot = self.slot.lock();
            slot.connecting = false;
            slot.generation += 1;
            slot.link.take()
        };
        let Some(link) = link else {
            return;
        };

        link.cancel.cancel();
        if let Err(e) = link.listener.await {
            if !e.is_cancelled() {
                tracing::warn!("Bus listener failed: {}", e);
            }
        }
        link.transport.close().await;
        tracing::info!("Bus connection closed");
    }

    /// Send `event` on the bus subject.
    ///
    /// Returns `false` without raising when the bus is not connected or the
    /// send failed; the caller is then responsible for the local fallback.
    pub async fn publish(&self, event: &Event) -> bool {
        let transport = {
            let slot = self.slot.lock();
            match &slot.link {
                Some(link) if link.transport.is_connected() => link.transport.clone(),
                _ => return false,
            }
        };

        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Failed to encode {} event: {}", event.kind(), e);
                return false;
            }
        };

        match transport.publish(payload).await {
            Ok(()) => {
                tracing::debug!("Published {} to {}", event.kind(), self.config.subject);
                true
            }
            Err(e) => {
                tracing::warn!("{}", e);
                false
            }
        }
    }

    /// Publish, or broadcast locally when the bus did not take the event.
    ///
    /// Returns whether the event went out on the bus.
    pub async fn dispatch(&self, event: &Event) -> bool {
        let via_bus = self.publish(event).await;
        if !via_bus {
            tracing::debug!("Bus unavailable, broadcasting {} locally", event.kind());
            self.inbound.broadcaster.broadcast(event);
        }
        via_bus
    }

    /// Process one raw inbound message as if it arrived on the subject.
    pub async fn handle_inbound(&self, data: &[u8]) {
        self.inbound.handle(data).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::broadcast::LocalBroadcaster;
    use crate::reading_store::SqliteReadingStore;

    fn relay(url: &str) -> (Relay, LocalBroadcaster) {
        let broadcaster = LocalBroadcaster::default();
        let store = SqliteReadingStore::open_in_memory().unwrap();
        let config = BusConfig {
            url: url.to_string(),
            connect_timeout_secs: 1,
            ..BusConfig::default()
        };
        (
            Relay::new(config, Arc::new(store), Arc::new(broadcaster.clone())),
            broadcaster,
        )
    }

    #[tokio::test]
    async fn test_starts_disconnected() {
        let (relay, _) = relay("nats://127.0.0.1:4222");
        assert_eq!(relay.state(), ConnectionState::Disconnected);
        assert!(!relay.publish(&Event::NatsReceived { payload: serde_json::json!({}) }).await);
    }

    #[tokio::test]
    async fn test_close_without_connect_is_noop() {
        let (relay, _) = relay("nats://127.0.0.1:4222");
        relay.close().await;
        relay.close().await;
        assert_eq!(relay.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_unreachable_bus_is_not_fatal() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (relay, _) = relay(&format!("nats://127.0.0.1:{}", port));
        assert!(!relay.connect().await);
        assert_eq!(relay.state(), ConnectionState::Disconnected);
    }

    /// Minimal NATS server that holds back its INFO line for `delay`.
    async fn slow_bus(listener: tokio::net::TcpListener, delay: Duration) {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let port = listener.local_addr().unwrap().port();
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let (read, mut write) = socket.into_split();
                let info = format!(
                    "INFO {{\"server_id\":\"test\",\"server_name\":\"test\",\"version\":\"2.10.0\",\"go\":\"go1.21\",\"host\":\"127.0.0.1\",\"port\":{},\"headers\":true,\"max_payload\":1048576,\"proto\":1}}\r\n",
                    port
                );
                if write.write_all(info.as_bytes()).await.is_err() {
                    return;
                }
                let mut lines = BufReader::new(read).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.starts_with("PING") && write.write_all(b"PONG\r\n").await.is_err() {
                        return;
                    }
                }
            });
        }
    }

    #[tokio::test]
    async fn test_close_during_connect_keeps_relay_disconnected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(slow_bus(listener, Duration::from_millis(300)));

        let (relay, _) = relay(&format!("nats://127.0.0.1:{}", port));
        let relay = Arc::new(relay);
        let connecting = tokio::spawn({
            let relay = relay.clone();
            async move { relay.connect().await }
        });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while relay.state() != ConnectionState::Connecting {
            assert!(tokio::time::Instant::now() < deadline, "connect never started");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        relay.close().await;
        assert_eq!(relay.state(), ConnectionState::Disconnected);

        assert!(!connecting.await.unwrap());
        assert_eq!(relay.state(), ConnectionState::Disconnected);
        assert!(!relay.publish(&Event::NatsReceived { payload: serde_json::json!({}) }).await);
    }

    #[tokio::test]
    async fn test_dispatch_falls_back_when_disconnected() {
        let (relay, broadcaster) = relay("nats://127.0.0.1:4222");
        let mut rx = broadcaster.subscribe();

        let event = Event::Deleted {
            item_id: 1,
            meta: EventMeta::new("rest"),
        };
        assert!(!relay.dispatch(&event).await);

        let frame = rx.recv().await.unwrap();
        assert_eq!(serde_json::from_str::<Event>(&frame).unwrap(), event);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_undecodable_message_is_dropped() {
        let (relay, broadcaster) = relay("nats://127.0.0.1:4222");
        let mut rx = broadcaster.subscribe();

        relay.handle_inbound(b"{not json").await;
        assert!(rx.try_recv().is_err());
    }
}
