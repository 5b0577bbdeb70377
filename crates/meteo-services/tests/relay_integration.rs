//! Integration tests for Relay using an in-process loopback bus.
//!
//! The loopback transport records what was published and, when echo is on,
//! delivers it back on the inbound stream like a real subject subscription.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::json;

use meteo_core::BusConfig;
use meteo_services::{
    Broadcaster, BusTransport, ConnectionState, Event, EventMeta, InboundStream, Reading, Relay,
    RelayError, SqliteReadingStore,
};

struct LoopbackBus {
    connected: AtomicBool,
    echo: bool,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    published: Mutex<Vec<Vec<u8>>>,
}

impl LoopbackBus {
    fn new(echo: bool) -> (Arc<Self>, InboundStream) {
        let (tx, rx) = mpsc::unbounded();
        let bus = Arc::new(Self {
            connected: AtomicBool::new(true),
            echo,
            tx,
            published: Mutex::new(Vec::new()),
        });
        (bus, rx.boxed())
    }

    /// Deliver a message as if another service published it.
    fn inject(&self, payload: impl Into<Vec<u8>>) {
        self.tx.unbounded_send(payload.into()).unwrap();
    }

    fn published(&self) -> Vec<serde_json::Value> {
        self.published
            .lock()
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap())
            .collect()
    }
}

#[async_trait]
impl BusTransport for LoopbackBus {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, payload: Vec<u8>) -> Result<(), RelayError> {
        if !self.is_connected() {
            return Err(RelayError::Publish("loopback closed".into()));
        }
        self.published.lock().push(payload.clone());
        if self.echo {
            let _ = self.tx.unbounded_send(payload);
        }
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingBroadcaster {
    events: Mutex<Vec<Event>>,
}

impl RecordingBroadcaster {
    fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(Event::kind).collect()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn broadcast(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

struct Harness {
    relay: Relay,
    store: Arc<SqliteReadingStore>,
    broadcaster: Arc<RecordingBroadcaster>,
}

fn harness() -> Harness {
    let store = Arc::new(SqliteReadingStore::open_in_memory().unwrap());
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let relay = Relay::new(BusConfig::default(), store.clone(), broadcaster.clone());
    Harness {
        relay,
        store,
        broadcaster,
    }
}

fn reading(id: i64) -> Reading {
    Reading {
        id,
        city: "Moscow".into(),
        temperature: 1.5,
        wind_speed: None,
        created_at: "2024-01-15T12:00:00Z".parse().unwrap(),
    }
}

fn external_weather(item: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event": "external_weather",
        "item": item,
        "meta": {"source": "external_script"}
    }))
    .unwrap()
}

/// Poll until `condition` holds or two seconds pass.
async fn eventually<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_publish_when_connected_skips_local_broadcast() {
    let h = harness();
    let (bus, inbound) = LoopbackBus::new(false);
    h.relay.attach(bus.clone(), inbound);
    assert_eq!(h.relay.state(), ConnectionState::Connected);

    let event = Event::created_external(reading(1), "background");
    assert!(h.relay.dispatch(&event).await);

    assert!(h.broadcaster.events().is_empty());
    let published = bus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["event"], "created_external");
    assert_eq!(published[0]["meta"]["source"], "background");
}

#[tokio::test]
async fn test_publish_when_disconnected_falls_back_once() {
    let h = harness();

    let event = Event::created_external(reading(1), "manual");
    assert!(!h.relay.publish(&event).await);
    assert!(h.broadcaster.events().is_empty(), "publish alone never broadcasts");

    assert!(!h.relay.dispatch(&event).await);
    assert_eq!(h.broadcaster.events(), vec![event]);
}

#[tokio::test]
async fn test_lost_connection_degrades_to_fallback() {
    let h = harness();
    let (bus, inbound) = LoopbackBus::new(false);
    h.relay.attach(bus.clone(), inbound);

    bus.connected.store(false, Ordering::SeqCst);
    assert_eq!(h.relay.state(), ConnectionState::Disconnected);

    let event = Event::Deleted {
        item_id: 4,
        meta: EventMeta::new("rest"),
    };
    assert!(!h.relay.dispatch(&event).await);
    assert_eq!(h.broadcaster.kinds(), vec!["deleted"]);
    assert!(bus.published().is_empty());
}

#[tokio::test]
async fn test_external_weather_is_stored_and_announced() {
    let h = harness();

    h.relay
        .handle_inbound(&external_weather(
            json!({"city": "Moscow", "temperature": 0.0, "wind_speed": 2.0}),
        ))
        .await;

    let stored = h.store.list().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].city, "Moscow");
    assert_eq!(stored[0].temperature, 0.0);
    assert_eq!(stored[0].wind_speed, Some(2.0));

    let events = h.broadcaster.events();
    assert_eq!(events.len(), 2);
    match &events[0] {
        Event::CreatedFromNats { item, meta } => {
            assert_eq!(item, &stored[0]);
            assert_eq!(meta.source, "external_script");
        }
        other => panic!("expected created_from_nats, got {other:?}"),
    }
    match &events[1] {
        Event::NatsReceived { payload } => {
            assert_eq!(payload["event"], "external_weather");
            assert_eq!(payload["item"]["city"], "Moscow");
        }
        other => panic!("expected nats_received, got {other:?}"),
    }
}

#[tokio::test]
async fn test_external_weather_without_temperature_is_not_stored() {
    let h = harness();

    h.relay
        .handle_inbound(&external_weather(json!({"city": "Moscow", "wind_speed": 2.0})))
        .await;

    assert_eq!(h.store.count().await.unwrap(), 0);
    assert_eq!(h.broadcaster.kinds(), vec!["nats_received"]);
}

#[tokio::test]
async fn test_external_weather_for_unsupported_city_is_not_stored() {
    let h = harness();

    h.relay
        .handle_inbound(&external_weather(json!({"city": "Paris", "temperature": 11.0})))
        .await;

    assert_eq!(h.store.count().await.unwrap(), 0);
    assert_eq!(h.broadcaster.kinds(), vec!["nats_received"]);
}

#[tokio::test]
async fn test_external_weather_without_meta_uses_bus_source() {
    let h = harness();
    let payload = json!({
        "event": "external_weather",
        "item": {"city": "Yekaterinburg", "temperature": -12.0}
    });

    h.relay
        .handle_inbound(payload.to_string().as_bytes())
        .await;

    match &h.broadcaster.events()[0] {
        Event::CreatedFromNats { meta, item } => {
            assert_eq!(meta.source, "nats");
            assert_eq!(item.wind_speed, None);
        }
        other => panic!("expected created_from_nats, got {other:?}"),
    }
}

#[tokio::test]
async fn test_external_weather_with_loose_fields_is_stored() {
    let h = harness();
    let payload = json!({
        "event": "external_weather",
        "item": {"city": "Saint Petersburg", "temperature": "3.5", "wind_speed": "1.25"},
        "meta": {"source": 42}
    });

    h.relay
        .handle_inbound(payload.to_string().as_bytes())
        .await;

    let stored = h.store.list().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].temperature, 3.5);
    assert_eq!(stored[0].wind_speed, Some(1.25));

    match &h.broadcaster.events()[0] {
        Event::CreatedFromNats { meta, .. } => assert_eq!(meta.source, "nats"),
        other => panic!("expected created_from_nats, got {other:?}"),
    }
    assert_eq!(h.broadcaster.kinds(), vec!["created_from_nats", "nats_received"]);
}

#[tokio::test]
async fn test_other_kinds_are_echoed_raw() {
    let h = harness();
    let payload = json!({"event": "something_new", "anything": [1, 2, 3]});

    h.relay
        .handle_inbound(payload.to_string().as_bytes())
        .await;

    assert_eq!(h.store.count().await.unwrap(), 0);
    assert_eq!(
        h.broadcaster.events(),
        vec![Event::NatsReceived { payload }]
    );
}

#[tokio::test]
async fn test_listener_survives_malformed_messages() {
    let h = harness();
    let (bus, inbound) = LoopbackBus::new(false);
    h.relay.attach(bus.clone(), inbound);

    bus.inject(b"\xff\xfe not json".to_vec());
    bus.inject(b"{\"event\":".to_vec());
    bus.inject(external_weather(json!({"city": "Moscow", "temperature": 3.0})));

    eventually(|| h.broadcaster.kinds().len() == 2).await;

    assert_eq!(h.store.count().await.unwrap(), 1);
    assert_eq!(h.broadcaster.kinds(), vec!["created_from_nats", "nats_received"]);
}

#[tokio::test]
async fn test_published_events_loop_back_as_received() {
    let h = harness();
    let (bus, inbound) = LoopbackBus::new(true);
    h.relay.attach(bus, inbound);

    let event = Event::created_external(reading(8), "background");
    assert!(h.relay.dispatch(&event).await);

    eventually(|| !h.broadcaster.events().is_empty()).await;
    match &h.broadcaster.events()[0] {
        Event::NatsReceived { payload } => {
            assert_eq!(payload, &serde_json::to_value(&event).unwrap());
        }
        other => panic!("expected nats_received, got {other:?}"),
    }
    // Our own created_external is not stored again
    assert_eq!(h.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_close_is_idempotent_and_disconnects() {
    let h = harness();
    let (bus, inbound) = LoopbackBus::new(false);
    h.relay.attach(bus.clone(), inbound);

    h.relay.close().await;
    assert_eq!(h.relay.state(), ConnectionState::Disconnected);
    assert!(!bus.is_connected());
    h.relay.close().await;

    assert!(!h.relay.publish(&Event::created_external(reading(1), "rest")).await);
}
