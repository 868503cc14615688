//! Push notification fan-out wired through the full engine and bus.

use async_trait::async_trait;
use hearth::notify::{
    DeliveryError, Device, DeviceRegistry, Dispatcher, InMemoryDeviceRegistry, PushKeys,
    PushNotifier, PushSubscription, PushTransport,
};
use hearth::{ChannelKind, DeviceId, EventBus, InMemoryStorage, TimerEngine, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct FakeTransport {
    gone_endpoints: HashMap<String, u16>,
    sent: Mutex<Vec<(String, serde_json::Value)>>,
}

impl FakeTransport {
    fn new() -> Self {
        Self {
            gone_endpoints: HashMap::new(),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn with_gone(endpoint: &str, status: u16) -> Self {
        let mut transport = Self::new();
        transport.gone_endpoints.insert(endpoint.to_string(), status);
        transport
    }

    fn sent(&self) -> Vec<(String, serde_json::Value)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &serde_json::Value,
        _ttl_seconds: u32,
    ) -> Result<(), DeliveryError> {
        if let Some(status) = self.gone_endpoints.get(&subscription.endpoint) {
            return Err(DeliveryError::Gone(*status));
        }
        self.sent
            .lock()
            .unwrap()
            .push((subscription.endpoint.clone(), payload.clone()));
        Ok(())
    }
}

fn device(user: &str, device_id: &str, endpoint: &str) -> Device {
    Device {
        user_id: UserId::new(user),
        device_id: DeviceId::new(device_id),
        subscription: Some(PushSubscription {
            endpoint: endpoint.to_string(),
            keys: PushKeys {
                p256dh: "p256dh".into(),
                auth: "auth".into(),
            },
        }),
        active: true,
    }
}

struct PushHarness {
    engine: Arc<TimerEngine<InMemoryStorage>>,
    registry: Arc<InMemoryDeviceRegistry>,
    transport: Arc<FakeTransport>,
}

async fn harness(transport: FakeTransport) -> PushHarness {
    let storage = Arc::new(InMemoryStorage::new());
    let registry = Arc::new(InMemoryDeviceRegistry::new());
    let transport = Arc::new(transport);
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        transport.clone(),
        60,
    ));

    let bus = Arc::new(EventBus::new());
    bus.register(Arc::new(PushNotifier::new(storage.clone(), dispatcher)))
        .await;

    PushHarness {
        engine: TimerEngine::new(storage, bus),
        registry,
        transport,
    }
}

/// Dispatch happens on a spawned task; poll until the expected number
/// of deliveries lands or give up.
async fn wait_for_sent(transport: &FakeTransport, expected: usize) -> Vec<(String, serde_json::Value)> {
    for _ in 0..200 {
        let sent = transport.sent();
        if sent.len() >= expected {
            return sent;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "timed out waiting for {} deliveries, got {}",
        expected,
        transport.sent().len()
    );
}

/// Test: starting a timer with recipients pushes to each device.
#[tokio::test]
async fn test_start_pushes_to_every_recipient() {
    let h = harness(FakeTransport::new()).await;
    h.registry.register(device("alice", "phone", "https://push/a")).await;
    h.registry.register(device("bob", "tablet", "https://push/b")).await;

    let timer = h.engine.create("Pasta", None, 600).await.unwrap();
    h.engine
        .add_recipient(&timer.id, UserId::new("alice"), DeviceId::new("phone"), ChannelKind::WebPush, "default".into())
        .await
        .unwrap();
    h.engine
        .add_recipient(&timer.id, UserId::new("bob"), DeviceId::new("tablet"), ChannelKind::WebPush, "default".into())
        .await
        .unwrap();

    h.engine.start_timer(&timer.id, None).await.unwrap();

    let sent = wait_for_sent(&h.transport, 2).await;
    let endpoints: Vec<&str> = sent.iter().map(|(e, _)| e.as_str()).collect();
    assert!(endpoints.contains(&"https://push/a"));
    assert!(endpoints.contains(&"https://push/b"));
    assert!(sent.iter().all(|(_, p)| p["event"] == "started"));
    assert!(sent.iter().all(|(_, p)| p["timer"]["label"] == "Pasta"));
}

/// Test: the full session notifies on start, pause and finish but not
/// on create, unpause or add-time.
#[tokio::test]
async fn test_only_notable_transitions_notify() {
    let h = harness(FakeTransport::new()).await;
    h.registry.register(device("alice", "phone", "https://push/a")).await;

    let timer = h.engine.create("Tea", None, 300).await.unwrap();
    h.engine
        .add_recipient(&timer.id, UserId::new("alice"), DeviceId::new("phone"), ChannelKind::WebPush, "default".into())
        .await
        .unwrap();

    h.engine.start_timer(&timer.id, None).await.unwrap();
    h.engine.add_time(&timer.id, 60).await.unwrap();
    h.engine.pause(&timer.id).await.unwrap();
    h.engine.unpause(&timer.id).await.unwrap();
    h.engine.finish(&timer.id).await.unwrap();

    wait_for_sent(&h.transport, 3).await;
    // Give any stray dispatches a moment to land before counting.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let sent = h.transport.sent();

    let events: Vec<&str> = sent.iter().filter_map(|(_, p)| p["event"].as_str()).collect();
    assert_eq!(events, vec!["started", "paused", "finished"]);
    assert_eq!(sent.last().unwrap().1["late"], false);
}

/// Test: a recipient whose subscription is gone gets deactivated while
/// the remaining recipients still receive their pushes.
#[tokio::test]
async fn test_gone_device_deactivated_others_delivered() {
    let h = harness(FakeTransport::with_gone("https://push/dead", 410)).await;
    h.registry.register(device("alice", "phone", "https://push/a")).await;
    h.registry.register(device("bob", "tablet", "https://push/dead")).await;
    h.registry.register(device("cara", "watch", "https://push/c")).await;

    let timer = h.engine.create("Roast", None, 5400).await.unwrap();
    for (user, dev) in [("alice", "phone"), ("bob", "tablet"), ("cara", "watch")] {
        h.engine
            .add_recipient(&timer.id, UserId::new(user), DeviceId::new(dev), ChannelKind::WebPush, "default".into())
            .await
            .unwrap();
    }

    h.engine.start_timer(&timer.id, None).await.unwrap();

    let sent = wait_for_sent(&h.transport, 2).await;
    let endpoints: Vec<&str> = sent.iter().map(|(e, _)| e.as_str()).collect();
    assert!(endpoints.contains(&"https://push/a"));
    assert!(endpoints.contains(&"https://push/c"));

    // The dead device ends up inactive.
    for _ in 0..200 {
        let dev = h
            .registry
            .get_device(&UserId::new("bob"), &DeviceId::new("tablet"))
            .await
            .unwrap();
        if !dev.active {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("gone device was never deactivated");
}

/// Test: timers without recipients complete their lifecycle without a
/// single dispatch.
#[tokio::test]
async fn test_no_recipients_means_no_dispatch() {
    let h = harness(FakeTransport::new()).await;
    h.registry.register(device("alice", "phone", "https://push/a")).await;

    let timer = h.engine.create("Silent", None, 60).await.unwrap();
    h.engine.start_timer(&timer.id, None).await.unwrap();
    h.engine.finish(&timer.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.transport.sent().is_empty());
}
