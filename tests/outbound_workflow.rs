//! End-to-end outbound workflow scenarios driven over an in-process
//! loopback bus: published envelopes are routed straight back through the
//! router, with stub vision/motion/coder/order services answering the
//! scheduler the way the real services do over the broker.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ios_core::constants::topic_keys;
use ios_core::handlers::install_handlers;
use ios_core::messaging::{
    topic_matches, Envelope, EnvelopePublisher, MessageHandler, MessagePriority, Router,
    ServiceDescriptor, TopicRegistry,
};
use ios_core::orchestration::WorkflowConfig;
use ios_core::state_machine::TaskStatus;
use ios_core::{StateStore, WorkflowEngine};

/// In-process bus: resolves topic keys, wraps payloads in envelopes, logs
/// them, and delivers to the router when any subscription pattern matches
/// (mirroring broker subscription semantics).
struct LoopbackBus {
    registry: Arc<TopicRegistry>,
    router: Arc<Router>,
    identity: ServiceDescriptor,
    log: Mutex<Vec<(String, Vec<u8>)>>,
}

impl LoopbackBus {
    fn new(registry: Arc<TopicRegistry>, router: Arc<Router>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            router,
            identity: ServiceDescriptor::new("Scheduler", "Test"),
            log: Mutex::new(Vec::new()),
        })
    }

    fn published(&self, topic: &str) -> Vec<Envelope> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(logged, _)| logged == topic)
            .map(|(_, bytes)| Envelope::deserialize(bytes).unwrap())
            .collect()
    }

    async fn wait_for_publish(&self, topic: &str) -> Envelope {
        for _ in 0..400 {
            if let Some(envelope) = self.published(topic).pop() {
                return envelope;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no publish observed on {topic}");
    }

    /// Deliver raw bytes as if they arrived from the broker.
    async fn deliver(&self, topic: &str, bytes: &[u8]) {
        self.router.route(topic, bytes).await;
    }
}

#[async_trait]
impl EnvelopePublisher for LoopbackBus {
    async fn publish_data(
        &self,
        topic_key: &str,
        data: Value,
        priority: MessagePriority,
        correlation_id: Option<String>,
    ) -> bool {
        let Ok(topic) = self.registry.resolve(topic_key, "v1", &[]) else {
            return false;
        };
        let message_type = self
            .registry
            .definition(topic_key)
            .map(|definition| definition.message_type)
            .unwrap_or(ios_core::MessageType::Event);
        let mut envelope = Envelope::new(message_type, priority, self.identity.clone(), data);
        if let Some(correlation_id) = correlation_id {
            envelope = envelope.with_correlation_id(correlation_id);
        }
        let bytes = envelope.serialize().expect("envelope serializes");
        self.log.lock().unwrap().push((topic.clone(), bytes.clone()));

        let subscribed = self
            .router
            .registered_patterns()
            .await
            .iter()
            .any(|pattern| topic_matches(pattern, &topic));
        if subscribed {
            self.router.route(&topic, &bytes).await;
        }
        true
    }
}

/// A stub peer service: answers one request topic with one response.
struct StubService {
    listen_topic: String,
    respond_key: &'static str,
    bus: Arc<LoopbackBus>,
    respond: Box<dyn Fn(&Envelope) -> Value + Send + Sync>,
    delay: Duration,
}

#[async_trait]
impl MessageHandler for StubService {
    async fn handle(&self, _topic: &str, payload: &[u8]) {
        let Ok(envelope) = Envelope::deserialize(payload) else {
            return;
        };
        tokio::time::sleep(self.delay).await;
        let response = (self.respond)(&envelope);
        self.bus
            .publish_data(self.respond_key, response, MessagePriority::Normal, None)
            .await;
    }

    fn supported_topics(&self) -> Vec<String> {
        vec![self.listen_topic.clone()]
    }
}

struct Workcell {
    registry: Arc<TopicRegistry>,
    router: Arc<Router>,
    bus: Arc<LoopbackBus>,
    store: Arc<StateStore>,
    engine: WorkflowEngine,
}

/// Assemble the scheduler handler set plus stub peers for every external
/// service the workflow touches.
async fn workcell() -> Workcell {
    let registry = Arc::new(TopicRegistry::with_defaults());
    let router = Arc::new(Router::new());
    let bus = LoopbackBus::new(Arc::clone(&registry), Arc::clone(&router));
    let store = Arc::new(StateStore::new());
    let engine = WorkflowEngine::new(
        WorkflowConfig::default(),
        Arc::clone(&store),
        Arc::clone(&bus) as Arc<dyn EnvelopePublisher>,
    );

    install_handlers(
        &router,
        &registry,
        Arc::clone(&store),
        Arc::clone(&bus) as Arc<dyn EnvelopePublisher>,
        engine.clone(),
    )
    .await;

    // Stub vision: measures 1.8 m after a short delay.
    router
        .register_handler(Arc::new(StubService {
            listen_topic: registry.resolve_default(topic_keys::VISION_HEIGHT_REQUEST).unwrap(),
            respond_key: topic_keys::VISION_HEIGHT_RESULT,
            bus: Arc::clone(&bus),
            respond: Box::new(|_request| {
                json!({ "min_height": 1.8, "timestamp": chrono::Utc::now() })
            }),
            delay: Duration::from_millis(20),
        }))
        .await;

    // Stub motion: completes the commanded move.
    router
        .register_handler(Arc::new(StubService {
            listen_topic: registry.resolve_default(topic_keys::MOTION_MOVE).unwrap(),
            respond_key: topic_keys::MOTION_COMPLETE,
            bus: Arc::clone(&bus),
            respond: Box::new(|request| {
                json!({
                    "task_id": request.data["task_id"],
                    "final_position": 155_000_000_i64,
                    "success": true,
                    "timestamp": chrono::Utc::now(),
                })
            }),
            delay: Duration::from_millis(5),
        }))
        .await;

    // Stub coder: two scanners each contributed one code.
    router
        .register_handler(Arc::new(StubService {
            listen_topic: registry.resolve_default(topic_keys::CODER_START).unwrap(),
            respond_key: topic_keys::CODER_COMPLETE,
            bus: Arc::clone(&bus),
            respond: Box::new(|request| {
                json!({
                    "direction": request.data["direction"],
                    "stack_height": request.data["stack_height"],
                    "codes": ["CODE-A", "CODE-B"],
                    "timestamp": chrono::Utc::now(),
                    "success": true,
                })
            }),
            delay: Duration::from_millis(5),
        }))
        .await;

    // Stub order service: assigns ORD-1.
    router
        .register_handler(Arc::new(StubService {
            listen_topic: registry.resolve_default(topic_keys::ORDER_REQUEST).unwrap(),
            respond_key: topic_keys::ORDER_NEW,
            bus: Arc::clone(&bus),
            respond: Box::new(|_request| json!({ "order_id": "ORD-1" })),
            delay: Duration::from_millis(5),
        }))
        .await;

    Workcell {
        registry,
        router,
        bus,
        store,
        engine,
    }
}

fn trigger_bytes(direction: &str) -> Vec<u8> {
    Envelope::event(
        ServiceDescriptor::new("Sensor", "Test"),
        json!({ "direction": direction }),
    )
    .serialize()
    .unwrap()
}

#[tokio::test]
async fn happy_path_outbound_task() {
    let cell = workcell().await;
    let trigger_topic = cell
        .registry
        .resolve_default(topic_keys::SENSOR_TRIGGER)
        .unwrap();

    cell.bus.deliver(&trigger_topic, &trigger_bytes("out")).await;

    let odoo_topic = cell.registry.resolve_default(topic_keys::CODER_ODOO).unwrap();
    let odoo = cell.bus.wait_for_publish(&odoo_topic).await;

    assert_eq!(odoo.data["order_id"], json!("ORD-1"));
    assert_eq!(odoo.data["codes"], json!(["CODE-A", "CODE-B"]));
    assert_eq!(odoo.data["direction"], json!("out"));
    // stack height from geometry: 2000 - 1.8 * 1000
    assert_eq!(odoo.data["stack_height"], json!(200.0));

    // Exactly one business event, and the task is terminal.
    assert_eq!(cell.bus.published(&odoo_topic).len(), 1);
    let tasks = cell.engine.tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Completed);
    assert_eq!(tasks[0].codes, vec!["CODE-A", "CODE-B"]);
}

#[tokio::test]
async fn redelivered_step_event_does_not_duplicate_completion() {
    let cell = workcell().await;
    let trigger_topic = cell
        .registry
        .resolve_default(topic_keys::SENSOR_TRIGGER)
        .unwrap();

    cell.bus.deliver(&trigger_topic, &trigger_bytes("out")).await;

    let odoo_topic = cell.registry.resolve_default(topic_keys::CODER_ODOO).unwrap();
    cell.bus.wait_for_publish(&odoo_topic).await;

    // A broker restart makes the motion service re-publish its completion
    // with the same message id; the workflow must not advance again.
    let complete_topic = cell
        .registry
        .resolve_default(topic_keys::MOTION_COMPLETE)
        .unwrap();
    let replayed = cell.bus.published(&complete_topic).pop().unwrap();
    cell.bus
        .deliver(&complete_topic, &replayed.serialize().unwrap())
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(cell.bus.published(&odoo_topic).len(), 1);
}

#[tokio::test]
async fn redelivered_trigger_starts_a_single_task() {
    let cell = workcell().await;
    let trigger_topic = cell
        .registry
        .resolve_default(topic_keys::SENSOR_TRIGGER)
        .unwrap();

    let bytes = trigger_bytes("out");
    cell.bus.deliver(&trigger_topic, &bytes).await;
    cell.bus.deliver(&trigger_topic, &bytes).await;

    let odoo_topic = cell.registry.resolve_default(topic_keys::CODER_ODOO).unwrap();
    cell.bus.wait_for_publish(&odoo_topic).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(cell.engine.tasks().await.len(), 1);
    assert_eq!(cell.bus.published(&odoo_topic).len(), 1);
}

#[tokio::test]
async fn unknown_topic_goes_to_default_handler() {
    let cell = workcell().await;

    cell.bus.deliver("foo/bar/baz", b"arbitrary-bytes").await;

    let archived = cell.store.keys_with_prefix("unknown_messages:").await;
    assert_eq!(archived.len(), 1);

    let unknown_topic = cell
        .registry
        .resolve_default(topic_keys::SYSTEM_UNKNOWN_TOPIC)
        .unwrap();
    let report = cell.bus.wait_for_publish(&unknown_topic).await;
    assert_eq!(report.data["topic"], json!("foo/bar/baz"));

    // No workflow side effects.
    assert!(cell.engine.tasks().await.is_empty());
}

#[tokio::test]
async fn inbound_direction_uses_inbound_geometry() {
    let cell = workcell().await;
    let trigger_topic = cell
        .registry
        .resolve_default(topic_keys::SENSOR_TRIGGER)
        .unwrap();

    cell.bus.deliver(&trigger_topic, &trigger_bytes("in")).await;

    let move_topic = cell.registry.resolve_default(topic_keys::MOTION_MOVE).unwrap();
    let command = cell.bus.wait_for_publish(&move_topic).await;
    // 2200 - 150 - 200
    assert_eq!(command.data["position_mm"], json!(1850.0));

    let odoo_topic = cell.registry.resolve_default(topic_keys::CODER_ODOO).unwrap();
    let odoo = cell.bus.wait_for_publish(&odoo_topic).await;
    assert_eq!(odoo.data["direction"], json!("in"));
}

#[tokio::test]
async fn router_wildcard_subscription_reaches_handler() {
    let cell = workcell().await;

    // A handler listening on a wildcard pattern sees every status topic.
    struct Collector {
        seen: Mutex<Vec<String>>,
    }
    #[async_trait]
    impl MessageHandler for Collector {
        async fn handle(&self, topic: &str, _payload: &[u8]) {
            self.seen.lock().unwrap().push(topic.to_string());
        }
        fn supported_topics(&self) -> Vec<String> {
            vec!["ios/v1/status/+/heartbeat".to_string()]
        }
    }
    let collector = Arc::new(Collector {
        seen: Mutex::new(Vec::new()),
    });
    cell.router
        .register_handler(Arc::clone(&collector) as Arc<dyn MessageHandler>)
        .await;

    cell.bus
        .deliver("ios/v1/status/vision/heartbeat", b"{}")
        .await;
    cell.bus
        .deliver("ios/v1/status/motion/heartbeat", b"{}")
        .await;

    let seen = collector.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert!(seen.contains(&"ios/v1/status/vision/heartbeat".to_string()));
}
