//! # Bus Client
//!
//! The per-service MQTT adapter. It exclusively owns the underlying MQTT
//! session and its reconnect timer; every other component interacts with
//! the bus only through this API.
//!
//! Lifecycle: `start` opens the connection, waits for the first broker
//! acknowledgment (bounded by the configured connect timeout), and issues
//! the subscription set declared in configuration in the order declared.
//! On disconnect the client transitions to reconnecting, spacing attempts
//! by `reconnect_interval_s` up to `max_reconnect_attempts`, then gives up
//! and emits a terminal connection-changed event. On every successful
//! reconnect the full subscription set is re-issued.
//!
//! All publishes and subscriptions use at-least-once delivery; `retain` is
//! false. Outbound publishes issued while disconnected are queued in a
//! bounded queue of `max_retries * 10` entries; a full queue surfaces as an
//! overflow error rather than blocking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::config::ServiceConfig;
use crate::constants::topic_keys;
use crate::messaging::envelope::{Envelope, MessagePriority, MessageType, ServiceDescriptor};
use crate::messaging::errors::{MessagingError, MessagingResult};
use crate::messaging::payloads::HeartbeatStatus;
use crate::messaging::router::{MessageHandler, Router};
use crate::messaging::topics::TopicRegistry;

/// Connection lifecycle notifications delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Session established (initial connect or reconnect).
    Connected,
    /// Session lost; the client is attempting to reconnect.
    Disconnected,
    /// Reconnect attempts exhausted; the client has given up.
    TerminalDisconnect,
}

/// Point-in-time counters for monitoring.
#[derive(Debug, Clone, Default)]
pub struct ClientStatistics {
    pub connected_at: Option<DateTime<Utc>>,
    pub published_count: u64,
    pub received_count: u64,
    pub subscribed_topics: Vec<String>,
    pub reconnect_count: u32,
    pub last_message_at: Option<DateTime<Utc>>,
    pub is_connected: bool,
}

/// Outcome of a batch publish. A batch never stops on first failure.
#[derive(Debug, Clone, Default)]
pub struct BatchPublishResult {
    pub success_count: usize,
    pub failure_count: usize,
    pub failures: Vec<(String, String)>,
}

/// Abstraction over enveloped publishing, implemented by [`BusClient`] and
/// by test doubles. Handlers and the workflow engine publish through this
/// seam rather than holding the MQTT session.
#[async_trait]
pub trait EnvelopePublisher: Send + Sync {
    /// Wrap `data` in an envelope and publish it on the topic bound to
    /// `topic_key`. Returns false on unregistered key or serialization
    /// error; never errors.
    async fn publish_data(
        &self,
        topic_key: &str,
        data: Value,
        priority: MessagePriority,
        correlation_id: Option<String>,
    ) -> bool;
}

/// State shared between the client facade and its event-loop task.
struct ClientShared {
    identity: ServiceDescriptor,
    registry: Arc<TopicRegistry>,
    router: Arc<Router>,
    connected: AtomicBool,
    had_failures: AtomicBool,
    published_count: AtomicU64,
    received_count: AtomicU64,
    reconnect_count: AtomicU32,
    connected_at: Mutex<Option<DateTime<Utc>>>,
    last_message_at: Mutex<Option<DateTime<Utc>>>,
    /// Every active subscription filter, in issue order. Re-issued in this
    /// order on reconnect.
    subscriptions: Mutex<Vec<String>>,
    connection_events: broadcast::Sender<ConnectionEvent>,
    service_name: String,
}

impl ClientShared {
    fn track_subscription(&self, topic: &str) {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !subscriptions.iter().any(|existing| existing == topic) {
            subscriptions.push(topic.to_string());
        }
    }

    fn untrack_subscription(&self, topic: &str) {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscriptions.retain(|existing| existing != topic);
    }

    fn subscription_snapshot(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn emit(&self, event: ConnectionEvent) {
        // Send only fails when there are no subscribers, which is fine.
        let _ = self.connection_events.send(event);
    }
}

/// The per-service MQTT bus client.
pub struct BusClient {
    config: ServiceConfig,
    shared: Arc<ClientShared>,
    registry: Arc<TopicRegistry>,
    router: Arc<Router>,
    mqtt: Mutex<Option<AsyncClient>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl BusClient {
    /// Create a stopped client. `start` opens the session.
    pub fn new(
        config: ServiceConfig,
        registry: Arc<TopicRegistry>,
        router: Arc<Router>,
    ) -> Self {
        let identity = ServiceDescriptor::new(
            config.service_name.clone(),
            crate::constants::protocol::DEFAULT_ENVIRONMENT,
        );
        let (connection_events, _) = broadcast::channel(64);
        let shared = Arc::new(ClientShared {
            identity,
            registry: Arc::clone(&registry),
            router: Arc::clone(&router),
            connected: AtomicBool::new(false),
            had_failures: AtomicBool::new(false),
            published_count: AtomicU64::new(0),
            received_count: AtomicU64::new(0),
            reconnect_count: AtomicU32::new(0),
            connected_at: Mutex::new(None),
            last_message_at: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            connection_events,
            service_name: config.service_name.clone(),
        });
        Self {
            config,
            shared,
            registry,
            router,
            mqtt: Mutex::new(None),
            shutdown: Mutex::new(None),
        }
    }

    /// The service identity stamped into outgoing envelopes.
    pub fn identity(&self) -> &ServiceDescriptor {
        &self.shared.identity
    }

    /// Subscribe to connection lifecycle notifications.
    pub fn subscribe_connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.connection_events.subscribe()
    }

    /// Open the session, wait for the broker acknowledgment, and issue the
    /// subscriptions declared in configuration.
    ///
    /// Fatal when the initial connect exceeds the configured timeout and
    /// the reconnect budget is exhausted.
    pub async fn start(&self) -> MessagingResult<()> {
        let report = self.config.validate();
        if !report.is_valid() {
            return Err(MessagingError::internal(format!(
                "invalid configuration: {}",
                report.errors.join("; ")
            )));
        }

        let connection = &self.config.connection;
        let mut options = MqttOptions::new(
            connection.client_id.clone(),
            connection.broker.clone(),
            connection.port,
        );
        options.set_keep_alive(Duration::from_secs(connection.keep_alive_s.max(5)));
        options.set_clean_session(connection.clean_session);
        if let (Some(username), Some(password)) = (&connection.username, &connection.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        if connection.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let capacity = self.config.outbound_queue_capacity().max(10);
        let (client, event_loop) = AsyncClient::new(options, capacity);

        {
            let mut slot = self
                .mqtt
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *slot = Some(client.clone());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        {
            let mut slot = self
                .shutdown
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *slot = Some(shutdown_tx);
        }

        let mut events = self.subscribe_connection_events();
        tokio::spawn(run_event_loop(
            Arc::clone(&self.shared),
            client,
            event_loop,
            shutdown_rx,
            connection.reconnect_interval_s,
            connection.max_reconnect_attempts,
        ));

        // Wait for the first acknowledgment. Attempts continue in the
        // background, so the overall wait covers the full reconnect budget.
        let budget = Duration::from_secs(
            connection.connect_timeout_s
                + connection.reconnect_interval_s
                    * u64::from(connection.max_reconnect_attempts)
                + 1,
        );
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(MessagingError::ConnectTimeout {
                    timeout_seconds: connection.connect_timeout_s,
                });
            }
            match tokio::time::timeout(remaining, events.recv()).await {
                Ok(Ok(ConnectionEvent::Connected)) => break,
                Ok(Ok(ConnectionEvent::TerminalDisconnect)) => {
                    return Err(MessagingError::ReconnectExhausted {
                        attempts: connection.max_reconnect_attempts,
                    });
                }
                Ok(Ok(ConnectionEvent::Disconnected)) => continue,
                Ok(Err(_)) => {
                    return Err(MessagingError::internal("connection event channel closed"))
                }
                Err(_) => {
                    return Err(MessagingError::ConnectTimeout {
                        timeout_seconds: connection.connect_timeout_s,
                    });
                }
            }
        }

        // Declared subscriptions, in the order declared.
        for binding in &self.config.topics.subscribe {
            self.subscribe(&binding.pattern).await?;
        }

        info!(
            service = %self.config.service_name,
            broker = %connection.broker,
            subscriptions = self.config.topics.subscribe.len(),
            "🚀 bus client started"
        );
        Ok(())
    }

    /// Close the session. Queued outbound publishes are drained
    /// best-effort by the transport before the disconnect completes.
    /// Idempotent.
    pub async fn stop(&self) {
        let shutdown = {
            let mut slot = self
                .shutdown
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slot.take()
        };
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }

        let client = {
            let mut slot = self
                .mqtt
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slot.take()
        };
        if let Some(client) = client {
            if let Err(e) = client.disconnect().await {
                debug!(error = %e, "disconnect while stopping");
            }
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        info!(service = %self.config.service_name, "bus client stopped");
    }

    fn client_handle(&self) -> MessagingResult<AsyncClient> {
        let slot = self
            .mqtt
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.clone().ok_or(MessagingError::NotConnected)
    }

    /// Publish raw bytes at-least-once. Queued if disconnected and
    /// delivered on reconnect; a full outbound queue returns an overflow
    /// error instead of blocking.
    pub fn publish_raw(&self, topic: &str, payload: Vec<u8>) -> MessagingResult<()> {
        let client = self.client_handle()?;
        match client.try_publish(topic, QoS::AtLeastOnce, false, payload) {
            Ok(()) => {
                self.shared.published_count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(rumqttc::ClientError::TryRequest(_)) => Err(MessagingError::publish_overflow(
                topic,
                self.config.outbound_queue_capacity(),
            )),
            Err(e) => Err(MessagingError::publish_failed(topic, e.to_string())),
        }
    }

    /// Wrap `data` in an envelope carrying this service's identity and
    /// publish it on the topic bound to `topic_key`. Returns false on an
    /// unregistered key or serialization error; never errors.
    pub async fn publish(
        &self,
        topic_key: &str,
        data: Value,
        priority: MessagePriority,
        correlation_id: Option<String>,
    ) -> bool {
        self.publish_data(topic_key, data, priority, correlation_id)
            .await
    }

    /// Publish each entry of a batch, never stopping on the first failure.
    pub fn publish_batch(&self, entries: &[(String, Vec<u8>)]) -> BatchPublishResult {
        let mut result = BatchPublishResult::default();
        for (topic, payload) in entries {
            match self.publish_raw(topic, payload.clone()) {
                Ok(()) => result.success_count += 1,
                Err(e) => {
                    result.failure_count += 1;
                    result.failures.push((topic.clone(), e.to_string()));
                }
            }
        }
        result
    }

    /// Publish a heartbeat on the `status.heartbeat` topic resolved with
    /// this service's name. Returns connected ∧ publish-succeeded.
    pub async fn health_check(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        let source = self.config.service_name.to_lowercase();
        let topic = match self.registry.resolve(
            topic_keys::STATUS_HEARTBEAT,
            &self.config.messages.version,
            &[&source],
        ) {
            Ok(topic) => topic,
            Err(e) => {
                warn!(error = %e, "heartbeat topic resolution failed");
                return false;
            }
        };
        let payload = HeartbeatStatus {
            source,
            timestamp: Utc::now(),
            additional: None,
        };
        let data = match serde_json::to_value(&payload) {
            Ok(data) => data,
            Err(_) => return false,
        };
        let envelope = Envelope::heartbeat(self.shared.identity.clone(), data);
        match envelope.serialize() {
            Ok(bytes) => self.publish_raw(&topic, bytes).is_ok(),
            Err(_) => false,
        }
    }

    /// Spawn a periodic heartbeat publisher that runs until `stop`.
    pub fn spawn_heartbeat(self: &Arc<Self>, interval: Duration) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let stopped = {
                    let slot = client
                        .shutdown
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    slot.is_none()
                };
                if stopped {
                    break;
                }
                if !client.health_check().await {
                    debug!("heartbeat skipped while disconnected");
                }
            }
        });
    }

    /// Subscribe an MQTT filter (at-least-once) and remember it for
    /// re-subscription after reconnect.
    pub async fn subscribe(&self, topic: &str) -> MessagingResult<()> {
        let client = self.client_handle()?;
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| MessagingError::subscribe_failed(topic, e.to_string()))?;
        self.shared.track_subscription(topic);
        debug!(topic, "subscribed");
        Ok(())
    }

    /// Subscribe a symbolic topic key with a typed envelope handler.
    ///
    /// The handler is stored in the router keyed by the resolved topic and
    /// invoked for each decodable envelope. When `filter_type` is set,
    /// envelopes of other types are dropped before the handler runs. On
    /// subscribe failure the router entry is rolled back.
    pub async fn subscribe_typed<F, Fut>(
        &self,
        topic_key: &str,
        filter_type: Option<MessageType>,
        handler: F,
    ) -> MessagingResult<()>
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let topic = self
            .registry
            .resolve(topic_key, &self.config.messages.version, &[])?;

        let adapter: Arc<dyn MessageHandler> = Arc::new(TypedEnvelopeHandler {
            topic: topic.clone(),
            service_name: self.config.service_name.clone(),
            filter_type,
            callback: Box::new(move |envelope| Box::pin(handler(envelope))),
        });
        self.router.register(&topic, adapter).await;

        if let Err(e) = self.subscribe(&topic).await {
            self.router.unregister(&topic).await;
            return Err(e);
        }
        Ok(())
    }

    /// Remove an MQTT filter and its handler table entry.
    pub async fn unsubscribe(&self, topic: &str) -> MessagingResult<()> {
        let client = self.client_handle()?;
        client
            .unsubscribe(topic)
            .await
            .map_err(|e| MessagingError::unsubscribe_failed(topic, e.to_string()))?;
        self.shared.untrack_subscription(topic);
        self.router.unregister(topic).await;
        Ok(())
    }

    /// Whether the session is currently established.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Snapshot of the client counters.
    pub fn statistics(&self) -> ClientStatistics {
        ClientStatistics {
            connected_at: *self
                .shared
                .connected_at
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            published_count: self.shared.published_count.load(Ordering::Relaxed),
            received_count: self.shared.received_count.load(Ordering::Relaxed),
            subscribed_topics: self.shared.subscription_snapshot(),
            reconnect_count: self.shared.reconnect_count.load(Ordering::Relaxed),
            last_message_at: *self
                .shared
                .last_message_at
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            is_connected: self.is_connected(),
        }
    }
}

#[async_trait]
impl EnvelopePublisher for BusClient {
    async fn publish_data(
        &self,
        topic_key: &str,
        data: Value,
        priority: MessagePriority,
        correlation_id: Option<String>,
    ) -> bool {
        let topic = match self
            .registry
            .resolve(topic_key, &self.config.messages.version, &[])
        {
            Ok(topic) => topic,
            Err(e) => {
                warn!(topic_key, error = %e, "publish on unresolved key dropped");
                return false;
            }
        };
        let message_type = self
            .registry
            .definition(topic_key)
            .map(|definition| definition.message_type)
            .unwrap_or(MessageType::Event);

        let mut envelope =
            Envelope::new(message_type, priority, self.shared.identity.clone(), data);
        envelope.max_retries = self.config.messages.max_retries;
        if let Some(correlation_id) = correlation_id {
            envelope = envelope.with_correlation_id(correlation_id);
        }

        let bytes = match envelope.serialize() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(topic_key, error = %e, "envelope serialization failed");
                return false;
            }
        };
        match self.publish_raw(&topic, bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!(topic, error = %e, "enveloped publish failed");
                false
            }
        }
    }
}

/// Session event loop: polls the transport, dispatches inbound publishes,
/// and drives the reconnect policy.
async fn run_event_loop(
    shared: Arc<ClientShared>,
    client: AsyncClient,
    mut event_loop: rumqttc::EventLoop,
    mut shutdown: watch::Receiver<bool>,
    reconnect_interval_s: u64,
    max_reconnect_attempts: u32,
) {
    let mut failed_attempts: u32 = 0;
    let mut ever_connected = false;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("event loop shutting down");
                    return;
                }
            }
            polled = event_loop.poll() => match polled {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    let reconnect = ever_connected;
                    ever_connected = true;
                    failed_attempts = 0;
                    shared.connected.store(true, Ordering::SeqCst);
                    {
                        let mut connected_at = shared
                            .connected_at
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        *connected_at = Some(Utc::now());
                    }
                    if reconnect {
                        shared.reconnect_count.fetch_add(1, Ordering::Relaxed);
                        resubscribe(&shared, &client).await;
                    }
                    if shared.had_failures.swap(false, Ordering::SeqCst) {
                        report_connection_recovery(&shared, &client).await;
                    }
                    shared.emit(ConnectionEvent::Connected);
                    info!(reconnect, "✅ broker connection established");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    shared.received_count.fetch_add(1, Ordering::Relaxed);
                    {
                        let mut last = shared
                            .last_message_at
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        *last = Some(Utc::now());
                    }
                    // Dispatch on a worker task so a slow handler never
                    // blocks reception.
                    let router = Arc::clone(&shared.router);
                    let topic = publish.topic.clone();
                    let payload = publish.payload.to_vec();
                    tokio::spawn(async move {
                        router.route(&topic, &payload).await;
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    let was_connected = shared.connected.swap(false, Ordering::SeqCst);
                    shared.had_failures.store(true, Ordering::SeqCst);
                    if was_connected {
                        shared.emit(ConnectionEvent::Disconnected);
                    }
                    failed_attempts += 1;
                    if failed_attempts > max_reconnect_attempts {
                        error!(
                            attempts = failed_attempts - 1,
                            error = %e,
                            "reconnect attempts exhausted; giving up"
                        );
                        shared.emit(ConnectionEvent::TerminalDisconnect);
                        return;
                    }
                    warn!(
                        attempt = failed_attempts,
                        max = max_reconnect_attempts,
                        error = %e,
                        "connection error; retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(reconnect_interval_s.max(1))).await;
                }
            }
        }
    }
}

/// Re-issue every tracked subscription in its original order.
async fn resubscribe(shared: &ClientShared, client: &AsyncClient) {
    for topic in shared.subscription_snapshot() {
        match client.subscribe(&topic, QoS::AtLeastOnce).await {
            Ok(()) => debug!(topic, "re-subscribed after reconnect"),
            Err(e) => warn!(topic, error = %e, "re-subscription failed"),
        }
    }
}

/// Publish the per-service error event after recovering from repeated
/// connection failures.
async fn report_connection_recovery(shared: &ClientShared, client: &AsyncClient) {
    let source = shared.service_name.to_lowercase();
    let topic = match shared
        .registry
        .resolve(topic_keys::SYSTEM_ERROR, "v1", &[&source])
    {
        Ok(topic) => topic,
        Err(_) => return,
    };
    let envelope = Envelope::event(
        shared.identity.clone(),
        serde_json::json!({
            "error": "connection_lost",
            "recovered": true,
            "reconnects": shared.reconnect_count.load(Ordering::Relaxed),
        }),
    );
    if let Ok(bytes) = envelope.serialize() {
        match client.try_publish(&topic, QoS::AtLeastOnce, false, bytes) {
            Ok(()) => debug!(topic, "connection failures reported"),
            Err(e) => warn!(topic, error = %e, "failure report not published"),
        }
    }
}

type EnvelopeCallback = Box<dyn Fn(Envelope) -> BoxFuture<'static, ()> + Send + Sync>;

/// Router adapter that decodes envelopes for a typed subscription.
struct TypedEnvelopeHandler {
    topic: String,
    service_name: String,
    filter_type: Option<MessageType>,
    callback: EnvelopeCallback,
}

#[async_trait]
impl MessageHandler for TypedEnvelopeHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        let envelope = match Envelope::deserialize(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    topic,
                    payload_len = payload.len(),
                    error = %e,
                    "undecodable envelope dropped"
                );
                return;
            }
        };
        if envelope.is_expired() {
            debug!(topic, message_id = %envelope.message_id, "expired envelope dropped");
            return;
        }
        if envelope.is_for_other_service(&self.service_name) {
            debug!(topic, "envelope addressed to another service ignored");
            return;
        }
        if let Some(filter) = self.filter_type {
            if envelope.message_type != filter {
                return;
            }
        }
        (self.callback)(envelope).await;
    }

    fn supported_topics(&self) -> Vec<String> {
        vec![self.topic.clone()]
    }

    fn name(&self) -> &str {
        "typed_envelope"
    }
}
