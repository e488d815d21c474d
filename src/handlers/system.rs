//! System handler: heartbeat liveness, status snapshots, runtime
//! configuration updates, and order assignments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::constants::{timing, topic_keys};
use crate::handlers::decode_envelope;
use crate::messaging::payloads::OrderNew;
use crate::messaging::{
    EnvelopePublisher, MessageHandler, MessagePriority, TopicRegistry,
};
use crate::orchestration::WorkflowEngine;
use crate::state_machine::{TaskStatus, WorkflowEvent};
use crate::state_store::StateStore;

/// Runtime-adjustable configuration keys accepted on `system/config`.
const RECOGNIZED_CONFIG_KEYS: [&str; 3] =
    ["log_level", "mqtt_reconnect_interval", "task_timeout"];

/// Handles `system/heartbeat`, `system/status`, `system/config`, and the
/// order assignment on `order/system/new`.
pub struct SystemHandler {
    heartbeat_topic: String,
    status_topic: String,
    config_topic: String,
    order_topic: String,
    store: Arc<StateStore>,
    publisher: Arc<dyn EnvelopePublisher>,
    engine: WorkflowEngine,
}

impl SystemHandler {
    pub fn new(
        registry: &TopicRegistry,
        store: Arc<StateStore>,
        publisher: Arc<dyn EnvelopePublisher>,
        engine: WorkflowEngine,
    ) -> Self {
        Self {
            heartbeat_topic: registry
                .resolve_default(topic_keys::SYSTEM_HEARTBEAT)
                .unwrap_or_else(|_| "ios/v1/system/heartbeat".to_string()),
            status_topic: registry
                .resolve_default(topic_keys::SYSTEM_STATUS)
                .unwrap_or_else(|_| "ios/v1/system/status".to_string()),
            config_topic: registry
                .resolve_default(topic_keys::SYSTEM_CONFIG)
                .unwrap_or_else(|_| "ios/v1/system/config".to_string()),
            order_topic: registry
                .resolve_default(topic_keys::ORDER_NEW)
                .unwrap_or_else(|_| "ios/v1/order/system/new".to_string()),
            store,
            publisher,
            engine,
        }
    }

    async fn on_heartbeat(&self, envelope: crate::messaging::Envelope) {
        let source = envelope
            .data
            .get("source")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| envelope.source.name.to_lowercase());
        self.store
            .set(format!("heartbeat:{source}:last_seen"), json!(Utc::now()))
            .await;
        debug!(source, "heartbeat recorded");
    }

    async fn on_status_query(&self, _envelope: crate::messaging::Envelope) {
        let snapshot = self.build_status_snapshot().await;
        self.publisher
            .publish_data(
                topic_keys::SYSTEM_STATUS_RESULT,
                snapshot,
                MessagePriority::Normal,
                None,
            )
            .await;
    }

    /// Task counts by state, per-source liveness, and process memory.
    async fn build_status_snapshot(&self) -> Value {
        let mut task_counts: Map<String, Value> = Map::new();
        for key in self.store.keys_with_prefix("task:").await {
            if !key.ends_with(":status") {
                continue;
            }
            if let Some(status) = self.store.get(&key).await.as_ref().and_then(Value::as_str) {
                let entry = task_counts.entry(status.to_string()).or_insert(json!(0));
                *entry = json!(entry.as_u64().unwrap_or(0) + 1);
            }
        }

        let now = Utc::now();
        let mut devices: Map<String, Value> = Map::new();
        for key in self.store.keys_with_prefix("heartbeat:").await {
            let Some(source) = key
                .strip_prefix("heartbeat:")
                .and_then(|rest| rest.strip_suffix(":last_seen"))
            else {
                continue;
            };
            let Some(last_seen) = self.store.get(&key).await else {
                continue;
            };
            let online = serde_json::from_value::<DateTime<Utc>>(last_seen.clone())
                .map(|seen| {
                    (now - seen).num_seconds() < timing::HEARTBEAT_ONLINE_WINDOW_SECS
                })
                .unwrap_or(false);
            devices.insert(
                source.to_string(),
                json!({
                    "status": if online { "online" } else { "offline" },
                    "last_seen": last_seen,
                }),
            );
        }

        let (memory_vm_kb, memory_rss_kb) = process_memory_kb();
        json!({
            "tasks": task_counts,
            "active_tasks": self.engine.active_count().await,
            "devices": devices,
            "memory": { "vm_kb": memory_vm_kb, "rss_kb": memory_rss_kb },
            "timestamp": now,
        })
    }

    async fn on_config_update(&self, envelope: crate::messaging::Envelope) {
        let key = envelope.data.get("key").and_then(Value::as_str);
        let value = envelope.data.get("value").cloned();
        let (Some(key), Some(value)) = (key, value) else {
            warn!("config update missing key or value");
            self.publisher
                .publish_data(
                    topic_keys::SYSTEM_CONFIG_ERROR,
                    json!({ "error": "config update requires key and value" }),
                    MessagePriority::Normal,
                    None,
                )
                .await;
            return;
        };

        self.store.set(format!("config:{key}"), value.clone()).await;

        if RECOGNIZED_CONFIG_KEYS.contains(&key) {
            // The per-key effect: the runtime setting consulted by the
            // owning component on its next cycle.
            self.store
                .set(format!("runtime:{key}"), value.clone())
                .await;
            info!(key, "runtime configuration applied");
            self.publisher
                .publish_data(
                    topic_keys::SYSTEM_CONFIG_CONFIRM,
                    json!({ "key": key, "value": value, "applied": true }),
                    MessagePriority::Normal,
                    None,
                )
                .await;
        } else {
            warn!(key, "unrecognized configuration key");
            self.publisher
                .publish_data(
                    topic_keys::SYSTEM_CONFIG_ERROR,
                    json!({ "key": key, "error": "unrecognized configuration key" }),
                    MessagePriority::Normal,
                    None,
                )
                .await;
        }
    }

    async fn on_order_new(&self, envelope: crate::messaging::Envelope) {
        let order: OrderNew = match envelope.payload() {
            Ok(order) => order,
            Err(e) => {
                warn!(error = %e, "malformed order assignment dropped");
                return;
            }
        };
        let routed = self
            .engine
            .submit_to_state(
                TaskStatus::OrderPending,
                envelope.message_id,
                WorkflowEvent::OrderAssigned {
                    order_id: order.order_id.clone(),
                },
            )
            .await;
        match routed {
            Some(task_id) => info!(task_id, order_id = %order.order_id, "order assigned"),
            None => debug!(order_id = %order.order_id, "order with no task pending"),
        }
    }
}

#[async_trait]
impl MessageHandler for SystemHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        let Some(envelope) = decode_envelope(topic, payload) else {
            return;
        };
        if topic == self.heartbeat_topic {
            self.on_heartbeat(envelope).await;
        } else if topic == self.status_topic {
            self.on_status_query(envelope).await;
        } else if topic == self.config_topic {
            self.on_config_update(envelope).await;
        } else if topic == self.order_topic {
            self.on_order_new(envelope).await;
        } else {
            debug!(topic, "system handler ignoring unrelated topic");
        }
    }

    fn supported_topics(&self) -> Vec<String> {
        vec![
            self.heartbeat_topic.clone(),
            self.status_topic.clone(),
            self.config_topic.clone(),
            self.order_topic.clone(),
        ]
    }

    fn name(&self) -> &str {
        "system"
    }
}

/// Process memory counters in kilobytes (virtual, resident). Zeros when
/// the platform exposes no procfs.
fn process_memory_kb() -> (u64, u64) {
    let Ok(statm) = std::fs::read_to_string("/proc/self/statm") else {
        return (0, 0);
    };
    let mut fields = statm.split_whitespace();
    let vm_pages: u64 = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
    let rss_pages: u64 = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
    let page_kb = 4;
    (vm_pages * page_kb, rss_pages * page_kb)
}
