//! # Workflow Engine
//!
//! The long-running state machine driving outbound tasks:
//! trigger → height check → motion → code read → order lookup → completion,
//! entirely via enveloped messages on the bus.
//!
//! The engine exclusively owns task-state mutations. Handlers translate
//! inbound topics into [`WorkflowEvent`]s and feed them here; events for
//! the same task are serialised onto a single per-task queue (one actor
//! task per outbound task), while different tasks progress in parallel.
//! Replaying a step event with an already-seen message id does not advance
//! state a second time.

use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GeometryConfig;
use crate::constants::topic_keys;
use crate::messaging::payloads::{CoderOdoo, CoderStart, HeightRequest, MotionMove, OrderRequest};
use crate::messaging::{Direction, EnvelopePublisher, MessagePriority};
use crate::orchestration::geometry;
use crate::orchestration::task::OutboundTask;
use crate::state_machine::{next_status, TaskStatus, TransitionError, WorkflowEvent};
use crate::state_store::StateStore;

/// Engine settings.
#[derive(Debug, Clone, Default)]
pub struct WorkflowConfig {
    pub geometry: GeometryConfig,
    /// Axis speed forwarded on `motion.move`; the motion service applies
    /// its configured default when absent.
    pub move_speed: Option<u32>,
}

struct QueuedEvent {
    message_id: Uuid,
    event: WorkflowEvent,
}

struct EngineShared {
    config: WorkflowConfig,
    store: Arc<StateStore>,
    publisher: Arc<dyn EnvelopePublisher>,
    tasks: RwLock<HashMap<String, OutboundTask>>,
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<QueuedEvent>>>,
}

/// The outbound workflow engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct WorkflowEngine {
    shared: Arc<EngineShared>,
}

impl WorkflowEngine {
    pub fn new(
        config: WorkflowConfig,
        store: Arc<StateStore>,
        publisher: Arc<dyn EnvelopePublisher>,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                config,
                store,
                publisher,
                tasks: RwLock::new(HashMap::new()),
                queues: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start a new task for a grating trigger and enqueue its first event.
    ///
    /// Returns the fresh task id; the triggering envelope's message id
    /// keys the idempotence check, so redelivered triggers must reuse it
    /// via [`WorkflowEngine::submit`] rather than calling this again.
    pub async fn start_task(&self, direction: Direction, message_id: Uuid) -> String {
        let task_id = Uuid::new_v4().to_string();
        let task = OutboundTask::new(task_id.clone(), direction);

        {
            let mut tasks = self.shared.tasks.write().await;
            tasks.insert(task_id.clone(), task);
        }
        self.shared
            .store
            .set(
                format!("task:{task_id}:status"),
                json!(TaskStatus::Created.to_string()),
            )
            .await;

        let (sender, receiver) = mpsc::unbounded_channel();
        {
            let mut queues = self
                .shared
                .queues
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            queues.insert(task_id.clone(), sender.clone());
        }
        tokio::spawn(run_task_actor(self.clone(), task_id.clone(), receiver));

        let _ = sender.send(QueuedEvent {
            message_id,
            event: WorkflowEvent::Trigger { direction },
        });
        info!(task_id, %direction, "📋 outbound task started");
        task_id
    }

    /// Feed an event to a task's serial queue. Returns false when the task
    /// is unknown or already torn down.
    pub fn submit(&self, task_id: &str, message_id: Uuid, event: WorkflowEvent) -> bool {
        let queues = self
            .shared
            .queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match queues.get(task_id) {
            Some(sender) => sender.send(QueuedEvent { message_id, event }).is_ok(),
            None => {
                debug!(task_id, "event for unknown task dropped");
                false
            }
        }
    }

    /// Feed an event to the task currently in `status`.
    ///
    /// Used for bus messages that do not carry a task id (`coder.complete`,
    /// `order.new`); when several tasks share the state the most recently
    /// created one receives the event.
    pub async fn submit_to_state(
        &self,
        status: TaskStatus,
        message_id: Uuid,
        event: WorkflowEvent,
    ) -> Option<String> {
        let task_id = {
            let tasks = self.shared.tasks.read().await;
            tasks
                .values()
                .filter(|task| task.status == status)
                .max_by_key(|task| task.created_at)
                .map(|task| task.task_id.clone())
        }?;
        self.submit(&task_id, message_id, event)
            .then_some(task_id)
    }

    /// Cancel one task.
    pub fn cancel(&self, task_id: &str, message_id: Uuid) -> bool {
        self.submit(task_id, message_id, WorkflowEvent::Cancel)
    }

    /// Cancel every active task (shutdown and restart-recovery rule:
    /// in-flight tasks without a durable step-log become Cancelled).
    pub async fn cancel_active_tasks(&self) {
        let active: Vec<String> = {
            let tasks = self.shared.tasks.read().await;
            tasks
                .values()
                .filter(|task| task.status.is_active())
                .map(|task| task.task_id.clone())
                .collect()
        };
        for task_id in active {
            self.submit(&task_id, Uuid::new_v4(), WorkflowEvent::Cancel);
        }
    }

    /// Snapshot of one task.
    pub async fn task(&self, task_id: &str) -> Option<OutboundTask> {
        let tasks = self.shared.tasks.read().await;
        tasks.get(task_id).cloned()
    }

    /// Snapshot of every task.
    pub async fn tasks(&self) -> Vec<OutboundTask> {
        let tasks = self.shared.tasks.read().await;
        tasks.values().cloned().collect()
    }

    /// Number of tasks still progressing.
    pub async fn active_count(&self) -> usize {
        let tasks = self.shared.tasks.read().await;
        tasks.values().filter(|task| task.status.is_active()).count()
    }

    /// Tear down the per-task queues. Events submitted afterwards are
    /// dropped; task snapshots remain readable.
    pub fn shutdown(&self) {
        let mut queues = self
            .shared
            .queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        queues.clear();
    }

    fn remove_queue(&self, task_id: &str) {
        let mut queues = self
            .shared
            .queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        queues.remove(task_id);
    }
}

/// Per-task serial executor: applies events in arrival order, one at a
/// time, until the task reaches a terminal state.
async fn run_task_actor(
    engine: WorkflowEngine,
    task_id: String,
    mut receiver: mpsc::UnboundedReceiver<QueuedEvent>,
) {
    let mut seen: HashSet<Uuid> = HashSet::new();
    while let Some(queued) = receiver.recv().await {
        if !seen.insert(queued.message_id) {
            debug!(task_id, message_id = %queued.message_id, "duplicate step event ignored");
            continue;
        }
        let status = apply_event(&engine.shared, &task_id, queued.event).await;
        if status.is_terminal() {
            break;
        }
    }
    engine.remove_queue(&task_id);
    debug!(task_id, "task actor finished");
}

/// Apply one event: consult the transition table, mutate the task, then
/// perform the step's outbound publishes. Returns the task status after
/// the event.
async fn apply_event(
    shared: &Arc<EngineShared>,
    task_id: &str,
    event: WorkflowEvent,
) -> TaskStatus {
    let current = {
        let tasks = shared.tasks.read().await;
        match tasks.get(task_id) {
            Some(task) => task.status,
            None => return TaskStatus::Cancelled,
        }
    };

    // A failed move is a step fault, not a completion.
    let event = match event {
        WorkflowEvent::MotionCompleted { success: false, .. } => {
            WorkflowEvent::fault("motion reported failure")
        }
        other => other,
    };

    let next = match next_status(current, &event) {
        Ok(next) => next,
        Err(TransitionError::TerminalState { .. }) => {
            debug!(task_id, event = event.event_type(), "event after terminal state ignored");
            return current;
        }
        Err(TransitionError::InvalidTransition { state, .. }) => {
            warn!(
                task_id,
                %state,
                event = event.event_type(),
                "out-of-order step event ignored"
            );
            return current;
        }
    };

    // Mutate the task record under the write lock, collecting what the
    // side effects need so no lock is held across publishes.
    let (direction, stack_height, target_position, codes, order_id) = {
        let mut tasks = shared.tasks.write().await;
        let task = match tasks.get_mut(task_id) {
            Some(task) => task,
            None => return TaskStatus::Cancelled,
        };

        match &event {
            WorkflowEvent::Trigger { direction } => {
                task.direction = *direction;
            }
            WorkflowEvent::HeightMeasured { min_height } => {
                task.measured_height = Some(*min_height);
                task.stack_height =
                    geometry::stack_height_mm(&shared.config.geometry, *min_height);
                task.target_position = Some(geometry::target_position_mm(
                    &shared.config.geometry,
                    task.direction,
                    *min_height,
                ));
            }
            WorkflowEvent::MotionCompleted { .. } => {}
            WorkflowEvent::CodesCollected { codes } => {
                task.codes = codes.clone();
            }
            WorkflowEvent::OrderAssigned { order_id } => {
                task.order_id = Some(order_id.clone());
            }
            WorkflowEvent::Cancel => {}
            WorkflowEvent::Fault { error } => {
                task.error = Some(error.clone());
            }
        }
        task.status = next;
        task.touch();

        (
            task.direction,
            task.stack_height,
            task.target_position,
            task.codes.clone(),
            task.order_id.clone(),
        )
    };

    shared
        .store
        .set(format!("task:{task_id}:status"), json!(next.to_string()))
        .await;

    let step_ok = perform_step_effects(
        shared,
        task_id,
        &event,
        direction,
        stack_height,
        target_position,
        codes,
        order_id,
    )
    .await;

    info!(
        task_id,
        event = event.event_type(),
        status = %next,
        "workflow step applied"
    );

    if !step_ok && !next.is_terminal() {
        return fail_task(shared, task_id, "step publish failed").await;
    }
    next
}

/// Outbound publishes for the step just applied. Returns false when a
/// required publish was refused.
#[allow(clippy::too_many_arguments)]
async fn perform_step_effects(
    shared: &Arc<EngineShared>,
    task_id: &str,
    event: &WorkflowEvent,
    direction: Direction,
    stack_height: f64,
    target_position: Option<f64>,
    codes: Vec<String>,
    order_id: Option<String>,
) -> bool {
    let publisher = &shared.publisher;
    let correlation = Some(task_id.to_string());

    match event {
        WorkflowEvent::Trigger { .. } => {
            let request = HeightRequest {
                task_id: task_id.to_string(),
                direction,
            };
            publisher
                .publish_data(
                    topic_keys::VISION_HEIGHT_REQUEST,
                    json!(request),
                    MessagePriority::Normal,
                    correlation,
                )
                .await
        }
        WorkflowEvent::HeightMeasured { .. } => {
            let command = MotionMove {
                task_id: task_id.to_string(),
                position_mm: target_position.unwrap_or_default(),
                speed: shared.config.move_speed,
            };
            publisher
                .publish_data(
                    topic_keys::MOTION_MOVE,
                    json!(command),
                    MessagePriority::Normal,
                    correlation,
                )
                .await
        }
        WorkflowEvent::MotionCompleted { .. } => {
            let command = CoderStart {
                direction,
                stack_height,
            };
            publisher
                .publish_data(
                    topic_keys::CODER_START,
                    json!(command),
                    MessagePriority::Normal,
                    correlation,
                )
                .await
        }
        WorkflowEvent::CodesCollected { .. } => {
            let request = OrderRequest {
                task_id: task_id.to_string(),
                codes,
                direction,
            };
            publisher
                .publish_data(
                    topic_keys::ORDER_REQUEST,
                    json!(request),
                    MessagePriority::Normal,
                    correlation,
                )
                .await
        }
        WorkflowEvent::OrderAssigned { .. } => {
            let business = CoderOdoo {
                order_id: order_id.unwrap_or_default(),
                codes,
                direction,
                stack_height,
                timestamp: chrono::Utc::now(),
            };
            publisher
                .publish_data(
                    topic_keys::CODER_ODOO,
                    json!(business),
                    MessagePriority::Normal,
                    correlation,
                )
                .await
        }
        WorkflowEvent::Cancel => {
            publisher
                .publish_data(
                    topic_keys::MOTION_STOP,
                    json!({ "task_id": task_id }),
                    MessagePriority::High,
                    correlation.clone(),
                )
                .await;
            publisher
                .publish_data(
                    topic_keys::VISION_STOP,
                    json!({ "task_id": task_id }),
                    MessagePriority::High,
                    correlation,
                )
                .await;
            clean_temporary_keys(shared, task_id).await;
            true
        }
        WorkflowEvent::Fault { error } => {
            shared
                .store
                .set(format!("task:{task_id}:error"), json!(error))
                .await;
            publisher
                .publish_data(
                    topic_keys::TASK_ERROR,
                    json!({ "task_id": task_id, "error": error }),
                    MessagePriority::High,
                    correlation,
                )
                .await;
            true
        }
    }
}

/// Drop `task:<id>:*` keys suffixed `temp` or `cache`.
async fn clean_temporary_keys(shared: &Arc<EngineShared>, task_id: &str) {
    let prefix = format!("task:{task_id}:");
    for key in shared.store.keys_with_prefix(&prefix).await {
        if key.ends_with("temp") || key.ends_with("cache") {
            shared.store.remove(&key).await;
        }
    }
}

/// Force a task into Failed after a step-level error.
async fn fail_task(shared: &Arc<EngineShared>, task_id: &str, error: &str) -> TaskStatus {
    {
        let mut tasks = shared.tasks.write().await;
        if let Some(task) = tasks.get_mut(task_id) {
            if task.status.is_terminal() {
                return task.status;
            }
            task.status = TaskStatus::Failed;
            task.error = Some(error.to_string());
            task.touch();
        }
    }
    shared
        .store
        .set(
            format!("task:{task_id}:status"),
            json!(TaskStatus::Failed.to_string()),
        )
        .await;
    shared
        .store
        .set(format!("task:{task_id}:error"), json!(error))
        .await;
    shared
        .publisher
        .publish_data(
            topic_keys::TASK_ERROR,
            json!({ "task_id": task_id, "error": error }),
            MessagePriority::High,
            Some(task_id.to_string()),
        )
        .await;
    warn!(task_id, error, "task failed");
    TaskStatus::Failed
}
