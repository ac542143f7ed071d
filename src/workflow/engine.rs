//! Workflow Engine (C8): drives an outbound/inbound task through
//! trigger -> height check -> motion -> code read -> order lookup ->
//! completion, publishing each step's envelope on the bus.
//!
//! The engine exclusively owns task-state mutations. Events for the same
//! `task_id` are serialised through that task's own `tokio::sync::Mutex`;
//! different tasks progress independently.

use super::task::{GeometryConfig, TaskState, TaskStatus};
use crate::observability::metrics;
use crate::protocol::{Direction, MessageType, Priority, TopicRegistry};
use crate::state::StateStore;
use crate::transport::Publisher;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Wall-clock time a task has been alive, for the processing-time metric.
/// Saturates to zero rather than panicking if the clock ever appears to run
/// backwards between `created_at` and now.
fn task_age(created_at: chrono::DateTime<chrono::Utc>) -> std::time::Duration {
    (chrono::Utc::now() - created_at).to_std().unwrap_or_default()
}

pub struct WorkflowEngine {
    tasks: Mutex<HashMap<Uuid, Arc<Mutex<TaskState>>>>,
    processed: Mutex<HashSet<(Uuid, Uuid)>>,
    processed_triggers: Mutex<HashSet<Uuid>>,
    state: Arc<StateStore>,
    bus: Arc<dyn Publisher>,
    registry: Arc<TopicRegistry>,
    geometry: GeometryConfig,
}

impl WorkflowEngine {
    pub fn new(state: Arc<StateStore>, bus: Arc<dyn Publisher>, registry: Arc<TopicRegistry>, geometry: GeometryConfig) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            processed: Mutex::new(HashSet::new()),
            processed_triggers: Mutex::new(HashSet::new()),
            state,
            bus,
            registry,
            geometry,
        }
    }

    async fn task_handle(&self, task_id: Uuid) -> Option<Arc<Mutex<TaskState>>> {
        self.tasks.lock().await.get(&task_id).cloned()
    }

    /// Marks `(task_id, message_id)` as processed; returns `false` if it was
    /// already seen, so the caller can skip re-advancing state.
    async fn claim(&self, task_id: Uuid, message_id: Uuid) -> bool {
        self.processed.lock().await.insert((task_id, message_id))
    }

    /// Step 1: a grating trigger starts a new task and requests a height
    /// measurement. Returns `None` if `message_id` was already processed
    /// (duplicate delivery of the same trigger).
    pub async fn on_trigger(&self, direction: Direction, message_id: Uuid) -> Option<Uuid> {
        if !self.processed_triggers.lock().await.insert(message_id) {
            debug!(%message_id, "duplicate trigger, ignoring");
            metrics().task_rejected();
            return None;
        }

        let task_id = Uuid::new_v4();
        let task = TaskState::new(task_id, direction);
        self.tasks.lock().await.insert(task_id, Arc::new(Mutex::new(task)));
        info!(%task_id, ?direction, "task created from trigger");
        metrics().task_received();
        metrics().task_processing_started();

        self.bus
            .publish(
                &self.registry,
                "vision.height.request",
                MessageType::Command,
                Priority::Normal,
                json!({"taskId": task_id, "direction": direction}),
                Some(task_id),
            )
            .await;

        Some(task_id)
    }

    /// Step 2: a height measurement arrives; compute the target axis
    /// position and publish the move command.
    pub async fn on_height_result(&self, task_id: Uuid, message_id: Uuid, min_height: f64) -> bool {
        if !self.claim(task_id, message_id).await {
            return false;
        }
        let Some(handle) = self.task_handle(task_id).await else {
            warn!(%task_id, "height result for unknown task");
            return false;
        };

        let target_position_mm = {
            let mut task = handle.lock().await;
            if task.status.is_terminal() {
                return false;
            }
            task.measured_height = Some(min_height);
            task.stack_height = min_height;
            let target = self.geometry.target_position_mm(task.direction, min_height);
            task.target_position_mm = Some(target);
            task.status = TaskStatus::HeightMeasured;
            task.touch();
            target
        };

        self.bus
            .publish(
                &self.registry,
                "motion.move",
                MessageType::Command,
                Priority::Normal,
                json!({"taskId": task_id, "positionMm": target_position_mm}),
                Some(task_id),
            )
            .await;

        {
            let mut task = handle.lock().await;
            task.status = TaskStatus::Moving;
            task.touch();
        }
        true
    }

    /// Step 3: motion finished; request a code scan.
    pub async fn on_motion_complete(&self, task_id: Uuid, message_id: Uuid, success: bool) -> bool {
        if !self.claim(task_id, message_id).await {
            return false;
        }
        let Some(handle) = self.task_handle(task_id).await else {
            warn!(%task_id, "motion complete for unknown task");
            return false;
        };

        if !success {
            return self.fail(task_id, "motion reported failure").await;
        }

        let (direction, stack_height) = {
            let mut task = handle.lock().await;
            if task.status.is_terminal() {
                return false;
            }
            task.status = TaskStatus::Scanning;
            task.touch();
            (task.direction, task.stack_height)
        };

        self.bus
            .publish(
                &self.registry,
                "coder.start",
                MessageType::Command,
                Priority::Normal,
                json!({"direction": direction, "stackHeight": stack_height}),
                Some(task_id),
            )
            .await;
        true
    }

    /// Step 4: the coder gateway's collection window closed; record the
    /// codes and request an order lookup.
    pub async fn on_scan_complete(&self, task_id: Uuid, message_id: Uuid, codes: Vec<String>, success: bool, error_message: Option<String>) -> bool {
        if !self.claim(task_id, message_id).await {
            return false;
        }
        if !success {
            return self.fail(task_id, error_message.unwrap_or_else(|| "scan failed".to_string())).await;
        }
        let Some(handle) = self.task_handle(task_id).await else {
            warn!(%task_id, "scan complete for unknown task");
            return false;
        };

        let (direction, stack_height) = {
            let mut task = handle.lock().await;
            if task.status.is_terminal() {
                return false;
            }
            task.codes = codes.clone();
            task.status = TaskStatus::OrderPending;
            task.touch();
            (task.direction, task.stack_height)
        };

        self.bus
            .publish(
                &self.registry,
                "order.request",
                MessageType::Request,
                Priority::Normal,
                json!({"taskId": task_id, "codes": codes, "direction": direction, "stackHeight": stack_height}),
                Some(task_id),
            )
            .await;
        true
    }

    /// Step 5: an order response arrived. `order.new` carries no task id,
    /// so the oldest task still `OrderPending` is taken as the match.
    pub async fn on_order_new(&self, order_id: String, message_id: Uuid) -> bool {
        let candidate = {
            let tasks = self.tasks.lock().await;
            let mut oldest: Option<(Uuid, chrono::DateTime<chrono::Utc>)> = None;
            for (id, handle) in tasks.iter() {
                let task = handle.lock().await;
                if task.status == TaskStatus::OrderPending {
                    match oldest {
                        Some((_, created_at)) if created_at <= task.created_at => {}
                        _ => oldest = Some((*id, task.created_at)),
                    }
                }
            }
            oldest.map(|(id, _)| id)
        };

        let Some(task_id) = candidate else {
            warn!(order_id, "order.new with no pending task");
            return false;
        };
        if !self.claim(task_id, message_id).await {
            return false;
        }
        let Some(handle) = self.task_handle(task_id).await else {
            return false;
        };

        let (direction, stack_height, codes, created_at) = {
            let mut task = handle.lock().await;
            if task.status.is_terminal() {
                return false;
            }
            task.order_id = Some(order_id.clone());
            task.status = TaskStatus::Completed;
            task.touch();
            (task.direction, task.stack_height, task.codes.clone(), task.created_at)
        };
        metrics().task_processing_completed(task_age(created_at));

        self.bus
            .publish(
                &self.registry,
                "coder.odoo",
                MessageType::Event,
                Priority::Normal,
                json!({
                    "orderId": order_id,
                    "codes": codes,
                    "direction": direction,
                    "stackHeight": stack_height,
                }),
                Some(task_id),
            )
            .await;
        true
    }

    /// Cancels a task at any state: stops motion/vision, cleans temporary
    /// keys, marks the task Cancelled.
    pub async fn cancel(&self, task_id: Uuid) -> bool {
        let Some(handle) = self.task_handle(task_id).await else {
            return false;
        };
        let created_at = {
            let mut task = handle.lock().await;
            if task.status.is_terminal() {
                return false;
            }
            task.status = TaskStatus::Cancelled;
            task.touch();
            task.created_at
        };
        metrics().task_processing_failed(task_age(created_at));

        self.bus
            .publish(&self.registry, "motion.stop", MessageType::Command, Priority::High, json!({"taskId": task_id}), Some(task_id))
            .await;
        self.bus
            .publish(&self.registry, "vision.stop", MessageType::Command, Priority::High, json!({"taskId": task_id}), Some(task_id))
            .await;

        self.state.clear_matching(&format!("task:{task_id}:"), &["temp", "cache"]);
        info!(%task_id, "task cancelled");
        true
    }

    /// Marks a task Failed and records the error. Used both for
    /// handler-raised fatal errors and validation failures inside a step.
    pub async fn fail(&self, task_id: Uuid, error: impl Into<String>) -> bool {
        let Some(handle) = self.task_handle(task_id).await else {
            return false;
        };
        let error = error.into();
        let created_at = {
            let mut task = handle.lock().await;
            if task.status.is_terminal() {
                return false;
            }
            task.status = TaskStatus::Failed;
            task.error = Some(error.clone());
            task.touch();
            task.created_at
        };
        metrics().task_processing_failed(task_age(created_at));
        self.state.set(format!("task:{task_id}:error"), json!(error));
        error!(%task_id, %error, "task failed");

        self.bus
            .publish(
                &self.registry,
                "outbound.task.error",
                MessageType::Event,
                Priority::High,
                json!({"taskId": task_id, "error": error}),
                Some(task_id),
            )
            .await;
        true
    }

    pub async fn status(&self, task_id: Uuid) -> Option<TaskStatus> {
        let handle = self.task_handle(task_id).await?;
        Some(handle.lock().await.status)
    }

    /// Count of in-memory tasks by status, for the system handler's status
    /// snapshot.
    pub async fn counts_by_status(&self) -> HashMap<&'static str, usize> {
        let tasks = self.tasks.lock().await;
        let mut counts = HashMap::new();
        for handle in tasks.values() {
            let status = handle.lock().await.status;
            let key = match status {
                TaskStatus::Created => "created",
                TaskStatus::HeightMeasured => "height_measured",
                TaskStatus::Moving => "moving",
                TaskStatus::Scanning => "scanning",
                TaskStatus::OrderPending => "order_pending",
                TaskStatus::Completed => "completed",
                TaskStatus::Failed => "failed",
                TaskStatus::Cancelled => "cancelled",
            };
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }
}
