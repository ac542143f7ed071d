//! End-to-end coverage of the outbound/unloading task lifecycle, wiring the
//! real Router, Handler Set, and Workflow Engine together behind a
//! [`MockBusClient`] so the whole pipeline runs without a live broker.

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use workcell_core::handlers::{CoderHandler, DefaultHandler, HandlerContext, MotionHandler, OrderHandler, SensorHandler, SystemHandler, VisionHandler};
use workcell_core::protocol::{Envelope, MessageType, Priority, ServiceDescriptor, TopicRegistry};
use workcell_core::routing::Router;
use workcell_core::state::StateStore;
use workcell_core::testing::MockBusClient;
use workcell_core::workflow::{GeometryConfig, TaskStatus, WorkflowEngine};

const VERSION: &str = "v1";

struct Cell {
    ctx: HandlerContext,
    router: Arc<Router>,
    registry: Arc<TopicRegistry>,
    bus: Arc<MockBusClient>,
}

fn topic(registry: &TopicRegistry, key: &str) -> String {
    registry.resolve(key, VERSION, &[]).unwrap()
}

fn build_cell() -> Cell {
    let state = Arc::new(StateStore::new());
    let registry = Arc::new(TopicRegistry::with_workflow_defaults());
    let bus = Arc::new(MockBusClient::new("scheduler"));
    let workflow = Arc::new(WorkflowEngine::new(
        state.clone(),
        bus.clone(),
        registry.clone(),
        GeometryConfig {
            height_init_mm: 1000.0,
            tray_height_mm: 200.0,
            camera_height_mm: 50.0,
            coder_height_mm: 300.0,
        },
    ));
    let ctx = HandlerContext::new(state, bus.clone(), registry.clone(), workflow, VERSION);

    let router = Arc::new(Router::new());
    router.register(&topic(&registry, "sensor.trigger"), Arc::new(SensorHandler::new(ctx.clone(), topic(&registry, "sensor.trigger"))));
    let vision: Arc<dyn workcell_core::routing::Handler> = Arc::new(VisionHandler::new(
        ctx.clone(),
        topic(&registry, "vision.detection"),
        topic(&registry, "vision.height.result"),
        topic(&registry, "vision.result"),
    ));
    router.register(&topic(&registry, "vision.detection"), vision.clone());
    router.register(&topic(&registry, "vision.height.result"), vision.clone());
    router.register(&topic(&registry, "vision.result"), vision);

    let motion: Arc<dyn workcell_core::routing::Handler> =
        Arc::new(MotionHandler::new(ctx.clone(), topic(&registry, "motion.complete"), topic(&registry, "motion.position")));
    router.register(&topic(&registry, "motion.complete"), motion.clone());
    router.register(&topic(&registry, "motion.position"), motion);

    let coder: Arc<dyn workcell_core::routing::Handler> =
        Arc::new(CoderHandler::new(ctx.clone(), topic(&registry, "coder.result"), topic(&registry, "coder.complete")));
    router.register(&topic(&registry, "coder.result"), coder.clone());
    router.register(&topic(&registry, "coder.complete"), coder);

    router.register(&topic(&registry, "order.new"), Arc::new(OrderHandler::new(ctx.clone(), topic(&registry, "order.new"))));

    let heartbeat_pattern = registry.resolve("status.heartbeat", VERSION, &["+"]).unwrap();
    router.register(
        &heartbeat_pattern,
        Arc::new(SystemHandler::new(
            ctx.clone(),
            heartbeat_pattern.clone(),
            topic(&registry, "system.status.query"),
            topic(&registry, "system.config.update"),
        )),
    );

    router.set_default_handler(Arc::new(DefaultHandler::new(ctx.clone())));

    Cell { ctx, router, registry, bus }
}

fn envelope(data: serde_json::Value) -> Envelope {
    Envelope::new(MessageType::Event, Priority::Normal, ServiceDescriptor::new("field-device", "fd-0"), data)
}

fn envelope_with_correlation(data: serde_json::Value, correlation_id: Uuid) -> Envelope {
    envelope(data).with_correlation_id(correlation_id)
}

/// The Router now dispatches each matching handler on its own spawned task
/// and returns before they finish (spec.md §5); give the single-threaded
/// test executor a few turns to drain them before asserting on their
/// side effects.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// spec.md §8 scenario 1: trigger -> height -> motion -> scan -> order,
/// driven entirely through the Router the way the real bus would dispatch
/// each inbound message.
#[tokio::test]
async fn happy_path_outbound_task_reaches_completed() {
    let cell = build_cell();

    let trigger_topic = topic(&cell.registry, "sensor.trigger");
    cell.router
        .route(&trigger_topic, &envelope(json!({"direction": "out"})).serialize().unwrap())
        .await;
    settle().await;

    let published = cell.bus.published_topic_keys().await;
    assert_eq!(published, vec!["vision.height.request"]);
    let height_request = cell.bus.published().await.into_iter().next().unwrap();
    let task_id = height_request.correlation_id.expect("height request carries the task id as correlation");
    cell.bus.clear().await;

    let height_result_topic = topic(&cell.registry, "vision.height.result");
    cell.router
        .route(
            &height_result_topic,
            &envelope_with_correlation(json!({"minHeight": 42.0, "timestamp": chrono::Utc::now()}), task_id)
                .serialize()
                .unwrap(),
        )
        .await;
    settle().await;
    assert_eq!(cell.ctx.workflow.status(task_id).await, Some(TaskStatus::Moving));
    assert!(cell.bus.published_topic_keys().await.contains(&"motion.move".to_string()));
    cell.bus.clear().await;

    let motion_complete_topic = topic(&cell.registry, "motion.complete");
    cell.router
        .route(
            &motion_complete_topic,
            &envelope(json!({"taskId": task_id, "finalPosition": 808, "success": true, "timestamp": chrono::Utc::now()}))
                .serialize()
                .unwrap(),
        )
        .await;
    settle().await;
    assert_eq!(cell.ctx.workflow.status(task_id).await, Some(TaskStatus::Scanning));
    assert!(cell.bus.published_topic_keys().await.contains(&"coder.start".to_string()));
    cell.bus.clear().await;

    let coder_complete_topic = topic(&cell.registry, "coder.complete");
    cell.router
        .route(
            &coder_complete_topic,
            &envelope_with_correlation(
                json!({"direction": "out", "stackHeight": 42.0, "codes": ["CODE-A", "CODE-B"], "timestamp": chrono::Utc::now(), "success": true}),
                task_id,
            )
            .serialize()
            .unwrap(),
        )
        .await;
    settle().await;
    assert_eq!(cell.ctx.workflow.status(task_id).await, Some(TaskStatus::OrderPending));
    assert!(cell.bus.published_topic_keys().await.contains(&"order.request".to_string()));
    cell.bus.clear().await;

    let order_new_topic = topic(&cell.registry, "order.new");
    cell.router
        .route(&order_new_topic, &envelope(json!({"orderId": "ORD-1"})).serialize().unwrap())
        .await;
    settle().await;

    assert_eq!(cell.ctx.workflow.status(task_id).await, Some(TaskStatus::Completed));
    let odoo = cell.bus.published().await.into_iter().find(|p| p.topic_key == "coder.odoo").unwrap();
    assert_eq!(odoo.data["orderId"], json!("ORD-1"));
    assert_eq!(odoo.data["codes"], json!(["CODE-A", "CODE-B"]));
}

/// spec.md §8 scenario 2: a motion failure marks the task Failed and
/// raises `outbound.task.error` instead of continuing to the scan step.
#[tokio::test]
async fn motion_failure_fails_the_task_instead_of_scanning() {
    let cell = build_cell();
    let task_id = cell.ctx.workflow.on_trigger(workcell_core::protocol::Direction::In, Uuid::new_v4()).await.unwrap();
    cell.ctx.workflow.on_height_result(task_id, Uuid::new_v4(), 12.0).await;
    cell.bus.clear().await;

    let motion_complete_topic = topic(&cell.registry, "motion.complete");
    cell.router
        .route(
            &motion_complete_topic,
            &envelope(json!({"taskId": task_id, "finalPosition": 0, "success": false, "timestamp": chrono::Utc::now()}))
                .serialize()
                .unwrap(),
        )
        .await;
    settle().await;

    assert_eq!(cell.ctx.workflow.status(task_id).await, Some(TaskStatus::Failed));
    assert!(cell.bus.published_topic_keys().await.contains(&"outbound.task.error".to_string()));
}

/// spec.md §8 scenario 4: an unrecognised topic falls through to the
/// default handler, which records it and announces it rather than silently
/// dropping it.
#[tokio::test]
async fn unknown_topic_falls_through_to_the_default_handler() {
    let cell = build_cell();

    cell.router.route("ios/v1/totally/unexpected", b"{}").await;
    settle().await;

    assert!(cell.bus.published_topic_keys().await.contains(&"system.events.unknown_topic".to_string()));
    assert!(cell.ctx.state.keys().iter().any(|k| k.starts_with("unknown_messages:")));
}

/// spec.md §8 scenario 5: heartbeats land on the wildcarded
/// `status.heartbeat` key regardless of which service sent them, and a
/// subsequent status query reports that source as online.
#[tokio::test]
async fn heartbeat_from_any_source_is_recorded_and_reported_online() {
    let cell = build_cell();

    let heartbeat_topic = registry_heartbeat_topic(&cell.registry, "vision-service");
    cell.router
        .route(
            &heartbeat_topic,
            &envelope(json!({"source": "vision-service", "timestamp": chrono::Utc::now()})).serialize().unwrap(),
        )
        .await;
    settle().await;
    assert!(cell.ctx.state.contains("heartbeat:vision-service:last_seen"));
    cell.bus.clear().await;

    let status_query_topic = topic(&cell.registry, "system.status.query");
    cell.router.route(&status_query_topic, &envelope(json!({})).serialize().unwrap()).await;
    settle().await;

    let response = cell.bus.published().await.into_iter().find(|p| p.topic_key == "system.status.response").unwrap();
    assert_eq!(response.data["sources"]["vision-service"]["status"], json!("online"));
}

fn registry_heartbeat_topic(registry: &TopicRegistry, source: &str) -> String {
    registry.resolve("status.heartbeat", VERSION, &[source]).unwrap()
}

/// Duplicate delivery of the same trigger message id must not spawn a
/// second task; MQTT's at-least-once delivery means a handler can see the
/// same envelope twice.
#[tokio::test]
async fn duplicate_trigger_delivery_does_not_create_a_second_task() {
    let cell = build_cell();
    let trigger_topic = topic(&cell.registry, "sensor.trigger");
    let envelope = envelope(json!({"direction": "in"}));
    let bytes = envelope.serialize().unwrap();

    cell.router.route(&trigger_topic, &bytes).await;
    cell.router.route(&trigger_topic, &bytes).await;
    settle().await;

    let height_requests = cell.bus.published().await.into_iter().filter(|p| p.topic_key == "vision.height.request").count();
    assert_eq!(height_requests, 1);
}
