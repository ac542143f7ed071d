//! Impure I/O: the Bus Client. Owns the rumqttc connection, a reconnection
//! supervisor with exponential-then-sustained backoff, and dispatches
//! inbound publishes to the [`Router`](crate::routing::Router).

use super::connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
use super::health_monitor::{ConnectionEvent, HealthMetrics, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::ServiceConfig;
use crate::observability::metrics;
use crate::protocol::{Envelope, MessageType, Priority, ServiceDescriptor, TopicRegistry};
use crate::routing::Router;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, ClientError, EventLoop};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outcome of a batched publish: how many succeeded, and the error for each
/// that failed.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub success_count: usize,
    pub failure_count: usize,
    pub failures: Vec<(String, String)>,
}

/// Point-in-time snapshot of connection activity.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub connected_at: Option<Instant>,
    pub published_count: u64,
    pub received_count: u64,
    pub subscribed_topics: Vec<String>,
    pub reconnect_count: u32,
    pub last_message_at: Option<Instant>,
    pub is_connected: bool,
}

/// Manages one service's MQTT session: connect, reconnect-with-backoff,
/// subscribe/unsubscribe, publish (raw and enveloped), and dispatch of
/// inbound messages to the [`Router`].
pub struct BusClient {
    config: ServiceConfig,
    client: Arc<Mutex<AsyncClient>>,
    event_loop: Option<Arc<Mutex<EventLoop>>>,
    event_loop_handle: Option<JoinHandle<()>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    state_tx: Option<watch::Sender<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    reconnect_config: ReconnectConfig,
    /// Bounded outbound queue depth: `max_retries * 10` (spec.md §4.4).
    queue_capacity: usize,
    subscribed_topics: Arc<Mutex<Vec<String>>>,
    router: Arc<Router>,
    connect_time: Option<Instant>,
    last_message_time: Arc<Mutex<Option<Instant>>>,
    reconnect_count: Arc<AtomicU32>,
    published_count: Arc<AtomicU64>,
    received_count: Arc<AtomicU64>,
}

fn connection_failed(message: impl Into<String>) -> MqttError {
    MqttError::ConnectionFailed(Box::<dyn std::error::Error + Send + Sync>::from(message.into()))
}

impl BusClient {
    /// spec.md §4.4: "bounded queue of `max_retries * 10`".
    fn queue_capacity_for(config: &ServiceConfig) -> usize {
        (config.messages.max_retries as usize).saturating_mul(10).max(1)
    }

    pub fn new(config: ServiceConfig, router: Arc<Router>) -> Result<Self, MqttError> {
        let queue_capacity = Self::queue_capacity_for(&config);
        let mqtt_options = configure_mqtt_options(&config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, queue_capacity);
        let reconnect_config = ReconnectConfig::from_service_config(&config.connection);

        Ok(Self {
            config,
            client: Arc::new(Mutex::new(client)),
            event_loop: Some(Arc::new(Mutex::new(event_loop))),
            event_loop_handle: None,
            state_rx: None,
            state_tx: None,
            shutdown_tx: None,
            reconnect_config,
            queue_capacity,
            subscribed_topics: Arc::new(Mutex::new(Vec::new())),
            router,
            connect_time: None,
            last_message_time: Arc::new(Mutex::new(None)),
            reconnect_count: Arc::new(AtomicU32::new(0)),
            published_count: Arc::new(AtomicU64::new(0)),
            received_count: Arc::new(AtomicU64::new(0)),
        })
    }

    fn service_descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor::new(self.config.service_name.clone(), self.config.connection.client_id.clone())
    }

    fn setup_connection_channels() -> (
        (watch::Sender<ConnectionState>, watch::Receiver<ConnectionState>),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        (watch::channel(ConnectionState::Connecting), watch::channel(false))
    }

    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let result = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(connection_failed("state channel closed"));
                }
                match *state_rx.borrow() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(ref reason) => {
                        return Err(connection_failed(reason.clone()))
                    }
                    ConnectionState::PermanentlyDisconnected(ref reason) => {
                        return Err(connection_failed(format!("permanently disconnected: {reason}")))
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => continue,
                }
            }
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(connection_failed("ConnAck timeout")),
        }
    }

    /// Opens the connection, waits for ConnAck, then (re-)subscribes to
    /// every topic declared under `[topics.subscribe]`.
    pub async fn start(&mut self) -> Result<(), MqttError> {
        let event_loop = self
            .event_loop
            .take()
            .ok_or_else(|| connection_failed("event loop already started"))?;

        let ((state_tx, state_rx), (shutdown_tx, mut shutdown_rx)) = Self::setup_connection_channels();
        self.state_rx = Some(state_rx.clone());
        self.state_tx = Some(state_tx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        let shared_client = self.client.clone();
        let reconnect_config = self.reconnect_config.clone();
        let subscribed_topics = self.subscribed_topics.clone();
        let router = self.router.clone();
        let received_count = self.received_count.clone();
        let last_message_time = self.last_message_time.clone();
        let reconnect_count_shared = self.reconnect_count.clone();
        let service_name = self.config.service_name.clone();
        let broker = self.config.connection.broker.clone();
        let port = self.config.connection.port;
        let queue_capacity = self.queue_capacity;

        let handle = tokio::spawn(async move {
            info!(service = %service_name, "starting Bus Client event loop");
            let mut reconnect_attempts = 0u32;
            let mut current_event_loop = event_loop;

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("shutdown signal received, stopping event loop");
                            break;
                        }
                    }
                    event_result = async {
                        let mut guard = current_event_loop.lock().await;
                        guard.poll().await
                    } => {
                        match event_result {
                            Ok(event) => {
                                let route = MessageHandler::route_mqtt_event(&event);
                                let keep_going = Self::process_event_route(
                                    route,
                                    &state_tx,
                                    &mut reconnect_attempts,
                                    &shared_client,
                                    &subscribed_topics,
                                    &router,
                                    &received_count,
                                    &last_message_time,
                                    &reconnect_config,
                                    shutdown_rx.clone(),
                                    &mut current_event_loop,
                                    &broker,
                                    port,
                                    queue_capacity,
                                ).await;
                                if !keep_going {
                                    break;
                                }
                            }
                            Err(e) => {
                                error!(service = %service_name, error = %e, "event loop error");
                                let new_state = HealthMonitor::determine_next_state(
                                    &ConnectionState::Connected,
                                    ConnectionEvent::NetworkError(e.to_string()),
                                );
                                let _ = state_tx.send(new_state);
                                metrics().mqtt_connection_lost();
                                reconnect_count_shared.fetch_add(1, Ordering::SeqCst);

                                let keep_going = Self::attempt_reconnection(
                                    reconnect_attempts,
                                    &reconnect_config,
                                    shutdown_rx.clone(),
                                    &state_tx,
                                    &mut reconnect_attempts,
                                    &mut current_event_loop,
                                    &broker,
                                    port,
                                    &shared_client,
                                    queue_capacity,
                                ).await;
                                if !keep_going {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            info!(service = %service_name, "Bus Client event loop stopped");
        });

        self.event_loop_handle = Some(handle);

        let timeout = HealthMonitor::calculate_connection_timeout(&self.reconnect_config);
        Self::wait_for_connection_confirmation(state_rx, timeout).await?;
        self.connect_time = Some(Instant::now());

        let subscriptions: Vec<(String, String)> = self
            .config
            .topics
            .subscribe
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (_key, topic) in subscriptions {
            self.subscribe(&topic).await?;
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_event_route(
        route: EventRoute,
        state_tx: &watch::Sender<ConnectionState>,
        reconnect_attempts: &mut u32,
        shared_client: &Arc<Mutex<AsyncClient>>,
        subscribed_topics: &Arc<Mutex<Vec<String>>>,
        router: &Arc<Router>,
        received_count: &Arc<AtomicU64>,
        last_message_time: &Arc<Mutex<Option<Instant>>>,
        reconnect_config: &ReconnectConfig,
        shutdown_rx: watch::Receiver<bool>,
        current_event_loop: &mut Arc<Mutex<EventLoop>>,
        broker: &str,
        port: u16,
        queue_capacity: usize,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                let new_state = HealthMonitor::determine_next_state(
                    &ConnectionState::Connecting,
                    ConnectionEvent::ConnAckReceived,
                );
                let _ = state_tx.send(new_state);
                *reconnect_attempts = 0;
                metrics().mqtt_connection_established();
                Self::resubscribe_all(shared_client, subscribed_topics).await;
                true
            }
            EventRoute::MessageReceived { topic, payload, retain } => {
                if retain {
                    debug!(topic, "ignoring retained message");
                    return true;
                }
                if MessageHandler::should_deliver(&payload) {
                    received_count.fetch_add(1, Ordering::SeqCst);
                    metrics().mqtt_message_received();
                    *last_message_time.lock().await = Some(Instant::now());
                    router.route(&topic, &payload).await;
                }
                true
            }
            EventRoute::Disconnected => {
                let new_state = HealthMonitor::determine_next_state(
                    &ConnectionState::Connected,
                    ConnectionEvent::DisconnectedByBroker,
                );
                let _ = state_tx.send(new_state);
                metrics().mqtt_connection_lost();
                Self::attempt_reconnection(
                    *reconnect_attempts,
                    reconnect_config,
                    shutdown_rx,
                    state_tx,
                    reconnect_attempts,
                    current_event_loop,
                    broker,
                    port,
                    shared_client,
                    queue_capacity,
                )
                .await
            }
            EventRoute::SubscriptionConfirmed { return_codes, .. } => {
                debug!(?return_codes, "subscription confirmed");
                true
            }
            EventRoute::InfrastructureEvent(event) => {
                debug!(%event, "infrastructure event");
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    async fn resubscribe_all(client: &Arc<Mutex<AsyncClient>>, topics: &Arc<Mutex<Vec<String>>>) {
        let client_guard = client.lock().await;
        let topics_guard = topics.lock().await;
        for topic in topics_guard.iter() {
            if let Err(e) = client_guard.subscribe(topic, QoS::AtLeastOnce).await {
                error!(topic, error = %e, "failed to re-subscribe");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt_reconnection(
        current_attempts: u32,
        reconnect_config: &ReconnectConfig,
        shutdown_rx: watch::Receiver<bool>,
        state_tx: &watch::Sender<ConnectionState>,
        reconnect_attempts: &mut u32,
        current_event_loop: &mut Arc<Mutex<EventLoop>>,
        broker: &str,
        port: u16,
        shared_client: &Arc<Mutex<AsyncClient>>,
        queue_capacity: usize,
    ) -> bool {
        let decision = HealthMonitor::should_attempt_reconnection(
            current_attempts,
            reconnect_config,
            *shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                *reconnect_attempts = attempt;
                let new_state = HealthMonitor::determine_next_state(
                    &ConnectionState::Disconnected(String::new()),
                    ConnectionEvent::ReconnectionStarted(attempt),
                );
                let _ = state_tx.send(new_state);
                metrics().mqtt_connection_attempt();
                info!(attempt, delay_ms, "attempting reconnection");

                let mut rx = shutdown_rx.clone();
                tokio::select! {
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            return false;
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                }
                if *shutdown_rx.borrow() {
                    return false;
                }

                let mut options = rumqttc::v5::MqttOptions::new(
                    format!("reconnect-{attempt}"),
                    broker,
                    port,
                );
                options.set_keep_alive(Duration::from_secs(30));
                let (new_client, new_event_loop) = AsyncClient::new(options, queue_capacity);
                *current_event_loop = Arc::new(Mutex::new(new_event_loop));
                *shared_client.lock().await = new_client;
                true
            }
            ReconnectionDecision::AbortShutdownRequested => false,
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let new_state = HealthMonitor::determine_next_state(
                    &ConnectionState::Disconnected(String::new()),
                    ConnectionEvent::PermanentFailure("max reconnection attempts exceeded".to_string()),
                );
                let _ = state_tx.send(new_state);
                metrics().mqtt_connection_failed();
                false
            }
        }
    }

    /// Drains queued publishes best-effort and closes the session.
    /// Idempotent: safe to call more than once.
    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        {
            let client = self.client.lock().await;
            let _ = client.disconnect().await;
        }

        if let Some(state_tx) = &self.state_tx {
            let _ = state_tx.send(ConnectionState::Disconnected("stopped".to_string()));
        }

        if let Some(handle) = self.event_loop_handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        }
    }

    fn check_connection_state(&self) -> Result<(), MqttError> {
        let state_rx = self
            .state_rx
            .as_ref()
            .ok_or_else(|| connection_failed("client never started"))?;
        let current_state = state_rx.borrow().clone();
        if !HealthMonitor::can_publish(&current_state) {
            return Err(MqttError::NotConnected { state: current_state });
        }
        Ok(())
    }

    /// At-least-once publish of raw bytes onto the bounded outbound queue
    /// (capacity `max_retries * 10`, spec.md §4.4). Never blocks: a full
    /// queue returns [`MqttError::QueueOverflow`] instead of waiting for
    /// broker connectivity to drain it.
    pub async fn publish_raw(&self, topic: &str, bytes: Vec<u8>) -> Result<(), MqttError> {
        self.check_connection_state()?;
        let client = self.client.lock().await;
        match client.try_publish(topic, QoS::AtLeastOnce, false, bytes) {
            Ok(()) => {
                self.published_count.fetch_add(1, Ordering::SeqCst);
                metrics().mqtt_message_published();
                Ok(())
            }
            Err(ClientError::TryRequest(_)) => {
                metrics().mqtt_publish_failed();
                Err(MqttError::QueueOverflow)
            }
            Err(e) => {
                metrics().mqtt_publish_failed();
                Err(MqttError::PublishFailed(Box::new(e)))
            }
        }
    }

    /// Wraps `data` in an Envelope carrying this service's identity and
    /// publishes it to the topic resolved from `topic_key`. Never throws:
    /// returns `false` on an unregistered key or serialisation error.
    pub async fn publish(
        &self,
        registry: &TopicRegistry,
        topic_key: &str,
        message_type: MessageType,
        priority: Priority,
        data: serde_json::Value,
        correlation_id: Option<Uuid>,
    ) -> bool {
        let topic = match registry.resolve(topic_key, &self.config.messages.version, &[]) {
            Ok(topic) => topic,
            Err(e) => {
                warn!(topic_key, error = %e, "publish: topic key not resolvable");
                return false;
            }
        };

        let mut envelope = Envelope::new(message_type, priority, self.service_descriptor(), data);
        if let Some(id) = correlation_id {
            envelope = envelope.with_correlation_id(id);
        }

        let bytes = match envelope.serialize() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(topic_key, error = %e, "publish: envelope serialisation failed");
                return false;
            }
        };

        self.publish_raw(&topic, bytes).await.is_ok()
    }

    /// Issues an MQTT subscription and records the topic for
    /// re-subscription on reconnect.
    pub async fn subscribe(&self, topic: &str) -> Result<(), MqttError> {
        let client = self.client.lock().await;
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;

        let mut topics = self.subscribed_topics.lock().await;
        if !topics.contains(&topic.to_string()) {
            topics.push(topic.to_string());
        }
        Ok(())
    }

    /// Subscribes to `topic` and registers `handler` with the Router.
    pub async fn subscribe_typed(
        &self,
        topic: &str,
        handler: Arc<dyn crate::routing::Handler>,
    ) -> Result<(), MqttError> {
        self.router.register(topic, handler);
        if let Err(e) = self.subscribe(topic).await {
            self.router.unregister(topic);
            return Err(e);
        }
        Ok(())
    }

    /// Removes the MQTT filter and any registered handler for `topic`.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        let client = self.client.lock().await;
        client
            .unsubscribe(topic)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;
        self.subscribed_topics.lock().await.retain(|t| t != topic);
        self.router.unregister(topic);
        Ok(())
    }

    /// Issues each publish independently; never stops on first failure.
    pub async fn publish_batch(&self, items: Vec<(String, Vec<u8>)>) -> BatchResult {
        let mut result = BatchResult::default();
        for (topic, bytes) in items {
            match self.publish_raw(&topic, bytes).await {
                Ok(()) => result.success_count += 1,
                Err(e) => {
                    result.failure_count += 1;
                    result.failures.push((topic, e.to_string()));
                }
            }
        }
        result
    }

    /// Publishes a heartbeat envelope; returns connected ∧ publish-succeeded.
    ///
    /// `status.heartbeat`'s pattern carries a positional `{0}` segment for
    /// the publishing service's name, so this resolves the topic directly
    /// rather than through [`Self::publish`], which only ever substitutes
    /// `{version}`.
    pub async fn health_check(&self, registry: &TopicRegistry) -> bool {
        if self.check_connection_state().is_err() {
            return false;
        }
        let topic = match registry.resolve(
            "status.heartbeat",
            &self.config.messages.version,
            &[&self.config.service_name],
        ) {
            Ok(topic) => topic,
            Err(e) => {
                warn!(error = %e, "health_check: status.heartbeat not resolvable");
                return false;
            }
        };

        let envelope = Envelope::new(
            MessageType::Heartbeat,
            Priority::Normal,
            self.service_descriptor(),
            serde_json::json!({
                "source": self.config.service_name,
                "timestamp": chrono::Utc::now(),
            }),
        );
        let bytes = match envelope.serialize() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "health_check: envelope serialisation failed");
                return false;
            }
        };
        self.publish_raw(&topic, bytes).await.is_ok()
    }

    pub async fn statistics(&self) -> Statistics {
        Statistics {
            connected_at: self.connect_time,
            published_count: self.published_count.load(Ordering::SeqCst),
            received_count: self.received_count.load(Ordering::SeqCst),
            subscribed_topics: self.subscribed_topics.lock().await.clone(),
            reconnect_count: self.reconnect_count.load(Ordering::SeqCst),
            last_message_at: *self.last_message_time.lock().await,
            is_connected: self.is_connected(),
        }
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }

    pub fn is_permanently_disconnected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::PermanentlyDisconnected(_)))
    }

    pub fn get_health_metrics(&self) -> HealthMetrics {
        HealthMonitor::calculate_health_metrics(self.connect_time, None, self.reconnect_count.load(Ordering::SeqCst))
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}

#[async_trait::async_trait]
impl crate::transport::Bus for BusClient {
    type Error = MqttError;

    async fn start(&mut self) -> Result<(), Self::Error> {
        BusClient::start(self).await
    }

    async fn stop(&mut self) {
        BusClient::stop(self).await
    }

    async fn publish_raw(&self, topic: &str, bytes: Vec<u8>) -> Result<(), Self::Error> {
        BusClient::publish_raw(self, topic, bytes).await
    }

    async fn publish(
        &self,
        registry: &TopicRegistry,
        topic_key: &str,
        message_type: MessageType,
        priority: Priority,
        data: serde_json::Value,
        correlation_id: Option<Uuid>,
    ) -> bool {
        BusClient::publish(self, registry, topic_key, message_type, priority, data, correlation_id).await
    }

    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error> {
        BusClient::subscribe(self, topic).await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), Self::Error> {
        BusClient::unsubscribe(self, topic).await
    }

    async fn publish_batch(&self, items: Vec<(String, Vec<u8>)>) -> BatchResult {
        BusClient::publish_batch(self, items).await
    }

    async fn health_check(&self, registry: &TopicRegistry) -> bool {
        BusClient::health_check(self, registry).await
    }

    async fn statistics(&self) -> Statistics {
        BusClient::statistics(self).await
    }

    fn is_connected(&self) -> bool {
        BusClient::is_connected(self)
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        BusClient::connection_state(self)
    }

    fn is_permanently_disconnected(&self) -> bool {
        BusClient::is_permanently_disconnected(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ServiceConfig {
        ServiceConfig::test_config()
    }

    #[test]
    fn setup_connection_channels_start_in_connecting_state() {
        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) = BusClient::setup_connection_channels();
        assert_eq!(*state_rx.borrow(), ConnectionState::Connecting);
        assert!(!*shutdown_rx.borrow());

        state_tx.send(ConnectionState::Connected).unwrap();
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);

        shutdown_tx.send(true).unwrap();
        assert!(*shutdown_rx.borrow());
    }

    #[tokio::test]
    async fn wait_for_connection_confirmation_succeeds_on_connected() {
        let ((state_tx, state_rx), (_, _)) = BusClient::setup_connection_channels();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Connected);
        });

        let result = BusClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(200)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn wait_for_connection_confirmation_times_out() {
        let ((state_tx, state_rx), (_, _)) = BusClient::setup_connection_channels();
        let _keep_alive = state_tx;
        let result = BusClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(10)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn connection_state_is_none_before_start() {
        let client = BusClient::new(test_config(), Arc::new(Router::new())).unwrap();
        assert!(client.connection_state().is_none());
        assert!(!client.is_connected());
        assert!(!client.is_permanently_disconnected());
    }

    #[tokio::test]
    async fn publish_fails_without_a_connection() {
        let client = BusClient::new(test_config(), Arc::new(Router::new())).unwrap();
        let result = client.publish_raw("ios/v1/test/topic", b"{}".to_vec()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn statistics_reflects_initial_state() {
        let client = BusClient::new(test_config(), Arc::new(Router::new())).unwrap();
        let stats = client.statistics().await;
        assert_eq!(stats.published_count, 0);
        assert_eq!(stats.received_count, 0);
        assert!(!stats.is_connected);
        assert!(stats.subscribed_topics.is_empty());
    }
}
