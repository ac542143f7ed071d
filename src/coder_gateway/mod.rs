//! Coder Gateway (C9): a TCP listener aggregating scanner messages per
//! client endpoint and exposing a "collect within window" primitive used by
//! the Workflow Engine's scan step.
//!
//! Ownership: this module exclusively owns per-endpoint buffers and the
//! acceptor loop (see spec's component-ownership rule); it never touches
//! the Shared State Store or the bus directly, it just answers to whatever
//! service embeds it (`bin/coder-gateway.rs` bridges its events to MQTT).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Window the gateway waits after clearing buffers before it starts
/// collecting, giving clients time to notice the clear and resume sending.
const SCAN_PREWAIT: Duration = Duration::from_millis(500);
const DEFAULT_SCAN_TIMEOUT_MS: u64 = 5000;
const IDLE_REAP_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum CoderGatewayError {
    #[error("bind failed on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct CoderGatewayConfig {
    pub socket_address: String,
    pub socket_port: u16,
    pub max_clients: usize,
    pub receive_buffer_size: usize,
    pub client_timeout_ms: u64,
}

impl Default for CoderGatewayConfig {
    fn default() -> Self {
        Self {
            socket_address: "0.0.0.0".to_string(),
            socket_port: 9100,
            max_clients: 32,
            receive_buffer_size: 1024,
            client_timeout_ms: 30_000,
        }
    }
}

struct ClientConnection {
    endpoint: SocketAddr,
    connected_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    messages: Vec<String>,
    writer: Mutex<OwnedWriteHalf>,
}

/// Read-only per-endpoint view handed out by `get_connected_clients`.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSnapshot {
    pub endpoint: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub connection_count: usize,
    pub listen_address: String,
    pub listen_port: u16,
    pub mqtt_connected: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub direction: String,
    pub stack_height: f64,
    pub codes: String,
    pub timestamp: DateTime<Utc>,
}

/// TCP listener aggregating scanner messages, one receive task per client.
pub struct CoderGateway {
    config: CoderGatewayConfig,
    clients: Arc<RwLock<HashMap<SocketAddr, ClientConnection>>>,
    running: Arc<AtomicBool>,
    mqtt_connected: Arc<AtomicBool>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
}

impl CoderGateway {
    pub fn new(config: CoderGatewayConfig) -> Self {
        Self {
            config,
            clients: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            mqtt_connected: Arc::new(AtomicBool::new(false)),
            acceptor: Mutex::new(None),
            reaper: Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn set_mqtt_connected(&self, connected: bool) {
        self.mqtt_connected.store(connected, Ordering::SeqCst);
    }

    /// Binds the listener and spawns the acceptor and idle-reaper tasks.
    /// Idempotent: a second call while already running is a no-op.
    pub async fn start(&self) -> Result<(), CoderGatewayError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let addr = format!("{}:{}", self.config.socket_address, self.config.socket_port);
        let listener = TcpListener::bind(&addr).await.map_err(|source| CoderGatewayError::Bind { addr: addr.clone(), source })?;
        info!(%addr, max_clients = self.config.max_clients, "coder gateway listening");

        let clients = self.clients.clone();
        let running = self.running.clone();
        let shutdown = self.shutdown.clone();
        let receive_buffer_size = self.config.receive_buffer_size;
        let max_clients = self.config.max_clients;

        let acceptor = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    accepted = listener.accept() => {
                        let (stream, endpoint) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                warn!(error = %e, "coder gateway: accept failed");
                                continue;
                            }
                        };
                        if clients.read().await.len() >= max_clients {
                            warn!(%endpoint, "coder gateway: max_clients reached, rejecting connection");
                            drop(stream);
                            continue;
                        }
                        spawn_receive_loop(stream, endpoint, clients.clone(), receive_buffer_size, running.clone());
                    }
                }
            }
        });
        *self.acceptor.lock().await = Some(acceptor);

        let clients = self.clients.clone();
        let running = self.running.clone();
        let timeout_ms = self.config.client_timeout_ms;
        let shutdown = self.shutdown.clone();
        let reaper = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = sleep(IDLE_REAP_INTERVAL) => {}
                }
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let now = Utc::now();
                let mut clients = clients.write().await;
                clients.retain(|endpoint, client| {
                    let idle_ms = (now - client.last_activity).num_milliseconds().max(0) as u64;
                    let keep = idle_ms <= timeout_ms;
                    if !keep {
                        debug!(%endpoint, idle_ms, "coder gateway: reaping idle client");
                    }
                    keep
                });
            }
        });
        *self.reaper.lock().await = Some(reaper);

        Ok(())
    }

    /// Closes the listener and every active socket. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_waiters();
        if let Some(handle) = self.acceptor.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.reaper.lock().await.take() {
            handle.abort();
        }
        self.clients.write().await.clear();
        info!("coder gateway stopped");
    }

    pub async fn get_status(&self) -> GatewayStatus {
        GatewayStatus {
            connection_count: self.clients.read().await.len(),
            listen_address: self.config.socket_address.clone(),
            listen_port: self.config.socket_port,
            mqtt_connected: self.mqtt_connected.load(Ordering::SeqCst),
            timestamp: Utc::now(),
        }
    }

    pub async fn get_connected_clients(&self) -> Vec<ClientSnapshot> {
        self.clients
            .read()
            .await
            .values()
            .map(|c| ClientSnapshot {
                endpoint: c.endpoint.to_string(),
                connected_at: c.connected_at,
                last_activity: c.last_activity,
                messages: c.messages.clone(),
            })
            .collect()
    }

    /// Clears every client's message buffer, waits for clients to settle,
    /// then collects for `timeout_ms` (default 5000ms). Returns the union of
    /// every endpoint's messages, each endpoint's messages in arrival order,
    /// joined by `;`. Does not wait for all clients to respond; the window
    /// elapsing is the only termination condition.
    pub async fn start_scan(&self, direction: impl Into<String>, stack_height: f64, timeout_ms: Option<u64>) -> ScanResult {
        let direction = direction.into();
        {
            let mut clients = self.clients.write().await;
            for client in clients.values_mut() {
                client.messages.clear();
            }
        }

        sleep(SCAN_PREWAIT).await;
        sleep(Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_SCAN_TIMEOUT_MS))).await;

        let clients = self.clients.read().await;
        let mut endpoints: Vec<_> = clients.keys().copied().collect();
        endpoints.sort();
        let codes = endpoints
            .into_iter()
            .flat_map(|endpoint| clients.get(&endpoint).into_iter().flat_map(|c| c.messages.iter().cloned()))
            .collect::<Vec<_>>()
            .join(";");

        ScanResult {
            direction,
            stack_height,
            codes,
            timestamp: Utc::now(),
        }
    }

    /// Best-effort write to one endpoint; on failure that endpoint is
    /// disconnected but the call does not abort.
    pub async fn send(&self, endpoint: SocketAddr, message: &str) -> bool {
        let ok = {
            let clients = self.clients.read().await;
            match clients.get(&endpoint) {
                Some(client) => write_line(&client.writer, message).await,
                None => false,
            }
        };
        if !ok {
            self.clients.write().await.remove(&endpoint);
        }
        ok
    }

    /// Best-effort write to every connected endpoint; returns how many
    /// succeeded. Endpoints that fail are disconnected.
    pub async fn broadcast(&self, message: &str) -> usize {
        let endpoints: Vec<_> = self.clients.read().await.keys().copied().collect();
        let mut sent = 0;
        for endpoint in endpoints {
            if self.send(endpoint, message).await {
                sent += 1;
            }
        }
        sent
    }

    pub async fn clear_queue(&self) {
        let mut clients = self.clients.write().await;
        for client in clients.values_mut() {
            client.messages.clear();
        }
    }
}

async fn write_line(writer: &Mutex<OwnedWriteHalf>, message: &str) -> bool {
    let mut writer = writer.lock().await;
    let mut framed = message.as_bytes().to_vec();
    framed.push(b'\n');
    writer.write_all(&framed).await.is_ok()
}

fn spawn_receive_loop(
    stream: TcpStream,
    endpoint: SocketAddr,
    clients: Arc<RwLock<HashMap<SocketAddr, ClientConnection>>>,
    receive_buffer_size: usize,
    running: Arc<AtomicBool>,
) {
    let (mut reader, writer) = stream.into_split();
    let now = Utc::now();

    tokio::spawn(async move {
        {
            let mut clients = clients.write().await;
            clients.insert(
                endpoint,
                ClientConnection {
                    endpoint,
                    connected_at: now,
                    last_activity: now,
                    messages: Vec::new(),
                    writer: Mutex::new(writer),
                },
            );
        }
        info!(%endpoint, "coder gateway: client connected");

        let mut buf = vec![0u8; receive_buffer_size];
        let mut carry = String::new();
        loop {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            match reader.read(&mut buf).await {
                Ok(0) => {
                    debug!(%endpoint, "coder gateway: client closed connection");
                    break;
                }
                Ok(n) => {
                    carry.push_str(&String::from_utf8_lossy(&buf[..n]));
                    let mut lines: Vec<String> = carry.split('\n').map(|s| s.to_string()).collect();
                    carry = lines.pop().unwrap_or_default();

                    let mut clients = clients.write().await;
                    let Some(client) = clients.get_mut(&endpoint) else { break };
                    client.last_activity = Utc::now();
                    for line in lines {
                        let trimmed = line.trim().to_string();
                        if !trimmed.is_empty() {
                            client.messages.push(trimmed);
                        }
                    }
                }
                Err(e) => {
                    warn!(%endpoint, error = %e, "coder gateway: read error, disconnecting");
                    break;
                }
            }
        }
        clients.write().await.remove(&endpoint);
        info!(%endpoint, "coder gateway: client disconnected");
    });
}
