//! # Scanner Gateway
//!
//! The TCP listener, per-connection receive loops, idle sweep, and the
//! collect-window primitive. The gateway exclusively owns the per-endpoint
//! buffers and the acceptor loop; concurrent accepts and receive loops do
//! not block each other.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::coder::connection::{ClientConnection, ClientEntry};
use crate::coder::{GatewayError, GatewayResult};
use crate::config::CoderConfig;
use crate::constants::timing;
use crate::messaging::Direction;

/// Gateway status report.
#[derive(Debug, Clone)]
pub struct GatewayStatus {
    pub connection_count: usize,
    pub address: String,
    pub port: u16,
    pub mqtt_connected: bool,
    pub timestamp: DateTime<Utc>,
}

/// Result of one collect window.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub direction: Direction,
    pub stack_height: f64,
    /// Union of every endpoint's messages received inside the window, in
    /// per-endpoint arrival order (endpoints ordered by connect time).
    pub codes: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ScanResult {
    /// The legacy single-string form: codes joined by `;`.
    pub fn joined_codes(&self) -> String {
        self.codes.join(";")
    }
}

struct GatewayShared {
    config: CoderConfig,
    clients: RwLock<HashMap<SocketAddr, ClientEntry>>,
    running: AtomicBool,
    bus_connected: AtomicBool,
}

/// TCP gateway aggregating scanner endpoints.
pub struct CoderGateway {
    shared: Arc<GatewayShared>,
    shutdown: StdMutex<Option<watch::Sender<bool>>>,
    local_addr: StdMutex<Option<SocketAddr>>,
}

impl CoderGateway {
    pub fn new(config: CoderConfig) -> Self {
        Self {
            shared: Arc::new(GatewayShared {
                config,
                clients: RwLock::new(HashMap::new()),
                running: AtomicBool::new(false),
                bus_connected: AtomicBool::new(false),
            }),
            shutdown: StdMutex::new(None),
            local_addr: StdMutex::new(None),
        }
    }

    /// Reflect the owning service's bus connectivity in status reports.
    pub fn set_bus_connected(&self, connected: bool) {
        self.shared.bus_connected.store(connected, Ordering::SeqCst);
    }

    /// The address actually bound (useful when configured with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .local_addr
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bind the listener and spawn the acceptor and idle-sweep loops.
    /// Idempotent: a second call while running is a no-op.
    pub async fn start(&self) -> GatewayResult<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let bind_to = format!(
            "{}:{}",
            self.shared.config.socket_address, self.shared.config.socket_port
        );
        let listener = match TcpListener::bind(&bind_to).await {
            Ok(listener) => listener,
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(GatewayError::bind(bind_to, e));
            }
        };
        let bound = listener
            .local_addr()
            .map_err(|e| GatewayError::bind(&bind_to, e))?;
        {
            let mut slot = self
                .local_addr
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *slot = Some(bound);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        {
            let mut slot = self
                .shutdown
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *slot = Some(shutdown_tx);
        }

        tokio::spawn(accept_loop(
            Arc::clone(&self.shared),
            listener,
            shutdown_rx.clone(),
        ));
        tokio::spawn(sweep_loop(Arc::clone(&self.shared), shutdown_rx));

        info!(address = %bound, "📡 coder gateway listening");
        Ok(())
    }

    /// Close the listener and every active socket. Idempotent.
    pub async fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
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

        let mut clients = self.shared.clients.write().await;
        for (endpoint, entry) in clients.drain() {
            entry.reader_abort.abort();
            debug!(%endpoint, "client closed at shutdown");
        }
        info!("coder gateway stopped");
    }

    /// Connection count, listen address, bus connectivity, timestamp.
    pub async fn get_status(&self) -> GatewayStatus {
        let clients = self.shared.clients.read().await;
        GatewayStatus {
            connection_count: clients.len(),
            address: self.shared.config.socket_address.clone(),
            port: self
                .local_addr()
                .map(|addr| addr.port())
                .unwrap_or(self.shared.config.socket_port),
            mqtt_connected: self.shared.bus_connected.load(Ordering::SeqCst),
            timestamp: Utc::now(),
        }
    }

    /// Per-endpoint snapshot of every connected scanner.
    pub async fn get_connected_clients(&self) -> Vec<ClientConnection> {
        let clients = self.shared.clients.read().await;
        let mut snapshots: Vec<ClientConnection> =
            clients.values().map(ClientEntry::snapshot).collect();
        snapshots.sort_by_key(|snapshot| snapshot.connected_at);
        snapshots
    }

    /// Open a collect window: clear every client's buffer, wait for the
    /// scanners to settle, then gather for `timeout_ms` (the configured
    /// window when `None`). Returns when the window elapses; it does not
    /// wait for every client to respond. Stopping the gateway mid-window
    /// ends the collection early with whatever arrived.
    pub async fn start_scan(
        &self,
        direction: Direction,
        stack_height: f64,
        timeout_ms: Option<u64>,
    ) -> GatewayResult<ScanResult> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(GatewayError::NotRunning);
        }
        let window_ms = timeout_ms.unwrap_or(self.shared.config.scan_timeout_ms);

        self.clear_queue().await;
        self.interruptible_sleep(Duration::from_millis(timing::SCAN_READY_DELAY_MS))
            .await;
        self.interruptible_sleep(Duration::from_millis(window_ms)).await;

        let clients = self.shared.clients.read().await;
        let mut entries: Vec<&ClientEntry> = clients.values().collect();
        entries.sort_by_key(|entry| entry.connected_at);
        let codes: Vec<String> = entries
            .iter()
            .flat_map(|entry| entry.messages.iter().cloned())
            .collect();

        info!(
            %direction,
            stack_height,
            window_ms,
            codes = codes.len(),
            "collect window closed"
        );
        Ok(ScanResult {
            direction,
            stack_height,
            codes,
            timestamp: Utc::now(),
        })
    }

    async fn interruptible_sleep(&self, duration: Duration) {
        let receiver = {
            let slot = self
                .shutdown
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slot.as_ref().map(|sender| sender.subscribe())
        };
        match receiver {
            Some(mut receiver) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = receiver.changed() => {}
                }
            }
            None => tokio::time::sleep(duration).await,
        }
    }

    /// Send a string to one endpoint. A write failure disconnects that
    /// endpoint.
    pub async fn send(&self, endpoint: &str, message: &str) -> GatewayResult<()> {
        let address: SocketAddr =
            endpoint
                .parse()
                .map_err(|_| GatewayError::InvalidEndpoint {
                    endpoint: endpoint.to_string(),
                })?;

        let writer = {
            let clients = self.shared.clients.read().await;
            clients
                .get(&address)
                .map(|entry| Arc::clone(&entry.writer))
                .ok_or_else(|| GatewayError::ClientNotFound {
                    endpoint: endpoint.to_string(),
                })?
        };

        let result = {
            let mut writer = writer.lock().await;
            writer.write_all(message.as_bytes()).await
        };
        if let Err(e) = result {
            warn!(endpoint, error = %e, "send failed; disconnecting endpoint");
            remove_client(&self.shared, address).await;
            return Err(GatewayError::io(endpoint, e));
        }
        Ok(())
    }

    /// Send a string to every endpoint, best-effort: failed endpoints are
    /// disconnected but the call continues through the rest.
    pub async fn broadcast(&self, message: &str) {
        let targets: Vec<SocketAddr> = {
            let clients = self.shared.clients.read().await;
            clients.keys().copied().collect()
        };
        for address in targets {
            if let Err(e) = self.send(&address.to_string(), message).await {
                debug!(endpoint = %address, error = %e, "broadcast skipped endpoint");
            }
        }
    }

    /// Clear every endpoint's message buffer.
    pub async fn clear_queue(&self) {
        let mut clients = self.shared.clients.write().await;
        for entry in clients.values_mut() {
            entry.messages.clear();
        }
    }
}

async fn accept_loop(
    shared: Arc<GatewayShared>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("acceptor shutting down");
                    return;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, endpoint)) => {
                    let at_capacity = {
                        let clients = shared.clients.read().await;
                        clients.len() >= shared.config.max_clients as usize
                    };
                    if at_capacity {
                        warn!(%endpoint, "connection refused: client limit reached");
                        drop(stream);
                        continue;
                    }
                    register_client(&shared, stream, endpoint).await;
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn register_client(shared: &Arc<GatewayShared>, stream: TcpStream, endpoint: SocketAddr) {
    let (reader, writer) = stream.into_split();

    // Hold the table lock across spawn + insert so the receive loop cannot
    // observe a missing entry for its own endpoint.
    let mut clients = shared.clients.write().await;
    let reader_task = tokio::spawn(receive_loop(Arc::clone(shared), reader, endpoint));

    let now = Utc::now();
    let entry = ClientEntry {
        endpoint,
        connected_at: now,
        last_activity: now,
        messages: Vec::new(),
        writer: Arc::new(Mutex::new(writer)),
        reader_abort: reader_task.abort_handle(),
    };
    clients.insert(endpoint, entry);
    info!(%endpoint, total = clients.len(), "scanner connected");
}

/// Per-connection receive loop: each TCP segment becomes one message in
/// the endpoint's buffer, in arrival order. Ends on zero-read or error.
async fn receive_loop(shared: Arc<GatewayShared>, reader: OwnedReadHalf, endpoint: SocketAddr) {
    let mut buffer = vec![0u8; shared.config.receive_buffer_size.max(64)];
    loop {
        let readable = reader.readable().await;
        if readable.is_err() {
            break;
        }
        match reader.try_read(&mut buffer) {
            Ok(0) => {
                debug!(%endpoint, "peer closed connection");
                break;
            }
            Ok(n) => {
                let message = String::from_utf8_lossy(&buffer[..n]).to_string();
                let mut clients = shared.clients.write().await;
                if let Some(entry) = clients.get_mut(&endpoint) {
                    entry.messages.push(message);
                    entry.last_activity = Utc::now();
                } else {
                    // Entry already removed by sweep or shutdown.
                    break;
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => {
                debug!(%endpoint, error = %e, "receive error");
                break;
            }
        }
    }
    remove_client(&shared, endpoint).await;
}

/// Idle sweep: drop clients whose last activity is older than the
/// configured timeout. Disconnect is idempotent.
async fn sweep_loop(shared: Arc<GatewayShared>, mut shutdown: watch::Receiver<bool>) {
    let timeout = Duration::from_millis(shared.config.client_timeout_ms.max(10));
    let interval = timeout.min(Duration::from_millis(500)).max(Duration::from_millis(5));
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
            _ = tokio::time::sleep(interval) => {
                let now = Utc::now();
                let stale: Vec<SocketAddr> = {
                    let clients = shared.clients.read().await;
                    clients
                        .values()
                        .filter(|entry| {
                            let idle = now - entry.last_activity;
                            idle.num_milliseconds() as u128
                                > shared.config.client_timeout_ms as u128
                        })
                        .map(|entry| entry.endpoint)
                        .collect()
                };
                for endpoint in stale {
                    info!(%endpoint, "client timed out");
                    remove_client(&shared, endpoint).await;
                }
            }
        }
    }
}

async fn remove_client(shared: &Arc<GatewayShared>, endpoint: SocketAddr) {
    let removed = {
        let mut clients = shared.clients.write().await;
        clients.remove(&endpoint)
    };
    if let Some(entry) = removed {
        entry.reader_abort.abort();
        debug!(%endpoint, "client removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    fn test_config(client_timeout_ms: u64) -> CoderConfig {
        CoderConfig {
            socket_address: "127.0.0.1".to_string(),
            socket_port: 0,
            max_clients: 4,
            receive_buffer_size: 256,
            client_timeout_ms,
            scan_timeout_ms: 100,
        }
    }

    async fn started_gateway(client_timeout_ms: u64) -> CoderGateway {
        let gateway = CoderGateway::new(test_config(client_timeout_ms));
        gateway.start().await.unwrap();
        gateway
    }

    async fn connect(gateway: &CoderGateway) -> TcpStream {
        let addr = gateway.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        // Give the acceptor a beat to register the client.
        tokio::time::sleep(Duration::from_millis(50)).await;
        stream
    }

    #[tokio::test]
    async fn test_accept_and_snapshot() {
        let gateway = started_gateway(60_000).await;
        let _client = connect(&gateway).await;

        let status = gateway.get_status().await;
        assert_eq!(status.connection_count, 1);

        let clients = gateway.get_connected_clients().await;
        assert_eq!(clients.len(), 1);
        assert!(clients[0].messages.is_empty());

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_messages_kept_in_arrival_order() {
        let gateway = started_gateway(60_000).await;
        let mut client = connect(&gateway).await;

        for message in ["CODE-1", "CODE-2", "CODE-3"] {
            client.write_all(message.as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        let clients = gateway.get_connected_clients().await;
        assert_eq!(
            clients[0].messages,
            vec!["CODE-1", "CODE-2", "CODE-3"]
        );

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_scan_window_collects_codes_from_all_clients() {
        let gateway = started_gateway(60_000).await;
        let mut first = connect(&gateway).await;
        let mut second = connect(&gateway).await;

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(550)).await;
            first.write_all(b"CODE-A").await.unwrap();
            second.write_all(b"CODE-B").await.unwrap();
            (first, second)
        });

        let result = gateway
            .start_scan(Direction::Out, 200.0, Some(400))
            .await
            .unwrap();
        let (_first, _second) = writer.await.unwrap();

        assert_eq!(result.direction, Direction::Out);
        assert_eq!(result.stack_height, 200.0);
        assert_eq!(result.codes.len(), 2);
        assert!(result.codes.contains(&"CODE-A".to_string()));
        assert!(result.codes.contains(&"CODE-B".to_string()));
        assert_eq!(result.joined_codes().matches(';').count(), 1);

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_scan_window_excludes_earlier_messages() {
        let gateway = started_gateway(60_000).await;
        let mut client = connect(&gateway).await;

        // Arrives before the window opens; the pre-wait reset drops it.
        client.write_all(b"STALE").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = gateway
            .start_scan(Direction::In, 0.0, Some(200))
            .await
            .unwrap();
        assert!(result.codes.is_empty());

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_idle_client_is_dropped() {
        let gateway = started_gateway(150).await;
        let _client = connect(&gateway).await;
        assert_eq!(gateway.get_status().await.connection_count, 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(gateway.get_status().await.connection_count, 0);

        // Broadcast to an empty client set does not raise.
        gateway.broadcast("PING").await;

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_send_to_unknown_endpoint() {
        let gateway = started_gateway(60_000).await;

        let err = gateway.send("127.0.0.1:1", "PING").await.unwrap_err();
        assert!(matches!(err, GatewayError::ClientNotFound { .. }));

        let err = gateway.send("not-an-endpoint", "PING").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidEndpoint { .. }));

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_clear_queue() {
        let gateway = started_gateway(60_000).await;
        let mut client = connect(&gateway).await;

        client.write_all(b"CODE-X").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(gateway.get_connected_clients().await[0].messages.len(), 1);

        gateway.clear_queue().await;
        assert!(gateway.get_connected_clients().await[0].messages.is_empty());

        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_scan_requires_running() {
        let gateway = started_gateway(60_000).await;
        gateway.stop().await;
        gateway.stop().await;

        let err = gateway
            .start_scan(Direction::Out, 0.0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotRunning));
    }

    #[tokio::test]
    async fn test_client_limit() {
        let gateway = started_gateway(60_000).await;
        let mut streams = Vec::new();
        for _ in 0..4 {
            streams.push(connect(&gateway).await);
        }
        assert_eq!(gateway.get_status().await.connection_count, 4);

        // Fifth connection is refused.
        let _extra = TcpStream::connect(gateway.local_addr().unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(gateway.get_status().await.connection_count, 4);

        gateway.stop().await;
    }
}
