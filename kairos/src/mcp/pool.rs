//! Reference-counted MCP connection pool.
//!
//! Shares long-lived MCP transports across many concurrent agents while
//! bounding resource use. Registration is eager, connection is lazy: the
//! first [`McpPool::get`] for a server opens a transport. Connections are
//! shared; a refcount above one means several runs are multiplexing the
//! same transport. A single background maintenance task per pool probes
//! liveness and evicts idle connections.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::SharedConnection;
use super::transport::TransportConfig;
use crate::context::RunContext;
use crate::error::{Error, ErrorCode, Result};

/// Opens transports for the pool.
///
/// The rmcp-backed connector lives behind the `rmcp` feature; tests use
/// in-process fakes.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection for `server` over `transport`.
    async fn connect(
        &self,
        ctx: &RunContext,
        server: &str,
        transport: &TransportConfig,
    ) -> Result<SharedConnection>;
}

/// Pool tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Maximum open connections per server.
    pub max_clients: usize,
    /// Maximum concurrent holders per connection; past this, acquirers
    /// wait for a release.
    pub max_refs_per_client: usize,
    /// How long a refcount-zero connection survives before eviction.
    pub idle_timeout: Duration,
    /// Interval between maintenance passes.
    pub liveness_interval: Duration,
    /// Deadline for each liveness probe.
    pub probe_timeout: Duration,
    /// Deadline for opening a new connection.
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_clients: 4,
            max_refs_per_client: 8,
            idle_timeout: Duration::from_secs(300),
            liveness_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Counters reported by [`McpPool::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Registered servers.
    pub servers: usize,
    /// Connections with a refcount above zero.
    pub active_connections: usize,
    /// Cumulative connections opened.
    pub connections_opened: u64,
    /// Cumulative connection failures.
    pub connection_errors: u64,
    /// Cumulative liveness probes that passed.
    pub probes_passed: u64,
    /// Cumulative liveness probes that failed.
    pub probes_failed: u64,
}

struct ClientSlot {
    id: u64,
    conn: SharedConnection,
    refs: usize,
    idle_since: Option<Instant>,
}

struct ServerEntry {
    transport: TransportConfig,
    max_clients: usize,
    clients: Vec<ClientSlot>,
    /// Connections being opened right now; counted against `max_clients`
    /// so concurrent acquirers cannot over-open.
    connecting: usize,
}

impl ServerEntry {
    fn open_count(&self) -> usize {
        self.clients.len() + self.connecting
    }
}

/// A connection lease returned by [`McpPool::get`].
///
/// Hand it back with [`McpPool::release`]; the lease is consumed, so a
/// double release does not typecheck.
pub struct PooledClient {
    server: String,
    slot_id: u64,
    conn: SharedConnection,
}

impl std::fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledClient")
            .field("server", &self.server)
            .field("slot_id", &self.slot_id)
            .finish_non_exhaustive()
    }
}

impl PooledClient {
    /// The server this lease belongs to.
    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &SharedConnection {
        &self.conn
    }
}

/// Reference-counted transport pool over stdio and HTTP MCP connections.
pub struct McpPool {
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    servers: Mutex<HashMap<String, ServerEntry>>,
    released: Notify,
    shutdown: CancellationToken,
    closed: AtomicBool,
    next_slot: AtomicU64,
    opened: AtomicU64,
    errors: AtomicU64,
    probes_passed: AtomicU64,
    probes_failed: AtomicU64,
}

impl std::fmt::Debug for McpPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpPool")
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl McpPool {
    /// Construct a pool and start its maintenance loop.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Arc<Self> {
        let pool = Arc::new(Self {
            connector,
            config,
            servers: Mutex::new(HashMap::new()),
            released: Notify::new(),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            next_slot: AtomicU64::new(1),
            opened: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            probes_passed: AtomicU64::new(0),
            probes_failed: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&pool);
        let shutdown = pool.shutdown.clone();
        let interval = config.liveness_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(pool) = weak.upgrade() else { break };
                pool.maintenance_pass().await;
            }
            debug!("MCP pool maintenance loop stopped");
        });

        pool
    }

    /// Register a server. Does not connect.
    ///
    /// Re-registering an identical descriptor is a no-op; registering a
    /// different descriptor under an existing name is rejected.
    pub async fn register(
        &self,
        name: impl Into<String>,
        transport: TransportConfig,
    ) -> Result<()> {
        let name = name.into();
        transport.validate(&name)?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::internal("pool is closed"));
        }

        let mut servers = self.servers.lock().await;
        if let Some(existing) = servers.get(&name) {
            if existing.transport == transport {
                return Ok(());
            }
            return Err(Error::invalid_input(format!(
                "server '{name}' is already registered with a different transport"
            )));
        }

        info!(server = %name, transport = %transport.describe(), "MCP server registered");
        servers.insert(
            name,
            ServerEntry {
                transport,
                max_clients: self.config.max_clients,
                clients: Vec::new(),
                connecting: 0,
            },
        );
        Ok(())
    }

    /// Register a server with a non-default connection cap.
    pub async fn register_with_capacity(
        &self,
        name: impl Into<String>,
        transport: TransportConfig,
        max_clients: usize,
    ) -> Result<()> {
        let name = name.into();
        self.register(name.clone(), transport).await?;
        let mut servers = self.servers.lock().await;
        if let Some(entry) = servers.get_mut(&name) {
            entry.max_clients = max_clients.max(1);
        }
        Ok(())
    }

    /// Registered server names, sorted.
    pub async fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Acquire a connection lease for `name`.
    ///
    /// Shares an existing connection when one has spare capacity, opens a
    /// new one while the per-server cap allows, and otherwise waits for a
    /// release, honoring the context's deadline and cancellation.
    pub async fn get(&self, ctx: &RunContext, name: &str) -> Result<PooledClient> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::internal("pool is closed"));
            }
            ctx.check()?;

            enum Plan {
                Lease(PooledClient),
                Connect,
                Wait,
            }

            let plan = {
                let mut servers = self.servers.lock().await;
                let entry = servers
                    .get_mut(name)
                    .ok_or_else(|| Error::not_found(format!("server '{name}' is not registered")))?;

                // Prefer the least-loaded existing connection.
                let max_refs = self.config.max_refs_per_client;
                let candidate = entry
                    .clients
                    .iter_mut()
                    .filter(|slot| slot.refs < max_refs)
                    .min_by_key(|slot| slot.refs);

                if let Some(slot) = candidate {
                    // A brand-new connection (refs == 0) that nobody has used
                    // is also just shared; idle tracking resets either way.
                    slot.refs += 1;
                    slot.idle_since = None;
                    Plan::Lease(PooledClient {
                        server: name.to_owned(),
                        slot_id: slot.id,
                        conn: Arc::clone(&slot.conn),
                    })
                } else if entry.open_count() < entry.max_clients {
                    entry.connecting += 1;
                    Plan::Connect
                } else {
                    Plan::Wait
                }
            };

            match plan {
                Plan::Lease(lease) => {
                    debug!(server = name, slot = lease.slot_id, "MCP connection leased");
                    return Ok(lease);
                }
                Plan::Connect => return self.connect_slot(ctx, name).await,
                Plan::Wait => {
                    let notified = self.released.notified();
                    let budget = ctx.call_budget(None);
                    tokio::select! {
                        () = self.shutdown.cancelled() => {
                            return Err(Error::internal("pool is closed"));
                        }
                        () = ctx.cancellation().cancelled() => {
                            return Err(Error::context_lost("acquisition cancelled")
                                .with_context("server", name)
                                .with_context("cancelled", "true"));
                        }
                        out = async {
                            match budget {
                                Some(limit) => tokio::time::timeout(limit, notified).await.is_ok(),
                                None => {
                                    notified.await;
                                    true
                                }
                            }
                        } => {
                            if !out {
                                return Err(Error::timeout(format!(
                                    "timed out waiting for a '{name}' connection"
                                )));
                            }
                        }
                    }
                }
            }
        }
    }

    /// Open a new connection for `name`, on the caller's budget.
    async fn connect_slot(&self, ctx: &RunContext, name: &str) -> Result<PooledClient> {
        let transport = {
            let servers = self.servers.lock().await;
            servers
                .get(name)
                .map(|entry| entry.transport.clone())
                .ok_or_else(|| Error::not_found(format!("server '{name}' is not registered")))?
        };

        let result = ctx
            .run_scoped(Some(self.config.connect_timeout), async {
                self.connector.connect(ctx, name, &transport).await
            })
            .await;

        let mut servers = self.servers.lock().await;
        let Some(entry) = servers.get_mut(name) else {
            return Err(Error::not_found(format!("server '{name}' vanished")));
        };
        entry.connecting = entry.connecting.saturating_sub(1);

        match result {
            Ok(conn) => {
                let slot_id = self.next_slot.fetch_add(1, Ordering::Relaxed);
                self.opened.fetch_add(1, Ordering::Relaxed);
                entry.clients.push(ClientSlot {
                    id: slot_id,
                    conn: Arc::clone(&conn),
                    refs: 1,
                    idle_since: None,
                });
                info!(server = name, slot = slot_id, "MCP connection opened");
                Ok(PooledClient {
                    server: name.to_owned(),
                    slot_id,
                    conn,
                })
            }
            Err(err) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(server = name, error = %err, "MCP connection failed");
                // A slot just freed up for whoever is waiting.
                drop(servers);
                self.released.notify_waiters();
                let code = if err.is(ErrorCode::Timeout) || err.is(ErrorCode::ContextLost) {
                    err
                } else {
                    Error::internal(format!("failed to connect to '{name}'")).with_cause(err)
                };
                Err(code)
            }
        }
    }

    /// Return a lease. The connection is not closed; it becomes a
    /// candidate for idle eviction once its refcount reaches zero.
    pub async fn release(&self, lease: PooledClient) {
        let mut servers = self.servers.lock().await;
        if let Some(entry) = servers.get_mut(&lease.server) {
            if let Some(slot) = entry.clients.iter_mut().find(|s| s.id == lease.slot_id) {
                slot.refs = slot.refs.saturating_sub(1);
                if slot.refs == 0 {
                    slot.idle_since = Some(Instant::now());
                }
                debug!(server = %lease.server, slot = slot.id, refs = slot.refs, "MCP connection released");
            }
        }
        drop(servers);
        self.released.notify_waiters();
    }

    /// Current refcount of every connection for `name` (test and
    /// diagnostics surface).
    pub async fn refcounts(&self, name: &str) -> Vec<usize> {
        self.servers
            .lock()
            .await
            .get(name)
            .map(|entry| entry.clients.iter().map(|s| s.refs).collect())
            .unwrap_or_default()
    }

    /// Pool counters.
    pub async fn stats(&self) -> PoolStats {
        let servers = self.servers.lock().await;
        let active = servers
            .values()
            .flat_map(|e| e.clients.iter())
            .filter(|s| s.refs > 0)
            .count();
        PoolStats {
            servers: servers.len(),
            active_connections: active,
            connections_opened: self.opened.load(Ordering::Relaxed),
            connection_errors: self.errors.load(Ordering::Relaxed),
            probes_passed: self.probes_passed.load(Ordering::Relaxed),
            probes_failed: self.probes_failed.load(Ordering::Relaxed),
        }
    }

    /// One maintenance pass: probe busy connections, evict idle ones.
    async fn maintenance_pass(&self) {
        // Snapshot probe targets without holding the lock across probes.
        let targets: Vec<(String, u64, SharedConnection)> = {
            let servers = self.servers.lock().await;
            servers
                .iter()
                .flat_map(|(name, entry)| {
                    entry
                        .clients
                        .iter()
                        .filter(|slot| slot.refs > 0)
                        .map(|slot| (name.clone(), slot.id, Arc::clone(&slot.conn)))
                })
                .collect()
        };

        let mut failed: Vec<(String, u64)> = Vec::new();
        for (server, slot_id, conn) in targets {
            let probe_ctx = RunContext::new().with_timeout(self.config.probe_timeout);
            match conn.list_tools(&probe_ctx).await {
                Ok(_) => {
                    self.probes_passed.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    self.probes_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(server = %server, slot = slot_id, error = %err, "MCP liveness probe failed");
                    failed.push((server, slot_id));
                }
            }
        }

        // Apply removals and collect idle-expired connections.
        let mut to_close: Vec<SharedConnection> = Vec::new();
        {
            let mut servers = self.servers.lock().await;
            for (server, slot_id) in failed {
                if let Some(entry) = servers.get_mut(&server) {
                    if let Some(pos) = entry.clients.iter().position(|s| s.id == slot_id) {
                        to_close.push(Arc::clone(&entry.clients[pos].conn));
                        entry.clients.remove(pos);
                    }
                }
            }
            let idle_timeout = self.config.idle_timeout;
            for entry in servers.values_mut() {
                let mut index = 0;
                while index < entry.clients.len() {
                    let expired = entry.clients[index].refs == 0
                        && entry.clients[index]
                            .idle_since
                            .is_some_and(|at| at.elapsed() >= idle_timeout);
                    if expired {
                        to_close.push(Arc::clone(&entry.clients[index].conn));
                        entry.clients.remove(index);
                    } else {
                        index += 1;
                    }
                }
            }
        }

        for conn in to_close {
            if let Err(err) = conn.close().await {
                debug!(error = %err, "MCP connection close failed during maintenance");
            }
        }
        self.released.notify_waiters();
    }

    /// Shut the pool down: cancel in-flight acquisitions, close every
    /// connection, and refuse subsequent gets. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        self.released.notify_waiters();

        let connections: Vec<SharedConnection> = {
            let mut servers = self.servers.lock().await;
            servers
                .values_mut()
                .flat_map(|entry| entry.clients.drain(..))
                .map(|slot| slot.conn)
                .collect()
        };
        for conn in connections {
            if let Err(err) = conn.close().await {
                debug!(error = %err, "MCP connection close failed during shutdown");
            }
        }
        info!("MCP pool closed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::sync::atomic::AtomicU32;

    use crate::mcp::client::McpConnection;
    use crate::tool::ToolDefinition;

    #[derive(Default)]
    struct FakeConn {
        closed: AtomicBool,
        healthy: AtomicBool,
    }

    impl FakeConn {
        fn new() -> Self {
            Self {
                closed: AtomicBool::new(false),
                healthy: AtomicBool::new(true),
            }
        }
    }

    #[async_trait]
    impl McpConnection for FakeConn {
        async fn list_tools(&self, _ctx: &RunContext) -> crate::error::Result<Vec<ToolDefinition>> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(Vec::new())
            } else {
                Err(Error::internal("connection reset"))
            }
        }
        async fn call_tool(
            &self,
            _ctx: &RunContext,
            _name: &str,
            _args: Map<String, Value>,
        ) -> crate::error::Result<Value> {
            Ok(Value::Null)
        }
        async fn close(&self) -> crate::error::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeConnector {
        opened: AtomicU32,
        conns: Mutex<Vec<Arc<FakeConn>>>,
    }

    impl FakeConnector {
        fn new() -> Self {
            Self {
                opened: AtomicU32::new(0),
                conns: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(
            &self,
            _ctx: &RunContext,
            _server: &str,
            _transport: &TransportConfig,
        ) -> crate::error::Result<SharedConnection> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let conn = Arc::new(FakeConn::new());
            self.conns.lock().await.push(Arc::clone(&conn));
            Ok(conn)
        }
    }

    fn quiet_config() -> PoolConfig {
        PoolConfig {
            liveness_interval: Duration::from_secs(3600),
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn registration_is_idempotent_and_lazy() {
        let connector = Arc::new(FakeConnector::new());
        let pool = McpPool::new(Arc::clone(&connector) as Arc<dyn Connector>, quiet_config());

        let transport = TransportConfig::stdio("python", &["srv.py"]);
        pool.register("files", transport.clone()).await.unwrap();
        pool.register("files", transport).await.unwrap();

        assert_eq!(pool.server_names().await, vec!["files"]);
        assert_eq!(connector.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn conflicting_registration_is_rejected() {
        let pool = McpPool::new(Arc::new(FakeConnector::new()), quiet_config());
        pool.register("files", TransportConfig::stdio("python", &["a.py"]))
            .await
            .unwrap();
        let err = pool
            .register("files", TransportConfig::http("http://x"))
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::InvalidInput));
    }

    #[tokio::test]
    async fn capacity_one_is_shared_not_duplicated() {
        let connector = Arc::new(FakeConnector::new());
        let pool = McpPool::new(Arc::clone(&connector) as Arc<dyn Connector>, quiet_config());
        pool.register_with_capacity("filesystem", TransportConfig::http("http://fs"), 1)
            .await
            .unwrap();
        let ctx = RunContext::new();

        let a = pool.get(&ctx, "filesystem").await.unwrap();
        let b = pool.get(&ctx, "filesystem").await.unwrap();

        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
        assert_eq!(pool.refcounts("filesystem").await, vec![2]);

        pool.release(a).await;
        pool.release(b).await;
        assert_eq!(pool.refcounts("filesystem").await, vec![0]);
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_server_is_not_found() {
        let pool = McpPool::new(Arc::new(FakeConnector::new()), quiet_config());
        let ctx = RunContext::new();
        let err = pool.get(&ctx, "missing").await.unwrap_err();
        assert!(err.is(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn cancelled_waiter_returns_promptly_without_consuming_capacity() {
        let pool = McpPool::new(
            Arc::new(FakeConnector::new()),
            PoolConfig {
                max_refs_per_client: 1,
                ..quiet_config()
            },
        );
        pool.register_with_capacity("fs", TransportConfig::http("http://fs"), 1)
            .await
            .unwrap();

        let ctx = RunContext::new();
        let held = pool.get(&ctx, "fs").await.unwrap();

        let waiter_ctx = RunContext::new();
        waiter_ctx.cancel();
        let err = pool.get(&waiter_ctx, "fs").await.unwrap_err();
        assert!(err.is_cancellation());

        // The held lease is unaffected and capacity was not consumed.
        assert_eq!(pool.refcounts("fs").await, vec![1]);
        pool.release(held).await;
    }

    #[tokio::test]
    async fn waiter_wakes_on_release() {
        let pool = McpPool::new(
            Arc::new(FakeConnector::new()),
            PoolConfig {
                max_refs_per_client: 1,
                ..quiet_config()
            },
        );
        pool.register_with_capacity("fs", TransportConfig::http("http://fs"), 1)
            .await
            .unwrap();

        let ctx = RunContext::new();
        let held = pool.get(&ctx, "fs").await.unwrap();

        let pool2 = Arc::clone(&pool);
        let waiter = tokio::spawn(async move {
            let ctx = RunContext::new().with_timeout(Duration::from_secs(5));
            pool2.get(&ctx, "fs").await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.release(held).await;

        let lease = waiter.await.unwrap().unwrap();
        assert_eq!(pool.refcounts("fs").await, vec![1]);
        pool.release(lease).await;
    }

    #[tokio::test]
    async fn maintenance_evicts_idle_and_removes_unhealthy() {
        let connector = Arc::new(FakeConnector::new());
        let pool = McpPool::new(
            Arc::clone(&connector) as Arc<dyn Connector>,
            PoolConfig {
                idle_timeout: Duration::from_millis(1),
                ..quiet_config()
            },
        );
        pool.register("fs", TransportConfig::http("http://fs")).await.unwrap();
        let ctx = RunContext::new();

        // Idle eviction path.
        let lease = pool.get(&ctx, "fs").await.unwrap();
        pool.release(lease).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        pool.maintenance_pass().await;
        assert!(pool.refcounts("fs").await.is_empty());
        assert!(connector.conns.lock().await[0].closed.load(Ordering::SeqCst));

        // Unhealthy-removal path: a held connection that fails its probe.
        let lease = pool.get(&ctx, "fs").await.unwrap();
        connector.conns.lock().await[1]
            .healthy
            .store(false, Ordering::SeqCst);
        pool.maintenance_pass().await;
        let stats = pool.stats().await;
        assert_eq!(stats.probes_failed, 1);
        assert!(pool.refcounts("fs").await.is_empty());
        pool.release(lease).await;
    }

    #[tokio::test]
    async fn close_refuses_further_gets_and_closes_connections() {
        let connector = Arc::new(FakeConnector::new());
        let pool = McpPool::new(Arc::clone(&connector) as Arc<dyn Connector>, quiet_config());
        pool.register("fs", TransportConfig::http("http://fs")).await.unwrap();
        let ctx = RunContext::new();
        let lease = pool.get(&ctx, "fs").await.unwrap();
        drop(lease);

        pool.close().await;
        pool.close().await; // idempotent

        assert!(connector.conns.lock().await[0].closed.load(Ordering::SeqCst));
        let err = pool.get(&ctx, "fs").await.unwrap_err();
        assert!(err.is(ErrorCode::Internal));
    }

    #[tokio::test]
    async fn stats_count_opens_and_errors() {
        struct FailingConnector;

        #[async_trait]
        impl Connector for FailingConnector {
            async fn connect(
                &self,
                _ctx: &RunContext,
                _server: &str,
                _transport: &TransportConfig,
            ) -> crate::error::Result<SharedConnection> {
                Err(Error::internal("refused"))
            }
        }

        let pool = McpPool::new(Arc::new(FailingConnector), quiet_config());
        pool.register("bad", TransportConfig::http("http://bad")).await.unwrap();
        let ctx = RunContext::new();

        assert!(pool.get(&ctx, "bad").await.is_err());
        let stats = pool.stats().await;
        assert_eq!(stats.connection_errors, 1);
        assert_eq!(stats.connections_opened, 0);
        assert_eq!(stats.servers, 1);
    }
}
