//! `RealmgateServer` builder and server loops.
//!
//! A running server is four kinds of task:
//!
//! ```text
//! accept loop ──spawn──→ connection task (reader) + writer task   one pair per connection
//! world loop             WorldTick drain, session timers, destruction, map placement
//! immediate loop         Immediate drain, woken by the dispatcher
//! map workers            MapTick drain, one per map (realmgate-map)
//! ```
//!
//! All of them stop when the server's shutdown token is cancelled.

use std::sync::Arc;

use parking_lot::Mutex;
use realmgate_map::MapManager;
use realmgate_protocol::{Codec, ConnectionTag, JsonCodec, ProcessingCategory, ServerFrame};
use realmgate_session::{
    Authenticator, Dispatcher, OpcodeRegistry, SessionContext, SessionManager, SessionOpcodes,
    SessionServices, UpdateStatus,
};
use realmgate_tick::TickScheduler;
use realmgate_transport::{Transport, WebSocketTransport};
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::handle_connection;
use crate::{RealmgateError, ServerConfig};

/// The current protocol version. Clients must send this in their first
/// frame or be rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// State shared by every task of a server, independent of the
/// authenticator and codec types.
pub(crate) struct Shared {
    /// Only held for bookkeeping, never across an `.await`.
    pub(crate) sessions: Mutex<SessionManager>,
    pub(crate) ctx: Arc<SessionContext>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) config: ServerConfig,
    pub(crate) shutdown: CancellationToken,
}

/// Shared server state passed to each connection task.
pub(crate) struct ServerState<A: Authenticator, C: Codec> {
    pub(crate) shared: Arc<Shared>,
    pub(crate) auth: A,
    pub(crate) codec: C,
}

/// Builder for configuring and starting a Realmgate server.
///
/// # Example
///
/// ```rust,ignore
/// use realmgate::prelude::*;
///
/// let registry = OpcodeRegistry::builder()
///     .with_session_handlers(SessionOpcodes::default())
///     .register(CMSG_CHAR_ENUM, char_enum_entry())
///     .build();
///
/// let server = RealmgateServer::builder()
///     .config(ServerConfig::load("realm.toml")?)
///     .registry(registry)
///     .build(MyAuthenticator)
///     .await?;
/// server.run().await
/// ```
pub struct RealmgateServerBuilder {
    config: ServerConfig,
    registry: Option<Arc<OpcodeRegistry>>,
    services: SessionServices,
}

impl RealmgateServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            registry: None,
            services: SessionServices::default(),
        }
    }

    /// Overrides the bind address of the current config.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Opcode table. Without one the server only knows the built-in
    /// session opcodes.
    pub fn registry(mut self, registry: Arc<OpcodeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// World, ban, permission and anti-cheat collaborators.
    pub fn services(mut self, services: SessionServices) -> Self {
        self.services = services;
        self
    }

    /// Binds the listener and spawns the classification pool.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build<A: Authenticator>(
        self,
        auth: A,
    ) -> Result<RealmgateServer<A, JsonCodec>, RealmgateError> {
        let config = self.config.validated();
        let transport = WebSocketTransport::bind(&config.bind_addr).await?;

        let registry = self.registry.unwrap_or_else(|| {
            OpcodeRegistry::builder()
                .with_session_handlers(SessionOpcodes::default())
                .build()
        });
        let ctx = SessionContext::new(registry, config.session.clone(), self.services);
        let dispatcher = Dispatcher::spawn(ctx.config().classification_parallelism);
        let sessions = SessionManager::new(Arc::clone(&ctx), config.max_active_sessions);
        let maps = MapManager::new(config.map_config());

        let shared = Arc::new(Shared {
            sessions: Mutex::new(sessions),
            ctx,
            dispatcher,
            config,
            shutdown: CancellationToken::new(),
        });

        Ok(RealmgateServer {
            transport,
            state: Arc::new(ServerState {
                shared,
                auth,
                codec: JsonCodec,
            }),
            maps,
        })
    }
}

impl Default for RealmgateServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Realmgate server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct RealmgateServer<A: Authenticator, C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A, C>>,
    maps: MapManager,
}

impl<A, C> RealmgateServer<A, C>
where
    A: Authenticator,
    C: Codec,
{
    pub fn builder() -> RealmgateServerBuilder {
        RealmgateServerBuilder::new()
    }

    /// The address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// A handle for inspecting and stopping the server once it runs.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: Arc::clone(&self.state.shared),
        }
    }

    /// Runs the accept loop, the world loop and the immediate loop until
    /// [`ServerHandle::shutdown`] is called.
    pub async fn run(self) -> Result<(), RealmgateError> {
        let Self {
            mut transport,
            state,
            maps,
        } = self;
        let shared = Arc::clone(&state.shared);
        info!(addr = %shared.config.bind_addr, "realmgate server running");

        let world = tokio::spawn(run_world_loop(Arc::clone(&shared), maps));
        let immediate = tokio::spawn(run_immediate_loop(Arc::clone(&shared)));

        loop {
            tokio::select! {
                _ = shared.shutdown.cancelled() => break,
                accepted = transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(conn, state).await {
                                debug!(error = %err, "connection ended with error");
                            }
                        });
                    }
                    Err(err) => {
                        error!(error = %err, "accept failed");
                    }
                },
            }
        }

        for (name, task) in [("world", world), ("immediate", immediate)] {
            if let Err(err) = task.await {
                error!(task = name, error = %err, "server task panicked");
            }
        }
        info!("realmgate server stopped");
        Ok(())
    }
}

/// Cheap, clonable view of a running server.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl ServerHandle {
    /// Stops accepting, destroys every session (logging players out) and
    /// stops all loops.
    pub fn shutdown(&self) {
        info!("server shutdown requested");
        self.shared.shutdown.cancel();
    }

    /// Live sessions, queued ones included.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.lock().len()
    }

    /// Sessions past the login queue.
    pub fn active_session_count(&self) -> usize {
        self.shared.sessions.lock().active_count()
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.shared.ctx
    }
}

// ---------------------------------------------------------------------------
// World loop
// ---------------------------------------------------------------------------

async fn run_world_loop(shared: Arc<Shared>, mut maps: MapManager) {
    let mut scheduler = TickScheduler::new(shared.config.world_tick());
    info!(rate_hz = shared.config.world_tick_hz, "world loop started");

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            tick = scheduler.wait_for_tick() => {
                update_world(&shared, &mut maps, tick.elapsed).await;
                scheduler.end_update();
            }
        }
    }

    let sessions = shared.sessions.lock().snapshot();
    info!(sessions = sessions.len(), "world loop stopping, destroying sessions");
    for session in sessions {
        session.kick("server shutting down");
        session.destroy();
        shared.sessions.lock().remove(session.id());
        maps.forget(session.id()).await;
    }
    maps.shutdown_all().await;
    let stats = scheduler.stats();
    info!(
        ticks = stats.ticks,
        late_ticks = stats.late_ticks,
        missed_slots = stats.missed_slots,
        slowest_ms = stats.slowest_update.as_millis() as u64,
        "world loop stopped"
    );
}

/// One world update: admits queued sessions, updates every session, drops
/// destroyed ones and moves the rest onto the right map worker.
async fn update_world(shared: &Shared, maps: &mut MapManager, elapsed: Duration) {
    let admitted = shared.sessions.lock().admit_queued();
    for session in admitted {
        session.send_frame(ConnectionTag::Primary, ServerFrame::Admitted);
    }

    let now = Instant::now();
    let sessions = shared.sessions.lock().snapshot();
    for session in sessions {
        match session.update_world(elapsed, now) {
            UpdateStatus::Destroyed => {
                shared.sessions.lock().remove(session.id());
                maps.forget(session.id()).await;
            }
            UpdateStatus::Keep => {
                if let Err(err) = maps.place(&session).await {
                    warn!(session = %session.id(), error = %err, "map placement failed");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Immediate loop
// ---------------------------------------------------------------------------

/// Drains Immediate queues as soon as the dispatcher signals a new packet,
/// and at least every `immediate_max_wait` otherwise.
async fn run_immediate_loop(shared: Arc<Shared>) {
    let max_wait = shared.ctx.config().immediate_max_wait();
    info!(max_wait_ms = max_wait.as_millis() as u64, "immediate loop started");

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = time::timeout(max_wait, shared.ctx.immediate_signal().notified()) => {}
        }

        let now = Instant::now();
        let sessions = shared.sessions.lock().snapshot();
        let mut backlog = false;
        for session in sessions {
            if session.queued(ProcessingCategory::Immediate) > 0 {
                session.drain_immediate(now);
                backlog |= session.queued(ProcessingCategory::Immediate) > 0;
            }
        }
        // A capped drain left packets behind; go again without waiting.
        if backlog {
            shared.ctx.immediate_signal().notify_one();
            tokio::task::yield_now().await;
        }
    }
    info!("immediate loop stopped");
}
