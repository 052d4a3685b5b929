//! Map worker: an isolated Tokio task that updates one map.
//!
//! Each map runs in its own task and owns the set of sessions whose
//! players are on it. Once per map tick it drains every hosted session's
//! MapTick queue. The outside world talks to it through a bounded command
//! channel, never through shared state.
//!
//! A worker re-checks each session before draining it. Sessions that were
//! destroyed, logged out, or started a relocation are dropped from the
//! worker on the spot, so a MapTick queue is never drained here while the
//! world loop is responsible for it.

use std::collections::HashMap;
use std::sync::Arc;

use realmgate_protocol::MapId;
use realmgate_session::{Session, SessionId};
use realmgate_tick::{TickInfo, TickScheduler};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::{MapConfig, MapError};

/// Commands sent to a map worker through its channel.
///
/// Variants carrying a `oneshot::Sender` are requests: the caller waits
/// for the worker's answer on it.
pub(crate) enum MapCommand {
    AddSession {
        session: Arc<Session>,
        reply: oneshot::Sender<Result<(), MapError>>,
    },

    RemoveSession {
        id: SessionId,
        reply: oneshot::Sender<Result<(), MapError>>,
    },

    GetInfo {
        reply: oneshot::Sender<MapInfo>,
    },

    Shutdown,
}

/// A snapshot of a worker's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapInfo {
    pub map_id: MapId,
    /// Sessions currently hosted.
    pub sessions: usize,
    /// Map updates run so far.
    pub ticks: u64,
    /// Updates that woke up behind schedule.
    pub late_ticks: u64,
    /// Handlers invoked across all updates.
    pub packets_handled: u64,
    /// Handlers that failed across all updates.
    pub packets_failed: u64,
}

/// Handle to a running map worker.
///
/// Cheap to clone: it only wraps the command sender.
#[derive(Debug, Clone)]
pub struct MapHandle {
    map_id: MapId,
    sender: mpsc::Sender<MapCommand>,
}

impl MapHandle {
    pub fn map_id(&self) -> MapId {
        self.map_id
    }

    /// `true` once the worker has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Hands a session to the worker. Its MapTick queue is drained from
    /// the next map update on.
    pub async fn add_session(&self, session: Arc<Session>) -> Result<(), MapError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(MapCommand::AddSession {
                session,
                reply: reply_tx,
            })
            .await
            .map_err(|_| MapError::Unavailable(self.map_id))?;
        reply_rx
            .await
            .map_err(|_| MapError::Unavailable(self.map_id))?
    }

    pub async fn remove_session(&self, id: SessionId) -> Result<(), MapError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(MapCommand::RemoveSession { id, reply: reply_tx })
            .await
            .map_err(|_| MapError::Unavailable(self.map_id))?;
        reply_rx
            .await
            .map_err(|_| MapError::Unavailable(self.map_id))?
    }

    pub async fn info(&self) -> Result<MapInfo, MapError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(MapCommand::GetInfo { reply: reply_tx })
            .await
            .map_err(|_| MapError::Unavailable(self.map_id))?;
        reply_rx
            .await
            .map_err(|_| MapError::Unavailable(self.map_id))
    }

    /// Tells the worker to stop after the command it is processing.
    pub async fn shutdown(&self) -> Result<(), MapError> {
        self.sender
            .send(MapCommand::Shutdown)
            .await
            .map_err(|_| MapError::Unavailable(self.map_id))
    }
}

/// The worker state. Runs inside a Tokio task.
struct MapWorker {
    map_id: MapId,
    sessions: HashMap<SessionId, Arc<Session>>,
    scheduler: TickScheduler,
    receiver: mpsc::Receiver<MapCommand>,
    packets_handled: u64,
    packets_failed: u64,
}

impl MapWorker {
    async fn run(mut self) {
        info!(map = %self.map_id, "map worker started");

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else {
                        break;
                    };
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
                tick = self.scheduler.wait_for_tick() => {
                    self.update(tick);
                    self.scheduler.end_update();
                }
            }
        }

        let stats = self.scheduler.stats();
        info!(
            map = %self.map_id,
            sessions = self.sessions.len(),
            ticks = stats.ticks,
            late_ticks = stats.late_ticks,
            slowest_ms = stats.slowest_update.as_millis() as u64,
            "map worker stopped"
        );
    }

    /// Returns `false` when the worker should stop.
    fn handle_command(&mut self, cmd: MapCommand) -> bool {
        match cmd {
            MapCommand::AddSession { session, reply } => {
                let _ = reply.send(self.add_session(session));
            }
            MapCommand::RemoveSession { id, reply } => {
                let result = match self.sessions.remove(&id) {
                    Some(_) => {
                        debug!(map = %self.map_id, session = %id, "session removed from map");
                        Ok(())
                    }
                    None => Err(MapError::NotOnMap(id, self.map_id)),
                };
                let _ = reply.send(result);
            }
            MapCommand::GetInfo { reply } => {
                let _ = reply.send(self.info());
            }
            MapCommand::Shutdown => {
                info!(map = %self.map_id, "map shutting down");
                return false;
            }
        }
        true
    }

    fn add_session(&mut self, session: Arc<Session>) -> Result<(), MapError> {
        let id = session.id();
        if self.sessions.contains_key(&id) {
            return Err(MapError::AlreadyOnMap(id, self.map_id));
        }
        self.sessions.insert(id, session);
        debug!(
            map = %self.map_id,
            session = %id,
            sessions = self.sessions.len(),
            "session added to map"
        );
        Ok(())
    }

    /// One map update: drains the MapTick queue of every session still
    /// assigned to this map.
    fn update(&mut self, tick: TickInfo) {
        let map_id = self.map_id;
        let now = Instant::now();
        let mut handled = 0;
        let mut failed = 0;

        self.sessions.retain(|id, session| {
            if session.is_destroyed() || session.map_assignment() != Some(map_id) {
                debug!(map = %map_id, session = %id, "session no longer on this map");
                return false;
            }
            let report = session.update_map(now);
            handled += report.handled as u64;
            failed += report.failed as u64;
            true
        });

        self.packets_handled += handled;
        self.packets_failed += failed;
        trace!(
            map = %map_id,
            tick = tick.tick,
            sessions = self.sessions.len(),
            handled,
            "map updated"
        );
    }

    fn info(&self) -> MapInfo {
        MapInfo {
            map_id: self.map_id,
            sessions: self.sessions.len(),
            ticks: self.scheduler.stats().ticks,
            late_ticks: self.scheduler.stats().late_ticks,
            packets_handled: self.packets_handled,
            packets_failed: self.packets_failed,
        }
    }
}

/// Spawns a worker task for `map_id` and returns its handle.
pub(crate) fn spawn_map(map_id: MapId, config: &MapConfig) -> MapHandle {
    let (tx, rx) = mpsc::channel(config.command_buffer);

    let worker = MapWorker {
        map_id,
        sessions: HashMap::new(),
        scheduler: TickScheduler::new(config.tick.clone()),
        receiver: rx,
        packets_handled: 0,
        packets_failed: 0,
    };

    tokio::spawn(worker.run());

    MapHandle { map_id, sender: tx }
}
