//! Map manager: spawns map workers and keeps each session on the worker
//! of the map its player is on.

use std::collections::HashMap;
use std::sync::Arc;

use realmgate_protocol::MapId;
use realmgate_session::{Session, SessionId};
use tracing::{debug, info};

use crate::worker::spawn_map;
use crate::{MapConfig, MapError, MapHandle, MapInfo};

/// All running map workers and the session → map placement index.
///
/// Owned by the world loop. After each session update the loop calls
/// [`place`](Self::place), which moves the session to whatever map its
/// player is on now (or takes it off every map).
///
/// A session is on at most one map worker at a time.
pub struct MapManager {
    config: MapConfig,
    maps: HashMap<MapId, MapHandle>,
    placements: HashMap<SessionId, MapId>,
}

impl MapManager {
    pub fn new(config: MapConfig) -> Self {
        Self {
            config: config.validated(),
            maps: HashMap::new(),
            placements: HashMap::new(),
        }
    }

    /// Returns the worker for `map_id`, spawning it on first use.
    pub fn spawn_map(&mut self, map_id: MapId) -> MapHandle {
        if let Some(handle) = self.maps.get(&map_id).filter(|handle| !handle.is_closed()) {
            return handle.clone();
        }
        let handle = spawn_map(map_id, &self.config);
        self.maps.insert(map_id, handle.clone());
        info!(map = %map_id, "map worker spawned");
        handle
    }

    /// Reconciles the session's placement with its current map assignment.
    /// Returns the map the session is on afterwards.
    pub async fn place(&mut self, session: &Arc<Session>) -> Result<Option<MapId>, MapError> {
        let id = session.id();
        let desired = if session.is_destroyed() {
            None
        } else {
            session.map_assignment()
        };
        let current = self.placements.get(&id).copied();
        if desired == current {
            return Ok(current);
        }

        if let Some(old) = current {
            self.detach(id, old).await;
        }

        let Some(map_id) = desired else {
            return Ok(None);
        };
        let handle = self.spawn_map(map_id);
        match handle.add_session(Arc::clone(session)).await {
            Ok(()) | Err(MapError::AlreadyOnMap(..)) => {}
            Err(err) => return Err(err),
        }
        self.placements.insert(id, map_id);
        debug!(session = %id, map = %map_id, "session placed on map");
        Ok(Some(map_id))
    }

    /// Takes a session off its map, if it is on one.
    pub async fn forget(&mut self, id: SessionId) {
        if let Some(map_id) = self.placements.get(&id).copied() {
            self.detach(id, map_id).await;
        }
    }

    async fn detach(&mut self, id: SessionId, map_id: MapId) {
        self.placements.remove(&id);
        let Some(handle) = self.maps.get(&map_id) else {
            return;
        };
        // The worker drops sessions that left the map on its own; it may
        // have done so already.
        if let Err(err) = handle.remove_session(id).await {
            debug!(session = %id, map = %map_id, error = %err, "session already off map");
        }
    }

    /// The map a session is currently placed on.
    pub fn placement(&self, id: SessionId) -> Option<MapId> {
        self.placements.get(&id).copied()
    }

    pub async fn map_info(&self, map_id: MapId) -> Result<MapInfo, MapError> {
        let handle = self.maps.get(&map_id).ok_or(MapError::NotFound(map_id))?;
        handle.info().await
    }

    /// Stops one worker and forgets the sessions placed on it.
    pub async fn shutdown_map(&mut self, map_id: MapId) -> Result<(), MapError> {
        let handle = self.maps.remove(&map_id).ok_or(MapError::NotFound(map_id))?;
        let _ = handle.shutdown().await;
        self.placements.retain(|_, placed| *placed != map_id);
        info!(map = %map_id, "map worker shut down");
        Ok(())
    }

    /// Stops every worker.
    pub async fn shutdown_all(&mut self) {
        for (_, handle) in self.maps.drain() {
            let _ = handle.shutdown().await;
        }
        self.placements.clear();
    }

    pub fn map_count(&self) -> usize {
        self.maps.len()
    }

    pub fn map_ids(&self) -> Vec<MapId> {
        self.maps.keys().copied().collect()
    }
}
