//! Error types for the map layer.

use realmgate_protocol::MapId;
use realmgate_session::SessionId;

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("map {0} has no worker")]
    NotFound(MapId),

    #[error("session {0} is already on map {1}")]
    AlreadyOnMap(SessionId, MapId),

    #[error("session {0} is not on map {1}")]
    NotOnMap(SessionId, MapId),

    /// The worker's command channel is closed (it has shut down).
    #[error("map {0} is unavailable")]
    Unavailable(MapId),
}
