//! Per-map update workers for Realmgate.
//!
//! Every map with players on it runs as an isolated Tokio task (actor
//! model) on its own [`TickScheduler`](realmgate_tick::TickScheduler).
//! Once per map update it drains the MapTick queue of each session whose
//! player is on that map. Maps update concurrently with each other and
//! with the world loop.
//!
//! # Key types
//!
//! - [`MapManager`]: spawns workers, places sessions on them
//! - [`MapHandle`]: send commands to a running worker
//! - [`MapInfo`]: counters reported by a worker
//! - [`MapConfig`]: tick rate and channel size

mod config;
mod error;
mod manager;
mod worker;

pub use config::MapConfig;
pub use error::MapError;
pub use manager::MapManager;
pub use worker::{MapHandle, MapInfo};
