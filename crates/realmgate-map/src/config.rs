//! Map worker configuration.

use realmgate_tick::TickConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Settings shared by every map worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Update clock of each worker.
    pub tick: TickConfig,
    /// Capacity of a worker's command channel. Senders wait when it is
    /// full.
    pub command_buffer: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            tick: TickConfig {
                // Maps spawned together should not wake in lockstep.
                start_jitter_ms: 20,
                ..TickConfig::default()
            },
            command_buffer: 64,
        }
    }
}

impl MapConfig {
    /// Map config ticking at `tick_rate_hz`.
    pub fn with_rate(tick_rate_hz: u32) -> Self {
        let mut config = Self::default();
        config.tick.tick_rate_hz = tick_rate_hz;
        config
    }

    pub fn validated(mut self) -> Self {
        self.tick = self.tick.validated();
        if self.command_buffer == 0 {
            warn!("map command_buffer of 0 is not allowed, using 1");
            self.command_buffer = 1;
        }
        self
    }
}
