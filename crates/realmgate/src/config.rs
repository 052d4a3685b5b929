//! Server configuration, loaded from TOML.
//!
//! Every field has a default, so a config file only lists what it
//! changes:
//!
//! ```toml
//! bind_addr = "0.0.0.0:8085"
//! max_active_sessions = 2000
//!
//! [session]
//! idle_timeout_secs = 600
//! abuse_policy = "kick"
//! max_packets_per_opcode_per_second = [
//!     { opcode = 0x01DC, max_per_second = 20 },
//! ]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use realmgate_map::MapConfig;
use realmgate_session::SessionConfig;
use realmgate_tick::TickConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Rate of the world loop (WorldTick drain, timers, destruction).
    pub world_tick_hz: u32,
    /// Rate of every map worker (MapTick drain).
    pub map_tick_hz: u32,
    /// Sessions allowed past the login queue. 0 means unlimited.
    pub max_active_sessions: usize,
    /// How long a new connection has to send its first frame.
    pub handshake_timeout_secs: u64,
    /// Default filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub log_json: bool,
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8085".to_string(),
            world_tick_hz: 20,
            map_tick_hz: 20,
            max_active_sessions: 0,
            handshake_timeout_secs: 5,
            log_level: "info".to_string(),
            log_json: false,
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        Ok(config.validated())
    }

    /// Clamps out-of-range values so the config is safe to use.
    pub fn validated(mut self) -> Self {
        for (name, rate) in [
            ("world_tick_hz", &mut self.world_tick_hz),
            ("map_tick_hz", &mut self.map_tick_hz),
        ] {
            let clamped = (*rate).clamp(1, TickConfig::MAX_TICK_RATE_HZ);
            if clamped != *rate {
                warn!(field = name, rate = *rate, clamped, "tick rate out of range, clamping");
                *rate = clamped;
            }
        }
        if self.handshake_timeout_secs == 0 {
            warn!("handshake_timeout_secs of 0 is not allowed, using 5");
            self.handshake_timeout_secs = 5;
        }
        self.session = self.session.validated();
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn world_tick(&self) -> TickConfig {
        TickConfig::with_rate(self.world_tick_hz)
    }

    pub fn map_config(&self) -> MapConfig {
        MapConfig::with_rate(self.map_tick_hz)
    }
}

#[cfg(test)]
mod tests {
    use realmgate_protocol::Opcode;
    use realmgate_session::AbusePolicy;

    use super::*;

    #[test]
    fn test_from_toml_str_empty_uses_defaults() {
        let config = ServerConfig::from_toml_str("").unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8085");
        assert_eq!(config.world_tick_hz, 20);
        assert_eq!(config.session.packets_per_drain_cap, 100);
    }

    #[test]
    fn test_from_toml_str_reads_session_table() {
        let config = ServerConfig::from_toml_str(
            r#"
            bind_addr = "0.0.0.0:9000"
            max_active_sessions = 2

            [session]
            abuse_policy = "kick"
            idle_timeout_secs = 30
            max_packets_per_opcode_per_second = [
                { opcode = 0x01DC, max_per_second = 20 },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.max_active_sessions, 2);
        assert_eq!(config.session.abuse_policy, AbusePolicy::Kick);
        assert_eq!(config.session.idle_timeout_secs, 30);
        assert_eq!(config.session.limit_table().get(&Opcode(0x01DC)), Some(&20));
    }

    #[test]
    fn test_from_toml_str_bad_type_is_parse_error() {
        let err = ServerConfig::from_toml_str("world_tick_hz = \"fast\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validated_clamps_tick_rates() {
        let config = ServerConfig {
            world_tick_hz: 0,
            map_tick_hz: 1_000,
            handshake_timeout_secs: 0,
            ..Default::default()
        }
        .validated();
        assert_eq!(config.world_tick_hz, 1);
        assert_eq!(config.map_tick_hz, TickConfig::MAX_TICK_RATE_HZ);
        assert_eq!(config.handshake_timeout_secs, 5);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = ServerConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
