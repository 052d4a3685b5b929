//! Pipeline configuration.
//!
//! [`SessionConfig`] is read once at startup, validated, and shared by every
//! session through the [`SessionContext`](crate::SessionContext). All fields
//! have defaults, so a config file only needs the keys it changes.

use std::collections::HashMap;
use std::time::Duration;

use realmgate_protocol::Opcode;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// What the anti-abuse guard does with a packet over its opcode's limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbusePolicy {
    /// Let the packet through and log a warning.
    #[default]
    Log,
    /// Drop the packet and close the primary connection.
    Kick,
    /// Drop the packet, issue a ban and close the primary connection.
    Ban,
}

/// Who a throttle ban applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanScope {
    #[default]
    Account,
    /// The attached player; falls back to the account when none is attached.
    Character,
    Ip,
}

/// Per-opcode packet-rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpcodeLimit {
    pub opcode: Opcode,
    pub max_per_second: u32,
}

/// Configuration for the session pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Throttle limits. Opcodes without an entry fall back to the rate
    /// limit declared in the opcode registry, or are unlimited.
    pub max_packets_per_opcode_per_second: Vec<OpcodeLimit>,
    pub abuse_policy: AbusePolicy,
    pub ban_duration_secs: u64,
    pub ban_scope: BanScope,
    /// Silence on the primary connection for this long closes it.
    pub idle_timeout_secs: u64,
    /// Maximum packets a single drain call takes from one queue.
    pub packets_per_drain_cap: usize,
    /// Number of classification workers.
    pub classification_parallelism: usize,
    /// Longest the immediate loop sleeps without a wake-up.
    pub immediate_max_wait_ms: u64,
    pub logout_delay_secs: u64,
    /// How long a session with both connections closed lingers before
    /// it is destroyed.
    pub expiry_grace_secs: u64,
    pub save_on_logout: bool,
    pub time_sync_first_secs: u64,
    pub time_sync_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_packets_per_opcode_per_second: Vec::new(),
            abuse_policy: AbusePolicy::default(),
            ban_duration_secs: 86_400,
            ban_scope: BanScope::default(),
            idle_timeout_secs: 900,
            packets_per_drain_cap: 100,
            classification_parallelism: 10,
            immediate_max_wait_ms: 500,
            logout_delay_secs: 20,
            expiry_grace_secs: 60,
            save_on_logout: true,
            time_sync_first_secs: 5,
            time_sync_interval_secs: 10,
        }
    }
}

impl SessionConfig {
    /// Clamps values that would stall the pipeline.
    pub fn validated(mut self) -> Self {
        if self.packets_per_drain_cap == 0 {
            warn!("packets_per_drain_cap of 0 would never drain, using 1");
            self.packets_per_drain_cap = 1;
        }
        if self.classification_parallelism == 0 {
            warn!("classification_parallelism of 0 is not allowed, using 1");
            self.classification_parallelism = 1;
        }
        if self.immediate_max_wait_ms == 0 {
            warn!("immediate_max_wait_ms of 0 would spin, using 1");
            self.immediate_max_wait_ms = 1;
        }
        if self.time_sync_first_secs == 0 || self.time_sync_interval_secs == 0 {
            warn!(
                first = self.time_sync_first_secs,
                interval = self.time_sync_interval_secs,
                "time sync intervals must be at least 1 second"
            );
            self.time_sync_first_secs = self.time_sync_first_secs.max(1);
            self.time_sync_interval_secs = self.time_sync_interval_secs.max(1);
        }
        self
    }

    /// Builds the opcode → limit lookup. A repeated opcode keeps its last
    /// entry.
    pub fn limit_table(&self) -> HashMap<Opcode, u32> {
        let mut table = HashMap::with_capacity(self.max_packets_per_opcode_per_second.len());
        for limit in &self.max_packets_per_opcode_per_second {
            if let Some(previous) = table.insert(limit.opcode, limit.max_per_second) {
                warn!(
                    opcode = %limit.opcode,
                    previous,
                    current = limit.max_per_second,
                    "duplicate throttle limit, keeping the last one"
                );
            }
        }
        table
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn logout_delay(&self) -> Duration {
        Duration::from_secs(self.logout_delay_secs)
    }

    pub fn expiry_grace(&self) -> Duration {
        Duration::from_secs(self.expiry_grace_secs)
    }

    pub fn immediate_max_wait(&self) -> Duration {
        Duration::from_millis(self.immediate_max_wait_ms)
    }
}
