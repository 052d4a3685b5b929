//! Process-wide, read-only state every session shares.

use std::collections::HashMap;
use std::sync::Arc;

use realmgate_protocol::Opcode;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::{HandlerEntry, OpcodeRegistry, SessionConfig, SessionServices};

/// Registry, config and collaborators, built once and handed to each
/// [`Session`](crate::Session) as an `Arc`.
#[derive(Debug)]
pub struct SessionContext {
    registry: Arc<OpcodeRegistry>,
    config: SessionConfig,
    limits: HashMap<Opcode, u32>,
    services: SessionServices,
    epoch: Instant,
    immediate: Notify,
}

impl SessionContext {
    pub fn new(
        registry: Arc<OpcodeRegistry>,
        config: SessionConfig,
        services: SessionServices,
    ) -> Arc<Self> {
        let config = config.validated();
        let limits = config.limit_table();
        Arc::new(Self {
            registry,
            config,
            limits,
            services,
            epoch: Instant::now(),
            immediate: Notify::new(),
        })
    }

    pub fn registry(&self) -> &OpcodeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn services(&self) -> &SessionServices {
        &self.services
    }

    /// Wake-up for the immediate loop; notified on every `Immediate`
    /// enqueue. A notification with no waiter is kept for the next one.
    pub fn immediate_signal(&self) -> &Notify {
        &self.immediate
    }

    /// Milliseconds since the context was created; the clock sent to
    /// clients.
    pub fn server_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_millis() as u64
    }

    /// Whole seconds since the context was created; the throttle window.
    pub(crate) fn second(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_secs()
    }

    /// Configured limit, else the registry's, else unlimited.
    pub(crate) fn effective_limit(&self, opcode: Opcode, entry: &HandlerEntry) -> Option<u32> {
        self.limits.get(&opcode).copied().or(entry.rate_limit)
    }
}
