//! Handlers for the opcodes the session layer owns itself: the time-sync
//! response and the logout request/cancel pair.

use realmgate_protocol::{Opcode, ProcessingCategory, ProtocolStatus};
use tokio::time::Instant;

use crate::{HandlerEntry, OpcodeRegistryBuilder, PayloadReader};

/// Opcode numbers for the built-in handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOpcodes {
    /// Payload: `u32` counter, `u64` client clock in milliseconds.
    pub time_sync_response: Opcode,
    pub logout_request: Opcode,
    pub logout_cancel: Opcode,
}

impl Default for SessionOpcodes {
    fn default() -> Self {
        Self {
            time_sync_response: Opcode(0x0013),
            logout_request: Opcode(0x004B),
            logout_cancel: Opcode(0x004E),
        }
    }
}

impl OpcodeRegistryBuilder {
    /// Registers the built-in session handlers under `opcodes`.
    pub fn with_session_handlers(self, opcodes: SessionOpcodes) -> Self {
        self.register(
            opcodes.time_sync_response,
            HandlerEntry::new(
                "time_sync_response",
                ProcessingCategory::Immediate,
                ProtocolStatus::Authed,
                |session, packet| {
                    let mut reader = PayloadReader::new(packet.payload());
                    let counter = reader.read_u32()?;
                    let client_ms = reader.read_u64()?;
                    reader.finish()?;
                    session.handle_time_sync(counter, client_ms)?;
                    Ok(())
                },
            ),
        )
        .register(
            opcodes.logout_request,
            HandlerEntry::new(
                "logout_request",
                ProcessingCategory::WorldTick,
                ProtocolStatus::LoggedIn,
                |session, _packet| {
                    session.request_logout(Instant::now());
                    Ok(())
                },
            ),
        )
        .register(
            opcodes.logout_cancel,
            HandlerEntry::new(
                "logout_cancel",
                ProcessingCategory::WorldTick,
                ProtocolStatus::LoggedIn,
                |session, _packet| {
                    session.cancel_logout_request();
                    Ok(())
                },
            ),
        )
    }
}
