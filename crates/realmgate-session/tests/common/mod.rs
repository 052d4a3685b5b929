//! Shared fixtures for the session integration tests: a recording
//! handler, hand-written fakes of the collaborator traits and session
//! builders.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use realmgate_protocol::{AccountId, ConnectionTag, MapId, Opcode, ProcessingCategory, ProtocolStatus};
use realmgate_session::{
    AccountIdentity, BanRequest, BanService, DetachStep, HandlerEntry, HookError, InboundFrame,
    OpcodeRegistry, Outbound, PlayerLink, Session, SessionConfig, SessionContext, SessionId,
    SessionServices, SocketHandle, WorldHooks,
};
use realmgate_transport::ConnectionId;
use tokio::sync::mpsc;

pub const WORLD_OP: Opcode = Opcode(0x0100);
pub const PLAYER_OP: Opcode = Opcode(0x0101);
pub const MAP_OP: Opcode = Opcode(0x0200);
pub const IMMEDIATE_OP: Opcode = Opcode(0x0300);
pub const TRANSFER_ACK_OP: Opcode = Opcode(0x0400);
pub const CHAR_LIST_OP: Opcode = Opcode(0x0500);
pub const SECONDARY_OP: Opcode = Opcode(0x0600);
pub const FAILING_OP: Opcode = Opcode(0x0700);
pub const PANIC_OP: Opcode = Opcode(0x0701);

// ---------------------------------------------------------------------------
// Recording handler
// ---------------------------------------------------------------------------

/// Every handler invocation, in order.
#[derive(Debug, Default)]
pub struct Recorder {
    calls: Mutex<Vec<(Opcode, u64)>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entry(
        self: &Arc<Self>,
        name: &'static str,
        category: ProcessingCategory,
        status: ProtocolStatus,
    ) -> HandlerEntry {
        let recorder = Arc::clone(self);
        HandlerEntry::new(name, category, status, move |_session, packet| {
            recorder.calls.lock().push((packet.opcode(), packet.seq()));
            Ok(())
        })
    }

    pub fn calls(&self) -> Vec<(Opcode, u64)> {
        self.calls.lock().clone()
    }

    pub fn seqs(&self, opcode: Opcode) -> Vec<u64> {
        self.calls
            .lock()
            .iter()
            .filter(|(op, _)| *op == opcode)
            .map(|(_, seq)| *seq)
            .collect()
    }

    pub fn count(&self, opcode: Opcode) -> usize {
        self.seqs(opcode).len()
    }
}

/// A registry covering every category and status, all handlers recording
/// into `recorder`.
pub fn standard_registry(recorder: &Arc<Recorder>) -> Arc<OpcodeRegistry> {
    use ProcessingCategory::*;
    use ProtocolStatus::*;

    OpcodeRegistry::builder()
        .register(WORLD_OP, recorder.entry("world", WorldTick, Authed))
        .register(PLAYER_OP, recorder.entry("player", WorldTick, LoggedIn))
        .register(MAP_OP, recorder.entry("map", MapTick, LoggedIn))
        .register(IMMEDIATE_OP, recorder.entry("immediate", Immediate, Authed))
        .register(TRANSFER_ACK_OP, recorder.entry("transfer_ack", WorldTick, Transfer))
        .register(
            CHAR_LIST_OP,
            recorder.entry("char_list", WorldTick, Authed).clears_recent_logout(),
        )
        .register(
            SECONDARY_OP,
            recorder
                .entry("secondary", WorldTick, Authed)
                .on_connection(ConnectionTag::Secondary),
        )
        .register(
            FAILING_OP,
            HandlerEntry::new("failing", WorldTick, Authed, |_, _| {
                Err(realmgate_session::HandlerError::Rejected("nope".into()))
            }),
        )
        .register(
            PANIC_OP,
            HandlerEntry::new("panicking", WorldTick, Authed, |_, _| panic!("handler bug")),
        )
        .build()
}

// ---------------------------------------------------------------------------
// Collaborator fakes
// ---------------------------------------------------------------------------

/// Records every hook call as a string, optionally failing some.
#[derive(Debug, Default)]
pub struct RecordingWorld {
    events: Mutex<Vec<String>>,
    pub failing_steps: Vec<DetachStep>,
    pub fail_relocation: AtomicBool,
}

impl RecordingWorld {
    pub fn failing_steps(steps: Vec<DetachStep>) -> Self {
        Self {
            failing_steps: steps,
            ..Default::default()
        }
    }

    pub fn failing_relocation() -> Self {
        Self {
            fail_relocation: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }

    fn push(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl WorldHooks for RecordingWorld {
    fn complete_relocation(&self, link: &PlayerLink) -> Result<MapId, HookError> {
        self.push(format!("relocate:{}", link.guid));
        if self.fail_relocation.load(Ordering::SeqCst) {
            return Err(HookError::new("complete_relocation", "map unavailable"));
        }
        Ok(link.transfer_to.unwrap_or(link.map))
    }

    fn detach(&self, _link: &PlayerLink, step: DetachStep) -> Result<(), HookError> {
        self.push(format!("detach:{step}"));
        if self.failing_steps.contains(&step) {
            return Err(HookError::new("detach", format!("{step} exploded")));
        }
        Ok(())
    }

    fn save_player(&self, link: &PlayerLink) -> Result<(), HookError> {
        self.push(format!("save:{}:{}", link.guid, link.map));
        Ok(())
    }

    fn remove_player(&self, link: &PlayerLink) -> Result<(), HookError> {
        self.push(format!("remove:{}", link.guid));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingBans {
    requests: Mutex<Vec<BanRequest>>,
}

impl RecordingBans {
    pub fn requests(&self) -> Vec<BanRequest> {
        self.requests.lock().clone()
    }
}

impl BanService for RecordingBans {
    fn issue_ban(&self, request: BanRequest) {
        self.requests.lock().push(request);
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

pub fn identity() -> AccountIdentity {
    AccountIdentity {
        account: AccountId(42),
        security_level: 0,
        locale: "enUS".into(),
        remote_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), 50_000),
    }
}

pub fn context(
    registry: Arc<OpcodeRegistry>,
    config: SessionConfig,
    services: SessionServices,
) -> Arc<SessionContext> {
    SessionContext::new(registry, config, services)
}

/// A session with a primary connection whose writer side is returned.
pub fn connected_session(ctx: &Arc<SessionContext>) -> (Arc<Session>, mpsc::UnboundedReceiver<Outbound>) {
    let session = Arc::new(Session::new(SessionId(1), identity(), Arc::clone(ctx)));
    let (socket, rx) = SocketHandle::new(ConnectionId::new(1));
    session.attach_socket(ConnectionTag::Primary, socket);
    (session, rx)
}

pub fn frame(opcode: Opcode) -> InboundFrame {
    InboundFrame {
        opcode,
        tag: ConnectionTag::Primary,
        payload: Vec::new(),
    }
}

pub fn frame_on(opcode: Opcode, tag: ConnectionTag) -> InboundFrame {
    InboundFrame {
        opcode,
        tag,
        payload: Vec::new(),
    }
}
