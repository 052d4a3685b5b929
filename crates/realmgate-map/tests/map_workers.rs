//! Integration tests for map workers and session placement.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use realmgate_map::{MapConfig, MapError, MapManager};
use realmgate_protocol::{
    AccountId, ConnectionTag, MapId, Opcode, PlayerGuid, ProcessingCategory, ProtocolStatus,
};
use realmgate_session::{
    AccountIdentity, HandlerEntry, InboundFrame, OpcodeRegistry, Outbound, Session, SessionConfig,
    SessionContext, SessionId, SessionServices, SocketHandle,
};
use realmgate_tick::TickConfig;
use realmgate_transport::ConnectionId;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

const MAP_OP: Opcode = Opcode(0x0200);

// =========================================================================
// Helpers
// =========================================================================

fn manager() -> MapManager {
    MapManager::new(MapConfig {
        tick: TickConfig::with_rate(20),
        command_buffer: 8,
    })
}

/// A context whose only handler counts MapTick packets.
fn counting_context() -> (Arc<SessionContext>, Arc<AtomicUsize>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&counter);
    let registry = OpcodeRegistry::builder()
        .register(
            MAP_OP,
            HandlerEntry::new(
                "map_move",
                ProcessingCategory::MapTick,
                ProtocolStatus::LoggedIn,
                move |_, _| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            ),
        )
        .build();
    let ctx = SessionContext::new(registry, SessionConfig::default(), SessionServices::default());
    (ctx, counter)
}

fn session_on_map(
    ctx: &Arc<SessionContext>,
    id: u64,
    map: MapId,
) -> (Arc<Session>, UnboundedReceiver<Outbound>) {
    let identity = AccountIdentity {
        account: AccountId(id as u32),
        security_level: 0,
        locale: "enUS".into(),
        remote_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40_000),
    };
    let session = Arc::new(Session::new(SessionId(id), identity, Arc::clone(ctx)));
    let (socket, rx) = SocketHandle::new(ConnectionId::new(id));
    session.attach_socket(ConnectionTag::Primary, socket);
    session.attach_player(PlayerGuid(id), map).unwrap();
    (session, rx)
}

fn send_map_packet(session: &Session) {
    session.accept_frame(
        InboundFrame {
            opcode: MAP_OP,
            tag: ConnectionTag::Primary,
            payload: Vec::new(),
        },
        Instant::now(),
    );
}

async fn a_few_map_ticks() {
    tokio::time::sleep(Duration::from_millis(120)).await;
}

// =========================================================================
// Draining
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_place_session_map_worker_drains_map_queue() {
    let (ctx, counter) = counting_context();
    let (session, _rx) = session_on_map(&ctx, 1, MapId(1));
    let mut maps = manager();

    assert_eq!(maps.place(&session).await.unwrap(), Some(MapId(1)));
    for _ in 0..3 {
        send_map_packet(&session);
    }
    a_few_map_ticks().await;

    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(session.queued(ProcessingCategory::MapTick), 0);

    let info = maps.map_info(MapId(1)).await.unwrap();
    assert_eq!(info.sessions, 1);
    assert_eq!(info.packets_handled, 3);
    assert!(info.ticks >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_place_same_map_twice_is_stable() {
    let (ctx, _counter) = counting_context();
    let (session, _rx) = session_on_map(&ctx, 1, MapId(1));
    let mut maps = manager();

    maps.place(&session).await.unwrap();
    maps.place(&session).await.unwrap();

    assert_eq!(maps.map_count(), 1);
    assert_eq!(maps.map_info(MapId(1)).await.unwrap().sessions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_place_without_player_spawns_nothing() {
    let (ctx, _counter) = counting_context();
    let (session, _rx) = session_on_map(&ctx, 1, MapId(1));
    session.logout();
    let mut maps = manager();

    assert_eq!(maps.place(&session).await.unwrap(), None);
    assert_eq!(maps.map_count(), 0);
}

// =========================================================================
// Transfers and departures
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_transfer_moves_session_between_workers() {
    let (ctx, counter) = counting_context();
    let (session, _rx) = session_on_map(&ctx, 1, MapId(1));
    let mut maps = manager();
    maps.place(&session).await.unwrap();

    // While relocating, no map worker drains the session.
    session.begin_transfer(MapId(2)).unwrap();
    send_map_packet(&session);
    a_few_map_ticks().await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(maps.map_info(MapId(1)).await.unwrap().sessions, 0);

    assert_eq!(maps.place(&session).await.unwrap(), None);
    assert_eq!(maps.placement(session.id()), None);

    session.complete_transfer().unwrap();
    assert_eq!(maps.place(&session).await.unwrap(), Some(MapId(2)));
    a_few_map_ticks().await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(maps.map_count(), 2);
    assert_eq!(maps.map_info(MapId(2)).await.unwrap().sessions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_destroyed_session_dropped_by_worker() {
    let (ctx, counter) = counting_context();
    let (session, _rx) = session_on_map(&ctx, 1, MapId(1));
    let mut maps = manager();
    maps.place(&session).await.unwrap();

    send_map_packet(&session);
    session.destroy();
    a_few_map_ticks().await;

    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(maps.map_info(MapId(1)).await.unwrap().sessions, 0);
    assert_eq!(maps.place(&session).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_forget_removes_session_from_worker() {
    let (ctx, _counter) = counting_context();
    let (a, _rx_a) = session_on_map(&ctx, 1, MapId(1));
    let (b, _rx_b) = session_on_map(&ctx, 2, MapId(1));
    let mut maps = manager();
    maps.place(&a).await.unwrap();
    maps.place(&b).await.unwrap();

    maps.forget(a.id()).await;

    assert_eq!(maps.placement(a.id()), None);
    assert_eq!(maps.placement(b.id()), Some(MapId(1)));
    assert_eq!(maps.map_info(MapId(1)).await.unwrap().sessions, 1);
}

// =========================================================================
// Shutdown and lookups
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_map_info_unknown_map_not_found() {
    let maps = manager();
    assert!(matches!(
        maps.map_info(MapId(7)).await,
        Err(MapError::NotFound(MapId(7)))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_all_stops_workers() {
    let mut maps = manager();
    let handle = maps.spawn_map(MapId(1));
    maps.spawn_map(MapId(2));

    maps.shutdown_all().await;

    assert_eq!(maps.map_count(), 0);
    assert!(matches!(handle.info().await, Err(MapError::Unavailable(_))));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_map_clears_placements() {
    let (ctx, _counter) = counting_context();
    let (session, _rx) = session_on_map(&ctx, 1, MapId(3));
    let mut maps = manager();
    maps.place(&session).await.unwrap();

    maps.shutdown_map(MapId(3)).await.unwrap();

    assert_eq!(maps.placement(session.id()), None);
    assert!(maps.shutdown_map(MapId(3)).await.is_err());

    // Placing again brings a fresh worker up.
    assert_eq!(maps.place(&session).await.unwrap(), Some(MapId(3)));
}
