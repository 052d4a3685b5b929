//! A tiny realm on top of Realmgate: every account owns two generated
//! characters, can enter the world with one of them, move around and
//! teleport between maps. Handy for poking at the session pipeline with a
//! WebSocket client.
//!
//! ```text
//! cargo run -p echo-realm -- --bind 127.0.0.1:8085
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use realmgate::logging;
use realmgate::prelude::*;
use tracing::{error, info};

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

const CMSG_CHAR_ENUM: Opcode = Opcode(0x0037);
const SMSG_CHAR_ENUM: Opcode = Opcode(0x003B);
const CMSG_PLAYER_LOGIN: Opcode = Opcode(0x003D);
const SMSG_LOGIN_VERIFY_WORLD: Opcode = Opcode(0x0236);
const CMSG_WORLD_TELEPORT: Opcode = Opcode(0x0008);
const SMSG_NEW_WORLD: Opcode = Opcode(0x003E);
const MSG_MOVE_HEARTBEAT: Opcode = Opcode(0x00EE);
const CMSG_PING: Opcode = Opcode(0x01DC);
const SMSG_PONG: Opcode = Opcode(0x01DD);
const CMSG_QUERY_TIME: Opcode = Opcode(0x01CE);
const SMSG_QUERY_TIME_RESPONSE: Opcode = Opcode(0x01CF);

// ---------------------------------------------------------------------------
// Characters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct Character {
    guid: PlayerGuid,
    name: String,
    map: MapId,
}

/// Two characters per account, one on each starting map.
fn characters_for(account: AccountId) -> Vec<Character> {
    (1..=2u64)
        .map(|slot| Character {
            guid: PlayerGuid(u64::from(account.0) * 10 + slot),
            name: format!("Adventurer{}-{slot}", account.0),
            map: MapId(slot as u32 - 1),
        })
        .collect()
}

fn char_enum_payload(characters: &[Character]) -> Vec<u8> {
    let count = u8::try_from(characters.len()).unwrap_or(u8::MAX);
    characters
        .iter()
        .take(usize::from(count))
        .fold(PayloadWriter::new().put_u8(count), |writer, character| {
            writer
                .put_u64(character.guid.0)
                .put_string(&character.name)
                .put_u32(character.map.0)
        })
        .finish()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn handle_ping(session: &Session, packet: &Packet) -> Result<(), HandlerError> {
    let mut reader = PayloadReader::new(packet.payload());
    let sequence = reader.read_u32()?;
    reader.finish()?;
    session.send_packet(SMSG_PONG, PayloadWriter::new().put_u32(sequence).finish());
    Ok(())
}

fn handle_char_enum(session: &Session, _packet: &Packet) -> Result<(), HandlerError> {
    let characters = characters_for(session.account());
    session.send_packet(SMSG_CHAR_ENUM, char_enum_payload(&characters));
    Ok(())
}

fn handle_player_login(session: &Session, packet: &Packet) -> Result<(), HandlerError> {
    let mut reader = PayloadReader::new(packet.payload());
    let guid = PlayerGuid(reader.read_u64()?);
    reader.finish()?;

    let character = characters_for(session.account())
        .into_iter()
        .find(|character| character.guid == guid)
        .ok_or_else(|| HandlerError::Rejected(format!("{guid} is not on this account")))?;

    session.begin_login()?;
    session.attach_player(character.guid, character.map)?;
    session.send_packet(
        SMSG_LOGIN_VERIFY_WORLD,
        PayloadWriter::new().put_u32(character.map.0).finish(),
    );
    Ok(())
}

fn handle_world_teleport(session: &Session, packet: &Packet) -> Result<(), HandlerError> {
    let mut reader = PayloadReader::new(packet.payload());
    let destination = MapId(reader.read_u32()?);
    reader.finish()?;

    session.begin_transfer(destination)?;
    let map = session.complete_transfer()?;
    session.send_packet(SMSG_NEW_WORLD, PayloadWriter::new().put_u32(map.0).finish());
    Ok(())
}

/// Movement is map-local; the echo stands in for broadcasting to nearby
/// players.
fn handle_move(session: &Session, packet: &Packet) -> Result<(), HandlerError> {
    session.send_packet(MSG_MOVE_HEARTBEAT, packet.payload().to_vec());
    Ok(())
}

fn handle_query_time(session: &Session, _packet: &Packet) -> Result<(), HandlerError> {
    let delta = session.clock_delta_ms().unwrap_or(0);
    session.send_packet(
        SMSG_QUERY_TIME_RESPONSE,
        PayloadWriter::new().put_u64(delta as u64).finish(),
    );
    Ok(())
}

fn registry() -> Arc<OpcodeRegistry> {
    use ProcessingCategory::{Immediate, MapTick, WorldTick};
    use ProtocolStatus::{Authed, LoggedIn};

    OpcodeRegistry::builder()
        .with_session_handlers(SessionOpcodes::default())
        .register(
            CMSG_PING,
            HandlerEntry::new("ping", Immediate, Authed, handle_ping).rate_limit(10),
        )
        .register(
            CMSG_CHAR_ENUM,
            HandlerEntry::new("char_enum", WorldTick, Authed, handle_char_enum),
        )
        .register(
            CMSG_PLAYER_LOGIN,
            HandlerEntry::new("player_login", WorldTick, Authed, handle_player_login)
                .clears_recent_logout(),
        )
        .register(
            CMSG_WORLD_TELEPORT,
            HandlerEntry::new("world_teleport", WorldTick, LoggedIn, handle_world_teleport),
        )
        .register(
            MSG_MOVE_HEARTBEAT,
            HandlerEntry::new("move_heartbeat", MapTick, LoggedIn, handle_move).rate_limit(60),
        )
        .register(
            CMSG_QUERY_TIME,
            HandlerEntry::new("query_time", WorldTick, Authed, handle_query_time)
                .on_connection(ConnectionTag::Secondary),
        )
        .build()
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Accepts any numeric token as the account id. Development only.
struct DevAuthenticator;

impl Authenticator for DevAuthenticator {
    async fn authenticate(
        &self,
        token: &str,
        remote_addr: SocketAddr,
    ) -> Result<AccountIdentity, SessionError> {
        let id: u32 = token
            .parse()
            .map_err(|_| SessionError::AuthFailed("token must be a number".into()))?;
        Ok(AccountIdentity {
            account: AccountId(id),
            security_level: 0,
            locale: "enUS".into(),
            remote_addr,
        })
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(author, version, about = "Demo realm built on Realmgate")]
struct Args {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Overrides `bind_addr` from the config
    #[arg(short, long)]
    bind: Option<String>,
    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    logging::init(&config.log_level, config.log_json || args.json_logs)?;

    let server = RealmgateServerBuilder::new()
        .config(config)
        .registry(registry())
        .build(DevAuthenticator)
        .await?;
    info!(addr = %server.local_addr()?, "echo realm listening");

    let handle = server.handle();
    let running = tokio::spawn(server.run());

    tokio::signal::ctrl_c().await?;
    info!(sessions = handle.session_count(), "ctrl-c received, shutting down");
    handle.shutdown();

    match running.await {
        Ok(result) => result?,
        Err(err) => error!(error = %err, "server task panicked"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // =====================================================================
    // Characters
    // =====================================================================

    #[test]
    fn test_characters_for_two_per_account_on_distinct_maps() {
        let characters = characters_for(AccountId(7));
        assert_eq!(characters.len(), 2);
        assert_eq!(characters[0].guid, PlayerGuid(71));
        assert_eq!(characters[1].guid, PlayerGuid(72));
        assert_eq!(characters[0].map, MapId(0));
        assert_eq!(characters[1].map, MapId(1));
    }

    #[test]
    fn test_char_enum_payload_readable() {
        let characters = characters_for(AccountId(3));
        let payload = char_enum_payload(&characters);

        let mut reader = PayloadReader::new(&payload);
        assert_eq!(reader.read_u8().unwrap(), 2);
        for character in &characters {
            assert_eq!(reader.read_u64().unwrap(), character.guid.0);
            assert_eq!(reader.read_string().unwrap(), character.name);
            assert_eq!(reader.read_u32().unwrap(), character.map.0);
        }
        reader.finish().unwrap();
    }

    // =====================================================================
    // Authentication
    // =====================================================================

    #[tokio::test]
    async fn test_dev_authenticator_numeric_token_accepted() {
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let identity = DevAuthenticator.authenticate("42", addr).await.unwrap();
        assert_eq!(identity.account, AccountId(42));
        assert_eq!(identity.remote_addr, addr);
    }

    #[tokio::test]
    async fn test_dev_authenticator_text_token_rejected() {
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let err = DevAuthenticator.authenticate("admin", addr).await.unwrap_err();
        assert!(matches!(err, SessionError::AuthFailed(_)));
    }

    #[test]
    fn test_registry_knows_demo_opcodes() {
        let registry = registry();
        for opcode in [CMSG_PING, CMSG_CHAR_ENUM, CMSG_PLAYER_LOGIN, MSG_MOVE_HEARTBEAT] {
            assert!(registry.get(opcode).is_some(), "{opcode:?}");
        }
        assert_eq!(
            registry.get(CMSG_QUERY_TIME).map(|entry| entry.connection),
            Some(ConnectionTag::Secondary)
        );
    }
}
