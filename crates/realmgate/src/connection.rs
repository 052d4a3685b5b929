//! Per-connection tasks: handshake, reader loop and writer.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive the first frame and decide the connection's role
//!      (`Hello`, `JoinSecondary` or `Reconnect`)
//!   2. Attach a [`SocketHandle`] to the session and spawn the writer task
//!   3. Loop: receive frames and hand packets to the classification pool
//!
//! The reader never runs a handler and the drain loops never write to the
//! network: handler output goes through the socket handle's channel to the
//! writer task.

use std::sync::Arc;

use realmgate_protocol::{ClientFrame, Codec, ConnectionTag, ProtocolError, ServerFrame};
use realmgate_session::{
    Authenticator, InboundFrame, Outbound, Session, SessionError, SocketHandle,
};
use realmgate_transport::{Connection, ConnectionId, WebSocketConnection};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::server::{PROTOCOL_VERSION, ServerState};
use crate::RealmgateError;

/// Reports the connection as lost when the reader exits, even on panic.
struct ConnectionGuard {
    session: Arc<Session>,
    tag: ConnectionTag,
    conn_id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.session.connection_lost(self.tag, self.conn_id);
    }
}

/// What the handshake established.
struct Handshake {
    session: Arc<Session>,
    tag: ConnectionTag,
    /// Frames to send once the writer is up, in order.
    greeting: Vec<ServerFrame>,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A, C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<A, C>>,
) -> Result<(), RealmgateError>
where
    A: Authenticator,
    C: Codec,
{
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    debug!(conn = %conn_id, peer = %conn.peer_addr(), "handling new connection");

    // --- Step 1: Handshake ---
    let Handshake {
        session,
        tag,
        greeting,
    } = perform_handshake(&conn, &state).await?;

    // --- Step 2: Attach ---
    let (socket, outbound) = SocketHandle::new(conn_id);
    session.attach_socket(tag, socket);
    let _guard = ConnectionGuard {
        session: Arc::clone(&session),
        tag,
        conn_id,
    };
    for frame in greeting {
        session.send_frame(tag, frame);
    }
    info!(conn = %conn_id, session = %session.id(), %tag, "connection attached");

    let closed = CancellationToken::new();
    tokio::spawn(run_writer(
        Arc::clone(&conn),
        outbound,
        Arc::clone(&state),
        closed.clone(),
    ));

    // --- Step 3: Reader loop ---
    let session_gone = session.cancellation();
    let shutdown = state.shared.shutdown.clone();
    loop {
        let data = tokio::select! {
            _ = closed.cancelled() => break,
            _ = session_gone.cancelled() => break,
            _ = shutdown.cancelled() => break,
            received = conn.recv() => match received {
                Ok(Some(data)) => data,
                Ok(None) => {
                    debug!(conn = %conn_id, session = %session.id(), "connection closed by peer");
                    break;
                }
                Err(err) => {
                    debug!(conn = %conn_id, session = %session.id(), error = %err, "recv error");
                    break;
                }
            },
        };

        let frame: ClientFrame = match state.codec.decode(&data) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(conn = %conn_id, session = %session.id(), error = %err, "undecodable frame, closing connection");
                break;
            }
        };

        match frame {
            ClientFrame::Packet { opcode, payload } => {
                state
                    .shared
                    .dispatcher
                    .submit(Arc::clone(&session), InboundFrame { opcode, tag, payload })?;
            }
            other => {
                warn!(
                    conn = %conn_id,
                    session = %session.id(),
                    frame = ?other,
                    "handshake frame on an established connection, ignoring"
                );
            }
        }
    }

    closed.cancel();
    // _guard drops here → connection_lost fires.
    Ok(())
}

/// Receives the first frame and resolves it to a session.
async fn perform_handshake<A, C>(
    conn: &WebSocketConnection,
    state: &Arc<ServerState<A, C>>,
) -> Result<Handshake, RealmgateError>
where
    A: Authenticator,
    C: Codec,
{
    let shared = &state.shared;
    let data = match time::timeout(shared.config.handshake_timeout(), conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::Handshake("connection closed before handshake".into()).into());
        }
        Ok(Err(err)) => return Err(err.into()),
        Err(_) => {
            return Err(ProtocolError::Handshake("handshake timed out".into()).into());
        }
    };

    let frame: ClientFrame = match state.codec.decode(&data) {
        Ok(frame) => frame,
        Err(err) => {
            send_error(conn, &state.codec, 400, "malformed frame").await?;
            return Err(err.into());
        }
    };

    match frame {
        ClientFrame::Packet { .. } => {
            send_error(conn, &state.codec, 400, "expected Hello").await?;
            Err(ProtocolError::Handshake("first frame must be a handshake".into()).into())
        }

        ClientFrame::Hello { version, token } => {
            check_version(conn, &state.codec, version).await?;
            let identity = match state.auth.authenticate(&token, conn.peer_addr()).await {
                Ok(identity) => identity,
                Err(err) => {
                    send_error(conn, &state.codec, 401, "unauthorized").await?;
                    return Err(err.into());
                }
            };

            let (session, position) = {
                let mut sessions = shared.sessions.lock();
                let session = sessions.create(identity);
                let position = sessions.queue_position(session.id());
                (session, position)
            };
            info!(session = %session.id(), account = %session.account(), "account logged in");

            let mut greeting = vec![welcome(state, &session)];
            if let Some(position) = position {
                greeting.push(ServerFrame::Queued {
                    position: u32::try_from(position).unwrap_or(u32::MAX),
                });
            }
            Ok(Handshake {
                session,
                tag: ConnectionTag::Primary,
                greeting,
            })
        }

        ClientFrame::JoinSecondary {
            version,
            session_key,
        } => {
            check_version(conn, &state.codec, version).await?;
            let found = shared.sessions.lock().find_by_key(&session_key);
            let session = match found {
                Ok(session) => session,
                Err(err) => {
                    send_error(conn, &state.codec, 404, "unknown session").await?;
                    return Err(err.into());
                }
            };
            Ok(Handshake {
                session,
                tag: ConnectionTag::Secondary,
                greeting: vec![ServerFrame::SecondaryAccepted],
            })
        }

        ClientFrame::Reconnect {
            version,
            session_key,
        } => {
            check_version(conn, &state.codec, version).await?;
            let found = shared.sessions.lock().find_by_key(&session_key);
            let session = match found {
                Ok(session) if !session.is_force_exit() => session,
                Ok(session) => {
                    send_error(conn, &state.codec, 404, "session was closed").await?;
                    return Err(SessionError::Destroyed(session.id()).into());
                }
                Err(err) => {
                    send_error(conn, &state.codec, 404, "unknown session").await?;
                    return Err(err.into());
                }
            };
            if session.is_connected(ConnectionTag::Primary) {
                send_error(conn, &state.codec, 409, "session already connected").await?;
                return Err(ProtocolError::Handshake("reconnect to a connected session".into()).into());
            }
            info!(session = %session.id(), "session resumed");

            let greeting = vec![welcome(state, &session)];
            Ok(Handshake {
                session,
                tag: ConnectionTag::Primary,
                greeting,
            })
        }
    }
}

async fn check_version(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    version: u32,
) -> Result<(), RealmgateError> {
    if version == PROTOCOL_VERSION {
        return Ok(());
    }
    let err = ProtocolError::VersionMismatch {
        expected: PROTOCOL_VERSION,
        got: version,
    };
    send_error(conn, codec, 400, &err.to_string()).await?;
    Err(err.into())
}

fn welcome<A: Authenticator, C: Codec>(state: &ServerState<A, C>, session: &Session) -> ServerFrame {
    ServerFrame::Welcome {
        account: session.account(),
        session_key: session.key().to_owned(),
        server_time: state.shared.ctx.server_ms(Instant::now()),
    }
}

/// Encodes and sends everything the session queues for this connection.
/// Stops on `Outbound::Close`, on a send failure or when the reader ends.
async fn run_writer<A, C>(
    conn: Arc<WebSocketConnection>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    state: Arc<ServerState<A, C>>,
    closed: CancellationToken,
) where
    A: Authenticator,
    C: Codec,
{
    let conn_id = conn.id();
    loop {
        let next = tokio::select! {
            _ = closed.cancelled() => break,
            next = outbound.recv() => next,
        };
        match next {
            Some(Outbound::Frame(frame)) => {
                let bytes = match state.codec.encode(&frame) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!(conn = %conn_id, error = %err, "failed to encode frame, dropping it");
                        continue;
                    }
                };
                if let Err(err) = conn.send(&bytes).await {
                    debug!(conn = %conn_id, error = %err, "send failed");
                    break;
                }
            }
            Some(Outbound::Close) | None => break,
        }
    }

    if let Err(err) = conn.close().await {
        debug!(conn = %conn_id, error = %err, "close failed");
    }
    closed.cancel();
}

/// Sends an error frame straight on the connection (before the writer
/// exists).
async fn send_error(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    code: u16,
    message: &str,
) -> Result<(), RealmgateError> {
    let bytes = codec.encode(&ServerFrame::Error {
        code,
        message: message.to_string(),
    })?;
    conn.send(&bytes).await?;
    Ok(())
}
