//! [`Transport`] over WebSocket (`tokio-tungstenite`).
//!
//! Each accepted stream is split in two halves with separate locks: the
//! reader task owns the source half while the writer task uses the sink.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info};

use crate::{Connection, ConnectionId, Transport, TransportError};

type Socket = WebSocketStream<TcpStream>;

/// Listener that upgrades every TCP client to WebSocket.
pub struct WebSocketTransport {
    listener: TcpListener,
    upgrade_timeout: Duration,
}

impl WebSocketTransport {
    /// How long a TCP client has to finish the HTTP upgrade by default.
    pub const DEFAULT_UPGRADE_TIMEOUT: Duration = Duration::from_secs(5);

    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::Accept)?;
        info!(addr, "websocket listener bound");
        Ok(Self {
            listener,
            upgrade_timeout: Self::DEFAULT_UPGRADE_TIMEOUT,
        })
    }

    pub fn with_upgrade_timeout(mut self, timeout: Duration) -> Self {
        self.upgrade_timeout = timeout;
        self
    }

    /// Bound address; resolves port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    /// Waits for the next client that completes the upgrade. Clients that
    /// fail or stall the upgrade are dropped and the wait continues, so one
    /// bad client cannot stop the accept loop.
    async fn accept(&mut self) -> Result<WebSocketConnection, TransportError> {
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .map_err(TransportError::Accept)?;
            if let Err(err) = stream.set_nodelay(true) {
                debug!(%peer, error = %err, "set_nodelay failed");
            }

            let socket = match tokio::time::timeout(
                self.upgrade_timeout,
                tokio_tungstenite::accept_async(stream),
            )
            .await
            {
                Ok(Ok(socket)) => socket,
                Ok(Err(err)) => {
                    debug!(%peer, error = %err, "websocket upgrade failed");
                    continue;
                }
                Err(_) => {
                    debug!(%peer, "websocket upgrade timed out");
                    continue;
                }
            };

            let id = ConnectionId::next();
            debug!(conn = %id, %peer, "websocket connection accepted");
            let (sink, source) = socket.split();
            return Ok(WebSocketConnection {
                id,
                peer,
                sink: Mutex::new(sink),
                source: Mutex::new(source),
                closed: AtomicBool::new(false),
            });
        }
    }
}

/// One upgraded client.
pub struct WebSocketConnection {
    id: ConnectionId,
    peer: SocketAddr,
    sink: Mutex<SplitSink<Socket, Message>>,
    source: Mutex<SplitStream<Socket>>,
    closed: AtomicBool,
}

fn io_error(kind: io::ErrorKind, err: tungstenite::Error) -> io::Error {
    io::Error::new(kind, err)
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed(self.id));
        }
        self.sink
            .lock()
            .await
            .send(Message::Binary(frame.to_vec().into()))
            .await
            .map_err(|err| TransportError::Write(io_error(io::ErrorKind::BrokenPipe, err)))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut source = self.source.lock().await;
        while let Some(message) = source.next().await {
            match message {
                Ok(Message::Binary(data)) => return Ok(Some(data.into())),
                Ok(Message::Text(text)) => return Ok(Some(text.as_bytes().to_vec())),
                Ok(Message::Close(_)) => return Ok(None),
                // Pings are answered inside tungstenite.
                Ok(_) => {}
                Err(err) => {
                    return Err(TransportError::Read(io_error(
                        io::ErrorKind::ConnectionReset,
                        err,
                    )));
                }
            }
        }
        Ok(None)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|err| TransportError::Write(io_error(io::ErrorKind::BrokenPipe, err)))
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}
