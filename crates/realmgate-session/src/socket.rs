//! Outbound side of a connection as the session sees it.
//!
//! The session never touches the transport. It holds a [`SocketHandle`]
//! per connection tag and pushes [`Outbound`] commands into an unbounded
//! channel; the server's writer task encodes and sends them. Drain loops
//! therefore never wait on network I/O.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use realmgate_protocol::ServerFrame;
use realmgate_transport::ConnectionId;
use tokio::sync::mpsc;

/// A command for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(ServerFrame),
    /// Flush nothing further and close the connection.
    Close,
}

/// Cheap, clonable handle to one connection's writer.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

impl SocketHandle {
    /// Creates a handle and the receiver its writer task consumes.
    pub fn new(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id,
            tx,
            open: Arc::new(AtomicBool::new(true)),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// `false` once closed from either side.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Queues a frame. Returns `false` if the connection is closed.
    pub fn send(&self, frame: ServerFrame) -> bool {
        self.is_open() && self.tx.send(Outbound::Frame(frame)).is_ok()
    }

    /// Asks the writer to close the connection. Idempotent.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(Outbound::Close);
        }
    }

    /// Records that the connection went away from the network side.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_open_handle_delivers_frame() {
        let (handle, mut rx) = SocketHandle::new(ConnectionId::new(1));
        assert!(handle.send(ServerFrame::SecondaryAccepted));
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Frame(ServerFrame::SecondaryAccepted)
        );
    }

    #[test]
    fn test_close_twice_sends_single_close() {
        let (handle, mut rx) = SocketHandle::new(ConnectionId::new(1));
        handle.close();
        handle.close();

        assert!(!handle.is_open());
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_after_close_is_refused() {
        let (handle, mut rx) = SocketHandle::new(ConnectionId::new(1));
        handle.close();
        assert!(!handle.send(ServerFrame::SecondaryAccepted));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_is_open_false_when_writer_dropped() {
        let (handle, rx) = SocketHandle::new(ConnectionId::new(1));
        drop(rx);
        assert!(!handle.is_open());
    }
}
