//! The classification pool.
//!
//! Connection reader tasks hand every decoded packet frame to the
//! [`Dispatcher`]. A fixed set of worker tasks looks the opcode up in the
//! registry, stamps the packet with the session's next sequence number and
//! pushes it onto the matching queue. No handler runs here and nothing
//! waits on simulation state.
//!
//! # Ordering
//!
//! A session is pinned to one worker (`session id % workers`), so each
//! session has exactly one producer and its sequence numbers follow the
//! order its frames were submitted in.
//!
//! ```text
//! reader task ──submit──→ worker[id % n] ──accept_frame──→ queue[category]
//!                                                  └──→ immediate signal
//! ```

use std::sync::Arc;
use std::sync::atomic::Ordering;

use realmgate_protocol::{ConnectionTag, Opcode, Packet, ProcessingCategory};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::{Session, SessionError};

/// A packet frame as it comes off a connection, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub opcode: Opcode,
    pub tag: ConnectionTag,
    pub payload: Vec<u8>,
}

struct Job {
    session: Arc<Session>,
    frame: InboundFrame,
}

/// Handle to the classification workers. Dropping it stops them once
/// their backlog is empty.
pub struct Dispatcher {
    workers: Vec<mpsc::UnboundedSender<Job>>,
}

impl Dispatcher {
    /// Spawns `parallelism` workers (at least one) on the current runtime.
    pub fn spawn(parallelism: usize) -> Self {
        let workers = (0..parallelism.max(1))
            .map(|index| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(run_worker(index, rx));
                tx
            })
            .collect();
        Self { workers }
    }

    /// Queues a frame for classification. Never blocks.
    pub fn submit(&self, session: Arc<Session>, frame: InboundFrame) -> Result<(), SessionError> {
        let index = (session.id().0 % self.workers.len() as u64) as usize;
        let worker = self
            .workers
            .get(index)
            .ok_or(SessionError::DispatcherClosed)?;
        worker
            .send(Job { session, frame })
            .map_err(|_| SessionError::DispatcherClosed)
    }

    pub fn parallelism(&self) -> usize {
        self.workers.len()
    }
}

async fn run_worker(index: usize, mut jobs: mpsc::UnboundedReceiver<Job>) {
    debug!(worker = index, "classification worker started");
    while let Some(Job { session, frame }) = jobs.recv().await {
        session.accept_frame(frame, Instant::now());
    }
    debug!(worker = index, "classification worker stopped");
}

impl Session {
    /// Classifies one frame and enqueues it. Returns the queue it went to,
    /// or `None` if it was dropped.
    ///
    /// Must only be called by the session's single producer (its
    /// classification worker), or sequence order is lost.
    pub fn accept_frame(&self, frame: InboundFrame, now: Instant) -> Option<ProcessingCategory> {
        if self.is_destroyed() {
            trace!(session = %self.id(), opcode = %frame.opcode, "frame for destroyed session dropped");
            return None;
        }
        self.touch(now);

        let Some(category) = self.ctx.registry().classify(frame.opcode) else {
            warn!(
                session = %self.id(),
                opcode = %frame.opcode,
                len = frame.payload.len(),
                "unknown opcode, packet dropped"
            );
            return None;
        };

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let packet = Packet::new(frame.opcode, frame.tag, frame.payload, seq);
        self.queues[category.index()].push(packet);
        trace!(session = %self.id(), opcode = %frame.opcode, seq, %category, "packet queued");

        if category == ProcessingCategory::Immediate {
            self.ctx.immediate_signal().notify_one();
        }
        Some(category)
    }
}
