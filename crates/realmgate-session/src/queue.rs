//! One of a session's three packet queues.
//!
//! The classification worker pushes at the tail; exactly one drain loop
//! pops from the head. The drain guard is separate from the packet lock so
//! a producer can keep pushing while a long drain is running.

use std::collections::VecDeque;

use parking_lot::{Mutex, MutexGuard};
use realmgate_protocol::Packet;

#[derive(Debug, Default)]
pub(crate) struct PacketQueue {
    packets: Mutex<VecDeque<Packet>>,
    drain: Mutex<()>,
}

impl PacketQueue {
    pub(crate) fn push(&self, packet: Packet) {
        self.packets.lock().push_back(packet);
    }

    /// Pops the head packet, unless its sequence number is `stop_at`.
    pub(crate) fn pop_unless(&self, stop_at: Option<u64>) -> Option<Packet> {
        let mut packets = self.packets.lock();
        match (packets.front(), stop_at) {
            (Some(head), Some(seq)) if head.seq() == seq => None,
            _ => packets.pop_front(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.packets.lock().len()
    }

    /// Drops every queued packet and returns how many there were.
    pub(crate) fn clear(&self) -> usize {
        let mut packets = self.packets.lock();
        let dropped = packets.len();
        packets.clear();
        dropped
    }

    /// Claims the right to drain. `None` when another loop holds it.
    pub(crate) fn try_drain(&self) -> Option<MutexGuard<'_, ()>> {
        self.drain.try_lock()
    }
}
