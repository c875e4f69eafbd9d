//! Packet alert queue
//!
//! Alerts raised during stateful inspection are appended here in rule
//! evaluation order and drained by the enclosing engine once the packet
//! has been fully processed. The queue is bounded; overflow is counted,
//! not grown.

use bitflags::bitflags;

use tracing::warn;

use crate::signatures::SigIntId;

bitflags! {
    /// Annotations attached to an alert
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AlertFlags: u8 {
        /// Match came from stateful (reconstructed) inspection
        const STATE_MATCH = 1 << 0;
        /// Match is bound to a specific transaction
        const TX = 1 << 1;
    }
}

/// One alert raised against the current packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketAlert {
    /// Compact signature index
    pub num: SigIntId,

    /// Rule signature id
    pub sid: u32,

    /// Transaction the match is bound to; meaningful when `TX` is set
    pub tx_id: u64,

    pub flags: AlertFlags,
}

/// Bounded per-packet alert queue
#[derive(Debug)]
pub struct AlertQueue {
    alerts: Vec<PacketAlert>,
    capacity: usize,
    dropped: u64,
}

impl AlertQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            alerts: Vec::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append an alert; returns false when the queue is full
    pub fn append(&mut self, num: SigIntId, sid: u32, tx_id: u64, flags: AlertFlags) -> bool {
        if self.alerts.len() >= self.capacity {
            self.dropped += 1;
            warn!(sid, "alert queue full, dropping alert");
            return false;
        }
        self.alerts.push(PacketAlert {
            num,
            sid,
            tx_id,
            flags,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PacketAlert> {
        self.alerts.iter()
    }

    /// Take all queued alerts, leaving the queue empty for the next packet
    pub fn drain(&mut self) -> Vec<PacketAlert> {
        std::mem::take(&mut self.alerts)
    }

    /// Alerts lost to the capacity bound since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
