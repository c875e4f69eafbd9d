//! Packet-level primitives for the detection engine
//!
//! The stateful engine never decodes wire bytes itself; it sees packets as
//! "new data for one direction of one flow" plus the slot alerts and
//! actions attach to.

use serde::{Deserialize, Serialize};

/// Traffic direction within a flow
///
/// All stateful detection bookkeeping is duplicated per direction and
/// indexed through `index()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Client to server
    ToServer,
    /// Server to client
    ToClient,
}

impl Direction {
    /// Index into per-direction arrays
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Direction::ToServer => 0,
            Direction::ToClient => 1,
        }
    }

    /// The other direction
    pub fn opposite(self) -> Self {
        match self {
            Direction::ToServer => Direction::ToClient,
            Direction::ToClient => Direction::ToServer,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ToServer => write!(f, "to_server"),
            Direction::ToClient => write!(f, "to_client"),
        }
    }
}

/// Detected application-layer protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppProto {
    Unknown,
    Http,
    Smb,
    Dcerpc,
}

impl Default for AppProto {
    fn default() -> Self {
        AppProto::Unknown
    }
}

impl std::fmt::Display for AppProto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppProto::Unknown => write!(f, "unknown"),
            AppProto::Http => write!(f, "http"),
            AppProto::Smb => write!(f, "smb"),
            AppProto::Dcerpc => write!(f, "dcerpc"),
        }
    }
}

/// Signature action applied to a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Generate an alert, let the packet through
    Alert,
    /// Let the packet through without alerting
    Pass,
    /// Drop the packet (inline mode)
    Drop,
}

impl Default for Action {
    fn default() -> Self {
        Action::Alert
    }
}

/// Per-packet view for the stateful detection engine
#[derive(Debug, Clone)]
pub struct Packet {
    /// Flow this packet belongs to
    pub flow_id: u64,

    /// Direction within the flow
    pub direction: Direction,

    /// Application-layer payload carried by this packet
    pub payload: Vec<u8>,

    /// Strongest action applied by matching signatures so far
    pub action: Action,

    /// Capture sequence number, for log correlation
    pub pcap_cnt: u64,
}

impl Packet {
    /// Create a packet for one direction of a flow
    pub fn new(flow_id: u64, direction: Direction, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            flow_id,
            direction,
            payload: payload.into(),
            action: Action::Pass,
            pcap_cnt: 0,
        }
    }

    /// Apply a signature action; Drop dominates Alert dominates Pass
    pub fn apply_action(&mut self, action: Action) {
        let rank = |a: Action| match a {
            Action::Pass => 0,
            Action::Alert => 1,
            Action::Drop => 2,
        };
        if rank(action) > rank(self.action) {
            self.action = action;
        }
    }
}
