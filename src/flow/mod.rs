//! Flow-level state for stateful detection
//!
//! A flow owns its application-layer state, the flow-scoped detect state
//! for generic matchers, the per-direction version stamps the continuation
//! engine compares against the parser, and the flow variables post-match
//! side effects write to.
//!
//! Flows live in a table behind per-entry locks; packets of one flow are
//! serialized by that lock and the detection engine runs entirely while
//! holding it, which is why its operations take `&mut Flow`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::{AppProto, Direction};
use crate::detect::state::FlowDetectState;
use crate::protocols::AppLayerState;

/// One bidirectional flow
pub struct Flow {
    pub id: u64,

    /// Detected application protocol
    pub alproto: AppProto,

    /// Parsed application-layer state, owned by the flow
    pub alstate: Option<Box<dyn AppLayerState>>,

    /// Flow-scoped detect state, created lazily on first flow-scoped
    /// parking
    pub de_state: Option<FlowDetectState>,

    /// Last application-layer version inspected, per direction
    detect_alversion: [u16; 2],

    /// End-of-flow marks, per direction
    eof: [bool; 2],

    /// Flow variables set by post-match side effects
    pub vars: HashMap<String, String>,
}

impl Flow {
    pub fn new(id: u64, alproto: AppProto) -> Self {
        Self {
            id,
            alproto,
            alstate: None,
            de_state: None,
            detect_alversion: [0; 2],
            eof: [false; 2],
            vars: HashMap::new(),
        }
    }

    pub fn set_alstate(&mut self, state: Box<dyn AppLayerState>) {
        self.alproto = state.alproto();
        self.alstate = Some(state);
    }

    pub fn alstate(&self) -> Option<&dyn AppLayerState> {
        self.alstate.as_deref()
    }

    pub fn alstate_mut(&mut self) -> Option<&mut (dyn AppLayerState + 'static)> {
        self.alstate.as_deref_mut()
    }

    /// Version stamp the continuation engine last worked at
    pub fn detect_alversion(&self, direction: Direction) -> u16 {
        self.detect_alversion[direction.index()]
    }

    /// Stamp the version after an inspection pass
    pub fn store_alversion(&mut self, direction: Direction, alversion: u16) {
        self.detect_alversion[direction.index()] = alversion;
    }

    pub fn mark_eof(&mut self, direction: Direction) {
        self.eof[direction.index()] = true;
    }

    pub fn is_eof(&self, direction: Direction) -> bool {
        self.eof[direction.index()]
    }
}

/// Keyed flow storage; the per-entry mutex is the flow write lock
#[derive(Default)]
pub struct FlowTable {
    flows: HashMap<u64, Arc<Mutex<Flow>>>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a flow, returning its shared handle
    pub fn insert(&mut self, flow: Flow) -> Arc<Mutex<Flow>> {
        let id = flow.id;
        let entry = Arc::new(Mutex::new(flow));
        self.flows.insert(id, Arc::clone(&entry));
        entry
    }

    pub fn get(&self, id: u64) -> Option<Arc<Mutex<Flow>>> {
        self.flows.get(&id).map(Arc::clone)
    }

    /// Drop a flow; its detect state goes with it
    pub fn remove(&mut self, id: u64) -> Option<Arc<Mutex<Flow>>> {
        self.flows.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}
