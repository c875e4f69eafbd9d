//! Stateful signature continuation
//!
//! Signatures that depend on reconstructed application-layer context often
//! cannot be decided on a single packet. This module resumes their
//! evaluation on later packets of the same flow: progress records park in
//! per-transaction (or per-flow) stores, the continue path replays only
//! the engines that have not yet answered, and per-direction version
//! stamps let whole packets be skipped when the application layer has not
//! advanced.
//!
//! Everything here runs while holding the flow's write lock; operations
//! take `&mut Flow` accordingly.

pub mod dispatch;
pub mod filestore;
pub mod resume;
pub mod start;
pub mod state;

pub use dispatch::{EngineTable, EngineVerdict, InspectEngine, InspectOutcome};
pub use state::{
    DirStateFlags, FlowDetectState, InspectFlags, StoredFlowSig, StoredSig, TxDetectState,
};

use tracing::debug;

use crate::alert::AlertQueue;
use crate::config::DetectConfig;
use crate::core::Direction;
use crate::flow::Flow;
use crate::flowvar::FlowVarOp;
use crate::protocols::AppLayerState;
use crate::signatures::{SigIntId, Signature};

/// Answer of the per-packet short-circuit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectableState {
    /// Nothing stored, nothing to continue
    NoState,
    /// Stored state exists and the application layer advanced
    NewState,
    /// Stored state exists but nothing changed since the last pass
    Unchanged,
}

/// The signatures preselected for the current traffic, reduced to what the
/// file-store arbiter needs: how many of them are file-interested
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleGroup {
    pub filestore_cnt: u16,
}

impl RuleGroup {
    pub fn from_signatures(sigs: &[Signature]) -> Self {
        Self {
            filestore_cnt: sigs.iter().filter(|s| s.is_file_interested()).count() as u16,
        }
    }
}

/// Per-thread detection context
///
/// Holds the alert queue, the per-signature "no new state" publication the
/// first-pass matcher reads, pending flow-variable operations, and the
/// lock re-entry flag post-match code checks before taking the flow lock.
pub struct ThreadCtx {
    pub alerts: AlertQueue,

    no_new_state: Vec<bool>,

    /// Flow-variable operations queued by post-match code
    pub flowvars: Vec<FlowVarOp>,

    /// The flow lock is already held by this thread; post-match code must
    /// not take it again
    pub flow_locked: bool,

    /// Transaction currently under inspection
    pub tx_id: u64,
    pub tx_id_set: bool,

    pub rule_group: RuleGroup,
}

impl ThreadCtx {
    fn new(sig_cnt: usize, config: &DetectConfig, rule_group: RuleGroup) -> Self {
        Self {
            alerts: AlertQueue::new(config.max_alerts_per_packet),
            no_new_state: vec![false; sig_cnt],
            flowvars: Vec::new(),
            flow_locked: false,
            tx_id: 0,
            tx_id_set: false,
            rule_group,
        }
    }

    /// Clear per-packet bookkeeping; queued alerts belong to the caller
    /// and are left alone
    pub fn reset_for_packet(&mut self) {
        self.no_new_state.iter_mut().for_each(|v| *v = false);
        self.tx_id = 0;
        self.tx_id_set = false;
    }

    /// Tell the first-pass matcher this signature has no new state to
    /// offer on this flow
    pub fn publish_no_new_state(&mut self, sid: SigIntId) {
        if let Some(slot) = self.no_new_state.get_mut(sid as usize) {
            *slot = true;
        }
    }

    /// Whether the signature may still produce new state this packet
    pub fn has_new_state(&self, sid: SigIntId) -> bool {
        !self.no_new_state.get(sid as usize).copied().unwrap_or(false)
    }
}

/// The stateful detection engine: signature array, inspection engine
/// table, and configuration. Read-only during packet processing; swapped
/// wholesale on reload.
pub struct DetectEngine {
    config: DetectConfig,
    sigs: Vec<Signature>,
    engines: EngineTable,
}

impl DetectEngine {
    pub fn new(config: DetectConfig) -> Self {
        Self {
            config,
            sigs: Vec::new(),
            engines: EngineTable::with_defaults(),
        }
    }

    /// Register a signature, assigning its compact index
    pub fn add_signature(&mut self, mut sig: Signature) -> SigIntId {
        let num = self.sigs.len() as SigIntId;
        sig.num = num;
        self.sigs.push(sig);
        num
    }

    pub fn signature(&self, num: SigIntId) -> Option<&Signature> {
        self.sigs.get(num as usize)
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.sigs
    }

    pub fn sig_count(&self) -> usize {
        self.sigs.len()
    }

    pub fn config(&self) -> &DetectConfig {
        &self.config
    }

    pub(crate) fn engine_table(&self) -> &EngineTable {
        &self.engines
    }

    /// Build a per-thread context sized to this engine
    pub fn thread_ctx(&self) -> ThreadCtx {
        ThreadCtx::new(
            self.sigs.len(),
            &self.config,
            RuleGroup::from_signatures(&self.sigs),
        )
    }

    /// Per-packet short-circuit: does this flow hold state worth visiting,
    /// and has the application layer advanced since the last visit?
    pub fn has_inspectable_state(
        &self,
        flow: &Flow,
        direction: Direction,
        alversion: u16,
    ) -> InspectableState {
        if !self.config.enabled {
            return InspectableState::NoState;
        }
        if !has_stored_sigs(flow, direction) {
            return InspectableState::NoState;
        }
        if !flow.is_eof(direction) && flow.detect_alversion(direction) == alversion {
            debug!(flow = flow.id, %direction, "stored state unchanged");
            return InspectableState::Unchanged;
        }
        InspectableState::NewState
    }

    /// Advance the parser's inspect cursor; called once the records of the
    /// leading transactions are fully resolved
    pub fn update_inspect_tx_id(&self, flow: &mut Flow, direction: Direction) {
        if let Some(alstate) = flow.alstate_mut() {
            alstate.set_inspect_id(direction);
        }
    }

    /// Engine reload hook: wipe detect state of every live transaction so
    /// the new rule set is evaluated from scratch
    pub fn reset_live_transactions(&self, flow: &mut Flow) {
        let Some(alstate) = flow.alstate_mut() else {
            return;
        };
        if !alstate.supports_txs() || !alstate.state_valid() {
            return;
        }
        let start = alstate
            .inspect_id(Direction::ToServer)
            .min(alstate.inspect_id(Direction::ToClient));
        let total = alstate.tx_count();
        for tx_id in start..total {
            if let Some(state) = alstate.tx_detect_state_mut(tx_id) {
                state.reset();
            }
        }
        debug!(flow = flow.id, "live transaction detect state reset");
    }
}

/// Any progress record stored for this direction, flow- or tx-scoped?
fn has_stored_sigs(flow: &Flow, direction: Direction) -> bool {
    if let Some(de_state) = flow.de_state.as_ref() {
        if !de_state.dir(direction).store.is_empty() {
            return true;
        }
    }

    let Some(alstate) = flow.alstate() else {
        return false;
    };
    if !alstate.supports_txs() || !alstate.state_valid() {
        return false;
    }
    let total = alstate.tx_count();
    for tx_id in alstate.inspect_id(direction)..total {
        if let Some(state) = alstate.tx_detect_state(tx_id) {
            if !state.dir(direction).store.is_empty() {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AppProto;
    use crate::protocols::{AppLayerState, HttpState};

    fn engine_with_sig(sig: Signature) -> DetectEngine {
        let mut engine = DetectEngine::new(DetectConfig::default());
        engine.add_signature(sig);
        engine
    }

    #[test]
    fn test_signature_numbering() {
        let mut engine = DetectEngine::new(DetectConfig::default());
        let a = engine.add_signature(Signature::new(100, AppProto::Http, "a"));
        let b = engine.add_signature(Signature::new(200, AppProto::Http, "b"));
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(engine.signature(1).map(|s| s.sid), Some(200));
    }

    #[test]
    fn test_rule_group_counts_file_sigs() {
        let sigs = vec![
            Signature::new(1, AppProto::Http, "plain").method_is("GET"),
            Signature::new(2, AppProto::Http, "store").filestore(),
            Signature::new(3, AppProto::Http, "name").filename_contains("x"),
        ];
        let group = RuleGroup::from_signatures(&sigs);
        assert_eq!(group.filestore_cnt, 2);
    }

    #[test]
    fn test_thread_publication() {
        let engine = engine_with_sig(Signature::new(1, AppProto::Http, "a"));
        let mut thread = engine.thread_ctx();

        assert!(thread.has_new_state(0));
        thread.publish_no_new_state(0);
        assert!(!thread.has_new_state(0));

        thread.reset_for_packet();
        assert!(thread.has_new_state(0));
    }

    #[test]
    fn test_no_state_on_fresh_flow() {
        let engine = engine_with_sig(Signature::new(1, AppProto::Http, "a"));
        let mut flow = Flow::new(1, AppProto::Http);
        flow.set_alstate(Box::new(HttpState::new()));

        assert_eq!(
            engine.has_inspectable_state(&flow, Direction::ToServer, 0),
            InspectableState::NoState
        );
    }

    #[test]
    fn test_unchanged_when_version_stalls() {
        let engine = engine_with_sig(Signature::new(1, AppProto::Http, "a"));
        let mut flow = Flow::new(1, AppProto::Http);

        let mut http = HttpState::new();
        http.request_data(b"POST / HTTP/1.0\r\n");
        flow.set_alstate(Box::new(http));

        // park a record by hand
        let mut state = TxDetectState::new();
        state
            .dir_mut(Direction::ToServer)
            .store
            .append(StoredSig {
                sid: 0,
                flags: InspectFlags::METHOD,
            });
        flow.alstate_mut()
            .unwrap()
            .attach_tx_detect_state(0, state)
            .unwrap();

        let alversion = flow.alstate().unwrap().alversion(Direction::ToServer);
        flow.store_alversion(Direction::ToServer, alversion);

        assert_eq!(
            engine.has_inspectable_state(&flow, Direction::ToServer, alversion),
            InspectableState::Unchanged
        );
        assert_eq!(
            engine.has_inspectable_state(&flow, Direction::ToServer, alversion + 1),
            InspectableState::NewState
        );

        // end-of-flow forces a final pass
        flow.mark_eof(Direction::ToServer);
        assert_eq!(
            engine.has_inspectable_state(&flow, Direction::ToServer, alversion),
            InspectableState::NewState
        );
    }

    #[test]
    fn test_reset_live_transactions() {
        let engine = engine_with_sig(Signature::new(1, AppProto::Http, "a"));
        let mut flow = Flow::new(1, AppProto::Http);

        let mut http = HttpState::new();
        http.request_data(b"POST / HTTP/1.0\r\n");
        flow.set_alstate(Box::new(http));

        let mut state = TxDetectState::new();
        state
            .dir_mut(Direction::ToServer)
            .store
            .append(StoredSig {
                sid: 0,
                flags: InspectFlags::FULL_INSPECT,
            });
        state.dir_mut(Direction::ToServer).filestore_cnt = 1;
        flow.alstate_mut()
            .unwrap()
            .attach_tx_detect_state(0, state)
            .unwrap();

        engine.reset_live_transactions(&mut flow);

        let alstate = flow.alstate().unwrap();
        let state = alstate.tx_detect_state(0).unwrap();
        assert!(state.dir(Direction::ToServer).store.is_empty());
        assert_eq!(state.dir(Direction::ToServer).filestore_cnt, 0);
    }
}
