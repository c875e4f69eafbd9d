//! Continue path
//!
//! Walks the progress records parked on a flow and replays inspection on
//! whatever the application layer produced since the last pass. Decided
//! engines are skipped through the record's inspect flags; concluded
//! records only come back to life when a new file justifies
//! reconsideration. Transactions are visited in id order and the walk
//! never crosses a transaction that is still in progress.

use tracing::{debug, trace};

use crate::alert::AlertFlags;
use crate::core::{Direction, Packet};
use crate::detect::dispatch::{inspect_tx, EngineVerdict};
use crate::detect::state::{DirStateFlags, InspectFlags, StoredFlowSig, StoredSig};
use crate::detect::{filestore, DetectEngine, ThreadCtx};
use crate::flow::Flow;
use crate::flowvar::process_flowvar_list;
use crate::protocols::{dcerpc, AppLayerState};

impl DetectEngine {
    /// Resume detection for everything parked on this direction of the
    /// flow. Alerts are enqueued on the thread context as a side effect.
    pub fn continue_detection(
        &self,
        thread: &mut ThreadCtx,
        flow: &mut Flow,
        packet: &mut Packet,
        direction: Direction,
        alversion: u16,
    ) {
        // nothing inspectable changed since the last pass
        if !flow.is_eof(direction) && flow.detect_alversion(direction) == alversion {
            trace!(flow = flow.id, "application layer unchanged, skipping");
            return;
        }

        let Some(mut alstate) = flow.alstate.take() else {
            return;
        };
        self.continue_with_state(thread, flow, packet, alstate.as_mut(), direction, alversion);
        flow.alstate = Some(alstate);

        thread.tx_id = 0;
        thread.tx_id_set = false;
    }

    fn continue_with_state(
        &self,
        thread: &mut ThreadCtx,
        flow: &mut Flow,
        packet: &mut Packet,
        alstate: &mut dyn AppLayerState,
        direction: Direction,
        alversion: u16,
    ) {
        if alstate.supports_txs() && alstate.state_valid() {
            self.continue_txs(thread, flow, packet, alstate, direction);
        }

        self.continue_flow_rules(thread, flow, packet, alstate, direction);

        flow.store_alversion(direction, alversion);
    }

    fn continue_txs(
        &self,
        thread: &mut ThreadCtx,
        flow: &mut Flow,
        packet: &mut Packet,
        alstate: &mut dyn AppLayerState,
        direction: Direction,
    ) {
        let total_txs = alstate.tx_count();
        let completion = alstate.completion_status(direction);

        for tx_id in alstate.inspect_id(direction)..total_txs {
            let Some(progress) = alstate.tx_progress(tx_id, direction) else {
                continue;
            };
            let inprogress = progress < completion;
            trace!(
                tx_id,
                total_txs,
                inprogress,
                "continue: visiting transaction"
            );

            let last = total_txs - tx_id <= 1;
            // whether the following tx has produced anything yet feeds the
            // "no new state" publication decision
            let next_no_progress = !last
                && alstate
                    .tx_progress(tx_id + 1, direction)
                    .map(|p| p == 0)
                    .unwrap_or(false);

            if alstate.tx_detect_state(tx_id).is_some() {
                self.walk_tx_records(
                    thread,
                    flow,
                    packet,
                    alstate,
                    direction,
                    tx_id,
                    total_txs,
                    inprogress,
                    next_no_progress,
                );
            }

            // records of an in-progress tx are evaluated, but the walk
            // does not cross into later transactions in this call
            if inprogress {
                break;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_tx_records(
        &self,
        thread: &mut ThreadCtx,
        flow: &mut Flow,
        packet: &mut Packet,
        alstate: &mut dyn AppLayerState,
        direction: Direction,
        tx_id: u64,
        total_txs: u64,
        inprogress: bool,
        next_no_progress: bool,
    ) {
        let (dir_flags, record_cnt) = match alstate.tx_detect_state(tx_id) {
            Some(state) => (
                state.dir(direction).flags,
                state.dir(direction).store.len(),
            ),
            None => return,
        };

        let mut file_no_match = 0u16;
        for idx in 0..record_cnt {
            let Some(mut record) = alstate
                .tx_detect_state(tx_id)
                .and_then(|s| s.dir(direction).store.get(idx))
                .copied()
            else {
                break;
            };

            self.do_inspect_item(
                thread,
                packet,
                alstate,
                &mut record,
                dir_flags,
                direction,
                tx_id,
                total_txs,
                inprogress,
                next_no_progress,
                &mut file_no_match,
            );

            if let Some(slot) = alstate
                .tx_detect_state_mut(tx_id)
                .and_then(|s| s.dir_mut(direction).store.get_mut(idx))
            {
                *slot = record;
            }

            process_flowvar_list(&mut thread.flowvars, flow);
        }

        // the new-file marks were consumed by this pass
        if let Some(state) = alstate.tx_detect_state_mut(tx_id) {
            state
                .dir_mut(direction)
                .flags
                .remove(DirStateFlags::file_new_bit(direction));
        }

        if file_no_match > 0 {
            filestore::handle_files(
                &thread.rule_group,
                self.config().filestore_enabled,
                alstate,
                direction,
                tx_id,
                file_no_match,
            );
        }
    }

    /// Resume one transaction-scoped record
    #[allow(clippy::too_many_arguments)]
    fn do_inspect_item(
        &self,
        thread: &mut ThreadCtx,
        packet: &mut Packet,
        alstate: &mut dyn AppLayerState,
        record: &mut StoredSig,
        dir_state_flags: DirStateFlags,
        direction: Direction,
        tx_id: u64,
        total_txs: u64,
        inprogress: bool,
        next_no_progress: bool,
        file_no_match: &mut u16,
    ) {
        let Some(sig) = self.signature(record.sid) else {
            return;
        };
        let last = total_txs - tx_id <= 1;
        let may_publish = last || inprogress || next_no_progress;
        let file_bit = InspectFlags::file_bit(direction);
        let file_new = dir_state_flags.contains(DirStateFlags::file_new_bit(direction));

        // a fully inspected record is reconsidered when a new file landed
        // in the transaction it concluded on
        if record.flags.contains(InspectFlags::FULL_INSPECT) {
            if record.flags.contains(file_bit) && file_new {
                record.flags.remove(file_bit);
                record.flags.remove(InspectFlags::FULL_INSPECT);
                debug!(sid = sig.sid, tx_id, "new file, reopening record");
            } else {
                if may_publish {
                    thread.publish_no_new_state(record.sid);
                }
                return;
            }
        }

        // same reconsideration rule for a cannot-match conclusion
        if record.flags.contains(InspectFlags::SIG_CANT_MATCH) {
            if record.flags.contains(file_bit) && file_new {
                record.flags.remove(file_bit);
                record.flags.remove(InspectFlags::SIG_CANT_MATCH);
                debug!(sid = sig.sid, tx_id, "new file, reopening cant-match record");
            } else {
                if may_publish {
                    thread.publish_no_new_state(record.sid);
                }
                return;
            }
        }

        if !alstate.state_valid() {
            return;
        }

        thread.tx_id = tx_id;
        thread.tx_id_set = true;

        let engines = self.engine_table().engines(alstate.alproto(), direction);
        let outcome = inspect_tx(engines, sig, &*alstate, tx_id, direction, record.flags);

        *file_no_match += outcome.file_no_match;
        record.flags |= outcome.flags;
        if last {
            thread.publish_no_new_state(record.sid);
        }

        if outcome.alert() {
            self.on_match(
                thread,
                packet,
                alstate,
                sig,
                Some(tx_id),
                direction,
                AlertFlags::STATE_MATCH | AlertFlags::TX,
            );
        }
    }

    fn continue_flow_rules(
        &self,
        thread: &mut ThreadCtx,
        flow: &mut Flow,
        packet: &mut Packet,
        alstate: &mut dyn AppLayerState,
        direction: Direction,
    ) {
        let record_cnt = flow
            .de_state
            .as_ref()
            .map(|s| s.dir(direction).store.len())
            .unwrap_or(0);

        for idx in 0..record_cnt {
            let Some(mut record) = flow
                .de_state
                .as_ref()
                .and_then(|s| s.dir(direction).store.get(idx))
                .copied()
            else {
                break;
            };

            self.do_inspect_flow_rule(thread, packet, alstate, &mut record, direction);

            if let Some(slot) = flow
                .de_state
                .as_mut()
                .and_then(|s| s.dir_mut(direction).store.get_mut(idx))
            {
                *slot = record;
            }

            process_flowvar_list(&mut thread.flowvars, flow);
        }
    }

    /// Resume one flow-scoped record at its program cursor
    fn do_inspect_flow_rule(
        &self,
        thread: &mut ThreadCtx,
        packet: &mut Packet,
        alstate: &mut dyn AppLayerState,
        record: &mut StoredFlowSig,
        direction: Direction,
    ) {
        let Some(sig) = self.signature(record.sid) else {
            return;
        };

        if record
            .flags
            .intersects(InspectFlags::FULL_INSPECT | InspectFlags::SIG_CANT_MATCH)
        {
            thread.publish_no_new_state(record.sid);
            return;
        }

        let ops = &sig.app_generic;
        let mut total_matches = 0u32;
        let mut completed = true;
        let mut cursor = record.cursor;

        while cursor < ops.len() {
            match dcerpc::eval_op(&ops[cursor], &*alstate) {
                EngineVerdict::Match => {
                    total_matches += 1;
                    cursor += 1;
                }
                EngineVerdict::CantMatch | EngineVerdict::CantMatchFilestore => {
                    record.flags |= InspectFlags::SIG_CANT_MATCH;
                    completed = false;
                    break;
                }
                EngineVerdict::MoreData => {
                    // suspend at the instruction that needed data
                    completed = false;
                    break;
                }
            }
        }
        record.cursor = cursor;

        if completed && total_matches > 0 {
            record.flags |= InspectFlags::FULL_INSPECT | InspectFlags::GENERIC;
            self.on_match(
                thread,
                packet,
                alstate,
                sig,
                None,
                direction,
                AlertFlags::STATE_MATCH,
            );
        }

        // one pass per packet evaluation, whatever the outcome
        thread.publish_no_new_state(record.sid);
    }
}
