//! Start path
//!
//! First stateful evaluation of a signature against a flow: every visible
//! transaction from the inspect cursor onward is dispatched, then the
//! signature's generic application-layer program (if any) is run from its
//! first instruction. Whatever could not be decided parks a progress
//! record for the continue path.

use tracing::{debug, trace};

use crate::alert::AlertFlags;
use crate::core::{AppProto, Direction, Packet};
use crate::detect::dispatch::{inspect_tx, EngineVerdict};
use crate::detect::state::{FlowDetectState, InspectFlags, StoredFlowSig, StoredSig, TxDetectState};
use crate::detect::{filestore, DetectEngine, ThreadCtx};
use crate::error::{DetectError, Result};
use crate::flow::Flow;
use crate::flowvar::{process_flowvar_list, FlowVarOp};
use crate::protocols::{dcerpc, AppLayerState};
use crate::signatures::{PostMatchOp, Signature, SignatureFlags, SmList};

impl DetectEngine {
    /// Start stateful detection of one signature on one direction of a
    /// flow. Returns whether an alert fired.
    pub fn start_detection(
        &self,
        thread: &mut ThreadCtx,
        flow: &mut Flow,
        packet: &mut Packet,
        sig_num: u32,
        direction: Direction,
        alversion: u16,
    ) -> Result<bool> {
        let Some(mut alstate) = flow.alstate.take() else {
            return Ok(false);
        };
        let result = self.start_with_state(
            thread,
            flow,
            packet,
            alstate.as_mut(),
            sig_num,
            direction,
            alversion,
        );
        flow.alstate = Some(alstate);

        process_flowvar_list(&mut thread.flowvars, flow);
        thread.tx_id = 0;
        thread.tx_id_set = false;
        result
    }

    fn start_with_state(
        &self,
        thread: &mut ThreadCtx,
        flow: &mut Flow,
        packet: &mut Packet,
        alstate: &mut dyn AppLayerState,
        sig_num: u32,
        direction: Direction,
        alversion: u16,
    ) -> Result<bool> {
        let sig = self
            .signature(sig_num)
            .ok_or(DetectError::UnknownSignature(sig_num))?;
        let mut alerted = false;

        if alstate.supports_txs() {
            if alstate.state_valid() {
                alerted |= self.start_txs(thread, flow, packet, alstate, sig, direction, alversion)?;
            }
        } else if sig.has_list(SmList::DcePayload)
            && matches!(alstate.alproto(), AppProto::Smb | AppProto::Dcerpc)
            && dcerpc::inspect_dce_payload(&sig.dce_payload, &*alstate)
        {
            // single-shot, no continuation state
            self.on_match(
                thread,
                packet,
                alstate,
                sig,
                None,
                direction,
                AlertFlags::STATE_MATCH,
            );
            alerted = true;
        }

        if sig.has_list(SmList::AppLayerGeneric) {
            alerted |=
                self.start_flow_rule(thread, flow, packet, alstate, sig, direction, alversion);
        }

        Ok(alerted)
    }

    /// Run the inspection engines over every visible transaction
    fn start_txs(
        &self,
        thread: &mut ThreadCtx,
        flow: &mut Flow,
        packet: &mut Packet,
        alstate: &mut dyn AppLayerState,
        sig: &Signature,
        direction: Direction,
        alversion: u16,
    ) -> Result<bool> {
        let engines = self.engine_table().engines(alstate.alproto(), direction);
        let total_txs = alstate.tx_count();
        let mut alerted = false;

        trace!(sid = sig.sid, total_txs, "start: walking transactions");

        for tx_id in alstate.inspect_id(direction)..total_txs {
            // transaction object absent for an advertised id: parser will
            // catch up later
            let Some(progress) = alstate.tx_progress(tx_id, direction) else {
                continue;
            };
            // already tracked: the continue path owns this record
            if alstate
                .tx_detect_state(tx_id)
                .map(|s| s.dir(direction).store.contains_sig(sig.num))
                .unwrap_or(false)
            {
                continue;
            }

            thread.tx_id = tx_id;
            thread.tx_id_set = true;

            let outcome = inspect_tx(engines, sig, &*alstate, tx_id, direction, InspectFlags::empty());

            if outcome.alert() {
                alerted = true;
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

            let tx_done = progress >= alstate.completion_status(direction);
            let last = total_txs - tx_id <= 1;

            if outcome.definitive() {
                if !(last && tx_done) {
                    // keep the conclusion so it is neither re-run nor
                    // re-alerted, and so the arbiter sees it
                    self.store_tx_state(
                        thread,
                        alstate,
                        direction,
                        tx_id,
                        sig.num,
                        outcome.flags,
                        outcome.file_no_match,
                    )?;
                    flow.store_alversion(direction, alversion);
                } else if outcome.file_no_match > 0 {
                    self.store_tx_file_only(
                        thread,
                        alstate,
                        direction,
                        tx_id,
                        outcome.file_no_match,
                    )?;
                }
            } else if !(last && tx_done) {
                // undecided: park the partial progress
                self.store_tx_state(
                    thread,
                    alstate,
                    direction,
                    tx_id,
                    sig.num,
                    outcome.flags,
                    outcome.file_no_match,
                )?;
                flow.store_alversion(direction, alversion);
            }
        }

        Ok(alerted)
    }

    /// Run the generic application-layer program from the top and park a
    /// flow-scoped record with its resumption cursor
    fn start_flow_rule(
        &self,
        thread: &mut ThreadCtx,
        flow: &mut Flow,
        packet: &mut Packet,
        alstate: &mut dyn AppLayerState,
        sig: &Signature,
        direction: Direction,
        alversion: u16,
    ) -> bool {
        let ops = &sig.app_generic;
        let mut flags = InspectFlags::empty();
        let mut total_matches = 0u32;
        let mut cursor = 0usize;
        let mut completed = true;

        for (idx, op) in ops.iter().enumerate() {
            match dcerpc::eval_op(op, &*alstate) {
                EngineVerdict::Match => {
                    total_matches += 1;
                    cursor = idx + 1;
                }
                EngineVerdict::CantMatch | EngineVerdict::CantMatchFilestore => {
                    flags |= InspectFlags::SIG_CANT_MATCH;
                    cursor = idx;
                    completed = false;
                    break;
                }
                EngineVerdict::MoreData => {
                    cursor = idx;
                    completed = false;
                    break;
                }
            }
        }

        let mut alerted = false;
        if completed || flags.contains(InspectFlags::SIG_CANT_MATCH) {
            if completed && total_matches > 0 {
                alerted = true;
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
            flags |= InspectFlags::FULL_INSPECT | InspectFlags::GENERIC;
        }

        // flow-scoped records never feed the file arbiter
        let de_state = flow.de_state.get_or_insert_with(FlowDetectState::new);
        de_state.dir_mut(direction).store.append(StoredFlowSig {
            sid: sig.num,
            flags,
            cursor,
        });
        flow.store_alversion(direction, alversion);
        trace!(sid = sig.sid, cursor, "flow rule parked");

        alerted
    }

    /// Park a transaction-scoped record, creating the transaction's detect
    /// state on first use, and let the arbiter fold in this signature's
    /// file conclusion
    fn store_tx_state(
        &self,
        thread: &mut ThreadCtx,
        alstate: &mut dyn AppLayerState,
        direction: Direction,
        tx_id: u64,
        sid: u32,
        flags: InspectFlags,
        file_no_match: u16,
    ) -> Result<()> {
        if !alstate.supports_tx_detect_state() {
            return Ok(());
        }
        self.ensure_tx_detect_state(alstate, tx_id)?;
        let Some(state) = alstate.tx_detect_state_mut(tx_id) else {
            return Err(DetectError::StateAttach(tx_id));
        };
        state.dir_mut(direction).store.append(StoredSig { sid, flags });
        debug!(tx_id, sid, ?flags, "record stored");

        filestore::handle_files(
            &thread.rule_group,
            self.config().filestore_enabled,
            alstate,
            direction,
            tx_id,
            file_no_match,
        );
        Ok(())
    }

    /// The transaction is last and complete so nothing will resume, but a
    /// file-interested signature gave up and the arbiter must hear of it
    fn store_tx_file_only(
        &self,
        thread: &mut ThreadCtx,
        alstate: &mut dyn AppLayerState,
        direction: Direction,
        tx_id: u64,
        file_no_match: u16,
    ) -> Result<()> {
        if !alstate.supports_tx_detect_state() {
            return Ok(());
        }
        self.ensure_tx_detect_state(alstate, tx_id)?;
        filestore::handle_files(
            &thread.rule_group,
            self.config().filestore_enabled,
            alstate,
            direction,
            tx_id,
            file_no_match,
        );
        Ok(())
    }

    fn ensure_tx_detect_state(&self, alstate: &mut dyn AppLayerState, tx_id: u64) -> Result<()> {
        if alstate.tx_detect_state(tx_id).is_none() {
            alstate.attach_tx_detect_state(tx_id, TxDetectState::new())?;
            debug!(tx_id, "detect state created");
        }
        Ok(())
    }

    /// Common post-match handling: run the signature's side effects under
    /// the already-locked regime, then enqueue the alert or apply the
    /// packet action for no-alert signatures
    pub(crate) fn on_match(
        &self,
        thread: &mut ThreadCtx,
        packet: &mut Packet,
        alstate: &mut dyn AppLayerState,
        sig: &Signature,
        tx_id: Option<u64>,
        direction: Direction,
        alert_flags: AlertFlags,
    ) {
        thread.flow_locked = true;
        for op in &sig.post_match {
            match op {
                PostMatchOp::SetFlowVar(key, value) => thread.flowvars.push(FlowVarOp {
                    key: key.clone(),
                    value: value.clone(),
                }),
                PostMatchOp::FileStore => {
                    if let Some(tx_id) = tx_id {
                        if let Some(files) = alstate.tx_files_mut(tx_id, direction) {
                            files.flag_store_all();
                        }
                    }
                }
            }
        }
        thread.flow_locked = false;

        if sig.flags.contains(SignatureFlags::NOALERT) {
            packet.apply_action(sig.action);
        } else {
            thread
                .alerts
                .append(sig.num, sig.sid, tx_id.unwrap_or(0), alert_flags);
        }
    }
}
