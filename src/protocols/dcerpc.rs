//! DCERPC application-layer state
//!
//! Message-oriented state without per-transaction buffers: one bound
//! interface, the current operation number, and accumulated stub data.
//! Signatures match it through the flow-scoped generic program (resumable
//! across packets) or through the single-shot DCE payload list.

use std::any::Any;

use crate::core::{AppProto, Direction};
use crate::detect::dispatch::EngineVerdict;
use crate::detect::state::TxDetectState;
use crate::error::{DetectError, Result};
use crate::signatures::{match_all, AppLayerOp, ContentMatch};

use super::AppLayerState;

/// Per-flow DCERPC state
#[derive(Debug, Default)]
pub struct DcerpcState {
    /// Interface UUID from the bind, once seen
    pub iface: Option<[u8; 16]>,

    /// Operation number of the current request, once seen
    pub opnum: Option<u16>,

    /// Accumulated stub data
    pub stub: Vec<u8>,

    alversion: [u16; 2],
    started: bool,
}

impl DcerpcState {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_version(&mut self, direction: Direction) {
        self.alversion[direction.index()] = self.alversion[direction.index()].wrapping_add(1);
    }

    /// Record a bind to an interface
    pub fn bind_iface(&mut self, uuid: [u8; 16]) {
        self.iface = Some(uuid);
        self.started = true;
        self.bump_version(Direction::ToServer);
    }

    /// Record the opnum of a request
    pub fn set_opnum(&mut self, opnum: u16) {
        self.opnum = Some(opnum);
        self.started = true;
        self.bump_version(Direction::ToServer);
    }

    /// Append stub data for one direction
    pub fn stub_data(&mut self, direction: Direction, data: &[u8]) {
        self.stub.extend_from_slice(data);
        self.started = true;
        self.bump_version(direction);
    }

    pub fn has_stub(&self) -> bool {
        !self.stub.is_empty()
    }
}

impl AppLayerState for DcerpcState {
    fn alproto(&self) -> AppProto {
        AppProto::Dcerpc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn state_valid(&self) -> bool {
        self.started
    }

    fn supports_txs(&self) -> bool {
        false
    }

    fn alversion(&self, direction: Direction) -> u16 {
        self.alversion[direction.index()]
    }

    fn attach_tx_detect_state(&mut self, tx_id: u64, _state: TxDetectState) -> Result<()> {
        Err(DetectError::DetectStateUnsupported(tx_id))
    }
}

/// Evaluate one instruction of a generic application-layer program
pub fn eval_op(op: &AppLayerOp, alstate: &dyn AppLayerState) -> EngineVerdict {
    let Some(state) = alstate.as_any().downcast_ref::<DcerpcState>() else {
        return EngineVerdict::MoreData;
    };

    match op {
        AppLayerOp::DceIface(uuid) => match state.iface {
            Some(bound) if bound == *uuid => EngineVerdict::Match,
            Some(_) => EngineVerdict::CantMatch,
            None => EngineVerdict::MoreData,
        },
        AppLayerOp::DceOpnum(opnum) => match state.opnum {
            Some(current) if current == *opnum => EngineVerdict::Match,
            Some(_) => EngineVerdict::CantMatch,
            None => EngineVerdict::MoreData,
        },
        AppLayerOp::DceStubContains(cm) => {
            if state.stub.is_empty() {
                return EngineVerdict::MoreData;
            }
            if cm.matches(&state.stub) {
                EngineVerdict::Match
            } else {
                // stub may still grow
                EngineVerdict::MoreData
            }
        }
    }
}

/// Single-shot DCE payload inspection; no continuation state is kept
pub fn inspect_dce_payload(contents: &[ContentMatch], alstate: &dyn AppLayerState) -> bool {
    let Some(state) = alstate.as_any().downcast_ref::<DcerpcState>() else {
        return false;
    };
    state.has_stub() && match_all(contents, &state.stub)
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: [u8; 16] = [
        0x57, 0x67, 0x4c, 0xd0, 0x52, 0x00, 0x11, 0xce, 0xa8, 0x97, 0x08, 0x00, 0x2b, 0x2e,
        0x9c, 0x6d,
    ];

    #[test]
    fn test_iface_op() {
        let mut state = DcerpcState::new();
        let op = AppLayerOp::DceIface(UUID);

        assert_eq!(eval_op(&op, &state), EngineVerdict::MoreData);

        state.bind_iface(UUID);
        assert_eq!(eval_op(&op, &state), EngineVerdict::Match);

        let other = AppLayerOp::DceIface([0u8; 16]);
        assert_eq!(eval_op(&other, &state), EngineVerdict::CantMatch);
    }

    #[test]
    fn test_opnum_op() {
        let mut state = DcerpcState::new();
        let op = AppLayerOp::DceOpnum(2);

        assert_eq!(eval_op(&op, &state), EngineVerdict::MoreData);
        state.set_opnum(2);
        assert_eq!(eval_op(&op, &state), EngineVerdict::Match);
        state.set_opnum(9);
        assert_eq!(eval_op(&op, &state), EngineVerdict::CantMatch);
    }

    #[test]
    fn test_stub_grows_across_packets() {
        let mut state = DcerpcState::new();
        let op = AppLayerOp::DceStubContains(ContentMatch::new("pickle"));

        assert_eq!(eval_op(&op, &state), EngineVerdict::MoreData);

        state.stub_data(Direction::ToServer, b"pic");
        assert_eq!(eval_op(&op, &state), EngineVerdict::MoreData);

        state.stub_data(Direction::ToServer, b"kle");
        assert_eq!(eval_op(&op, &state), EngineVerdict::Match);
    }

    #[test]
    fn test_dce_payload_single_shot() {
        let mut state = DcerpcState::new();
        assert!(!inspect_dce_payload(
            &[ContentMatch::new("stub")],
            &state
        ));

        state.stub_data(Direction::ToServer, b"some stub bytes");
        assert!(inspect_dce_payload(&[ContentMatch::new("stub")], &state));
        assert!(!inspect_dce_payload(&[ContentMatch::new("absent")], &state));
    }

    #[test]
    fn test_version_bumps() {
        let mut state = DcerpcState::new();
        state.bind_iface(UUID);
        state.stub_data(Direction::ToClient, b"x");
        assert_eq!(state.alversion(Direction::ToServer), 1);
        assert_eq!(state.alversion(Direction::ToClient), 1);
    }
}
