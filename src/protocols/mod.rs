//! Application-layer parser boundary
//!
//! The stateful engine never parses protocols itself; it consumes parsed
//! state through the `AppLayerState` trait. Parsers produce transactions
//! monotonically, advertise per-direction progress, own the detect state
//! attached to their transactions, and bump a per-direction version
//! counter whenever new bytes produced new inspectable state.
//!
//! Engines that need protocol internals downcast through `as_any`, the
//! same way typed protocol state hangs off the generic flow state
//! elsewhere in the engine.

pub mod dcerpc;
pub mod http;

pub use dcerpc::DcerpcState;
pub use http::HttpState;

use std::any::Any;

use crate::core::{AppProto, Direction};
use crate::detect::state::TxDetectState;
use crate::error::Result;
use crate::files::FileContainer;

/// Parsed application-layer state of one flow
pub trait AppLayerState: Send {
    /// Protocol this state belongs to
    fn alproto(&self) -> AppProto;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Whether the state is far enough along to inspect at all
    fn state_valid(&self) -> bool {
        true
    }

    /// Whether the protocol produces transactions
    fn supports_txs(&self) -> bool;

    /// Whether transactions can carry detect state
    fn supports_tx_detect_state(&self) -> bool {
        self.supports_txs()
    }

    /// Version counter for one direction; incremented by the parser
    /// whenever new bytes produced new parseable state
    fn alversion(&self, direction: Direction) -> u16;

    /// Number of transactions produced so far
    fn tx_count(&self) -> u64 {
        0
    }

    /// Lowest transaction id still considered pending in a direction
    fn inspect_id(&self, direction: Direction) -> u64 {
        let _ = direction;
        0
    }

    /// Advance the inspect cursor past completed transactions
    fn set_inspect_id(&mut self, direction: Direction) {
        let _ = direction;
    }

    /// Parse progress of one transaction in one direction; `None` when the
    /// transaction object is absent for an advertised id
    fn tx_progress(&self, tx_id: u64, direction: Direction) -> Option<u8> {
        let _ = (tx_id, direction);
        None
    }

    /// Progress value at which a transaction counts as complete
    fn completion_status(&self, direction: Direction) -> u8 {
        let _ = direction;
        0
    }

    fn tx_detect_state(&self, tx_id: u64) -> Option<&TxDetectState> {
        let _ = tx_id;
        None
    }

    fn tx_detect_state_mut(&mut self, tx_id: u64) -> Option<&mut TxDetectState> {
        let _ = tx_id;
        None
    }

    /// Attach freshly allocated detect state to a transaction.
    ///
    /// Precondition: the parser advertises `supports_tx_detect_state`;
    /// failure to attach is an invariant violation, not a runtime
    /// condition.
    fn attach_tx_detect_state(&mut self, tx_id: u64, state: TxDetectState) -> Result<()>;

    /// Files of one transaction in one direction, if any are tracked
    fn tx_files(&self, tx_id: u64, direction: Direction) -> Option<&FileContainer> {
        let _ = (tx_id, direction);
        None
    }

    fn tx_files_mut(&mut self, tx_id: u64, direction: Direction) -> Option<&mut FileContainer> {
        let _ = (tx_id, direction);
        None
    }
}
