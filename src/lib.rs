//! Stateful signature continuation for transaction-aware intrusion
//! detection.
//!
//! Rule engines decide most signatures on a single packet, but signatures
//! that depend on reconstructed application-layer context (request lines,
//! headers, cookies, bodies, file attachments, message-protocol fragments)
//! can only be decided once enough of the flow has been parsed into
//! transactions. This crate resumes such signatures across packets without
//! re-running engines that already answered, without missing updates, and
//! without keeping state for signatures that provably cannot match
//! anymore.
//!
//! # Architecture
//!
//! - Per-signature progress records park in chunked, append-only stores
//!   attached to transactions (or to the flow, for generic matchers)
//! - The start path runs a newly selected signature over every visible
//!   transaction; the continue path walks parked records and replays only
//!   undecided engines
//! - Per-direction version stamps skip whole packets when the application
//!   layer has not advanced
//! - A per-transaction arbiter disables file storage the moment no
//!   file-interested signature can still match
//!
//! # Example
//!
//! ```ignore
//! use sigflow::{DetectConfig, DetectEngine, Signature};
//!
//! let mut engine = DetectEngine::new(DetectConfig::default());
//! let sig = engine.add_signature(
//!     Signature::new(1, AppProto::Http, "POST with dummy cookie")
//!         .method_is("POST")
//!         .cookie_contains("dummy"),
//! );
//! let mut thread = engine.thread_ctx();
//!
//! // per packet, after parsing:
//! engine.continue_detection(&mut thread, &mut flow, &mut packet, dir, alversion);
//! engine.start_detection(&mut thread, &mut flow, &mut packet, sig, dir, alversion)?;
//! ```

pub mod alert;
pub mod config;
pub mod core;
pub mod detect;
pub mod error;
pub mod files;
pub mod flow;
pub mod flowvar;
pub mod protocols;
pub mod signatures;

pub use crate::core::{Action, AppProto, Direction, Packet};
pub use alert::{AlertFlags, AlertQueue, PacketAlert};
pub use config::DetectConfig;
pub use detect::{
    DetectEngine, FlowDetectState, InspectFlags, InspectableState, RuleGroup, ThreadCtx,
    TxDetectState,
};
pub use error::{DetectError, Result};
pub use flow::{Flow, FlowTable};
pub use signatures::{AppLayerOp, ContentMatch, Signature, SignatureFlags};
