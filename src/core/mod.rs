//! Core shared types for packet processing and detection
//!
//! Provides the primitives every detection stage agrees on:
//! - `Direction`: traffic direction, indexes all per-direction state
//! - `AppProto`: detected application-layer protocol
//! - `Packet`: the per-packet view the detection engine works with
//! - `Action`: what a matching signature does to the packet

pub mod packet;

pub use packet::{Action, AppProto, Direction, Packet};
