//! Wire types for the MARCUS session protocol.
//!
//! This crate contains the serde-serializable types exchanged with the
//! session admission backend, over both the HTTP API (`/session/*`) and the
//! realtime WebSocket channel (`/session/ws/{id}`).
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization
//! * Lenient on input: unknown fields are ignored and optional fields default
//! * Stable: Changes only when the backend contract changes
//!
//! Session orchestration lives on top of these types in `marcus-session`.

pub mod admission;
pub mod channel;

pub use admission::*;
pub use channel::*;
