//! Session Layer
//!
//! Drives one game session over the connection: handshake, message
//! dispatch, request correlation and the shared snapshot read by UI code.

pub mod controller;
pub mod store;

pub use controller::{Controller, ProtocolError, SessionEnd, SessionResult};
pub use store::{
    Cancelled, PendingResponse, RequestError, RequestView, Scratch, SessionPhase, Snapshot, Store,
};
