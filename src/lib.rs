//! # Arcanar Client
//!
//! Client-side protocol engine for the Arcanar card game server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ARCANAR CLIENT                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  network/        - Transport                                 │
//! │  ├── connection.rs - WebSocket, FIFO recv, listeners         │
//! │  └── close.rs      - Close reasons and codes                 │
//! │                                                              │
//! │  protocol/       - Wire format                               │
//! │  ├── message.rs  - Server messages, request kinds, replies   │
//! │  └── codec.rs    - JSON encode/decode                        │
//! │                                                              │
//! │  session/        - Session driver                            │
//! │  ├── controller.rs - Handshake and dispatch loop             │
//! │  └── store.rs      - Current request and shared snapshot     │
//! │                                                              │
//! │  game/           - Read-only game state model                │
//! │  ├── state.rs    - Snapshot, players, cards                  │
//! │  └── cost.rs     - Card costs and resource counters          │
//! │                                                              │
//! │  config.rs       - Client configuration                      │
//! │  debug.rs        - Wire traffic sinks                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Request Handling
//!
//! The server asks one question at a time and may move on without waiting:
//! - At most one request is pending.
//! - Any state update, result, shutdown or newer request cancels the pending
//!   request before it takes effect; no reply is sent for it.
//! - An answered request produces exactly one reply carrying its thread id.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod debug;
pub mod game;
pub mod network;
pub mod protocol;
pub mod session;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{ClientConfig, API_VERSION, DEFAULT_SERVER_URL};
pub use debug::{DebugSink, DebugWhen, MessageLog, TracingSink};
pub use game::state::GameState;
pub use network::{CloseInfo, CloseReason, Connection, ConnectionError, ConnectionState};
pub use protocol::{Reply, Request, RequestKind, ServerMessage};
pub use session::{Controller, ProtocolError, SessionEnd, Snapshot, Store};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
