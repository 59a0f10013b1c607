//! Network Layer
//!
//! The WebSocket connection to the game server and its close-code mapping.
//! Nothing here knows about message contents; it moves text frames.

pub mod close;
pub mod connection;

pub use close::{
    close_frame, CloseInfo, CloseReason, ABNORMAL_CLOSURE_CODE, MAX_CLOSE_REASON_BYTES,
};
pub use connection::{
    CloseListener, Connection, ConnectionError, ConnectionState, MessageListener, Recv,
};
