//! Wire Protocol
//!
//! JSON text messages exchanged with the game server.
//!
//! ## Message Flow
//!
//! ```text
//! server                              client
//!   | init {api_version}  ------------>  |  handshake
//!   | state {state}       ------------>  |  replace snapshot
//!   | <kind> {thread, state, ...} ---->  |  interactive request
//!   |  <------------  {<kind>: value, thread}
//!   | result {state, winners} -------->  |
//!   | shutdown            ------------>  |
//! ```

pub mod codec;
pub mod message;

pub use codec::{decode, decode_reply, encode, encode_reply, CodecError, DISCRIMINATOR};
pub use message::{
    GameResult, InitInfo, MessageCategory, Reply, Request, RequestKind, ServerMessage, StateSync,
    ThreadId, UnknownMessage,
};
