//! Game Data
//!
//! Client-side model of the server's game state. Read-only: the rules live
//! on the server.
//!
//! ## Module Structure
//!
//! - `state`: snapshot, players, cards, opaque effects
//! - `cost`: card costs and resource-counter helpers

pub mod cost;
pub mod state;

// Re-export key types
pub use cost::{counter_nonzero_keys, counter_total, CardCost, ResourceFilter};
pub use state::{
    ids, AreaType, Card, Effect, GameState, Location, MoonPhase, PlayerState, Resource,
    ResourceCounter,
};
