//! Protocol Messages
//!
//! Everything the server sends is a JSON object whose `request` field names
//! the message kind. Lifecycle and state-sync kinds are fixed; every other
//! kind is an interactive request that carries a thread id and expects
//! exactly one reply.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::game::state::GameState;

/// Correlation token tying a reply to its request.
pub type ThreadId = u64;

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// First message of every session.
    Init(InitInfo),
    /// Server is done; no more messages follow.
    Shutdown,
    /// Authoritative state update.
    State(StateSync),
    /// Final state and winners.
    Result(GameResult),
    /// Interactive request awaiting one reply.
    Request(Request),
    /// Kind unknown to this client and without a thread id.
    Unknown(UnknownMessage),
}

/// Broad grouping of message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCategory {
    /// `init`, `shutdown`.
    Lifecycle,
    /// `state`, `result`.
    StateSync,
    /// Anything carrying a thread id.
    Interactive,
    /// Unknown kind, ignored.
    Unknown,
}

impl ServerMessage {
    /// Wire name of the message kind.
    pub fn kind(&self) -> &str {
        match self {
            ServerMessage::Init(_) => "init",
            ServerMessage::Shutdown => "shutdown",
            ServerMessage::State(_) => "state",
            ServerMessage::Result(_) => "result",
            ServerMessage::Request(request) => request.kind.as_str(),
            ServerMessage::Unknown(unknown) => &unknown.kind,
        }
    }

    /// Category of this message.
    pub fn category(&self) -> MessageCategory {
        match self {
            ServerMessage::Init(_) | ServerMessage::Shutdown => MessageCategory::Lifecycle,
            ServerMessage::State(_) | ServerMessage::Result(_) => MessageCategory::StateSync,
            ServerMessage::Request(_) => MessageCategory::Interactive,
            ServerMessage::Unknown(_) => MessageCategory::Unknown,
        }
    }

    /// State snapshot carried by the message, if any.
    pub fn state(&self) -> Option<&GameState> {
        match self {
            ServerMessage::State(sync) => Some(&sync.state),
            ServerMessage::Result(result) => Some(&result.state),
            ServerMessage::Request(request) => Some(&request.state),
            _ => None,
        }
    }
}

/// Handshake information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitInfo {
    /// Protocol version; must equal the client's.
    pub api_version: u32,
    /// Server build version, informational.
    #[serde(default)]
    pub server_version: String,
}

/// State-sync payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSync {
    /// New authoritative state.
    pub state: GameState,
}

/// End-of-game payload.
#[derive(Debug, Clone, PartialEq)]
pub struct GameResult {
    /// Final state.
    pub state: GameState,
    /// Indices of the winning players.
    pub winners: Vec<usize>,
}

/// An interactive request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Request kind.
    pub kind: RequestKind,
    /// Thread id to echo in the reply.
    pub thread: ThreadId,
    /// State at the time of asking.
    pub state: GameState,
    /// Kind-specific fields (`player`, `cost`, `exec_info`, ...).
    pub fields: Map<String, Value>,
}

impl Request {
    /// Raw kind-specific field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Player being asked, when the request names one directly.
    pub fn player(&self) -> Option<usize> {
        self.field("player")
            .and_then(Value::as_u64)
            .and_then(|p| usize::try_from(p).ok())
    }

    /// Player and card whose effect caused the request.
    pub fn exec_info(&self) -> Option<&Value> {
        self.field("exec_info")
    }
}

/// Message of a kind this client does not know, without a thread id.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownMessage {
    /// Wire kind.
    pub kind: String,
    /// Remaining fields.
    pub body: Map<String, Value>,
}

// =============================================================================
// REQUEST KINDS
// =============================================================================

/// Known interactive request kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Choose between buying and executing.
    ActionType,
    /// Pick a hand card to discard for execution.
    DiscardForExec,
    /// Pick a hand card to buy.
    BuyCard,
    /// Pay a card's cost.
    CardPayment,
    /// Pick a colour to execute.
    ColorExec,
    /// Pick a colour to exclude.
    ColorExcl,
    /// Pick a colour for a for-each effect.
    ColorForeach,
    /// Pick a card from a discard pile.
    CardFromDiscard,
    /// Pick a placed card to execute.
    CardExec,
    /// Spend resources (or decline).
    SpendResources,
    /// Pick a card to move (or decline).
    CardMove,
    /// Pick where the card goes (or decline).
    WhereMoveCard,
    /// A kind this client does not know but that still carries a thread id.
    Other(String),
}

impl RequestKind {
    /// Wire name.
    pub fn as_str(&self) -> &str {
        match self {
            RequestKind::ActionType => "action_type",
            RequestKind::DiscardForExec => "discard_for_exec",
            RequestKind::BuyCard => "buy_card",
            RequestKind::CardPayment => "card_payment",
            RequestKind::ColorExec => "color_exec",
            RequestKind::ColorExcl => "color_excl",
            RequestKind::ColorForeach => "color_foreach",
            RequestKind::CardFromDiscard => "card_from_discard",
            RequestKind::CardExec => "card_exec",
            RequestKind::SpendResources => "spend_resources",
            RequestKind::CardMove => "card_move",
            RequestKind::WhereMoveCard => "where_move_card",
            RequestKind::Other(name) => name,
        }
    }

    /// Whether this is one of the known kinds.
    pub fn is_known(&self) -> bool {
        !matches!(self, RequestKind::Other(_))
    }

    /// Whether the user may answer with `null` to decline.
    pub fn allows_decline(&self) -> bool {
        matches!(
            self,
            RequestKind::SpendResources | RequestKind::CardMove | RequestKind::WhereMoveCard
        )
    }
}

impl From<&str> for RequestKind {
    fn from(name: &str) -> Self {
        match name {
            "action_type" => RequestKind::ActionType,
            "discard_for_exec" => RequestKind::DiscardForExec,
            "buy_card" => RequestKind::BuyCard,
            "card_payment" => RequestKind::CardPayment,
            "color_exec" => RequestKind::ColorExec,
            "color_excl" => RequestKind::ColorExcl,
            "color_foreach" => RequestKind::ColorForeach,
            "card_from_discard" => RequestKind::CardFromDiscard,
            "card_exec" => RequestKind::CardExec,
            "spend_resources" => RequestKind::SpendResources,
            "card_move" => RequestKind::CardMove,
            "where_move_card" => RequestKind::WhereMoveCard,
            other => RequestKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Answer to an interactive request.
///
/// On the wire the value is stored under the request's kind name, next to
/// the echoed thread id: `{"action_type": "buy", "thread": 3}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Thread id of the request being answered.
    pub thread: ThreadId,
    /// Kind of the request being answered.
    pub kind: RequestKind,
    /// The user's answer.
    pub value: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_kind_names_roundtrip() {
        let kinds = [
            RequestKind::ActionType,
            RequestKind::DiscardForExec,
            RequestKind::BuyCard,
            RequestKind::CardPayment,
            RequestKind::ColorExec,
            RequestKind::ColorExcl,
            RequestKind::ColorForeach,
            RequestKind::CardFromDiscard,
            RequestKind::CardExec,
            RequestKind::SpendResources,
            RequestKind::CardMove,
            RequestKind::WhereMoveCard,
        ];
        for kind in kinds {
            assert!(kind.is_known());
            assert_eq!(RequestKind::from(kind.as_str()), kind);
        }
        let other = RequestKind::from("etc...");
        assert_eq!(other, RequestKind::Other("etc...".to_string()));
        assert!(!other.is_known());
        assert_eq!(other.to_string(), "etc...");
    }

    #[test]
    fn test_categories() {
        assert_eq!(ServerMessage::Shutdown.category(), MessageCategory::Lifecycle);
        let sync = ServerMessage::State(StateSync {
            state: GameState::default(),
        });
        assert_eq!(sync.category(), MessageCategory::StateSync);
        assert_eq!(sync.kind(), "state");
        assert!(sync.state().is_some());
        assert!(ServerMessage::Shutdown.state().is_none());
    }

    #[test]
    fn test_request_accessors() {
        let mut fields = Map::new();
        fields.insert("player".into(), Value::from(2));
        fields.insert("n_times".into(), Value::from(1));
        let request = Request {
            kind: RequestKind::ColorExec,
            thread: 9,
            state: GameState::default(),
            fields,
        };
        assert_eq!(request.player(), Some(2));
        assert_eq!(request.field("n_times"), Some(&Value::from(1)));
        assert!(request.exec_info().is_none());
        assert!(!request.kind.allows_decline());
        assert!(RequestKind::CardMove.allows_decline());
    }
}
