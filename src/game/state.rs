//! Game State Snapshot
//!
//! Typed view of the state object the server attaches to most messages.
//! The client never runs game rules: card effects stay opaque and every
//! field defaults when absent, so a newer server can add data without
//! breaking decoding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::cost::CardCost;

/// Resource identifier (a colour or points).
pub type Resource = u8;

/// Count per resource. Absent keys count as zero.
pub type ResourceCounter = BTreeMap<Resource, u32>;

/// Area identifier (a colour, artifacts, discard, hand).
pub type AreaType = u8;

/// Moon phase identifier (a colour or the last turn marker).
pub type MoonPhase = u8;

/// Numeric identifiers shared with the server's enums.
pub mod ids {
    use super::{AreaType, Resource};

    /// Purple.
    pub const PURPLE: u8 = 1;
    /// Green.
    pub const GREEN: u8 = 2;
    /// Red.
    pub const RED: u8 = 3;
    /// Blue.
    pub const BLUE: u8 = 4;
    /// Yellow.
    pub const YELLOW: u8 = 5;
    /// Artifact cards / area.
    pub const ARTIFACT: u8 = 6;
    /// Event cards.
    pub const EVENT: u8 = 7;
    /// Final moon phase.
    pub const LAST_TURN: u8 = 8;
    /// Discard pile.
    pub const DISCARD: u8 = 9;
    /// Hand.
    pub const HAND: u8 = 10;
    /// Unused spare area.
    pub const SPARE: u8 = 11;
    /// Victory points.
    pub const POINTS: u8 = 12;

    /// All colours, in server order.
    pub const COLORS: [u8; 5] = [PURPLE, GREEN, RED, BLUE, YELLOW];

    /// Display name of a resource.
    pub fn resource_name(resource: Resource) -> Option<&'static str> {
        match resource {
            PURPLE => Some("purple"),
            GREEN => Some("green"),
            RED => Some("red"),
            BLUE => Some("blue"),
            YELLOW => Some("yellow"),
            POINTS => Some("points"),
            _ => None,
        }
    }

    /// Display name of an area.
    pub fn area_name(area: AreaType) -> Option<&'static str> {
        match area {
            ARTIFACT => Some("artifacts"),
            DISCARD => Some("discard"),
            HAND => Some("hand"),
            SPARE => Some("spare"),
            other => resource_name(other),
        }
    }
}

/// Full game snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameState {
    /// Index of the player whose turn it is.
    pub curr_player_idx: usize,
    /// Number of players.
    pub n_players: usize,
    /// Turn counter.
    pub turn_num: u32,
    /// Round counter.
    pub round_num: u32,
    /// Seed the server's RNG was started with.
    pub seed: String,
    /// Moon phases per round (one or two each).
    pub moon_phases: Vec<Vec<MoonPhase>>,
    /// Players in seat order.
    pub players: Vec<PlayerState>,
    /// Players by final ranking, once the game ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub players_ranked: Option<Vec<PlayerState>>,
    /// Winning players, once the game ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winners: Option<Vec<PlayerState>>,
}

impl GameState {
    /// Player whose turn it is.
    pub fn current_player(&self) -> Option<&PlayerState> {
        self.players.get(self.curr_player_idx)
    }

    /// Player by index.
    pub fn player(&self, idx: usize) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.idx == idx)
    }
}

/// One player's board.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerState {
    /// Seat index.
    pub idx: usize,
    /// Resources held (points included).
    pub resources: ResourceCounter,
    /// Score, once the game ended.
    pub final_score: Option<i64>,
    /// Cards per area, keyed by slot.
    pub areas: BTreeMap<AreaType, BTreeMap<u32, Card>>,
}

impl PlayerState {
    /// Cards in `area`, in slot order.
    pub fn cards_in(&self, area: AreaType) -> impl Iterator<Item = &Card> {
        self.areas.get(&area).into_iter().flat_map(|slots| slots.values())
    }

    /// Count of one resource.
    pub fn resource(&self, resource: Resource) -> u32 {
        self.resources.get(&resource).copied().unwrap_or(0)
    }
}

/// A card on the table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Card {
    /// Card type (a colour, artifact or event).
    pub card_type: u8,
    /// Cost to buy.
    pub cost: CardCost,
    /// Server-side effect tree.
    pub effect: Effect,
    /// Whether the effect triggers regardless of moon phase.
    pub always_triggers: bool,
    /// Part of the starting hand.
    pub is_starting_card: bool,
    /// Where the card lies.
    pub location: Location,
    /// Marker count.
    pub markers: u32,
}

/// Position of a card. Replies refer to cards by location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    /// Owning player index.
    pub player: usize,
    /// Area the card is in.
    pub area: AreaType,
    /// Slot within the area.
    pub key: u32,
}

/// Opaque effect tree authored by the server's rule engine.
///
/// Effects are nested objects tagged with `__class__`. The client only
/// stores and forwards them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Effect(pub Value);

impl Effect {
    /// Variant tag of the effect root, if any.
    pub fn class_name(&self) -> Option<&str> {
        self.0.get("__class__").and_then(Value::as_str)
    }

    /// Immediate child effects: any object values or array elements that
    /// carry a `__class__` tag themselves.
    pub fn children(&self) -> Vec<Effect> {
        let Some(fields) = self.0.as_object() else {
            return Vec::new();
        };
        fields
            .values()
            .flat_map(|value| match value {
                Value::Array(items) => items.iter().collect::<Vec<_>>(),
                other => vec![other],
            })
            .filter(|value| value.get("__class__").is_some())
            .map(|value| Effect(value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_state() -> Value {
        json!({
            "curr_player_idx": 1,
            "n_players": 2,
            "turn_num": 4,
            "round_num": 1,
            "seed": "1748776970931817000",
            "moon_phases": [[2], [3, 4]],
            "players": [
                {"idx": 0, "resources": {"3": 2, "12": 5}, "final_score": null, "areas": {}},
                {
                    "idx": 1,
                    "resources": {"1": 1},
                    "areas": {
                        "10": {
                            "0": {
                                "card_type": 3,
                                "cost": {"possibilities": [[{"allowed_resources": [3]}, 2]]},
                                "effect": {"__class__": "GainResource", "resource": 3, "amount": 1},
                                "always_triggers": false,
                                "is_starting_card": true,
                                "location": {"player": 1, "area": 10, "key": 0},
                                "markers": 0
                            }
                        }
                    }
                }
            ]
        })
    }

    #[test]
    fn test_state_decodes_integer_keys() {
        let state: GameState = serde_json::from_value(sample_state()).unwrap();
        assert_eq!(state.n_players, 2);
        assert_eq!(state.moon_phases, vec![vec![2], vec![3, 4]]);
        assert_eq!(state.players[0].resource(ids::POINTS), 5);
        assert_eq!(state.players[0].resource(ids::BLUE), 0);

        let current = state.current_player().unwrap();
        let hand: Vec<&Card> = current.cards_in(ids::HAND).collect();
        assert_eq!(hand.len(), 1);
        assert_eq!(hand[0].location, Location { player: 1, area: ids::HAND, key: 0 });
        assert_eq!(hand[0].effect.class_name(), Some("GainResource"));
        assert!(hand[0].cost.could_accept(ids::RED));
    }

    #[test]
    fn test_missing_fields_default() {
        let state: GameState = serde_json::from_value(json!({"turn_num": 3})).unwrap();
        assert_eq!(state.turn_num, 3);
        assert!(state.players.is_empty());
        assert!(state.winners.is_none());
    }

    #[test]
    fn test_state_roundtrip() {
        let state: GameState = serde_json::from_value(sample_state()).unwrap();
        let encoded = serde_json::to_value(&state).unwrap();
        let decoded: GameState = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_effect_children() {
        let effect = Effect(json!({
            "__class__": "Group",
            "effects": [
                {"__class__": "GainResource", "amount": 1},
                {"__class__": "Measure", "inner": {"__class__": "Atomic"}}
            ],
            "condition": {"__class__": "Always"},
            "n": 2
        }));
        let names: Vec<String> = effect
            .children()
            .iter()
            .filter_map(|e| e.class_name().map(str::to_string))
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"Always".to_string()));
        assert!(names.contains(&"GainResource".to_string()));
        assert!(names.contains(&"Measure".to_string()));
    }

    #[test]
    fn test_names() {
        assert_eq!(ids::resource_name(ids::POINTS), Some("points"));
        assert_eq!(ids::area_name(ids::HAND), Some("hand"));
        assert_eq!(ids::area_name(ids::RED), Some("red"));
        assert_eq!(ids::area_name(42), None);
    }
}
