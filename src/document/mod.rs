/// Canonical shape of the shared auction document and structural self-healing
/// for malformed or partial persisted data.
// region:    --- Imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
// endregion: --- Imports

// region:    --- Document Model

/// The single shared aggregate. Versioned as a whole: the store bumps
/// `version` on every committed write, so a client can tell when its local
/// preview has been superseded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuctionDocument {
    pub teams: Vec<Team>,
    pub players: Vec<Player>,
    pub round: Option<AuctionRound>,
    pub rules: AuctionRules,
    /// team id -> shared secret; read only by the login gate.
    pub credentials: HashMap<String, String>,
    pub version: u64,
}

/// A bidding party. Budget and squad are mutated only by a completed sale.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub short_name: String,
    /// Remaining purse, in hundredths of a crore.
    pub budget: i64,
    pub initial_budget: i64,
    /// Players won so far, in purchase order.
    pub squad: Vec<Player>,
    pub rtm_used: RtmUsage,
}

/// Right-to-match cards already spent, split by player category.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RtmUsage {
    pub domestic: u32,
    pub overseas: u32,
}

impl RtmUsage {
    pub fn total(&self) -> u32 {
        self.domestic + self.overseas
    }
}

/// An auctionable item.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub nationality: Nationality,
    /// In hundredths of a crore.
    pub base_price: i64,
    pub status: PlayerStatus,
    /// Team holding the right-to-match card for this player, if any.
    pub previous_team_id: Option<String>,
    pub sold_price: Option<i64>,
    /// Buyer once sold.
    pub team_id: Option<String>,
    pub sold_timestamp: Option<DateTime<Utc>>,
    pub sold_via_rtm: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Nationality {
    #[default]
    Domestic,
    Overseas,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerStatus {
    #[default]
    Pending,
    InRound,
    Sold,
    Unsold,
}

/// An accepted bid. Round bids are kept newest-first; every accepted bid
/// strictly exceeds the previous one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Bid {
    pub id: String,
    pub team_id: String,
    pub team_name: String,
    pub amount: i64,
    pub timestamp: DateTime<Utc>,
}

/// The live auction episode for exactly one player. Present only while that
/// player is being auctioned; torn down in the same commit that applies the
/// terminal player/team mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuctionRound {
    pub player_id: String,
    pub current_amount: i64,
    pub bids: Vec<Bid>,
    pub phase: RoundPhase,
    pub deadline: Option<DateTime<Utc>>,
    /// Human-readable status line for display surfaces.
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundPhase {
    #[default]
    BiddingOpen,
    BiddingPaused,
    RightToMatchPending,
}

// endregion: --- Document Model

// region:    --- Rules

/// Static configuration. Read-only to the engine; mutated only through the
/// admin surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuctionRules {
    pub max_squad_size: u32,
    pub min_squad_size: u32,
    pub max_overseas: u32,
    /// In hundredths of a crore.
    pub initial_purse: i64,
    /// Increment tiers, ascending by `up_to`.
    pub increments: Vec<BidTier>,
    pub rtm: RtmLimits,
    pub timing: PhaseTimings,
    /// Bids arriving within this window after the deadline are still valid
    /// (latency compensation for remote terminals).
    pub bid_grace_ms: i64,
}

/// Maps a current-bid range to the minimum next-bid increment.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BidTier {
    pub up_to: i64,
    pub increment: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RtmLimits {
    pub max_total: u32,
    pub max_domestic: u32,
    pub max_overseas: u32,
}

/// Phase durations, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PhaseTimings {
    pub bid_window_secs: i64,
    pub rtm_window_secs: i64,
    pub break_secs: i64,
}

impl Default for PhaseTimings {
    fn default() -> Self {
        Self {
            bid_window_secs: 30,
            rtm_window_secs: 20,
            break_secs: 10,
        }
    }
}

impl Default for AuctionRules {
    fn default() -> Self {
        Self {
            max_squad_size: 25,
            min_squad_size: 18,
            max_overseas: 8,
            initial_purse: 100_00,
            increments: vec![
                BidTier { up_to: 1_00, increment: 5 },
                BidTier { up_to: 2_00, increment: 10 },
                BidTier { up_to: 5_00, increment: 25 },
                BidTier { up_to: 10_00, increment: 50 },
                BidTier { up_to: 999_00, increment: 1_00 },
            ],
            rtm: RtmLimits {
                max_total: 6,
                max_domestic: 6,
                max_overseas: 2,
            },
            timing: PhaseTimings::default(),
            bid_grace_ms: 1_000,
        }
    }
}

// endregion: --- Rules

// region:    --- Lookups & Formatting

impl AuctionDocument {
    pub fn team(&self, id: &str) -> Option<&Team> {
        self.teams.iter().find(|t| t.id == id)
    }

    pub fn team_mut(&mut self, id: &str) -> Option<&mut Team> {
        self.teams.iter_mut().find(|t| t.id == id)
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    /// The player currently on the block, if a round is live.
    pub fn current_player(&self) -> Option<&Player> {
        let round = self.round.as_ref()?;
        self.player(&round.player_id)
    }
}

impl Team {
    pub fn overseas_count(&self) -> u32 {
        self.squad
            .iter()
            .filter(|p| p.nationality == Nationality::Overseas)
            .count() as u32
    }
}

/// Renders an amount stored in hundredths of a crore, e.g. `225` -> `₹2.25Cr`.
pub fn fmt_amount(amount: i64) -> String {
    format!("₹{}.{:02}Cr", amount / 100, amount.rem_euclid(100))
}

// endregion: --- Lookups & Formatting

// region:    --- Structural Repair

/// Rebuilds a usable document from whatever the store returned. Each
/// top-level field is decoded independently and falls back to its default
/// when missing or malformed; loading never rejects.
pub fn ensure_structure(raw: Value) -> AuctionDocument {
    let Value::Object(mut map) = raw else {
        return AuctionDocument::default();
    };

    fn field<T>(map: &mut serde_json::Map<String, Value>, key: &str) -> T
    where
        T: serde::de::DeserializeOwned + Default,
    {
        map.remove(key)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    AuctionDocument {
        teams: field(&mut map, "teams"),
        players: field(&mut map, "players"),
        round: field(&mut map, "round"),
        rules: field(&mut map, "rules"),
        credentials: field(&mut map, "credentials"),
        version: field(&mut map, "version"),
    }
}

// endregion: --- Structural Repair

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn repair_of_non_object_yields_defaults() {
        let doc = ensure_structure(json!(null));
        assert_eq!(doc, AuctionDocument::default());
        assert_eq!(doc.rules.max_squad_size, 25);

        let doc = ensure_structure(json!("garbage"));
        assert_eq!(doc.version, 0);
    }

    #[test]
    fn repair_fills_missing_substructures() {
        let doc = ensure_structure(json!({
            "teams": [{"id": "t1", "name": "Chennai", "short_name": "CSK", "budget": 10000}],
            "version": 7
        }));
        assert_eq!(doc.teams.len(), 1);
        assert_eq!(doc.teams[0].budget, 100_00);
        assert!(doc.players.is_empty());
        assert!(doc.round.is_none());
        assert_eq!(doc.rules, AuctionRules::default());
        assert_eq!(doc.version, 7);
    }

    #[test]
    fn repair_replaces_malformed_fields() {
        let doc = ensure_structure(json!({
            "teams": "not-an-array",
            "round": {"player_id": "p1", "phase": "BIDDING_OPEN"},
            "version": "NaN"
        }));
        assert!(doc.teams.is_empty());
        assert_eq!(doc.version, 0);
        let round = doc.round.expect("partial round should decode with defaults");
        assert_eq!(round.player_id, "p1");
        assert!(round.bids.is_empty());
    }

    #[test]
    fn document_round_trips_through_json() {
        let mut doc = AuctionDocument::default();
        doc.teams.push(Team {
            id: "t1".into(),
            name: "Chennai".into(),
            short_name: "CSK".into(),
            budget: 99_75,
            initial_budget: 100_00,
            squad: vec![],
            rtm_used: RtmUsage { domestic: 1, overseas: 0 },
        });
        doc.version = 42;

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(ensure_structure(value), doc);
    }

    #[test]
    fn amount_formatting_keeps_two_decimals() {
        assert_eq!(fmt_amount(2_25), "₹2.25Cr");
        assert_eq!(fmt_amount(100_00), "₹100.00Cr");
        assert_eq!(fmt_amount(5), "₹0.05Cr");
    }
}

// endregion: --- Tests
