use crate::document::{Bid, Player};
use serde::{Deserialize, Serialize};

/// Transient broadcast event emitted alongside a finalizing commit. Never part
/// of the persisted document; receiving UIs display it for a few seconds and
/// drop it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Unique per emission; lets a client that already displayed its own
    /// optimistic copy drop the authoritative echo.
    pub id: String,
    pub kind: NotificationKind,
    pub player: Player,
    pub winning_bid: Option<Bid>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Sold,
    Unsold,
}
