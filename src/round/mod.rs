/// Round lifecycle: bidding, the right-to-match detour, sale and unsold
/// outcomes. Pure transforms live in `transforms`; command entry points that
/// bridge them onto the engine live in `commands`.
use serde::Serialize;

pub mod commands;
pub mod transforms;

/// Typed rejection reasons for bid and round commands. Reported synchronously
/// to the initiating client; the document is never mutated on rejection.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    #[error("bidding is closed")]
    BiddingClosed,
    #[error("time expired")]
    TimeExpired,
    #[error("bid too low; current amount is {current}")]
    BidTooLow { current: i64 },
    #[error("opening bid must equal the base price {base_price}")]
    OpeningBidMismatch { base_price: i64 },
    #[error("insufficient funds; remaining budget is {budget}")]
    InsufficientFunds { budget: i64 },
    #[error("squad is full")]
    SquadFull,
    #[error("overseas cap reached")]
    OverseasCapReached,
    #[error("unknown team")]
    UnknownTeam,
    #[error("unknown player")]
    UnknownPlayer,
    #[error("a round is already live")]
    RoundAlreadyLive,
    #[error("player is not available for auction")]
    PlayerNotAvailable,
    #[error("no round is live")]
    NoRound,
    #[error("no right-to-match window is pending")]
    RtmNotPending,
}
