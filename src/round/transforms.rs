/// Pure state transformations for the round lifecycle. Every function here
/// receives the whole document and returns the whole next document; a
/// transform whose preconditions no longer hold returns its input unchanged,
/// which is what makes concurrent expiry and finalize races harmless.
// region:    --- Imports
use crate::document::{
    fmt_amount, AuctionDocument, AuctionRound, AuctionRules, Bid, Nationality, Player,
    PlayerStatus, RoundPhase, RtmLimits, Team,
};
use crate::round::RejectReason;
use crate::store::Transform;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
// endregion: --- Imports

// region:    --- Start Round

/// Synchronous precondition check, used by the command layer to give the
/// caller a typed answer. The transform re-checks at commit time.
pub fn check_start_round(doc: &AuctionDocument, player_id: &str) -> Result<(), RejectReason> {
    if doc.round.is_some() {
        return Err(RejectReason::RoundAlreadyLive);
    }
    let player = doc.player(player_id).ok_or(RejectReason::UnknownPlayer)?;
    match player.status {
        PlayerStatus::Pending | PlayerStatus::Unsold => Ok(()),
        _ => Err(RejectReason::PlayerNotAvailable),
    }
}

pub fn start_round(player_id: String, now: DateTime<Utc>) -> Transform {
    Arc::new(move |mut doc| {
        if check_start_round(&doc, &player_id).is_err() {
            return doc;
        }
        let bid_window = Duration::seconds(doc.rules.timing.bid_window_secs);
        let Some(player) = doc.player_mut(&player_id) else {
            return doc;
        };
        player.status = PlayerStatus::InRound;
        let base_price = player.base_price;
        let name = player.name.clone();
        doc.round = Some(AuctionRound {
            player_id: player_id.clone(),
            current_amount: base_price,
            bids: Vec::new(),
            phase: RoundPhase::BiddingOpen,
            deadline: Some(now + bid_window),
            message: format!("Bidding OPEN for {name}"),
        });
        doc
    })
}

// endregion: --- Start Round

// region:    --- Place Bid

/// Full bid validation against `doc`, returning the mutated document on
/// success. Checks run in a fixed order so the caller always sees the most
/// specific rejection: round open, amount, funds and caps, deadline.
pub fn try_place_bid(
    doc: &AuctionDocument,
    bid_id: &str,
    team_id: &str,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<AuctionDocument, RejectReason> {
    let round = doc.round.as_ref().ok_or(RejectReason::BiddingClosed)?;
    if round.phase != RoundPhase::BiddingOpen {
        return Err(RejectReason::BiddingClosed);
    }
    let player = doc
        .player(&round.player_id)
        .ok_or(RejectReason::UnknownPlayer)?;

    if round.bids.is_empty() {
        // The opening bid is pinned to the base price.
        if amount != player.base_price {
            return Err(RejectReason::OpeningBidMismatch {
                base_price: player.base_price,
            });
        }
    } else if amount <= round.current_amount {
        return Err(RejectReason::BidTooLow {
            current: round.current_amount,
        });
    }

    let team = doc.team(team_id).ok_or(RejectReason::UnknownTeam)?;
    if team.budget < amount {
        return Err(RejectReason::InsufficientFunds {
            budget: team.budget,
        });
    }
    if team.squad.len() as u32 >= doc.rules.max_squad_size {
        return Err(RejectReason::SquadFull);
    }
    if player.nationality == Nationality::Overseas
        && team.overseas_count() >= doc.rules.max_overseas
    {
        return Err(RejectReason::OverseasCapReached);
    }

    if let Some(deadline) = round.deadline {
        if now > deadline + Duration::milliseconds(doc.rules.bid_grace_ms) {
            return Err(RejectReason::TimeExpired);
        }
    }

    let bid = Bid {
        id: bid_id.to_string(),
        team_id: team.id.clone(),
        team_name: team.name.clone(),
        amount,
        timestamp: now,
    };
    let message = format!("BID: {} by {}", fmt_amount(amount), team.short_name);
    let bid_window = Duration::seconds(doc.rules.timing.bid_window_secs);

    let mut next = doc.clone();
    if let Some(r) = next.round.as_mut() {
        r.bids.insert(0, bid);
        r.current_amount = amount;
        // Every accepted bid restarts the countdown.
        r.deadline = Some(now + bid_window);
        r.message = message;
    }
    Ok(next)
}

pub fn place_bid(bid_id: String, team_id: String, amount: i64, now: DateTime<Utc>) -> Transform {
    Arc::new(move |doc| try_place_bid(&doc, &bid_id, &team_id, amount, now).unwrap_or(doc))
}

// endregion: --- Place Bid

// region:    --- Pause / Resume

pub fn pause_round() -> Transform {
    Arc::new(|mut doc| {
        if let Some(round) = doc.round.as_mut() {
            if round.phase == RoundPhase::BiddingOpen {
                round.phase = RoundPhase::BiddingPaused;
                round.deadline = None;
                round.message = "Bidding PAUSED".to_string();
            }
        }
        doc
    })
}

/// No-op while the right-to-match window is pending.
pub fn resume_round(now: DateTime<Utc>) -> Transform {
    Arc::new(move |mut doc| {
        let bid_window = Duration::seconds(doc.rules.timing.bid_window_secs);
        if let Some(round) = doc.round.as_mut() {
            if round.phase == RoundPhase::BiddingPaused {
                round.phase = RoundPhase::BiddingOpen;
                round.deadline = Some(now + bid_window);
                round.message = "Bidding RESUMED".to_string();
            }
        }
        doc
    })
}

// endregion: --- Pause / Resume

// region:    --- Finalize

pub fn rtm_available(team: &Team, nationality: Nationality, limits: &RtmLimits) -> bool {
    let (used, cap) = match nationality {
        Nationality::Overseas => (team.rtm_used.overseas, limits.max_overseas),
        Nationality::Domestic => (team.rtm_used.domestic, limits.max_domestic),
    };
    team.rtm_used.total() < limits.max_total && used < cap
}

/// Sale to the current leading bid. The right-to-match decision is made here,
/// inside the transform, against whatever document the commit sees: if the
/// player's previous team can still match, the round parks in
/// `RightToMatchPending` instead of completing.
pub fn finalize_sale(now: DateTime<Utc>) -> Transform {
    Arc::new(move |mut doc| {
        let Some(round) = doc.round.clone() else {
            return doc;
        };
        if round.phase == RoundPhase::RightToMatchPending {
            return doc;
        }
        let Some(winning) = round.bids.first().cloned() else {
            return doc;
        };
        let Some(player) = doc.player(&round.player_id).cloned() else {
            return doc;
        };

        if let Some(prev_id) = player.previous_team_id.as_deref() {
            if prev_id != winning.team_id {
                if let Some(prev) = doc.team(prev_id) {
                    if rtm_available(prev, player.nationality, &doc.rules.rtm) {
                        let short_name = prev.short_name.clone();
                        let rtm_window = Duration::seconds(doc.rules.timing.rtm_window_secs);
                        if let Some(r) = doc.round.as_mut() {
                            r.phase = RoundPhase::RightToMatchPending;
                            r.deadline = Some(now + rtm_window);
                            r.message = format!("RTM window open for {short_name}");
                        }
                        return doc;
                    }
                }
            }
        }
        complete_sale(doc, winning, false, now)
    })
}

/// Marks the current player unsold. No team mutation.
pub fn mark_unsold(now: DateTime<Utc>) -> Transform {
    Arc::new(move |mut doc| {
        let Some(round) = doc.round.clone() else {
            return doc;
        };
        if round.phase == RoundPhase::RightToMatchPending {
            return doc;
        }
        if let Some(player) = doc.player_mut(&round.player_id) {
            player.status = PlayerStatus::Unsold;
            player.sold_timestamp = Some(now);
        }
        doc.round = None;
        doc
    })
}

/// Resolves the right-to-match window. Accepting with sufficient funds sells
/// to the previous team at the current amount and consumes one of its cards;
/// accepting without funds, or declining, honours the open-market bid. A
/// failed accept does not consume a card.
pub fn resolve_rtm(accepted: bool, rtm_bid_id: String, now: DateTime<Utc>) -> Transform {
    Arc::new(move |doc| {
        let Some(round) = doc.round.clone() else {
            return doc;
        };
        if round.phase != RoundPhase::RightToMatchPending {
            return doc;
        }
        let Some(winning) = round.bids.first().cloned() else {
            return doc;
        };

        if accepted {
            let prev = doc
                .current_player()
                .and_then(|p| p.previous_team_id.clone())
                .and_then(|id| doc.team(&id).cloned());
            if let Some(prev) = prev {
                if prev.budget >= round.current_amount {
                    let rtm_bid = Bid {
                        id: rtm_bid_id.clone(),
                        team_id: prev.id.clone(),
                        team_name: prev.name.clone(),
                        amount: round.current_amount,
                        timestamp: now,
                    };
                    return complete_sale(doc, rtm_bid, true, now);
                }
            }
        }
        complete_sale(doc, winning, false, now)
    })
}

/// Terminal player/team mutation and round teardown, all in one document.
fn complete_sale(
    mut doc: AuctionDocument,
    winning: Bid,
    via_rtm: bool,
    now: DateTime<Utc>,
) -> AuctionDocument {
    let Some(round) = doc.round.clone() else {
        return doc;
    };
    let price = winning.amount;
    let Some(buyer) = doc.team(&winning.team_id) else {
        return doc;
    };
    // Bid validation keeps this unreachable; refusing here preserves the
    // budget >= 0 invariant no matter what the store replayed.
    if buyer.budget < price {
        return doc;
    }

    let sold: Player = {
        let Some(player) = doc.player_mut(&round.player_id) else {
            return doc;
        };
        player.status = PlayerStatus::Sold;
        player.sold_price = Some(price);
        player.team_id = Some(winning.team_id.clone());
        player.sold_timestamp = Some(now);
        player.sold_via_rtm = via_rtm;
        player.clone()
    };

    let nationality = sold.nationality;
    if let Some(team) = doc.team_mut(&winning.team_id) {
        team.budget -= price;
        if via_rtm {
            match nationality {
                Nationality::Overseas => team.rtm_used.overseas += 1,
                Nationality::Domestic => team.rtm_used.domestic += 1,
            }
        }
        team.squad.push(sold);
    }
    doc.round = None;
    doc
}

// endregion: --- Finalize

// region:    --- Increment Advisory

/// Advisory increment lookup: the smallest tier whose upper bound strictly
/// exceeds `current` supplies the increment; past the last tier, the last
/// tier's increment. Not enforced by bid validation.
pub fn next_increment(rules: &AuctionRules, current: i64) -> i64 {
    let mut tiers = rules.increments.clone();
    tiers.sort_by_key(|t| t.up_to);
    for tier in &tiers {
        if current < tier.up_to {
            return tier.increment;
        }
    }
    tiers.last().map(|t| t.increment).unwrap_or(50)
}

/// The next legal amount a client should propose: the base price while no bid
/// exists, otherwise the current amount plus the tier increment.
pub fn next_bid_amount(doc: &AuctionDocument) -> Option<i64> {
    let round = doc.round.as_ref()?;
    if round.bids.is_empty() {
        doc.player(&round.player_id).map(|p| p.base_price)
    } else {
        Some(round.current_amount + next_increment(&doc.rules, round.current_amount))
    }
}

// endregion: --- Increment Advisory

// region:    --- Admin

pub fn reset_auction() -> Transform {
    Arc::new(|_| AuctionDocument::default())
}

pub fn add_team(team: Team) -> Transform {
    Arc::new(move |mut doc| {
        if doc.team(&team.id).is_none() {
            doc.teams.push(team.clone());
        }
        doc
    })
}

pub fn add_player(player: Player) -> Transform {
    Arc::new(move |mut doc| {
        if doc.player(&player.id).is_none() {
            doc.players.push(player.clone());
        }
        doc
    })
}

pub fn replace_rules(rules: AuctionRules) -> Transform {
    Arc::new(move |mut doc| {
        doc.rules = rules.clone();
        doc
    })
}

// endregion: --- Admin

// region:    --- Tests


// endregion: --- Tests
