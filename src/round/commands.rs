/// Command entry points for the round lifecycle. Each handler validates
/// synchronously against the caller's local view for instant feedback, then
/// hands the corresponding transform to the engine; the transform re-checks
/// everything at commit time.
// region:    --- Imports
use crate::document::{AuctionDocument, Bid, PlayerStatus, RoundPhase};
use crate::engine::SyncEngine;
use crate::notification::{Notification, NotificationKind};
use crate::round::{transforms, RejectReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
// endregion: --- Imports

// region:    --- Commands

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceBidCommand {
    pub team_id: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRoundCommand {
    pub player_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRtmCommand {
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
pub struct BidAccepted {
    pub amount: i64,
}

// endregion: --- Commands

// region:    --- Handlers

pub async fn handle_start_round(
    engine: &SyncEngine,
    cmd: StartRoundCommand,
) -> Result<(), RejectReason> {
    info!("{:<12} --> start round: {:?}", "Command", cmd);
    let now = Utc::now();
    transforms::check_start_round(&engine.document(), &cmd.player_id)?;
    engine
        .apply(transforms::start_round(cmd.player_id, now), None)
        .await;
    Ok(())
}

pub async fn handle_place_bid(
    engine: &SyncEngine,
    cmd: PlaceBidCommand,
) -> Result<BidAccepted, RejectReason> {
    info!("{:<12} --> place bid: {:?}", "Command", cmd);
    let now = Utc::now();
    let bid_id = Uuid::new_v4().to_string();

    // Instant answer against the local view; the loser of a race gets its
    // rejection here or becomes a silent no-op at commit time.
    transforms::try_place_bid(&engine.document(), &bid_id, &cmd.team_id, cmd.amount, now)?;

    engine
        .apply(
            transforms::place_bid(bid_id, cmd.team_id, cmd.amount, now),
            None,
        )
        .await;
    Ok(BidAccepted { amount: cmd.amount })
}

pub async fn handle_pause(engine: &SyncEngine) {
    info!("{:<12} --> pause round", "Command");
    engine.apply(transforms::pause_round(), None).await;
}

pub async fn handle_resume(engine: &SyncEngine) {
    info!("{:<12} --> resume round", "Command");
    engine.apply(transforms::resume_round(Utc::now()), None).await;
}

/// Sale to the current leading bid, or the right-to-match detour when the
/// previous team can still match.
pub async fn handle_sell(engine: &SyncEngine) -> Result<(), RejectReason> {
    if !engine.try_begin_finalize() {
        // A finalize from this process is already in flight.
        return Ok(());
    }
    info!("{:<12} --> finalize sale", "Command");

    let now = Utc::now();
    let doc = engine.document();
    let Some(round) = doc.round.clone() else {
        engine.end_finalize();
        return Err(RejectReason::NoRound);
    };
    if round.bids.is_empty() {
        engine.end_finalize();
        return Err(RejectReason::NoRound);
    }

    let transform = transforms::finalize_sale(now);
    let preview = transform(doc.clone());
    let notification = sold_notification(&doc, &preview, &round.player_id, now);
    engine.apply(transform, notification).await;
    Ok(())
}

pub async fn handle_mark_unsold(engine: &SyncEngine) -> Result<(), RejectReason> {
    if !engine.try_begin_finalize() {
        return Ok(());
    }
    info!("{:<12} --> mark unsold", "Command");

    let now = Utc::now();
    let doc = engine.document();
    let Some(round) = doc.round.clone() else {
        engine.end_finalize();
        return Err(RejectReason::NoRound);
    };

    let transform = transforms::mark_unsold(now);
    let preview = transform(doc.clone());
    let notification = preview
        .round
        .is_none()
        .then(|| preview.player(&round.player_id))
        .flatten()
        .map(|player| Notification {
            id: Uuid::new_v4().to_string(),
            kind: NotificationKind::Unsold,
            player: player.clone(),
            winning_bid: None,
        });
    engine.apply(transform, notification).await;
    Ok(())
}

pub async fn handle_resolve_rtm(
    engine: &SyncEngine,
    cmd: ResolveRtmCommand,
) -> Result<(), RejectReason> {
    if !engine.try_begin_finalize() {
        return Ok(());
    }
    info!("{:<12} --> resolve RTM: {:?}", "Command", cmd);

    let now = Utc::now();
    let doc = engine.document();
    let Some(round) = doc.round.clone() else {
        engine.end_finalize();
        return Err(RejectReason::RtmNotPending);
    };
    if round.phase != RoundPhase::RightToMatchPending {
        engine.end_finalize();
        return Err(RejectReason::RtmNotPending);
    }

    let transform = transforms::resolve_rtm(cmd.accepted, Uuid::new_v4().to_string(), now);
    let preview = transform(doc.clone());
    let notification = sold_notification(&doc, &preview, &round.player_id, now);
    engine.apply(transform, notification).await;
    Ok(())
}

// endregion: --- Handlers

// region:    --- Notification Builder

/// Derives the SOLD notification from the optimistic preview. `None` while
/// the round survives (RTM detour) or when the finalize was a no-op; the
/// notification is advisory, so a raced preview is acceptable.
fn sold_notification(
    before: &AuctionDocument,
    preview: &AuctionDocument,
    player_id: &str,
    now: DateTime<Utc>,
) -> Option<Notification> {
    if preview.round.is_some() {
        return None;
    }
    let player = preview.player(player_id)?.clone();
    if player.status != PlayerStatus::Sold {
        return None;
    }

    let leading = before
        .round
        .as_ref()
        .and_then(|r| r.bids.first())
        .cloned();
    let winning_bid = match (&player.team_id, leading) {
        (Some(buyer), Some(bid)) if *buyer == bid.team_id => Some(bid),
        // RTM retention: the bid sequence does not contain the match, so
        // synthesize one for display.
        (Some(buyer), _) => preview.team(buyer).map(|t| Bid {
            id: Uuid::new_v4().to_string(),
            team_id: t.id.clone(),
            team_name: t.name.clone(),
            amount: player.sold_price.unwrap_or_default(),
            timestamp: now,
        }),
        _ => None,
    };

    Some(Notification {
        id: Uuid::new_v4().to_string(),
        kind: NotificationKind::Sold,
        player,
        winning_bid,
    })
}

// endregion: --- Notification Builder
