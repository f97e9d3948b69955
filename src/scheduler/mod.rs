/// Deadline scheduler. Every process runs this poll loop independently; any
/// of them may fire the expiry action, because the underlying transforms
/// no-op once another process has already finalized the round.
// region:    --- Imports
use crate::document::{AuctionDocument, RoundPhase};
use crate::engine::SyncEngine;
use crate::round::commands::{self, ResolveRtmCommand};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, info};
// endregion: --- Imports

// region:    --- Expiry Decision

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryAction {
    /// Right-to-match window ran out: auto-decline.
    DeclineRtm,
    /// Bidding window ran out with at least one bid.
    Sell,
    /// Bidding window ran out with no bids.
    MarkUnsold,
}

/// Pure decision: what, if anything, should happen to `doc` at `now`.
/// Paused rounds carry no deadline and never expire.
pub fn expiry_action(doc: &AuctionDocument, now: DateTime<Utc>) -> Option<ExpiryAction> {
    let round = doc.round.as_ref()?;
    let deadline = round.deadline?;
    if now < deadline {
        return None;
    }
    match round.phase {
        RoundPhase::RightToMatchPending => Some(ExpiryAction::DeclineRtm),
        RoundPhase::BiddingOpen => Some(if round.bids.is_empty() {
            ExpiryAction::MarkUnsold
        } else {
            ExpiryAction::Sell
        }),
        RoundPhase::BiddingPaused => None,
    }
}

// endregion: --- Expiry Decision

// region:    --- Deadline Scheduler

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct DeadlineScheduler {
    engine: Arc<SyncEngine>,
}

impl DeadlineScheduler {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    pub fn start(self) {
        tokio::spawn(async move {
            info!("{:<12} --> watching round deadlines", "Scheduler");
            let mut ticker = interval(POLL_INTERVAL);
            loop {
                ticker.tick().await;
                run_expiry_check(&self.engine, Utc::now()).await;
            }
        });
    }
}

/// One poll step, factored out so tests can drive it without wall-clock time.
pub async fn run_expiry_check(engine: &SyncEngine, now: DateTime<Utc>) {
    // Skip while a terminal action from this process is still outstanding;
    // the next tick (or the remote delivery) picks it back up.
    if engine.is_finalizing() {
        return;
    }
    let Some(action) = expiry_action(&engine.document(), now) else {
        return;
    };
    debug!("{:<12} --> deadline passed: {:?}", "Scheduler", action);
    let result = match action {
        ExpiryAction::DeclineRtm => {
            commands::handle_resolve_rtm(engine, ResolveRtmCommand { accepted: false }).await
        }
        ExpiryAction::Sell => commands::handle_sell(engine).await,
        ExpiryAction::MarkUnsold => commands::handle_mark_unsold(engine).await,
    };
    if let Err(reason) = result {
        // Someone else already tore the round down; nothing was mutated.
        debug!("{:<12} --> expiry action skipped: {reason}", "Scheduler");
    }
}

// endregion: --- Deadline Scheduler

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{AuctionRound, Bid};
    use chrono::Duration as ChronoDuration;

    fn doc_with_round(
        phase: RoundPhase,
        bids: usize,
        deadline_offset_secs: i64,
    ) -> AuctionDocument {
        let now = Utc::now();
        let bids = (0..bids)
            .map(|i| Bid {
                id: format!("b{i}"),
                team_id: "t1".into(),
                team_name: "Team".into(),
                amount: 2_00 + i as i64 * 25,
                timestamp: now,
            })
            .rev()
            .collect();
        AuctionDocument {
            round: Some(AuctionRound {
                player_id: "p1".into(),
                current_amount: 2_00,
                bids,
                phase,
                deadline: Some(now + ChronoDuration::seconds(deadline_offset_secs)),
                message: String::new(),
            }),
            ..AuctionDocument::default()
        }
    }

    #[test]
    fn no_round_or_future_deadline_yields_nothing() {
        let now = Utc::now();
        assert_eq!(expiry_action(&AuctionDocument::default(), now), None);
        assert_eq!(
            expiry_action(&doc_with_round(RoundPhase::BiddingOpen, 1, 10), now),
            None
        );
    }

    #[test]
    fn expired_open_round_sells_or_goes_unsold() {
        let now = Utc::now();
        assert_eq!(
            expiry_action(&doc_with_round(RoundPhase::BiddingOpen, 2, -1), now),
            Some(ExpiryAction::Sell)
        );
        assert_eq!(
            expiry_action(&doc_with_round(RoundPhase::BiddingOpen, 0, -1), now),
            Some(ExpiryAction::MarkUnsold)
        );
    }

    #[test]
    fn expired_rtm_window_auto_declines() {
        let now = Utc::now();
        assert_eq!(
            expiry_action(&doc_with_round(RoundPhase::RightToMatchPending, 1, -1), now),
            Some(ExpiryAction::DeclineRtm)
        );
    }

    #[test]
    fn paused_round_never_expires() {
        let now = Utc::now();
        assert_eq!(
            expiry_action(&doc_with_round(RoundPhase::BiddingPaused, 1, -1), now),
            None
        );
    }
}

// endregion: --- Tests
