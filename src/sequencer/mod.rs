/// Auto-sequencer: the optional "self-driving" mode. While enabled and the
/// auction is idle it arms a single break countdown and then puts the next
/// pending player on the block. One owning task holds the armed state, so an
/// idle period can never accumulate a second countdown.
// region:    --- Imports
use crate::document::{AuctionDocument, Player, PlayerStatus};
use crate::engine::SyncEngine;
use crate::round::commands::{self, StartRoundCommand};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{debug, info};
// endregion: --- Imports

// region:    --- Next Pick

/// The next player to auction: first Pending player in catalog order.
/// Sold and Unsold players are never picked up again automatically.
pub fn next_pending(doc: &AuctionDocument) -> Option<&Player> {
    doc.players
        .iter()
        .find(|p| p.status == PlayerStatus::Pending)
}

// endregion: --- Next Pick

// region:    --- Auto Sequencer

const TICK: Duration = Duration::from_secs(1);

pub struct AutoSequencer {
    engine: Arc<SyncEngine>,
    enabled: Arc<watch::Sender<bool>>,
}

impl AutoSequencer {
    pub fn new(engine: Arc<SyncEngine>, enabled: Arc<watch::Sender<bool>>) -> Self {
        Self { engine, enabled }
    }

    pub fn start(self) {
        tokio::spawn(async move {
            info!("{:<12} --> ready (disabled)", "Sequencer");
            let mut ticker = interval(TICK);
            // At most one armed countdown per idle period.
            let mut armed: Option<DateTime<Utc>> = None;

            loop {
                ticker.tick().await;
                let doc = self.engine.document();
                let enabled = *self.enabled.borrow();
                let idle = doc.round.is_none();

                if !enabled || !idle {
                    // Leaving idle (or disabling the mode) disarms.
                    armed = None;
                    continue;
                }

                match armed {
                    None => {
                        let break_window = ChronoDuration::seconds(doc.rules.timing.break_secs);
                        armed = Some(Utc::now() + break_window);
                        debug!("{:<12} --> break countdown armed", "Sequencer");
                    }
                    Some(fire_at) if Utc::now() >= fire_at => {
                        armed = None;
                        match next_pending(&doc) {
                            Some(next) => {
                                let player_id = next.id.clone();
                                info!("{:<12} --> auto-starting {}", "Sequencer", player_id);
                                let _ = commands::handle_start_round(
                                    &self.engine,
                                    StartRoundCommand { player_id },
                                )
                                .await;
                            }
                            None => {
                                info!("{:<12} --> catalog exhausted, disabling", "Sequencer");
                                let _ = self.enabled.send(false);
                            }
                        }
                    }
                    Some(_) => {}
                }
            }
        });
    }
}

// endregion: --- Auto Sequencer

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: &str, status: PlayerStatus) -> Player {
        Player {
            id: id.to_string(),
            status,
            ..Player::default()
        }
    }

    #[test]
    fn picks_first_pending_in_catalog_order() {
        let doc = AuctionDocument {
            players: vec![
                player("p1", PlayerStatus::Sold),
                player("p2", PlayerStatus::Unsold),
                player("p3", PlayerStatus::Pending),
                player("p4", PlayerStatus::Pending),
            ],
            ..AuctionDocument::default()
        };
        assert_eq!(next_pending(&doc).map(|p| p.id.as_str()), Some("p3"));
    }

    #[test]
    fn exhausted_catalog_yields_nothing() {
        let doc = AuctionDocument {
            players: vec![
                player("p1", PlayerStatus::Sold),
                player("p2", PlayerStatus::Unsold),
            ],
            ..AuctionDocument::default()
        };
        assert!(next_pending(&doc).is_none());
    }
}

// endregion: --- Tests
