use async_trait::async_trait;
use auction_sync::document::{
    AuctionDocument, AuctionRound, Bid, Nationality, Player, PlayerStatus, RoundPhase, RtmUsage,
    Team,
};
use auction_sync::engine::{EngineEvent, SyncEngine};
use auction_sync::notification::NotificationKind;
use auction_sync::round::commands::{
    handle_place_bid, handle_resolve_rtm, handle_sell, handle_start_round, PlaceBidCommand,
    ResolveRtmCommand, StartRoundCommand,
};
use auction_sync::round::{transforms, RejectReason};
use auction_sync::scheduler::run_expiry_check;
use auction_sync::store::{
    MemoryStore, RemoteChange, StoreAdapter, StoreError, Transform,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Tracing setup for tests that want log output.
fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .without_time()
        .with_target(false)
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn team(id: &str, name: &str, short_name: &str) -> Team {
    Team {
        id: id.to_string(),
        name: name.to_string(),
        short_name: short_name.to_string(),
        budget: 100_00,
        initial_budget: 100_00,
        squad: Vec::new(),
        rtm_used: RtmUsage::default(),
    }
}

fn player(id: &str, name: &str, nationality: Nationality, previous_team: Option<&str>) -> Player {
    Player {
        id: id.to_string(),
        name: name.to_string(),
        nationality,
        base_price: 2_00,
        status: PlayerStatus::Pending,
        previous_team_id: previous_team.map(str::to_string),
        ..Player::default()
    }
}

fn fixture() -> AuctionDocument {
    AuctionDocument {
        teams: vec![
            team("t1", "Chennai Super Kings", "CSK"),
            team("t2", "Mumbai Indians", "MI"),
            team("t3", "Royal Challengers Bengaluru", "RCB"),
        ],
        players: vec![
            player("p1", "Jasprit Bumrah", Nationality::Domestic, Some("t2")),
            player("p2", "Ben Stokes", Nationality::Overseas, None),
            player("p3", "Abhinav Manohar", Nationality::Domestic, None),
        ],
        ..AuctionDocument::default()
    }
}

async fn setup(doc: AuctionDocument) -> (Arc<MemoryStore>, Arc<SyncEngine>) {
    let store = MemoryStore::new(doc);
    let engine = SyncEngine::start(store.clone() as Arc<dyn StoreAdapter>)
        .await
        .expect("engine start");
    (store, engine)
}

async fn bid(engine: &SyncEngine, team_id: &str, amount: i64) -> Result<i64, RejectReason> {
    handle_place_bid(
        engine,
        PlaceBidCommand {
            team_id: team_id.to_string(),
            amount,
        },
    )
    .await
    .map(|accepted| accepted.amount)
}

/// Current amount only ever increases and the bid list stays strictly ordered
/// by decreasing amount, newest first.
#[tokio::test]
async fn bid_sequence_is_strictly_increasing() {
    let (store, engine) = setup(fixture()).await;
    handle_start_round(&engine, StartRoundCommand { player_id: "p1".into() })
        .await
        .unwrap();

    assert_eq!(bid(&engine, "t1", 2_00).await.unwrap(), 2_00);
    assert_eq!(bid(&engine, "t2", 2_25).await.unwrap(), 2_25);
    assert_eq!(bid(&engine, "t1", 2_50).await.unwrap(), 2_50);

    let doc = store.load().await.unwrap();
    let round = doc.round.expect("round live");
    assert_eq!(round.current_amount, 2_50);
    let amounts: Vec<i64> = round.bids.iter().map(|b| b.amount).collect();
    assert_eq!(amounts, vec![2_50, 2_25, 2_00]);
    assert_eq!(round.bids[0].team_id, "t1");
}

/// The opening bid is pinned to the base price, and the tier lookup is chosen
/// by the current amount: from 2.00 the next legal bid is 2.25, not 2.10.
#[tokio::test]
async fn opening_bid_and_tier_boundary_scenario() {
    let (_store, engine) = setup(fixture()).await;
    handle_start_round(&engine, StartRoundCommand { player_id: "p1".into() })
        .await
        .unwrap();

    let err = bid(&engine, "t1", 2_10).await.unwrap_err();
    assert_eq!(err, RejectReason::OpeningBidMismatch { base_price: 2_00 });

    bid(&engine, "t1", 2_00).await.unwrap();
    assert_eq!(
        transforms::next_bid_amount(&engine.document()),
        Some(2_25)
    );
}

/// A raced duplicate of the same transform is a silent no-op at commit time:
/// the state changes exactly once.
#[tokio::test]
async fn racing_commits_resolve_to_a_single_winner() {
    init_tracing();
    let (store, engine) = setup(fixture()).await;
    handle_start_round(&engine, StartRoundCommand { player_id: "p3".into() })
        .await
        .unwrap();
    bid(&engine, "t1", 2_00).await.unwrap();

    let now = Utc::now();
    let first: Transform = transforms::place_bid("race-1".into(), "t2".into(), 2_25, now);
    let second: Transform = transforms::place_bid("race-2".into(), "t3".into(), 2_25, now);

    // Both clients validated 2.25 against the same snapshot; the store's
    // commit order decides, and the loser's transform fails re-validation.
    store.commit(first, None).await.unwrap();
    store.commit(second, None).await.unwrap();

    let doc = store.load().await.unwrap();
    let round = doc.round.expect("round live");
    assert_eq!(round.current_amount, 2_25);
    assert_eq!(round.bids.len(), 2);
    assert_eq!(round.bids[0].team_id, "t2");
    assert!(round.bids.iter().all(|b| b.team_id != "t3"));
}

/// Simulates two clients detecting the same expiry: the second finalize finds
/// no round and returns the document unchanged (apart from the version bump).
#[tokio::test]
async fn finalize_is_idempotent_under_replay() {
    let doc = AuctionDocument {
        round: Some(AuctionRound {
            player_id: "p2".into(),
            current_amount: 3_00,
            bids: vec![Bid {
                id: "b1".into(),
                team_id: "t2".into(),
                team_name: "Mumbai Indians".into(),
                amount: 3_00,
                timestamp: Utc::now(),
            }],
            phase: RoundPhase::BiddingOpen,
            deadline: Some(Utc::now()),
            message: String::new(),
        }),
        ..fixture()
    };
    let store = MemoryStore::new(doc);

    let finalize = transforms::finalize_sale(Utc::now());
    store.commit(finalize.clone(), None).await.unwrap();
    let after_first = store.load().await.unwrap();

    store.commit(finalize, None).await.unwrap();
    let after_second = store.load().await.unwrap();

    assert_eq!(after_second.version, after_first.version + 1);
    let mut replayed = after_second.clone();
    replayed.version = after_first.version;
    assert_eq!(replayed, after_first);

    let buyer = after_second.team("t2").unwrap();
    assert_eq!(buyer.budget, 100_00 - 3_00);
    assert_eq!(buyer.squad.len(), 1);
    assert!(after_second.round.is_none());
}

/// Prior owner under both RTM caps: the sale parks in RightToMatchPending,
/// and accepting retains the player for the prior owner at the final amount.
#[tokio::test]
async fn rtm_detour_and_accept() {
    let (store, engine) = setup(fixture()).await;
    handle_start_round(&engine, StartRoundCommand { player_id: "p1".into() })
        .await
        .unwrap();
    bid(&engine, "t1", 2_00).await.unwrap();
    bid(&engine, "t3", 2_25).await.unwrap();

    let mut events = engine.events();

    handle_sell(&engine).await.unwrap();
    let doc = store.load().await.unwrap();
    let round = doc.round.expect("round must survive into the RTM window");
    assert_eq!(round.phase, RoundPhase::RightToMatchPending);
    assert_eq!(round.bids.len(), 2);

    handle_resolve_rtm(&engine, ResolveRtmCommand { accepted: true })
        .await
        .unwrap();

    let doc = store.load().await.unwrap();
    assert!(doc.round.is_none());
    let sold = doc.player("p1").unwrap();
    assert_eq!(sold.status, PlayerStatus::Sold);
    assert_eq!(sold.team_id.as_deref(), Some("t2"));
    assert_eq!(sold.sold_price, Some(2_25));
    assert!(sold.sold_via_rtm);

    let retainer = doc.team("t2").unwrap();
    assert_eq!(retainer.budget, 100_00 - 2_25);
    assert_eq!(retainer.rtm_used.domestic, 1);
    // The open-market leader pays nothing.
    assert_eq!(doc.team("t3").unwrap().budget, 100_00);

    // A SOLD notification rides the same commit.
    let mut saw_sold = false;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::Notification(n) = event {
            if n.kind == NotificationKind::Sold {
                assert_eq!(n.player.id, "p1");
                saw_sold = true;
            }
        }
    }
    assert!(saw_sold);
}

/// 6 of 6 domestic and 6 of 6 aggregate: the prior owner declines implicitly
/// and the sale goes straight to the open-market bidder.
#[tokio::test]
async fn exhausted_rtm_skips_the_detour() {
    let mut doc = fixture();
    doc.team_mut("t2").unwrap().rtm_used = RtmUsage {
        domestic: 6,
        overseas: 0,
    };
    let (store, engine) = setup(doc).await;

    handle_start_round(&engine, StartRoundCommand { player_id: "p1".into() })
        .await
        .unwrap();
    bid(&engine, "t1", 2_00).await.unwrap();
    handle_sell(&engine).await.unwrap();

    let doc = store.load().await.unwrap();
    assert!(doc.round.is_none());
    let sold = doc.player("p1").unwrap();
    assert_eq!(sold.status, PlayerStatus::Sold);
    assert_eq!(sold.team_id.as_deref(), Some("t1"));
    assert!(!sold.sold_via_rtm);
}

/// An accepted match without the funds to back it silently honours the
/// open-market bid and does not consume an RTM card.
#[tokio::test]
async fn rtm_accept_without_funds_falls_back() {
    let mut doc = fixture();
    doc.team_mut("t2").unwrap().budget = 1_00;
    let (store, engine) = setup(doc).await;

    handle_start_round(&engine, StartRoundCommand { player_id: "p1".into() })
        .await
        .unwrap();
    bid(&engine, "t1", 2_00).await.unwrap();
    handle_sell(&engine).await.unwrap();
    assert_eq!(
        store.load().await.unwrap().round.unwrap().phase,
        RoundPhase::RightToMatchPending
    );

    handle_resolve_rtm(&engine, ResolveRtmCommand { accepted: true })
        .await
        .unwrap();

    let doc = store.load().await.unwrap();
    let sold = doc.player("p1").unwrap();
    assert_eq!(sold.team_id.as_deref(), Some("t1"));
    assert!(!sold.sold_via_rtm);
    assert_eq!(doc.team("t2").unwrap().rtm_used.total(), 0);
    assert_eq!(doc.team("t2").unwrap().budget, 1_00);
}

/// From a fresh default document, a fixed script of
/// start / bids / finalize leaves exactly the sold player in the winner's
/// squad at the expected price, and budgets reconcile.
#[tokio::test]
async fn replay_script_from_default_document() {
    let (store, engine) = setup(AuctionDocument::default()).await;

    engine
        .apply(transforms::add_team(team("t1", "Chennai Super Kings", "CSK")), None)
        .await;
    engine
        .apply(transforms::add_team(team("t2", "Mumbai Indians", "MI")), None)
        .await;
    engine
        .apply(
            transforms::add_player(player("p2", "Ben Stokes", Nationality::Overseas, None)),
            None,
        )
        .await;

    handle_start_round(&engine, StartRoundCommand { player_id: "p2".into() })
        .await
        .unwrap();
    bid(&engine, "t1", 2_00).await.unwrap();
    bid(&engine, "t2", 2_25).await.unwrap();
    bid(&engine, "t1", 2_50).await.unwrap();
    handle_sell(&engine).await.unwrap();

    let doc = store.load().await.unwrap();
    assert!(doc.round.is_none());
    let winner = doc.team("t1").unwrap();
    assert_eq!(winner.squad.len(), 1);
    assert_eq!(winner.squad[0].id, "p2");
    assert_eq!(winner.squad[0].sold_price, Some(2_50));

    for team in &doc.teams {
        let spent: i64 = team.squad.iter().filter_map(|p| p.sold_price).sum();
        assert!(team.budget >= 0);
        assert_eq!(team.initial_budget - team.budget, spent);
    }
}

/// Expiry with no bids marks the player unsold; a second expiry check finds
/// nothing to do.
#[tokio::test]
async fn expiry_with_no_bids_goes_unsold() {
    let (store, engine) = setup(fixture()).await;
    handle_start_round(&engine, StartRoundCommand { player_id: "p3".into() })
        .await
        .unwrap();

    // Not yet expired.
    run_expiry_check(&engine, Utc::now()).await;
    assert!(store.load().await.unwrap().round.is_some());

    let past_deadline = Utc::now() + Duration::seconds(31);
    run_expiry_check(&engine, past_deadline).await;

    let doc = store.load().await.unwrap();
    assert!(doc.round.is_none());
    assert_eq!(doc.player("p3").unwrap().status, PlayerStatus::Unsold);

    let version = doc.version;
    run_expiry_check(&engine, past_deadline).await;
    assert_eq!(store.load().await.unwrap().version, version);
}

/// RTM windows expire into an implicit decline: the open-market bidder wins.
#[tokio::test]
async fn expired_rtm_window_auto_declines() {
    let (store, engine) = setup(fixture()).await;
    handle_start_round(&engine, StartRoundCommand { player_id: "p1".into() })
        .await
        .unwrap();
    bid(&engine, "t1", 2_00).await.unwrap();
    handle_sell(&engine).await.unwrap();
    assert_eq!(
        store.load().await.unwrap().round.unwrap().phase,
        RoundPhase::RightToMatchPending
    );

    run_expiry_check(&engine, Utc::now() + Duration::seconds(21)).await;

    let doc = store.load().await.unwrap();
    assert!(doc.round.is_none());
    assert_eq!(doc.player("p1").unwrap().team_id.as_deref(), Some("t1"));
    assert!(!doc.player("p1").unwrap().sold_via_rtm);
}

/// A finalizing client's own event consumers see the sale notification
/// exactly once: the optimistic copy, with the authoritative echo dropped.
#[tokio::test]
async fn sale_notification_is_delivered_exactly_once() {
    let (_store, engine) = setup(fixture()).await;
    handle_start_round(&engine, StartRoundCommand { player_id: "p2".into() })
        .await
        .unwrap();
    bid(&engine, "t1", 2_00).await.unwrap();

    let mut events = engine.events();
    handle_sell(&engine).await.unwrap();
    // Give the subscription loop time to process the echo.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let mut sold = 0;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::Notification(n) = event {
            if n.kind == NotificationKind::Sold {
                assert_eq!(n.player.id, "p2");
                sold += 1;
            }
        }
    }
    assert_eq!(sold, 1);
}

// region:    --- Scripted Store

/// Store whose change channel the test drives by hand, to exercise delivery
/// interleavings the in-memory adapter cannot produce on demand.
struct ScriptedStore {
    truth: AuctionDocument,
    changes: broadcast::Sender<RemoteChange>,
}

impl ScriptedStore {
    fn new(truth: AuctionDocument) -> Arc<Self> {
        let (changes, _) = broadcast::channel(8);
        Arc::new(Self { truth, changes })
    }

    fn push(&self, document: AuctionDocument) {
        let _ = self.changes.send(RemoteChange {
            document,
            notification: None,
        });
    }
}

#[async_trait]
impl StoreAdapter for ScriptedStore {
    async fn load(&self) -> Result<AuctionDocument, StoreError> {
        Ok(self.truth.clone())
    }

    async fn commit(
        &self,
        _transform: Transform,
        _notification: Option<auction_sync::notification::Notification>,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteChange> {
        self.changes.subscribe()
    }
}

/// Version 2 delivered before version 1 must not roll the local view back.
#[tokio::test]
async fn out_of_order_delivery_never_regresses_the_local_view() {
    let base = fixture();
    let mut newer = base.clone();
    newer.version = 2;
    let mut older = base.clone();
    older.version = 1;
    older.teams.clear();

    let store = ScriptedStore::new(base);
    let engine = SyncEngine::start(store.clone() as Arc<dyn StoreAdapter>)
        .await
        .unwrap();

    store.push(newer.clone());
    for _ in 0..50 {
        if engine.document().version == 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(engine.document().version, 2);

    store.push(older);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let local = engine.document();
    assert_eq!(local.version, 2);
    assert_eq!(local, newer);
}

// endregion: --- Scripted Store

// region:    --- Failing Store

/// Store whose commits always fail, to exercise the rollback path.
struct FailingStore {
    truth: AuctionDocument,
    changes: broadcast::Sender<RemoteChange>,
}

impl FailingStore {
    fn new(truth: AuctionDocument) -> Arc<Self> {
        let (changes, _) = broadcast::channel(8);
        Arc::new(Self { truth, changes })
    }
}

#[async_trait]
impl StoreAdapter for FailingStore {
    async fn load(&self) -> Result<AuctionDocument, StoreError> {
        Ok(self.truth.clone())
    }

    async fn commit(
        &self,
        _transform: Transform,
        _notification: Option<auction_sync::notification::Notification>,
    ) -> Result<(), StoreError> {
        let parse_error = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        Err(StoreError::Serialization(parse_error))
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteChange> {
        self.changes.subscribe()
    }
}

/// A failed commit discards the optimistic preview and restores the
/// authoritative document; no client drifts from truth.
#[tokio::test]
async fn failed_commit_rolls_back_the_preview() {
    let mut truth = fixture();
    truth.version = 9;
    let store = FailingStore::new(truth.clone());
    let engine = SyncEngine::start(store as Arc<dyn StoreAdapter>)
        .await
        .unwrap();

    let _ = handle_start_round(&engine, StartRoundCommand { player_id: "p1".into() }).await;

    let local = engine.document();
    assert!(local.round.is_none());
    assert_eq!(local, truth);
}

// endregion: --- Failing Store
