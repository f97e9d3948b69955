// region:    --- Imports
use auction_sync::document::AuctionDocument;
use auction_sync::engine::SyncEngine;
use auction_sync::handlers::{self, AppState};
use auction_sync::scheduler::DeadlineScheduler;
use auction_sync::sequencer::AutoSequencer;
use auction_sync::store::{MemoryStore, PostgresStore, StoreAdapter};
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
// endregion: --- Imports

// region:    --- Main
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .without_time()
        .with_target(false)
        .init();

    // Store selection: Postgres when configured, otherwise the in-process
    // store (single-terminal / demo mode).
    let store: Arc<dyn StoreAdapter> = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let store = PostgresStore::connect(&url).await?;
            info!("{:<12} --> using Postgres store", "Main");
            store
        }
        Err(_) => {
            warn!(
                "{:<12} --> DATABASE_URL not set, using in-memory store",
                "Main"
            );
            MemoryStore::new(AuctionDocument::default())
        }
    };

    let engine = SyncEngine::start(store).await?;
    info!("{:<12} --> engine synchronized", "Main");

    DeadlineScheduler::new(Arc::clone(&engine)).start();

    let (auto_mode, _) = watch::channel(false);
    let auto_mode = Arc::new(auto_mode);
    AutoSequencer::new(Arc::clone(&engine), Arc::clone(&auto_mode)).start();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = AppState { engine, auto_mode };
    let routes_all = Router::new()
        .route("/login", post(handlers::handle_login))
        .route("/bid", post(handlers::handle_bid))
        .route("/round/start", post(handlers::handle_start_round))
        .route("/round/pause", post(handlers::handle_pause_round))
        .route("/round/resume", post(handlers::handle_resume_round))
        .route("/round/sell", post(handlers::handle_sell))
        .route("/round/unsold", post(handlers::handle_unsold))
        .route("/rtm", post(handlers::handle_rtm))
        .route("/auto", post(handlers::handle_auto_mode))
        .route("/reset", post(handlers::handle_reset))
        .route(
            "/teams",
            get(handlers::handle_get_teams).post(handlers::handle_add_team),
        )
        .route(
            "/players",
            get(handlers::handle_get_players).post(handlers::handle_add_player),
        )
        .route("/rules", put(handlers::handle_put_rules))
        .route("/state", get(handlers::handle_get_state))
        .route("/round", get(handlers::handle_get_round))
        .route("/round/next-bid", get(handlers::handle_get_next_bid))
        .route("/players/:id", get(handlers::handle_get_player))
        .route("/events", get(handlers::handle_events))
        .layer(cors)
        .with_state(state);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = TcpListener::bind(&bind_addr).await?;
    info!(
        "{:<12} --> Web Server: Listening on {}",
        "Main",
        listener.local_addr()?
    );

    if let Err(err) = axum::serve(listener, routes_all.into_make_service()).await {
        error!("{:<12} --> Server error: {}", "Main", err);
    }
    Ok(())
}
// endregion: --- Main
