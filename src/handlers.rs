// region:    --- Imports
use crate::document::{AuctionRules, Player, Team};
use crate::engine::{EngineEvent, SyncEngine};
use crate::round::commands::{
    handle_mark_unsold as command_mark_unsold, handle_pause as command_pause,
    handle_place_bid as command_place_bid, handle_resolve_rtm as command_resolve_rtm,
    handle_resume as command_resume, handle_sell as command_sell,
    handle_start_round as command_start_round, PlaceBidCommand, ResolveRtmCommand,
    StartRoundCommand,
};
use crate::round::{transforms, RejectReason};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::info;
// endregion: --- Imports

// region:    --- App State

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
    pub auto_mode: Arc<watch::Sender<bool>>,
}

/// Maps a validation rejection to the 400 body shape the terminals expect:
/// the typed code plus a human-readable message.
fn reject_response(reason: RejectReason) -> axum::response::Response {
    let mut body = serde_json::to_value(&reason)
        .unwrap_or_else(|_| serde_json::json!({ "code": "REJECTED" }));
    body["error"] = serde_json::Value::String(reason.to_string());
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

// endregion: --- App State

// region:    --- Command Handlers

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub team_id: String,
    pub password: String,
}

/// Credential gate before a terminal may bid as a team.
pub async fn handle_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    info!("{:<12} --> login attempt: {}", "Auth", req.team_id);
    let doc = state.engine.document();
    let valid = doc
        .credentials
        .get(&req.team_id)
        .is_some_and(|secret| *secret == req.password);
    match (valid, doc.team(&req.team_id)) {
        (true, Some(team)) => (StatusCode::OK, Json(team.clone())).into_response(),
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "invalid team or password" })),
        )
            .into_response(),
    }
}

pub async fn handle_bid(
    State(state): State<AppState>,
    Json(cmd): Json<PlaceBidCommand>,
) -> impl IntoResponse {
    match command_place_bid(&state.engine, cmd).await {
        Ok(accepted) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "message": "bid accepted",
                "amount": accepted.amount,
            })),
        )
            .into_response(),
        Err(reason) => reject_response(reason),
    }
}

pub async fn handle_start_round(
    State(state): State<AppState>,
    Json(cmd): Json<StartRoundCommand>,
) -> impl IntoResponse {
    match command_start_round(&state.engine, cmd).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(reason) => reject_response(reason),
    }
}

pub async fn handle_pause_round(State(state): State<AppState>) -> impl IntoResponse {
    command_pause(&state.engine).await;
    StatusCode::OK
}

pub async fn handle_resume_round(State(state): State<AppState>) -> impl IntoResponse {
    command_resume(&state.engine).await;
    StatusCode::OK
}

pub async fn handle_sell(State(state): State<AppState>) -> impl IntoResponse {
    match command_sell(&state.engine).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(reason) => reject_response(reason),
    }
}

pub async fn handle_unsold(State(state): State<AppState>) -> impl IntoResponse {
    match command_mark_unsold(&state.engine).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(reason) => reject_response(reason),
    }
}

pub async fn handle_rtm(
    State(state): State<AppState>,
    Json(cmd): Json<ResolveRtmCommand>,
) -> impl IntoResponse {
    match command_resolve_rtm(&state.engine, cmd).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(reason) => reject_response(reason),
    }
}

#[derive(Debug, Deserialize)]
pub struct AutoModeRequest {
    pub enabled: bool,
}

pub async fn handle_auto_mode(
    State(state): State<AppState>,
    Json(req): Json<AutoModeRequest>,
) -> impl IntoResponse {
    info!("{:<12} --> auto mode: {}", "Command", req.enabled);
    let _ = state.auto_mode.send(req.enabled);
    StatusCode::OK
}

pub async fn handle_reset(State(state): State<AppState>) -> impl IntoResponse {
    info!("{:<12} --> reset auction", "Command");
    state.engine.apply(transforms::reset_auction(), None).await;
    StatusCode::OK
}

pub async fn handle_add_team(
    State(state): State<AppState>,
    Json(team): Json<Team>,
) -> impl IntoResponse {
    info!("{:<12} --> add team: {}", "Command", team.id);
    state.engine.apply(transforms::add_team(team), None).await;
    StatusCode::CREATED
}

pub async fn handle_add_player(
    State(state): State<AppState>,
    Json(player): Json<Player>,
) -> impl IntoResponse {
    info!("{:<12} --> add player: {}", "Command", player.id);
    state.engine.apply(transforms::add_player(player), None).await;
    StatusCode::CREATED
}

pub async fn handle_put_rules(
    State(state): State<AppState>,
    Json(rules): Json<AuctionRules>,
) -> impl IntoResponse {
    info!("{:<12} --> replace rules", "Command");
    state.engine.apply(transforms::replace_rules(rules), None).await;
    StatusCode::OK
}

// endregion: --- Command Handlers

// region:    --- Query Handlers

pub async fn handle_get_state(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.document())
}

pub async fn handle_get_round(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.document().round)
}

/// Advisory: the next legal amount a terminal should propose.
pub async fn handle_get_next_bid(State(state): State<AppState>) -> impl IntoResponse {
    let doc = state.engine.document();
    match transforms::next_bid_amount(&doc) {
        Some(amount) => Json(serde_json::json!({ "next_bid": amount })).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn handle_get_teams(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.document().teams)
}

pub async fn handle_get_players(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.document().players)
}

pub async fn handle_get_player(
    State(state): State<AppState>,
    Path(player_id): Path<String>,
) -> impl IntoResponse {
    match state.engine.document().player(&player_id) {
        Some(player) => Json(player.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// endregion: --- Query Handlers

// region:    --- Event Stream

fn sse_event(event: EngineEvent) -> Option<Result<Event, Infallible>> {
    let (name, data) = match event {
        EngineEvent::Document(doc) => ("document", serde_json::to_string(&doc).ok()?),
        EngineEvent::Notification(n) => ("notification", serde_json::to_string(&n).ok()?),
    };
    Some(Ok(Event::default().event(name).data(data)))
}

/// Relays document updates and transient notifications to viewer displays.
pub async fn handle_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.engine.events()).filter_map(|event| match event {
        Ok(event) => sse_event(event),
        // A lagged viewer just waits for the next document snapshot.
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// endregion: --- Event Stream
