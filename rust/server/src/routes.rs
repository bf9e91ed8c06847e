use ai::{build_chooser, AiError, ChooseRequest, ChooseResponse, Difficulty, LocalChooser, ScoringTransport};
use axum::body::Body;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, Request};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use dashmap::DashMap;
use engine::{deserialize_state, PlayMode, PlayerId, Snapshot, TokenId};
use futures_util::future::BoxFuture;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower::ServiceExt;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};
use uuid::Uuid;

use crate::actor::{spawn_match, Command, MatchHandle, MatchServices};
use crate::config::{MatchSettings, ServerConfig};
use crate::error::ApiError;
use crate::session::{MatchSession, MatchView};
use crate::store::{MatchRecord, Stores};

#[derive(Clone)]
pub struct AppState {
    pub matches: Arc<DashMap<String, MatchHandle>>,
    pub services: MatchServices,
    /// Backs `/api/ai-move`; always the in-process heuristic.
    pub scorer: Arc<LocalChooser>,
}

impl AppState {
    pub fn new(services: MatchServices) -> Self {
        Self {
            matches: Arc::new(DashMap::new()),
            services,
            scorer: Arc::new(LocalChooser::new()),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self, AiError> {
        let chooser = build_chooser(&config.ai)?;
        let stores = Stores::open(config.data_dir.as_deref());
        Ok(Self::new(MatchServices {
            chooser,
            stores,
            timing: config.timing,
        }))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/history", get(get_history))
        .route("/match", post(create_match))
        .route("/match/:id", get(get_match).delete(delete_match))
        .route("/match/:id/legal", get(get_legal))
        .route("/match/:id/roll", post(roll))
        .route("/match/:id/move", post(play_move))
        .route("/match/:id/skip", post(skip))
        .route("/match/:id/undo", post(undo))
        .route("/match/:id/pause", post(pause))
        .route("/match/:id/resume", post(resume))
        .route("/match/:id/restart", post(restart))
        .route("/match/:id/players/:player_id", patch(update_player))
        .route("/ws/match/:id", get(ws_match))
        .route("/api/ai-move", post(ai_move))
        .route("/api/validate", post(validate))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

// ---------------- Request / response bodies ----------------

/// Unset fields fall back to the stored settings.
#[derive(Debug, Clone, Default, Deserialize)]
struct CreateMatchRequest {
    #[serde(default)]
    player_count: Option<usize>,
    #[serde(default)]
    mode: Option<PlayMode>,
    #[serde(default)]
    ai_difficulty: Option<Difficulty>,
    /// Fixes the dice sequence and AI delays.
    #[serde(default)]
    seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct MoveRequest {
    token_id: TokenId,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RestartRequest {
    #[serde(default)]
    settings: Option<MatchSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PlayerUpdateRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct LegalMovesResponse {
    id: String,
    player_id: PlayerId,
    roll: Option<u8>,
    moves: Vec<TokenId>,
}

#[derive(Debug, Clone, Deserialize)]
struct ValidateRequest {
    state: Snapshot,
}

#[derive(Debug, Clone, Serialize)]
struct ValidateResponse {
    valid: bool,
    detail: Option<String>,
}

// ---------------- Handlers ----------------

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn get_settings(State(app): State<AppState>) -> Json<MatchSettings> {
    Json(app.services.stores.settings())
}

async fn put_settings(
    State(app): State<AppState>,
    payload: Result<Json<MatchSettings>, JsonRejection>,
) -> Result<Json<MatchSettings>, ApiError> {
    let Json(settings) = payload?;
    settings
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    app.services.stores.save_settings(settings)?;
    info!(?settings, "settings saved");
    Ok(Json(settings))
}

async fn get_history(State(app): State<AppState>) -> Json<Vec<MatchRecord>> {
    Json(app.services.stores.history())
}

async fn create_match(
    State(app): State<AppState>,
    payload: Result<Json<CreateMatchRequest>, JsonRejection>,
) -> Result<Json<MatchView>, ApiError> {
    let Json(req) = payload?;
    let stored = app.services.stores.settings();
    let settings = MatchSettings {
        player_count: req.player_count.unwrap_or(stored.player_count),
        mode: req.mode.unwrap_or(stored.mode),
        ai_difficulty: req.ai_difficulty.unwrap_or(stored.ai_difficulty),
    };
    let id = Uuid::new_v4().to_string()[..8].to_string();
    let session = MatchSession::new(id.clone(), settings)?;
    let handle = spawn_match(session, app.services.clone(), req.seed);
    app.matches.insert(id.clone(), handle.clone());
    info!(match_id = %id, players = settings.player_count, mode = ?settings.mode, "match created");
    Ok(Json(handle.view().await?))
}

fn match_handle(app: &AppState, id: &str) -> Result<MatchHandle, ApiError> {
    app.matches
        .get(id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| ApiError::not_found("match not found"))
}

async fn dispatch(app: &AppState, id: &str, command: Command) -> Result<Json<MatchView>, ApiError> {
    let handle = match_handle(app, id)?;
    Ok(Json(handle.send(command).await?))
}

async fn get_match(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MatchView>, ApiError> {
    dispatch(&app, &id, Command::View).await
}

/// Stop the match actor and forget the match.
async fn delete_match(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MatchView>, ApiError> {
    let (_, handle) = app
        .matches
        .remove(&id)
        .ok_or_else(|| ApiError::not_found("match not found"))?;
    let view = handle.close().await?;
    info!(match_id = %id, "match deleted");
    Ok(Json(view))
}

async fn get_legal(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LegalMovesResponse>, ApiError> {
    let Json(view) = dispatch(&app, &id, Command::View).await?;
    let player_id = view
        .state
        .players
        .get(view.state.current_player)
        .map(|p| p.id)
        .unwrap_or_default();
    Ok(Json(LegalMovesResponse {
        id,
        player_id,
        roll: view.state.dice.value(),
        moves: view.legal_moves,
    }))
}

async fn roll(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MatchView>, ApiError> {
    dispatch(&app, &id, Command::Roll).await
}

async fn play_move(
    State(app): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<MoveRequest>, JsonRejection>,
) -> Result<Json<MatchView>, ApiError> {
    let Json(body) = payload?;
    dispatch(&app, &id, Command::Move(body.token_id)).await
}

async fn skip(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MatchView>, ApiError> {
    dispatch(&app, &id, Command::Skip).await
}

async fn undo(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MatchView>, ApiError> {
    dispatch(&app, &id, Command::Undo).await
}

async fn pause(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MatchView>, ApiError> {
    dispatch(&app, &id, Command::Pause).await
}

async fn resume(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MatchView>, ApiError> {
    dispatch(&app, &id, Command::Resume).await
}

async fn restart(
    State(app): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<RestartRequest>, JsonRejection>,
) -> Result<Json<MatchView>, ApiError> {
    let Json(body) = payload?;
    if let Some(settings) = &body.settings {
        settings
            .validate()
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
    }
    dispatch(&app, &id, Command::Restart(body.settings)).await
}

async fn update_player(
    State(app): State<AppState>,
    path: Result<Path<(String, PlayerId)>, PathRejection>,
    payload: Result<Json<PlayerUpdateRequest>, JsonRejection>,
) -> Result<Json<MatchView>, ApiError> {
    let Path((id, player_id)) = path?;
    let Json(body) = payload?;
    let command = Command::UpdatePlayer {
        player_id,
        name: body.name,
        avatar: body.avatar,
    };
    dispatch(&app, &id, command).await
}

async fn ai_move(
    State(app): State<AppState>,
    payload: Result<Json<ChooseRequest>, JsonRejection>,
) -> Result<Json<ChooseResponse>, ApiError> {
    let Json(request) = payload?;
    let token_id = app
        .scorer
        .choose_now(&request)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    debug!(player_id = request.player_id, roll = request.roll, ?token_id, "scored");
    Ok(Json(ChooseResponse { token_id }))
}

async fn validate(
    payload: Result<Json<ValidateRequest>, JsonRejection>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let Json(body) = payload?;
    let response = match deserialize_state(&body.state) {
        Ok(_) => ValidateResponse {
            valid: true,
            detail: None,
        },
        Err(err) => ValidateResponse {
            valid: false,
            detail: Some(err.to_string()),
        },
    };
    Ok(Json(response))
}

// --- WebSocket ---

async fn ws_match(
    State(app): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let handle = match_handle(&app, &id)?;
    Ok(ws.on_upgrade(move |socket| handle_ws(handle, socket)))
}

async fn send_view(sender: &mut SplitSink<WebSocket, Message>, view: &MatchView) -> bool {
    let Ok(text) = serde_json::to_string(view) else {
        return false;
    };
    sender.send(Message::Text(text)).await.is_ok()
}

async fn handle_ws(handle: MatchHandle, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = handle.subscribe();
    // Send current state once.
    let Ok(current) = handle.view().await else {
        return;
    };
    if !send_view(&mut sender, &current).await {
        return;
    }

    // The feed ends when the actor stops, so it must not keep the match alive.
    let match_id = handle.id().to_string();
    drop(handle);
    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(view) => {
                    if !send_view(&mut sender, &view).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(%match_id, skipped, "ws subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }
}

// --- In-process scoring transport ---

/// Serves scoring requests from a router without a socket.
#[derive(Clone)]
pub struct RouterTransport {
    router: Router,
}

impl RouterTransport {
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

impl ScoringTransport for RouterTransport {
    fn post_json<'a>(
        &'a self,
        path: &'a str,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<(u16, Vec<u8>), AiError>> {
        Box::pin(async move {
            let request = Request::builder()
                .method(Method::POST)
                .uri(path)
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .map_err(|e| AiError::Transport(e.to_string()))?;
            let response = self
                .router
                .clone()
                .oneshot(request)
                .await
                .map_err(|e| AiError::Transport(e.to_string()))?;
            let status = response.status().as_u16();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .map_err(|e| AiError::Transport(e.to_string()))?;
            Ok((status, bytes.to_vec()))
        })
    }
}
