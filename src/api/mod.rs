//! HTTP API handlers

use crate::adapters::lms::registry::BROADCAST_NAME;
use crate::adapters::lms::{Action, ConnectionState, LmsController, LmsError, PlayerInfo};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub lms: LmsController,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(lms: LmsController) -> Self {
        Self {
            lms,
            started_at: Instant::now(),
        }
    }
}

/// Error response: `{code, status, message}`
#[derive(Serialize)]
struct ErrorResponse {
    code: u16,
    status: &'static str,
    message: String,
}

/// `LmsError` at the HTTP boundary
pub struct ApiError(LmsError);

impl From<LmsError> for ApiError {
    fn from(e: LmsError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self.0 {
            LmsError::NotFound(_) => (StatusCode::NOT_FOUND, "Not found"),
            LmsError::UnknownAction(_) => (StatusCode::NOT_ACCEPTABLE, "Not acceptable"),
            LmsError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "Gateway timeout"),
            LmsError::Connection(_) | LmsError::Protocol(_) => {
                (StatusCode::BAD_GATEWAY, "Bad gateway")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, status) = self.status();
        if code.is_server_error() {
            tracing::warn!("LMS request failed: {}", self.0);
        }
        (
            code,
            Json(ErrorResponse {
                code: code.as_u16(),
                status,
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// =============================================================================
// Summary
// =============================================================================

/// Default player fields shown on the summary page
const SUMMARY_KEYS: &[&str] = &["mixer volume", "mode", "playlist repeat", "power"];

/// GET / - Default player summary plus every player's status
pub async fn index_handler(State(state): State<AppState>) -> ApiResult<Value> {
    let default_player = match default_player_summary(&state.lms).await {
        Ok(summary) => summary,
        Err(e) => {
            let mut summary = Map::new();
            summary.insert("name".into(), json!(state.lms.default_player()));
            summary.insert("error".into(), json!(e.to_string()));
            summary
        }
    };

    let mut players = Map::new();
    for (name, native) in state.lms.list_players() {
        if name == BROADCAST_NAME {
            continue;
        }
        let info = state.lms.get_player_info_by_native(&native).await?;
        let mut entry = player_object(&info);
        entry.insert("mac".into(), json!(native));
        players.insert(name, Value::Object(entry));
    }

    Ok(Json(json!({
        "defaultplayer": default_player,
        "player": players,
    })))
}

async fn default_player_summary(lms: &LmsController) -> Result<Map<String, Value>, LmsError> {
    let native = lms.default_player_native()?;
    let info = lms.get_player_info_by_native(&native).await?;

    let mut summary = Map::new();
    summary.insert("name".into(), json!(lms.default_player()));
    summary.insert("mac".into(), json!(native));
    for &key in SUMMARY_KEYS {
        if let Some(value) = info.get(key) {
            let label = if key == "mixer volume" { "volume" } else { key };
            summary.insert(label.to_string(), json!(value));
        }
    }
    if let Some(title) = info.nested("remoteMeta").and_then(|meta| meta.get("title")) {
        summary.insert("title".into(), json!(title));
    }
    Ok(summary)
}

fn player_object(info: &PlayerInfo) -> Map<String, Value> {
    info.iter()
        .map(|(key, value)| (key.to_string(), json!(value)))
        .collect()
}

// =============================================================================
// Player handlers
// =============================================================================

/// GET /players - Human name to native id mapping
pub async fn players_handler(State(state): State<AppState>) -> Json<BTreeMap<String, String>> {
    Json(state.lms.list_players())
}

/// GET /{player} - Status by human name or native id
pub async fn player_handler(
    State(state): State<AppState>,
    Path(player): Path<String>,
) -> ApiResult<PlayerInfo> {
    Ok(Json(state.lms.get_player_info(&player).await?))
}

/// GET /mac/{player} - Status by native id
pub async fn mac_player_handler(
    State(state): State<AppState>,
    Path(player): Path<String>,
) -> ApiResult<PlayerInfo> {
    Ok(Json(state.lms.get_player_info_by_native(&player).await?))
}

/// GET /{player}/{command} - Run an action, return the fresh status
pub async fn player_command_handler(
    State(state): State<AppState>,
    Path((player, command)): Path<(String, String)>,
) -> ApiResult<PlayerInfo> {
    Ok(Json(state.lms.run_action(&player, &command).await?))
}

/// GET /mac/{player}/{command} - Run an action on a native id
pub async fn mac_player_command_handler(
    State(state): State<AppState>,
    Path((player, command)): Path<(String, String)>,
) -> ApiResult<PlayerInfo> {
    Ok(Json(state.lms.run_action_by_native(&player, &command).await?))
}

/// GET /play, /pause, ... - Run an action on the default player
pub async fn default_action(state: AppState, action: Action) -> ApiResult<PlayerInfo> {
    Ok(Json(state.lms.run_default_action(action).await?))
}

// =============================================================================
// Service handlers
// =============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connection: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub players: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub version: &'static str,
}

/// GET /healthcheck - Session is ready and answers a round trip
pub async fn healthcheck_handler(State(state): State<AppState>) -> impl IntoResponse {
    let result = state.lms.health().await;
    let connection = state.lms.connection_state();

    match result {
        Ok(count) if connection == ConnectionState::Ready => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "success",
                connection,
                players: Some(count),
                message: None,
                version: env!("LMSB_VERSION"),
            }),
        ),
        Ok(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(HealthResponse {
                status: "failure",
                connection,
                players: None,
                message: Some(format!("connection is {}", connection)),
                version: env!("LMSB_VERSION"),
            }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(HealthResponse {
                status: "failure",
                connection,
                players: None,
                message: Some(e.to_string()),
                version: env!("LMSB_VERSION"),
            }),
        ),
    }
}

/// Variables that configure the bridge; nothing else is reported
const REPORTED_ENV: &[&str] = &[
    "LMS_HOST",
    "LMS_PORT",
    "DEFAULT_PLAYER",
    "VOLUMESTEP",
    "PORT",
    "RUST_LOG",
];

fn reported_env() -> BTreeMap<String, String> {
    std::env::vars()
        .filter(|(name, _)| name.starts_with("LMSB_") || REPORTED_ENV.contains(&name.as_str()))
        .collect()
}

/// GET /environment - Build, platform and effective settings
pub async fn environment_handler(State(state): State<AppState>) -> Json<Value> {
    let lms = &state.lms;
    Json(json!({
        "application": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("LMSB_VERSION"),
            "git_sha": env!("LMSB_GIT_SHA"),
        },
        "platform": {
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "family": std::env::consts::FAMILY,
        },
        "process": {
            "pid": std::process::id(),
            "uptime_secs": state.started_at.elapsed().as_secs(),
        },
        "lms": {
            "endpoint": lms.endpoint(),
            "connection": lms.connection_state(),
            "io_timeout_ms": lms.io_timeout().as_millis() as u64,
            "default_player": lms.default_player(),
            "volume_step": lms.volume_step(),
            "actions": lms.action_names(),
        },
        "environ": reported_env(),
    }))
}

/// POST /refresh - Rebuild the player registry
pub async fn refresh_handler(State(state): State<AppState>) -> ApiResult<BTreeMap<String, String>> {
    Ok(Json(state.lms.refresh_players().await?))
}

#[derive(Serialize)]
pub struct ReconnectResponse {
    pub connection: ConnectionState,
    pub players: BTreeMap<String, String>,
}

/// POST /reconnect - Reopen the LMS session (leaves `failed`) and refresh players
pub async fn reconnect_handler(State(state): State<AppState>) -> ApiResult<ReconnectResponse> {
    let players = state.lms.restart().await?;
    Ok(Json(ReconnectResponse {
        connection: state.lms.connection_state(),
        players,
    }))
}

// =============================================================================
// Router
// =============================================================================

/// Build the HTTP router.
///
/// `/healthcheck` sits outside the trace layer so health checks stay out of the
/// request log.
pub fn router(state: AppState) -> Router {
    let health = Router::new().route("/healthcheck", get(healthcheck_handler));

    let api = Router::new()
        .route("/", get(index_handler))
        .route("/players", get(players_handler))
        .route("/environment", get(environment_handler))
        .route("/refresh", post(refresh_handler))
        .route("/reconnect", post(reconnect_handler))
        // Default player shortcuts
        .route("/play", get(|State(s): State<AppState>| default_action(s, Action::Play)))
        .route("/pause", get(|State(s): State<AppState>| default_action(s, Action::Pause)))
        .route("/poweron", get(|State(s): State<AppState>| default_action(s, Action::PowerOn)))
        .route("/poweroff", get(|State(s): State<AppState>| default_action(s, Action::PowerOff)))
        .route("/volup", get(|State(s): State<AppState>| default_action(s, Action::VolumeUp)))
        .route("/voldown", get(|State(s): State<AppState>| default_action(s, Action::VolumeDown)))
        .route("/next", get(|State(s): State<AppState>| default_action(s, Action::Next)))
        .route("/prev", get(|State(s): State<AppState>| default_action(s, Action::Previous)))
        // Players by native id
        .route("/mac/{player}", get(mac_player_handler))
        .route("/mac/{player}/{command}", get(mac_player_command_handler))
        // Players by name or native id
        .route("/{player}", get(player_handler))
        .route("/{player}/{command}", get(player_command_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    api.merge(health)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
