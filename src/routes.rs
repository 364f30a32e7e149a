use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AppError;
use crate::state::AppState;
use crate::sync::ws::ws_handler;
use crate::sync::{ConnectedUser, HubStats};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/stats", get(stats))
        .route("/users", get(users))
        .route("/system-message", post(system_message))
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn stats(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.stats())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UsersResponse {
    count: usize,
    users: Vec<ConnectedUser>,
}

async fn users(State(state): State<AppState>) -> Json<UsersResponse> {
    let users = state.hub.connected_users();
    Json(UsersResponse {
        count: users.len(),
        users,
    })
}

#[derive(Debug, Deserialize)]
pub struct SystemMessageRequest {
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

async fn system_message(
    State(state): State<AppState>,
    Json(body): Json<SystemMessageRequest>,
) -> Result<StatusCode, AppError> {
    if body.message.trim().is_empty() {
        return Err(AppError::BadRequest("message must not be empty".to_string()));
    }
    info!("broadcasting system message: {}", body.message);
    state.hub.broadcast_system(body.message, body.data);
    Ok(StatusCode::ACCEPTED)
}
