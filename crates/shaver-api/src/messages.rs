use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use shaver_gateway::ChatError;
use shaver_gateway::identity::Identity;
use shaver_types::api::SendMessageRequest;

use crate::AppState;

const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination: pass the `created_at` of the oldest message
    /// from the previous page to fetch older messages.
    pub before: Option<DateTime<Utc>>,
}

fn default_limit() -> u32 {
    50
}

/// REST counterpart of the WebSocket posting commands; the message is
/// broadcast to the group's live connections all the same.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(group_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let message = state
        .chat
        .post_message(&identity, group_id, req.message_type, req.body)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(group_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, ChatError> {
    let limit = query.limit.clamp(1, MAX_PAGE);
    let messages = state
        .chat
        .history(identity.user_id, group_id, limit, query.before)
        .await?;
    Ok(Json(messages))
}
