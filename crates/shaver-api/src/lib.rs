pub mod auth;
pub mod files;
pub mod groups;
pub mod messages;
pub mod middleware;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{delete, get, post},
};

use shaver_gateway::identity::JwtVerifier;
use shaver_gateway::service::ChatService;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub chat: ChatService,
    pub jwt_secret: String,
    pub verifier: JwtVerifier,
    pub token_ttl: chrono::Duration,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

/// Every REST route. The WebSocket endpoint is mounted by the server.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let upload_limit = state.max_upload_bytes;
    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/groups", get(groups::list_groups).post(groups::create_group))
        .route("/groups/join", post(groups::join_group))
        .route("/groups/{group_id}", get(groups::get_group))
        .route("/groups/{group_id}/leave", post(groups::leave_group))
        .route(
            "/groups/{group_id}/members",
            get(groups::list_members).post(groups::add_member),
        )
        .route("/groups/{group_id}/members/{user_id}", delete(groups::remove_member))
        .route(
            "/groups/{group_id}/acting-leaders/{user_id}",
            post(groups::set_acting_leader).delete(groups::remove_acting_leader),
        )
        .route("/groups/{group_id}/invite-code", post(groups::rotate_invite_code))
        .route(
            "/groups/{group_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/groups/{group_id}/files",
            // Leave headroom so the handler can report the size itself.
            post(files::upload_file).layer(DefaultBodyLimit::max(upload_limit + 1)),
        )
        .route("/groups/{group_id}/files/{file_id}", get(files::download_file))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.chat.registry().connection_count().await,
    }))
}
