mod config;
mod rotation;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use shaver_api::AppStateInner;
use shaver_db::Database;
use shaver_gateway::identity::{IdentityVerifier, JwtVerifier};
use shaver_gateway::registry::Registry;
use shaver_gateway::service::ChatService;
use shaver_gateway::session;

use crate::config::Config;

#[derive(Clone)]
struct WsState {
    chat: ChatService,
    verifier: Arc<dyn IdentityVerifier>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token
/// travels in the query string.
#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "shaver=debug,shaver_gateway=debug,shaver_api=debug,shaver_db=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("FATAL: {:#}", e);
            std::process::exit(1);
        }
    };

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);
    tokio::fs::create_dir_all(&config.upload_dir).await?;

    // Shared state
    let registry = Registry::new();
    let chat = ChatService::new(db, registry.clone(), config.store_timeout);
    let verifier = JwtVerifier::new(&config.jwt_secret);

    let app_state = Arc::new(AppStateInner {
        chat: chat.clone(),
        jwt_secret: config.jwt_secret.clone(),
        verifier: verifier.clone(),
        token_ttl: config.token_ttl,
        upload_dir: config.upload_dir.clone(),
        max_upload_bytes: config.max_upload_bytes,
    });

    let ws_state = WsState {
        chat: chat.clone(),
        verifier: Arc::new(verifier),
    };

    // Background invite rotation
    let rotation = tokio::spawn(rotation::run_rotation_loop(
        chat.invites().clone(),
        config.rotation_sweep,
    ));

    // Routes
    let ws_route = Router::new()
        .route("/groups/{group_id}/ws", get(ws_upgrade))
        .with_state(ws_state);

    let app = Router::new()
        .merge(shaver_api::router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Shaver server listening on {}", config.addr);
    info!(
        "Invite codes rotate hourly (sweep every {:?}); uploads in {}",
        config.rotation_sweep,
        config.upload_dir.display()
    );

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry.clone()))
        .await?;

    rotation.abort();
    info!("Shaver server stopped");
    Ok(())
}

async fn ws_upgrade(
    State(state): State<WsState>,
    Path(group_id): Path<Uuid>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        session::handle_connection(socket, state.chat, state.verifier, group_id, query.token)
    })
}

/// Wait for Ctrl+C / SIGTERM, then drop every live connection so the
/// WebSocket tasks finish and the server can drain.
async fn shutdown_signal(registry: Registry) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }

    registry.close_all().await;
}
