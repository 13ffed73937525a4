use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use shaver_gateway::ChatError;
use shaver_gateway::identity::IdentityVerifier;

use crate::AppState;

/// Extract and validate the bearer token, then make the caller's
/// [`Identity`](shaver_gateway::identity::Identity) available to handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ChatError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ChatError::Unauthenticated)?;

    let identity = state.verifier.verify(token)?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
