use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{info, warn};
use uuid::Uuid;

use shaver_db::queries::is_constraint_violation;
use shaver_gateway::identity::{Identity, issue_token};
use shaver_gateway::{ChatError, convert};
use shaver_types::api::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::AppState;

fn validate_registration(req: &RegisterRequest) -> Result<(), ChatError> {
    let name_len = req.username.chars().count();
    if !(3..=32).contains(&name_len) {
        return Err(ChatError::validation("username must be 3-32 characters"));
    }
    if !req
        .username
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(ChatError::validation(
            "username may only contain letters, digits, '_', '-' and '.'",
        ));
    }
    let email = req.email.trim();
    if email.len() > 254 || !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(ChatError::validation("email address is not valid"));
    }
    if req.password.len() < 8 {
        return Err(ChatError::validation("password must be at least 8 characters"));
    }
    Ok(())
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ChatError> {
    validate_registration(&req)?;
    let email = req.email.trim().to_ascii_lowercase();

    // Check if username or email is taken
    let (username, email_check) = (req.username.clone(), email.clone());
    let taken = state
        .chat
        .store()
        .call(move |db| {
            if db.get_user_by_username(&username)?.is_some() {
                return Ok(Some("username"));
            }
            if db.get_user_by_email(&email_check)?.is_some() {
                return Ok(Some("email"));
            }
            Ok(None)
        })
        .await?;
    if let Some(field) = taken {
        return Err(ChatError::Conflict(field));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user_id = Uuid::new_v4();
    let (uid, username) = (user_id.to_string(), req.username.clone());
    let created_at = convert::stamp(convert::now());
    let created = state
        .chat
        .store()
        .call(move |db| match db.create_user(&uid, &username, &email, &password_hash, &created_at) {
            // Lost a race with a concurrent registration.
            Err(e) if is_constraint_violation(&e) => Ok(false),
            other => other.map(|_| true),
        })
        .await?;
    if !created {
        return Err(ChatError::Conflict("username or email"));
    }

    let token = issue_token(&state.jwt_secret, user_id, &req.username, state.token_ttl)?;
    info!("Registered {} ({})", req.username, user_id);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { user_id, token }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let username = req.username.clone();
    let user = state
        .chat
        .store()
        .call(move |db| db.get_user_by_username(&username))
        .await?
        .ok_or(ChatError::Unauthenticated)?;

    if !user.is_active {
        warn!("Login attempt for deactivated account {}", user.username);
        return Err(ChatError::Unauthenticated);
    }

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored hash for {} is corrupt: {}", user.username, e))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ChatError::Unauthenticated)?;

    let user_id = convert::parse_id(&user.id)?;
    let token = issue_token(&state.jwt_secret, user_id, &user.username, state.token_ttl)?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        token,
    }))
}

/// The caller's own account.
pub async fn me(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ChatError> {
    let uid = identity.user_id.to_string();
    let row = state
        .chat
        .store()
        .call(move |db| db.get_user_by_id(&uid))
        .await?
        .ok_or(ChatError::NotFound("user"))?;
    Ok(Json(convert::user(row)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    #[test]
    fn accepts_reasonable_registrations() {
        assert!(validate_registration(&request("alice", "alice@example.com", "hunter22")).is_ok());
        assert!(validate_registration(&request("bob_the-2nd", "b@x.io", "longenough")).is_ok());
    }

    #[test]
    fn rejects_bad_fields() {
        for req in [
            request("al", "alice@example.com", "hunter22"),
            request(&"a".repeat(33), "alice@example.com", "hunter22"),
            request("al ice", "alice@example.com", "hunter22"),
            request("alice", "not-an-email", "hunter22"),
            request("alice", "alice@", "hunter22"),
            request("alice", "alice@example.com", "short"),
        ] {
            assert!(matches!(validate_registration(&req), Err(ChatError::Validation(_))));
        }
    }
}
