use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use shaver_types::api::Claims;

use crate::error::ChatError;

/// Who is behind a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            username: claims.username,
        }
    }
}

/// Given a token, recover the identity or fail with `Unauthenticated`.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity, ChatError>;
}

/// HS256 JWT verifier, the counterpart of [`issue_token`].
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

impl IdentityVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Identity, ChatError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|_| ChatError::Unauthenticated)?;
        Ok(data.claims.into())
    }
}

pub fn issue_token(
    secret: &str,
    user_id: Uuid,
    username: &str,
    ttl: chrono::Duration,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_verify() {
        let id = Uuid::new_v4();
        let token = issue_token("s3cret", id, "alice", chrono::Duration::hours(1)).unwrap();
        let identity = JwtVerifier::new("s3cret").verify(&token).unwrap();
        assert_eq!(identity.user_id, id);
        assert_eq!(identity.username, "alice");
    }

    #[test]
    fn wrong_secret_or_expiry_is_unauthenticated() {
        let id = Uuid::new_v4();
        let token = issue_token("s3cret", id, "alice", chrono::Duration::hours(1)).unwrap();
        assert!(matches!(
            JwtVerifier::new("other").verify(&token),
            Err(ChatError::Unauthenticated)
        ));

        let expired = issue_token("s3cret", id, "alice", chrono::Duration::hours(-2)).unwrap();
        assert!(matches!(
            JwtVerifier::new("s3cret").verify(&expired),
            Err(ChatError::Unauthenticated)
        ));
        assert!(JwtVerifier::new("s3cret").verify("garbage").is_err());
    }
}
