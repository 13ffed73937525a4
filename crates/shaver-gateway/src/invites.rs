use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use shaver_types::models::Group;
use shaver_types::roles::Role;

use crate::convert;
use crate::error::ChatError;
use crate::store::Store;

/// Invite codes older than this are replaced by the periodic sweep.
pub fn rotation_period() -> chrono::Duration {
    chrono::Duration::hours(1)
}

pub const CODE_LEN: usize = 8;

/// Collision retries before giving up on a rotation.
pub const MAX_CODE_ATTEMPTS: usize = 10;

// No 0/O or 1/I, codes get read aloud and typed by hand.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Codes are matched case-insensitively and ignoring surrounding whitespace.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

pub fn due_for_rotation(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - updated_at >= rotation_period()
}

/// Generates, rotates and redeems group invite codes.
#[derive(Clone)]
pub struct InviteRotator {
    store: Store,
}

impl InviteRotator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Replace the group's code with a fresh one, unique across all groups.
    /// Every call produces a new code; the old one stops working at once.
    pub async fn rotate(&self, group_id: Uuid) -> Result<String, ChatError> {
        self.rotate_at(group_id, convert::now()).await
    }

    async fn rotate_at(&self, group_id: Uuid, now: DateTime<Utc>) -> Result<String, ChatError> {
        let gid = group_id.to_string();
        let at = convert::stamp(now);
        let code = self
            .store
            .call(move |db| db.replace_invite_code(&gid, &at, generate_code, MAX_CODE_ATTEMPTS))
            .await?
            .ok_or(ChatError::NotFound("group"))?;

        info!("Rotated invite code for group {}", group_id);
        Ok(code)
    }

    /// Rotate every group whose code is due at `now`. Returns how many were
    /// rotated; a failure on one group does not stop the sweep.
    pub async fn rotate_due(&self, now: DateTime<Utc>) -> Result<usize, ChatError> {
        let ages = self.store.call(|db| db.invite_code_ages()).await?;

        let mut rotated = 0;
        for (id, updated_at) in ages {
            let parsed = convert::parse_id(&id)
                .and_then(|gid| Ok((gid, convert::parse_stamp(&updated_at)?)));
            let (group_id, updated_at) = match parsed {
                Ok(v) => v,
                Err(e) => {
                    warn!("Skipping group during rotation: {:#}", e);
                    continue;
                }
            };
            if !due_for_rotation(updated_at, now) {
                continue;
            }
            match self.rotate_at(group_id, now).await {
                Ok(_) => rotated += 1,
                Err(e) => warn!("Failed to rotate invite code for {}: {}", group_id, e),
            }
        }

        Ok(rotated)
    }

    /// Redeem an invite code. Only the group's current code matches.
    /// Concurrent joins by the same user create exactly one membership; the
    /// others fail `AlreadyMember`.
    pub async fn join(&self, code: &str, user_id: Uuid) -> Result<Group, ChatError> {
        let code = normalize_code(code);
        if code.len() != CODE_LEN {
            return Err(ChatError::InvalidCode);
        }

        let uid = user_id.to_string();
        let joined_at = convert::stamp(convert::now());
        let (row, inserted) = self
            .store
            .call(move |db| db.join_by_invite_code(&code, &uid, Role::Member.as_str(), &joined_at))
            .await?
            .ok_or(ChatError::InvalidCode)?;

        if !inserted {
            return Err(ChatError::AlreadyMember);
        }

        let group = convert::group(row)?;
        info!("{} joined group {} via invite code", user_id, group.id);
        Ok(group)
    }
}
