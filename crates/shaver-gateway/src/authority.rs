use tracing::warn;
use uuid::Uuid;

use shaver_types::models::{Group, GroupMember};
use shaver_types::roles::{Action, Role, permits};

use crate::convert;
use crate::error::ChatError;
use crate::store::Store;

/// Result of a successful permission check.
#[derive(Debug, Clone)]
pub struct Grant {
    pub group: Group,
    pub actor_role: Role,
    /// The member being acted on, for targeted actions.
    pub target: Option<GroupMember>,
}

/// Membership & role checks. Nothing is cached: every call re-reads the
/// membership rows, so a revoked role is gone on the very next action.
#[derive(Clone)]
pub struct Authority {
    store: Store,
}

impl Authority {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// `None` when the user has no membership row in the group.
    pub async fn role_of(&self, user_id: Uuid, group_id: Uuid) -> Result<Option<Role>, ChatError> {
        let (gid, uid) = (group_id.to_string(), user_id.to_string());
        let role = self
            .store
            .call(move |db| db.get_member_role(&gid, &uid))
            .await?;
        Ok(role.as_deref().map(convert::parse_role).transpose()?)
    }

    /// Check that `actor` may perform `action` (on `target`, for targeted
    /// actions) in `group_id`.
    ///
    /// Fails `NotFound` for a missing group or target member and `Forbidden`
    /// when the policy refuses. The group creator can never be removed.
    pub async fn require(
        &self,
        actor: Uuid,
        group_id: Uuid,
        action: Action,
        target: Option<Uuid>,
    ) -> Result<Grant, ChatError> {
        let gid = group_id.to_string();
        let aid = actor.to_string();
        let tid = target.map(|t| t.to_string());

        let (group, actor_role, target_row) = self
            .store
            .call(move |db| {
                let Some(group) = db.get_group(&gid)? else {
                    return Ok(None);
                };
                let actor_role = db.get_member_role(&gid, &aid)?;
                let target_row = match tid {
                    Some(tid) => db.get_member(&gid, &tid)?,
                    None => None,
                };
                Ok(Some((group, actor_role, target_row)))
            })
            .await?
            .ok_or(ChatError::NotFound("group"))?;

        let group = convert::group(group)?;
        let actor_role = actor_role.as_deref().map(convert::parse_role).transpose()?;
        let target = target_row
            .map(|row| convert::member(row, group.creator_id))
            .transpose()?;

        let Some(role) = actor_role else {
            warn!("{} is not a member of group {} ({:?} refused)", actor, group_id, action);
            return Err(ChatError::Forbidden);
        };

        if action.has_target() && target.is_none() {
            return Err(ChatError::NotFound("member"));
        }

        if action == Action::RemoveMember && target.as_ref().is_some_and(|t| t.is_creator) {
            warn!("{} tried to remove the creator of group {}", actor, group_id);
            return Err(ChatError::Forbidden);
        }

        if !permits(Some(role), action, target.as_ref().map(|t| t.role)) {
            warn!(
                "{} ({}) refused {:?} in group {} (target {:?})",
                actor,
                role.as_str(),
                action,
                group_id,
                target.as_ref().map(|t| t.user_id)
            );
            return Err(ChatError::Forbidden);
        }

        Ok(Grant {
            group,
            actor_role: role,
            target,
        })
    }
}
