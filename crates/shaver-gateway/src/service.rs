use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shaver_db::Database;
use shaver_db::models::NewGroup;
use shaver_types::api::{CreateGroupRequest, GroupResponse, MembersResponse};
use shaver_types::events::{ChatEvent, PostBody};
use shaver_types::models::{Group, GroupMember, Message, MessageKind};
use shaver_types::roles::{Action, Role};

use crate::authority::Authority;
use crate::convert;
use crate::error::ChatError;
use crate::identity::Identity;
use crate::invites::{self, InviteRotator};
use crate::registry::{ConnectionId, Registry};
use crate::store::Store;

pub const MAX_CONTENT_CHARS: usize = 10_000;
const MAX_LANGUAGE_CHARS: usize = 32;
const MAX_FILE_FIELD_CHARS: usize = 512;
const MAX_GROUP_NAME_CHARS: usize = 64;
const MAX_DESCRIPTION_CHARS: usize = 500;

/// A posting command that passed shape validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidPost {
    pub kind: MessageKind,
    pub content: Option<String>,
    pub code_language: Option<String>,
    pub file_path: Option<String>,
    pub file_name: Option<String>,
    pub reply_to: Option<Uuid>,
}

/// Check the shape of an inbound message: a recognised client type, content
/// or a file reference present, and sane field sizes. The reply target is
/// checked against the store separately.
pub fn validate_post(kind: MessageKind, body: PostBody) -> Result<ValidPost, ChatError> {
    let content = body
        .content
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    if content.as_ref().is_some_and(|c| c.chars().count() > MAX_CONTENT_CHARS) {
        return Err(ChatError::validation(format!(
            "content exceeds {} characters",
            MAX_CONTENT_CHARS
        )));
    }

    let mut post = ValidPost {
        kind,
        content,
        code_language: None,
        file_path: None,
        file_name: None,
        reply_to: body.reply_to,
    };

    match kind {
        MessageKind::System => {
            return Err(ChatError::validation("system messages are server-only"));
        }
        MessageKind::Text => {
            if post.content.is_none() {
                return Err(ChatError::validation("text messages need content"));
            }
        }
        MessageKind::Code => {
            if post.content.is_none() {
                return Err(ChatError::validation("code messages need content"));
            }
            post.code_language = body
                .code_language
                .map(|l| l.trim().to_ascii_lowercase())
                .filter(|l| !l.is_empty());
            if post
                .code_language
                .as_ref()
                .is_some_and(|l| l.chars().count() > MAX_LANGUAGE_CHARS)
            {
                return Err(ChatError::validation("code_language is too long"));
            }
        }
        MessageKind::File => {
            let Some(file) = body.file_ref else {
                return Err(ChatError::validation("file messages need a file_ref"));
            };
            let (path, name) = (file.path.trim().to_string(), file.name.trim().to_string());
            if path.is_empty() || name.is_empty() {
                return Err(ChatError::validation("file_ref needs a path and a name"));
            }
            if path.chars().count() > MAX_FILE_FIELD_CHARS
                || name.chars().count() > MAX_FILE_FIELD_CHARS
            {
                return Err(ChatError::validation("file_ref is too long"));
            }
            post.file_path = Some(path);
            post.file_name = Some(name);
        }
    }

    Ok(post)
}

/// Public path of an uploaded file; `file` messages must point at one.
pub fn download_path(group_id: Uuid, file_id: Uuid) -> String {
    format!("/groups/{}/files/{}", group_id, file_id)
}

/// File id named by `path` if it is a download path inside `group_id`.
fn attached_file_id(group_id: &str, path: &str) -> Option<String> {
    let rest = path.strip_prefix("/groups/")?;
    let (gid, fid) = rest.split_once("/files/")?;
    if gid != group_id {
        return None;
    }
    Uuid::parse_str(fid).ok().map(|fid| fid.to_string())
}

/// Group chat operations shared by the WebSocket gateway and the REST API.
///
/// Every mutation re-checks the caller's role through the [`Authority`].
/// Messages are persisted and broadcast while holding the group's sequencer,
/// so every live connection sees them in commit order.
#[derive(Clone)]
pub struct ChatService {
    store: Store,
    registry: Registry,
    authority: Authority,
    invites: InviteRotator,
}

impl ChatService {
    pub fn new(db: Arc<Database>, registry: Registry, store_timeout: Duration) -> Self {
        let store = Store::new(db, store_timeout);
        Self {
            authority: Authority::new(store.clone()),
            invites: InviteRotator::new(store.clone()),
            store,
            registry,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn invites(&self) -> &InviteRotator {
        &self.invites
    }

    // -- Groups --

    pub async fn create_group(
        &self,
        creator: &Identity,
        req: CreateGroupRequest,
    ) -> Result<Group, ChatError> {
        let name = req.name.trim().to_string();
        if name.is_empty() || name.chars().count() > MAX_GROUP_NAME_CHARS {
            return Err(ChatError::validation(format!(
                "group name must be 1-{} characters",
                MAX_GROUP_NAME_CHARS
            )));
        }
        let description = req
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        if description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_CHARS)
        {
            return Err(ChatError::validation("description is too long"));
        }

        let id = Uuid::new_v4();
        let now = convert::now();
        let (gid, cid, created_at) = (id.to_string(), creator.user_id.to_string(), convert::stamp(now));
        let is_private = req.is_private;
        let (name_db, description_db) = (name.clone(), description.clone());
        let code = self
            .store
            .call(move |db| {
                let group = NewGroup {
                    id: &gid,
                    name: &name_db,
                    description: description_db.as_deref(),
                    creator_id: &cid,
                    is_private,
                    created_at: &created_at,
                };
                db.create_group(&group, invites::generate_code, invites::MAX_CODE_ATTEMPTS)
            })
            .await?;

        info!("{} ({}) created group '{}' ({})", creator.username, creator.user_id, name, id);
        Ok(Group {
            id,
            name,
            description,
            creator_id: creator.user_id,
            is_private,
            invite_code: code,
            invite_code_updated_at: now,
            created_at: now,
        })
    }

    pub async fn groups_for(&self, user_id: Uuid) -> Result<Vec<GroupResponse>, ChatError> {
        let uid = user_id.to_string();
        let rows = self.store.call(move |db| db.list_groups_for_user(&uid)).await?;
        let mut groups = Vec::with_capacity(rows.len());
        for (row, role) in rows {
            groups.push(GroupResponse::for_role(convert::group(row)?, convert::parse_role(&role)?));
        }
        Ok(groups)
    }

    pub async fn group_for_member(
        &self,
        user_id: Uuid,
        group_id: Uuid,
    ) -> Result<GroupResponse, ChatError> {
        let grant = self
            .authority
            .require(user_id, group_id, Action::PostMessage, None)
            .await?;
        Ok(GroupResponse::for_role(grant.group, grant.actor_role))
    }

    pub async fn members(&self, user_id: Uuid, group_id: Uuid) -> Result<MembersResponse, ChatError> {
        let grant = self
            .authority
            .require(user_id, group_id, Action::PostMessage, None)
            .await?;
        let gid = group_id.to_string();
        let rows = self.store.call(move |db| db.list_members(&gid)).await?;
        let members = rows
            .into_iter()
            .map(|row| convert::member(row, grant.group.creator_id))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(MembersResponse {
            members,
            online_users: self.registry.online_users(group_id).await,
        })
    }

    // -- Messages --

    /// Validate, authorize, persist and broadcast one message. Nothing is
    /// broadcast unless the insert succeeded.
    pub async fn post_message(
        &self,
        sender: &Identity,
        group_id: Uuid,
        kind: MessageKind,
        body: PostBody,
    ) -> Result<Message, ChatError> {
        let post = validate_post(kind, body)?;
        self.authority
            .require(sender.user_id, group_id, Action::PostMessage, None)
            .await?;

        let message = Message {
            id: Uuid::new_v4(),
            group_id,
            sender_id: sender.user_id,
            sender_username: sender.username.clone(),
            message_type: post.kind,
            content: post.content,
            code_language: post.code_language,
            file_path: post.file_path,
            file_name: post.file_name,
            reply_to: post.reply_to,
            created_at: convert::now(),
            edited_at: None,
        };
        self.commit_and_broadcast(message).await
    }

    /// Transient typing indicator; never persisted.
    pub async fn typing(
        &self,
        sender: &Identity,
        group_id: Uuid,
        is_typing: bool,
        origin: Option<ConnectionId>,
    ) -> Result<(), ChatError> {
        let typing_users = self
            .registry
            .set_typing(group_id, sender.user_id, is_typing)
            .await;
        self.registry
            .broadcast(
                group_id,
                ChatEvent::Typing {
                    group_id,
                    user_id: sender.user_id,
                    username: sender.username.clone(),
                    is_typing,
                    typing_users,
                },
                origin,
            )
            .await;
        Ok(())
    }

    pub async fn history(
        &self,
        user_id: Uuid,
        group_id: Uuid,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, ChatError> {
        self.authority
            .require(user_id, group_id, Action::PostMessage, None)
            .await?;

        let gid = group_id.to_string();
        let before = before.map(convert::stamp);
        let rows = self
            .store
            .call(move |db| db.get_messages(&gid, limit, before.as_deref()))
            .await?;
        Ok(rows
            .into_iter()
            .map(convert::message)
            .collect::<anyhow::Result<Vec<_>>>()?)
    }

    // -- Membership --

    pub async fn join(&self, user: &Identity, code: &str) -> Result<Group, ChatError> {
        let group = self.invites.join(code, user.user_id).await?;
        self.announce(group.id, user, format!("{} joined the group", user.username))
            .await?;
        Ok(group)
    }

    /// Self-removal. Always allowed for members except the creator, whose
    /// admin status is permanent.
    pub async fn leave(&self, user: &Identity, group_id: Uuid) -> Result<(), ChatError> {
        let grant = self
            .authority
            .require(user.user_id, group_id, Action::PostMessage, None)
            .await?;
        if grant.group.creator_id == user.user_id {
            warn!("Creator {} tried to leave group {}", user.user_id, group_id);
            return Err(ChatError::Forbidden);
        }

        self.delete_membership(group_id, user.user_id, grant.actor_role).await?;
        self.announce(group_id, user, format!("{} left the group", user.username))
            .await?;
        Ok(())
    }

    pub async fn add_member(
        &self,
        actor: &Identity,
        group_id: Uuid,
        username: &str,
    ) -> Result<GroupMember, ChatError> {
        let grant = self
            .authority
            .require(actor.user_id, group_id, Action::AddMember, None)
            .await?;

        let (gid, uname) = (group_id.to_string(), username.trim().to_string());
        let joined_at = convert::stamp(convert::now());
        let (target, inserted) = self
            .store
            .call(move |db| {
                let Some(user) = db.get_user_by_username(&uname)? else {
                    return Ok(None);
                };
                if !user.is_active {
                    return Ok(None);
                }
                let inserted = db.add_member(&gid, &user.id, Role::Member.as_str(), &joined_at)?;
                let member = db.get_member(&gid, &user.id)?;
                Ok(member.map(|m| (m, inserted)))
            })
            .await?
            .ok_or(ChatError::NotFound("user"))?;

        if !inserted {
            return Err(ChatError::AlreadyMember);
        }

        let target = convert::member(target, grant.group.creator_id)?;
        self.announce(
            group_id,
            actor,
            format!("{} added {} to the group", actor.username, target.username),
        )
        .await?;
        Ok(target)
    }

    pub async fn remove_member(
        &self,
        actor: &Identity,
        group_id: Uuid,
        target_id: Uuid,
    ) -> Result<(), ChatError> {
        let grant = self
            .authority
            .require(actor.user_id, group_id, Action::RemoveMember, Some(target_id))
            .await?;
        let target = grant.target.ok_or(ChatError::NotFound("member"))?;

        self.delete_membership(group_id, target_id, target.role).await?;
        self.announce(
            group_id,
            actor,
            format!("{} removed {} from the group", actor.username, target.username),
        )
        .await?;
        Ok(())
    }

    pub async fn set_acting_leader(
        &self,
        actor: &Identity,
        group_id: Uuid,
        target_id: Uuid,
    ) -> Result<(), ChatError> {
        let grant = self
            .authority
            .require(actor.user_id, group_id, Action::SetActingLeader, Some(target_id))
            .await?;
        let target = grant.target.ok_or(ChatError::NotFound("member"))?;

        if !self
            .transition_role(group_id, target_id, Role::Member, Role::ActingLeader)
            .await?
        {
            return Err(match target.role {
                Role::ActingLeader => ChatError::validation("member is already an acting leader"),
                _ => ChatError::validation("admins cannot be made acting leaders"),
            });
        }

        self.announce(
            group_id,
            actor,
            format!("{} made {} an acting leader", actor.username, target.username),
        )
        .await?;
        Ok(())
    }

    pub async fn remove_acting_leader(
        &self,
        actor: &Identity,
        group_id: Uuid,
        target_id: Uuid,
    ) -> Result<(), ChatError> {
        let grant = self
            .authority
            .require(actor.user_id, group_id, Action::RemoveActingLeader, Some(target_id))
            .await?;
        let target = grant.target.ok_or(ChatError::NotFound("member"))?;

        // Only ever rewrites acting_leader rows, so an admin row is untouchable.
        if !self
            .transition_role(group_id, target_id, Role::ActingLeader, Role::Member)
            .await?
        {
            return Err(ChatError::validation("member is not an acting leader"));
        }

        self.announce(
            group_id,
            actor,
            format!(
                "{} removed acting leader status from {}",
                actor.username, target.username
            ),
        )
        .await?;
        Ok(())
    }

    /// Manual rotation; bypasses the hourly schedule.
    pub async fn rotate_invite_code(
        &self,
        actor: &Identity,
        group_id: Uuid,
    ) -> Result<String, ChatError> {
        self.authority
            .require(actor.user_id, group_id, Action::RotateInviteCode, None)
            .await?;
        let code = self.invites.rotate(group_id).await?;
        info!("{} ({}) rotated the invite code of group {}", actor.username, actor.user_id, group_id);
        Ok(code)
    }

    // -- Internals --

    /// Delete the membership if the member still holds `checked_role`, the
    /// role the authorization decision was made against.
    async fn delete_membership(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        checked_role: Role,
    ) -> Result<(), ChatError> {
        let (gid, uid) = (group_id.to_string(), user_id.to_string());
        let removed = self
            .store
            .call(move |db| db.remove_member(&gid, &uid, checked_role.as_str()))
            .await?;
        if !removed {
            return Err(match self.authority.role_of(user_id, group_id).await? {
                None => ChatError::NotFound("member"),
                Some(role) => {
                    warn!(
                        "Role of {} in group {} changed to {} before removal",
                        user_id,
                        group_id,
                        role.as_str()
                    );
                    ChatError::Forbidden
                }
            });
        }
        let closed = self
            .registry
            .disconnect_user(group_id, user_id, ChatEvent::Removed { group_id })
            .await;
        info!(
            "Removed {} from group {} ({} live connections closed)",
            user_id, group_id, closed
        );
        Ok(())
    }

    async fn transition_role(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        from: Role,
        to: Role,
    ) -> Result<bool, ChatError> {
        let (gid, uid) = (group_id.to_string(), user_id.to_string());
        self.store
            .call(move |db| db.transition_member_role(&gid, &uid, from.as_str(), to.as_str()))
            .await
    }

    /// Persist a system message from `actor` and broadcast it.
    async fn announce(
        &self,
        group_id: Uuid,
        actor: &Identity,
        text: String,
    ) -> Result<Message, ChatError> {
        let message = Message {
            id: Uuid::new_v4(),
            group_id,
            sender_id: actor.user_id,
            sender_username: actor.username.clone(),
            message_type: MessageKind::System,
            content: Some(text),
            code_language: None,
            file_path: None,
            file_name: None,
            reply_to: None,
            created_at: convert::now(),
            edited_at: None,
        };
        self.commit_and_broadcast(message).await
    }

    async fn commit_and_broadcast(&self, mut message: Message) -> Result<Message, ChatError> {
        let group_id = message.group_id;
        let sequencer = self.registry.sequencer(group_id);
        let _turn = sequencer.lock().await;

        // Stamped inside the critical section and kept strictly increasing
        // per group, so created_at is both the commit order and a usable cursor.
        let mut row = convert::message_row(&message);
        let mut created_at = convert::now();
        let created_at = self
            .store
            .call(move |db| {
                if let Some(reply_to) = row.reply_to.as_deref() {
                    if !db.message_in_group(reply_to, &row.group_id)? {
                        return Ok(Err(ChatError::validation(
                            "reply_to does not reference a message in this group",
                        )));
                    }
                }
                if let Some(path) = row.file_path.as_deref() {
                    let uploaded = match attached_file_id(&row.group_id, path) {
                        Some(file_id) => db.get_file(&row.group_id, &file_id)?.is_some(),
                        None => false,
                    };
                    if !uploaded {
                        return Ok(Err(ChatError::validation(
                            "file_ref does not point at a file uploaded to this group",
                        )));
                    }
                }
                if let Some(latest) = db.latest_message_at(&row.group_id)? {
                    let latest = convert::parse_stamp(&latest)?;
                    if latest >= created_at {
                        created_at = latest + chrono::Duration::microseconds(1);
                    }
                }
                row.created_at = convert::stamp(created_at);
                db.insert_message(&row)?;
                Ok(Ok(created_at))
            })
            .await??;
        message.created_at = created_at;

        let delivered = self
            .registry
            .broadcast(group_id, ChatEvent::NewMessage { message: message.clone() }, None)
            .await;
        debug!(
            "Message {} ({}) in group {} delivered to {} connections",
            message.id,
            message.message_type.as_str(),
            group_id,
            delivered
        );
        Ok(message)
    }
}
