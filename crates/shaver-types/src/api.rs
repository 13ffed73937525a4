use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::PostBody;
use crate::models::{Group, GroupMember, MessageKind};
use crate::roles::Role;

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the group WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Groups --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_private: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinGroupRequest {
    pub code: String,
}

/// A group as seen by one of its members. The invite code is only
/// included for members allowed to hand it out.
#[derive(Debug, Serialize, Deserialize)]
pub struct GroupResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub creator_id: Uuid,
    pub is_private: bool,
    pub role: Role,
    pub invite_code: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl GroupResponse {
    pub fn for_role(group: Group, role: Role) -> Self {
        let invite_code = match role {
            Role::Admin | Role::ActingLeader => Some(group.invite_code),
            Role::Member => None,
        };
        Self {
            id: group.id,
            name: group.name,
            description: group.description,
            creator_id: group.creator_id,
            is_private: group.is_private,
            role,
            invite_code,
            created_at: group.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MembersResponse {
    pub members: Vec<GroupMember>,
    pub online_users: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMemberRequest {
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InviteCodeResponse {
    pub invite_code: String,
}

// -- Messages --

/// REST counterpart of the WebSocket posting commands.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub message_type: MessageKind,
    #[serde(flatten)]
    pub body: PostBody,
}

// -- Files --

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub file_id: Uuid,
    pub path: String,
    pub name: String,
    pub size: u64,
    pub sha256: String,
}
