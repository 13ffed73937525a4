//! Row <-> model conversions. IDs are stored as TEXT UUIDs and timestamps as
//! RFC 3339 strings with microseconds and a `Z` suffix, so they sort as text.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use uuid::Uuid;

use shaver_db::models::{GroupRow, MemberRow, MessageRow, UserRow};
use shaver_types::models::{Group, GroupMember, Message, MessageKind, User};
use shaver_types::roles::Role;

/// Current time at the precision timestamps are stored with.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_stamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("corrupt timestamp '{}'", s))?
        .with_timezone(&Utc))
}

pub fn parse_id(s: &str) -> Result<Uuid> {
    s.parse().with_context(|| format!("corrupt id '{}'", s))
}

pub fn parse_role(s: &str) -> Result<Role> {
    Role::parse(s).ok_or_else(|| anyhow!("corrupt role '{}'", s))
}

/// The password hash is dropped here and never leaves the store layer.
pub fn user(row: UserRow) -> Result<User> {
    Ok(User {
        id: parse_id(&row.id)?,
        username: row.username,
        email: row.email,
        is_active: row.is_active,
        created_at: parse_stamp(&row.created_at)?,
    })
}

pub fn group(row: GroupRow) -> Result<Group> {
    Ok(Group {
        id: parse_id(&row.id)?,
        name: row.name,
        description: row.description,
        creator_id: parse_id(&row.creator_id)?,
        is_private: row.is_private,
        invite_code: row.invite_code,
        invite_code_updated_at: parse_stamp(&row.invite_code_updated_at)?,
        created_at: parse_stamp(&row.created_at)?,
    })
}

pub fn member(row: MemberRow, creator_id: Uuid) -> Result<GroupMember> {
    let user_id = parse_id(&row.user_id)?;
    Ok(GroupMember {
        group_id: parse_id(&row.group_id)?,
        user_id,
        username: row.username,
        role: parse_role(&row.role)?,
        is_creator: user_id == creator_id,
        joined_at: parse_stamp(&row.joined_at)?,
    })
}

pub fn message(row: MessageRow) -> Result<Message> {
    Ok(Message {
        id: parse_id(&row.id)?,
        group_id: parse_id(&row.group_id)?,
        sender_id: parse_id(&row.sender_id)?,
        sender_username: row.sender_username,
        message_type: MessageKind::parse(&row.message_type)
            .ok_or_else(|| anyhow!("corrupt message_type '{}'", row.message_type))?,
        content: row.content,
        code_language: row.code_language,
        file_path: row.file_path,
        file_name: row.file_name,
        reply_to: row.reply_to.as_deref().map(parse_id).transpose()?,
        created_at: parse_stamp(&row.created_at)?,
        edited_at: row.edited_at.as_deref().map(parse_stamp).transpose()?,
    })
}

/// Inverse of [`message`], for inserts.
pub fn message_row(msg: &Message) -> MessageRow {
    MessageRow {
        id: msg.id.to_string(),
        group_id: msg.group_id.to_string(),
        sender_id: msg.sender_id.to_string(),
        sender_username: msg.sender_username.clone(),
        content: msg.content.clone(),
        message_type: msg.message_type.as_str().to_string(),
        code_language: msg.code_language.clone(),
        file_path: msg.file_path.clone(),
        file_name: msg.file_name.clone(),
        reply_to: msg.reply_to.map(|id| id.to_string()),
        created_at: stamp(msg.created_at),
        edited_at: msg.edited_at.map(stamp),
    }
}
