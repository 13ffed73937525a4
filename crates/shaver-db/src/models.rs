/// Row types as stored in SQLite. Kept apart from the shaver-types models so
/// the storage layer has no serde or chrono dependency.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub is_active: bool,
    pub created_at: String,
}

pub struct GroupRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub creator_id: String,
    pub is_private: bool,
    pub invite_code: String,
    pub invite_code_updated_at: String,
    pub created_at: String,
}

/// Insert payload for a group; the invite code is chosen by the store.
pub struct NewGroup<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub creator_id: &'a str,
    pub is_private: bool,
    pub created_at: &'a str,
}

pub struct MemberRow {
    pub group_id: String,
    pub user_id: String,
    pub username: String,
    pub role: String,
    pub joined_at: String,
}

/// `sender_username` is filled from a join on read and ignored on insert.
pub struct MessageRow {
    pub id: String,
    pub group_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub content: Option<String>,
    pub message_type: String,
    pub code_language: Option<String>,
    pub file_path: Option<String>,
    pub file_name: Option<String>,
    pub reply_to: Option<String>,
    pub created_at: String,
    pub edited_at: Option<String>,
}

pub struct FileRow {
    pub id: String,
    pub group_id: String,
    pub uploader_id: String,
    pub name: String,
    pub size: i64,
    pub sha256: String,
    pub created_at: String,
}
