use crate::models::{FileRow, GroupRow, MemberRow, MessageRow, NewGroup, UserRow};
use crate::Database;
use anyhow::{Result, bail};
use rusqlite::{Connection, Row};

const GROUP_COLUMNS: &str = "g.id, g.name, g.description, g.creator_id, g.is_private, \
     g.invite_code, g.invite_code_updated_at, g.created_at";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        email: &str,
        password_hash: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, username, email, password_hash, created_at),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Groups --

    /// Create a group plus the creator's admin membership in one transaction.
    /// Returns the invite code that was assigned.
    pub fn create_group<F>(
        &self,
        group: &NewGroup<'_>,
        generate_code: F,
        max_attempts: usize,
    ) -> Result<String>
    where
        F: FnMut() -> String,
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let code = unused_invite_code(&tx, generate_code, max_attempts)?;
            tx.execute(
                "INSERT INTO groups (id, name, description, creator_id, is_private, invite_code, invite_code_updated_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                rusqlite::params![
                    group.id,
                    group.name,
                    group.description,
                    group.creator_id,
                    group.is_private,
                    code,
                    group.created_at,
                ],
            )?;
            tx.execute(
                "INSERT INTO group_members (group_id, user_id, role, joined_at) VALUES (?1, ?2, 'admin', ?3)",
                (group.id, group.creator_id, group.created_at),
            )?;
            tx.commit()?;
            Ok(code)
        })
    }

    pub fn get_group(&self, id: &str) -> Result<Option<GroupRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {GROUP_COLUMNS} FROM groups g WHERE g.id = ?1");
            conn.query_row(&sql, [id], group_from_row).optional()
        })
    }

    /// Every group the user belongs to, with the user's role column.
    pub fn list_groups_for_user(&self, user_id: &str) -> Result<Vec<(GroupRow, String)>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {GROUP_COLUMNS}, m.role
                 FROM groups g
                 JOIN group_members m ON m.group_id = g.id
                 WHERE m.user_id = ?1
                 ORDER BY g.created_at"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], |row| Ok((group_from_row(row)?, row.get(8)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Swap in a fresh invite code. The uniqueness check and the write happen
    /// under the writer lock, against the full current population.
    /// Returns `None` when the group does not exist.
    pub fn replace_invite_code<F>(
        &self,
        group_id: &str,
        updated_at: &str,
        generate_code: F,
        max_attempts: usize,
    ) -> Result<Option<String>>
    where
        F: FnMut() -> String,
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let exists = tx
                .query_row("SELECT 1 FROM groups WHERE id = ?1", [group_id], |_| Ok(()))
                .optional()?
                .is_some();
            if !exists {
                return Ok(None);
            }

            let code = unused_invite_code(&tx, generate_code, max_attempts)?;
            tx.execute(
                "UPDATE groups SET invite_code = ?2, invite_code_updated_at = ?3 WHERE id = ?1",
                (group_id, &code, updated_at),
            )?;
            tx.commit()?;
            Ok(Some(code))
        })
    }

    /// `(group id, invite_code_updated_at)` for every group.
    pub fn invite_code_ages(&self) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, invite_code_updated_at FROM groups")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Members --

    pub fn get_member(&self, group_id: &str, user_id: &str) -> Result<Option<MemberRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT m.group_id, m.user_id, u.username, m.role, m.joined_at
                 FROM group_members m
                 JOIN users u ON u.id = m.user_id
                 WHERE m.group_id = ?1 AND m.user_id = ?2",
                [group_id, user_id],
                member_from_row,
            )
            .optional()
        })
    }

    pub fn get_member_role(&self, group_id: &str, user_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT role FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                [group_id, user_id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn list_members(&self, group_id: &str) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.group_id, m.user_id, u.username, m.role, m.joined_at
                 FROM group_members m
                 JOIN users u ON u.id = m.user_id
                 WHERE m.group_id = ?1
                 ORDER BY m.joined_at",
            )?;
            let rows = stmt
                .query_map([group_id], member_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Insert a membership row. Returns false when the user is already a member.
    pub fn add_member(
        &self,
        group_id: &str,
        user_id: &str,
        role: &str,
        joined_at: &str,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
                (group_id, user_id, role, joined_at),
            )?;
            Ok(inserted == 1)
        })
    }

    /// Returns false when there was no such membership.
    /// Redeem `code` for `user_id` under one lock, so a rotation cannot land
    /// between the lookup and the insert. `None` when no group has the code;
    /// otherwise the group and whether a membership row was created.
    pub fn join_by_invite_code(
        &self,
        code: &str,
        user_id: &str,
        role: &str,
        joined_at: &str,
    ) -> Result<Option<(GroupRow, bool)>> {
        self.with_conn_mut(|conn| {
            let sql = format!("SELECT {GROUP_COLUMNS} FROM groups g WHERE g.invite_code = ?1");
            let Some(group) = conn.query_row(&sql, [code], group_from_row).optional()? else {
                return Ok(None);
            };
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
                (&group.id, user_id, role, joined_at),
            )?;
            Ok(Some((group, inserted == 1)))
        })
    }

    /// Delete a membership only if its role still equals `role`.
    /// Returns false when no row matched.
    pub fn remove_member(&self, group_id: &str, user_id: &str, role: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let removed = conn.execute(
                "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2 AND role = ?3",
                [group_id, user_id, role],
            )?;
            Ok(removed == 1)
        })
    }

    /// Change a member's role only if it currently equals `from`.
    /// Returns false when no row matched.
    pub fn transition_member_role(
        &self,
        group_id: &str,
        user_id: &str,
        from: &str,
        to: &str,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE group_members SET role = ?4 WHERE group_id = ?1 AND user_id = ?2 AND role = ?3",
                [group_id, user_id, from, to],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &MessageRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, group_id, sender_id, content, message_type, code_language, file_path, file_name, reply_to, created_at, edited_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    msg.id,
                    msg.group_id,
                    msg.sender_id,
                    msg.content,
                    msg.message_type,
                    msg.code_language,
                    msg.file_path,
                    msg.file_name,
                    msg.reply_to,
                    msg.created_at,
                    msg.edited_at,
                ],
            )?;
            Ok(())
        })
    }

    /// Whether `message_id` names a message of `group_id`.
    pub fn message_in_group(&self, message_id: &str, group_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM messages WHERE id = ?1 AND group_id = ?2",
                    [message_id, group_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// `created_at` of the newest message in the group.
    pub fn latest_message_at(&self, group_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let latest = conn.query_row(
                "SELECT MAX(created_at) FROM messages WHERE group_id = ?1",
                [group_id],
                |row| row.get::<_, Option<String>>(0),
            )?;
            Ok(latest)
        })
    }

    /// Latest `limit` messages of a group, oldest first. `before` is a
    /// `created_at` cursor from a previous page.
    pub fn get_messages(
        &self,
        group_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, group_id, limit, before))
    }

    // -- Files --

    pub fn insert_file(&self, file: &FileRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO group_files (id, group_id, uploader_id, name, size, sha256, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    file.id,
                    file.group_id,
                    file.uploader_id,
                    file.name,
                    file.size,
                    file.sha256,
                    file.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_file(&self, group_id: &str, file_id: &str) -> Result<Option<FileRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, group_id, uploader_id, name, size, sha256, created_at
                 FROM group_files WHERE id = ?1 AND group_id = ?2",
                [file_id, group_id],
                |row| {
                    Ok(FileRow {
                        id: row.get(0)?,
                        group_id: row.get(1)?,
                        uploader_id: row.get(2)?,
                        name: row.get(3)?,
                        size: row.get(4)?,
                        sha256: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                },
            )
            .optional()
        })
    }
}

/// True when `err` wraps a SQLite UNIQUE/PRIMARY KEY violation.
pub fn is_constraint_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn unused_invite_code<F>(conn: &Connection, mut generate_code: F, max_attempts: usize) -> Result<String>
where
    F: FnMut() -> String,
{
    for _ in 0..max_attempts {
        let code = generate_code();
        let taken = conn
            .query_row("SELECT 1 FROM groups WHERE invite_code = ?1", [&code], |_| Ok(()))
            .optional()?
            .is_some();
        if !taken {
            return Ok(code);
        }
    }
    bail!("no unused invite code after {} attempts", max_attempts)
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is always one of our own literals, never user input
    let sql = format!(
        "SELECT id, username, email, password, is_active, created_at FROM users WHERE {column} = ?1"
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                password: row.get(3)?,
                is_active: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_messages(
    conn: &Connection,
    group_id: &str,
    limit: u32,
    before: Option<&str>,
) -> Result<Vec<MessageRow>> {
    // sender_username comes from the users join; NULL if the account is gone
    let mut stmt = conn.prepare(
        "SELECT m.id, m.group_id, m.sender_id, u.username, m.content, m.message_type,
                m.code_language, m.file_path, m.file_name, m.reply_to, m.created_at, m.edited_at
         FROM messages m
         LEFT JOIN users u ON m.sender_id = u.id
         WHERE m.group_id = ?1 AND (?2 IS NULL OR m.created_at < ?2)
         ORDER BY m.created_at DESC, m.rowid DESC
         LIMIT ?3",
    )?;

    let mut rows = stmt
        .query_map(rusqlite::params![group_id, before, limit], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                group_id: row.get(1)?,
                sender_id: row.get(2)?,
                sender_username: row
                    .get::<_, Option<String>>(3)?
                    .unwrap_or_else(|| "unknown".to_string()),
                content: row.get(4)?,
                message_type: row.get(5)?,
                code_language: row.get(6)?,
                file_path: row.get(7)?,
                file_name: row.get(8)?,
                reply_to: row.get(9)?,
                created_at: row.get(10)?,
                edited_at: row.get(11)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.reverse();
    Ok(rows)
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        creator_id: row.get(3)?,
        is_private: row.get(4)?,
        invite_code: row.get(5)?,
        invite_code_updated_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<MemberRow> {
    Ok(MemberRow {
        group_id: row.get(0)?,
        user_id: row.get(1)?,
        username: row.get(2)?,
        role: row.get(3)?,
        joined_at: row.get(4)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
