use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

use shaver_types::roles::Role;

const SCHEMA: &str = "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            is_active   INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS groups (
            id                      TEXT PRIMARY KEY,
            name                    TEXT NOT NULL,
            description             TEXT,
            creator_id              TEXT NOT NULL REFERENCES users(id),
            is_private              INTEGER NOT NULL DEFAULT 0,
            invite_code             TEXT NOT NULL UNIQUE,
            invite_code_updated_at  TEXT NOT NULL,
            created_at              TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS group_members (
            group_id    TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            role        TEXT NOT NULL DEFAULT 'member'
                        CHECK (role IN ('member', 'acting_leader', 'admin')),
            joined_at   TEXT NOT NULL,
            PRIMARY KEY (group_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_group_members_user
            ON group_members(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            group_id        TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
            sender_id       TEXT NOT NULL REFERENCES users(id),
            content         TEXT,
            message_type    TEXT NOT NULL
                            CHECK (message_type IN ('text', 'code', 'file', 'system')),
            code_language   TEXT,
            file_path       TEXT,
            file_name       TEXT,
            reply_to        TEXT REFERENCES messages(id),
            created_at      TEXT NOT NULL,
            edited_at       TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_group
            ON messages(group_id, created_at);

        CREATE TABLE IF NOT EXISTS group_files (
            id          TEXT PRIMARY KEY,
            group_id    TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
            uploader_id TEXT NOT NULL REFERENCES users(id),
            name        TEXT NOT NULL,
            size        INTEGER NOT NULL,
            sha256      TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        ";

pub fn run(conn: &Connection) -> Result<()> {
    // Older databases kept two membership flags instead of one role.
    let legacy = has_column(conn, "group_members", "is_admin")?
        && !has_column(conn, "group_members", "role")?;
    if legacy {
        conn.execute_batch(
            "ALTER TABLE group_members RENAME TO group_members_legacy;
             DROP INDEX IF EXISTS idx_group_members_user;",
        )?;
    }

    conn.execute_batch(SCHEMA)?;

    if legacy {
        upgrade_legacy_members(conn)?;
    }

    info!("Database migrations complete");
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names.iter().any(|name| name == column))
}

/// Copy flag-based memberships into the role column. The creator is always
/// an admin, and admin wins when both flags are set.
fn upgrade_legacy_members(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    let rows = {
        let mut stmt = tx.prepare(
            "SELECT m.group_id, m.user_id,
                    m.is_admin OR COALESCE(g.creator_id = m.user_id, 0),
                    m.is_acting_leader, m.joined_at
             FROM group_members_legacy m
             LEFT JOIN groups g ON g.id = m.group_id",
        )?;
        stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?
    };

    for (group_id, user_id, is_admin, is_acting_leader, joined_at) in &rows {
        let role = Role::from_flags(*is_admin, *is_acting_leader);
        tx.execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id, role, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
            (group_id, user_id, role.as_str(), joined_at),
        )?;
    }
    tx.execute_batch("DROP TABLE group_members_legacy;")?;
    tx.commit()?;

    info!("Upgraded {} legacy memberships to single roles", rows.len());
    Ok(())
}
