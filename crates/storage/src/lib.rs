use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{MessageId, UserId},
    protocol::{MessagePayload, UserSummary},
};

/// User directory plus the append-only message log.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUser {
    pub user_id: UserId,
    pub username: String,
    pub full_name: String,
    pub profile_pic: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<StoredUser> for UserSummary {
    fn from(user: StoredUser) -> Self {
        Self {
            user_id: user.user_id,
            username: user.username,
            full_name: user.full_name,
            profile_pic: user.profile_pic,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: &'a str,
    pub image: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<StoredMessage> for MessagePayload {
    fn from(message: StoredMessage) -> Self {
        Self {
            message_id: message.message_id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            text: message.text,
            image: message.image,
            created_at: message.created_at,
        }
    }
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(
        &self,
        username: &str,
        full_name: &str,
        profile_pic: Option<&str>,
    ) -> Result<UserId> {
        let username = username.trim();
        if username.is_empty() {
            bail!("username must not be empty");
        }
        let rec = sqlx::query(
            "INSERT INTO users (username, full_name, profile_pic) VALUES (?, ?, ?)
             ON CONFLICT(username) DO UPDATE SET full_name=excluded.full_name, profile_pic=excluded.profile_pic
             RETURNING id",
        )
        .bind(username)
        .bind(full_name)
        .bind(profile_pic)
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<Option<StoredUser>> {
        let row = sqlx::query(
            "SELECT id, username, full_name, profile_pic, created_at FROM users WHERE id = ?",
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    /// Roster for the sidebar: everyone except `user_id`.
    pub async fn list_users_except(&self, user_id: UserId) -> Result<Vec<StoredUser>> {
        let rows = sqlx::query(
            "SELECT id, username, full_name, profile_pic, created_at
             FROM users
             WHERE id <> ?
             ORDER BY lower(username) ASC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(user_from_row).collect()
    }

    /// Appends a message. The id and timestamp are assigned here.
    pub async fn insert_message(&self, message: &NewMessage<'_>) -> Result<StoredMessage> {
        if message.text.is_empty() && message.image.is_none() {
            bail!("message must carry text or an image");
        }
        let created_at = Utc::now();
        let rec = sqlx::query(
            "INSERT INTO messages (sender_id, receiver_id, text, image, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(message.sender_id.0)
        .bind(message.receiver_id.0)
        .bind(message.text)
        .bind(message.image)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert message")?;

        Ok(StoredMessage {
            message_id: MessageId(rec.get::<i64, _>(0)),
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            text: message.text.to_string(),
            image: message.image.map(str::to_string),
            created_at,
        })
    }

    /// Messages exchanged between `a` and `b` in either direction, oldest first.
    pub async fn list_conversation(&self, a: UserId, b: UserId) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, sender_id, receiver_id, text, image, created_at
             FROM messages
             WHERE (sender_id = ? AND receiver_id = ?)
                OR (sender_id = ? AND receiver_id = ?)
             ORDER BY created_at ASC, id ASC",
        )
        .bind(a.0)
        .bind(b.0)
        .bind(b.0)
        .bind(a.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }
}

fn user_from_row(row: &SqliteRow) -> Result<StoredUser> {
    Ok(StoredUser {
        user_id: UserId(row.try_get::<i64, _>(0)?),
        username: row.try_get::<String, _>(1)?,
        full_name: row.try_get::<String, _>(2)?,
        profile_pic: row.try_get::<Option<String>, _>(3)?,
        created_at: parse_timestamp(row, 4)?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<StoredMessage> {
    Ok(StoredMessage {
        message_id: MessageId(row.try_get::<i64, _>(0)?),
        sender_id: UserId(row.try_get::<i64, _>(1)?),
        receiver_id: UserId(row.try_get::<i64, _>(2)?),
        text: row.try_get::<String, _>(3)?,
        image: row.try_get::<Option<String>, _>(4)?,
        created_at: parse_timestamp(row, 5)?,
    })
}

// CURRENT_TIMESTAMP defaults are naive "YYYY-MM-DD HH:MM:SS"; bound values are RFC 3339.
fn parse_timestamp(row: &SqliteRow, index: usize) -> Result<DateTime<Utc>> {
    if let Ok(value) = row.try_get::<DateTime<Utc>, _>(index) {
        return Ok(value);
    }
    let raw: String = row.try_get(index)?;
    let naive = chrono::NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("unrecognised timestamp '{raw}'"))?;
    Ok(naive.and_utc())
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;
    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
