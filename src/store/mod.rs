//! Read-only access to the external Messages database.
//!
//! The macOS Messages app owns `chat.db`; replyd only reads it. Messages
//! are keyed by `message.ROWID`, which is monotonic, so a ROWID cursor is
//! enough to ask "what arrived since last time". Reads have no side
//! effects: fetching the same cursor twice returns the same rows.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;

/// Seconds between the Unix epoch and Apple's 2001-01-01 reference date.
const APPLE_EPOCH_OFFSET_SECS: i64 = 978_307_200;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reading the external message store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot be opened or read right now (missing file, no Full
    /// Disk Access, database locked). The current poll cycle is skipped.
    #[error("message store unavailable at {path}: {message}")]
    Unavailable { path: PathBuf, message: String },
}

/// A new inbound message read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Monotonic store id (`message.ROWID`).
    pub id: i64,
    /// Stable peer identifier (phone number or handle).
    pub peer: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// Source of inbound messages.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Messages with `id > since`, ordered by id ascending.
    async fn fetch_new(&self, since: i64) -> StoreResult<Vec<InboundMessage>>;

    /// The highest id currently in the store, for baselining to "now".
    async fn latest_cursor(&self) -> StoreResult<i64>;
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: i64,
    peer: Option<String>,
    text: Option<String>,
    date: i64,
}

/// Reader over the Messages `chat.db`.
#[derive(Debug, Clone)]
pub struct ChatDbReader {
    pool: SqlitePool,
    path: PathBuf,
    include_group_chats: bool,
}

impl ChatDbReader {
    /// Create a reader for the database at `path`.
    ///
    /// The pool connects lazily, so a store that is missing or locked at
    /// startup surfaces as `Unavailable` per poll instead of failing the
    /// daemon.
    pub fn new(path: &Path, include_group_chats: bool) -> StoreResult<Self> {
        let url = format!("sqlite://{}?mode=ro", path.display());
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StoreError::Unavailable {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
            .read_only(true)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_lazy_with(options);

        Ok(Self {
            pool,
            path: path.to_path_buf(),
            include_group_chats,
        })
    }

    fn unavailable(&self, err: sqlx::Error) -> StoreError {
        StoreError::Unavailable {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl MessageSource for ChatDbReader {
    async fn fetch_new(&self, since: i64) -> StoreResult<Vec<InboundMessage>> {
        let group_filter = if self.include_group_chats {
            ""
        } else {
            "AND (message.cache_roomnames IS NULL OR message.cache_roomnames = '')"
        };

        let query = format!(
            r#"
            SELECT message.ROWID AS id,
                   handle.id AS peer,
                   message.text AS text,
                   message.date AS date
            FROM message
            LEFT JOIN handle ON message.handle_id = handle.ROWID
            WHERE message.ROWID > ?
              AND message.text IS NOT NULL
              AND message.is_from_me = 0
              {group_filter}
            ORDER BY message.ROWID ASC
            "#
        );

        let rows = sqlx::query_as::<_, MessageRow>(&query)
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.unavailable(e))?;

        let messages = rows
            .into_iter()
            .filter_map(|row| {
                let peer = row.peer?;
                let text = row.text?;
                if text.trim().is_empty() {
                    return None;
                }
                Some(InboundMessage {
                    id: row.id,
                    peer,
                    text,
                    received_at: apple_timestamp_to_utc(row.date),
                })
            })
            .collect();

        Ok(messages)
    }

    async fn latest_cursor(&self) -> StoreResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COALESCE(MAX(ROWID), 0) FROM message")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.unavailable(e))
    }
}

/// Convert an Apple `message.date` (nanoseconds since 2001-01-01) to UTC.
fn apple_timestamp_to_utc(date: i64) -> DateTime<Utc> {
    let secs = date / 1_000_000_000 + APPLE_EPOCH_OFFSET_SECS;
    let nanos = (date % 1_000_000_000).unsigned_abs() as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or_else(Utc::now)
}
