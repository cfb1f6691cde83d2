//! Repository for the replyd database.
//!
//! The sync loop appends, the console reads, and both share the same pool.
//! Every write here is an INSERT or an upsert keyed by peer; nothing
//! rewrites existing history or call-log rows.

use anyhow::{Context, Result};
use chrono::Utc;

use crate::db::Database;

use super::models::{
    CallRecord, ConversationStats, OutboundReply, PeerCursor, ReplyStatus, StoredMessage,
};

/// Config table key holding the global fetch baseline.
const BASELINE_KEY: &str = "fetch_baseline";

/// Repository over messages, replies, call log, and cursors.
#[derive(Debug, Clone)]
pub struct HistoryRepository {
    db: Database,
}

impl HistoryRepository {
    /// Create a new repository.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ========== Messages ==========

    /// Append a conversation turn.
    pub async fn add_message(
        &self,
        peer: &str,
        role: &str,
        content: &str,
        store_id: Option<i64>,
    ) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO messages (peer, role, content, store_id)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(peer)
        .bind(role)
        .bind(content)
        .bind(store_id)
        .fetch_one(self.db.pool())
        .await
        .context("inserting message")?;

        Ok(id)
    }

    /// The most recent `limit` turns for a peer, oldest first.
    pub async fn recent_messages(&self, peer: &str, limit: i64) -> Result<Vec<StoredMessage>> {
        let mut rows = sqlx::query_as::<_, StoredMessage>(
            r#"
            SELECT id, peer, role, content, store_id, created_at
            FROM messages
            WHERE peer = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(peer)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await
        .context("fetching recent messages")?;

        rows.reverse();
        Ok(rows)
    }

    /// Full history for a peer, oldest first, optionally capped.
    pub async fn messages_for_peer(
        &self,
        peer: &str,
        limit: Option<i64>,
    ) -> Result<Vec<StoredMessage>> {
        match limit {
            Some(limit) => self.recent_messages(peer, limit).await,
            None => sqlx::query_as::<_, StoredMessage>(
                r#"
                SELECT id, peer, role, content, store_id, created_at
                FROM messages
                WHERE peer = ?
                ORDER BY id ASC
                "#,
            )
            .bind(peer)
            .fetch_all(self.db.pool())
            .await
            .context("fetching messages for peer"),
        }
    }

    /// Per-peer summaries for the console conversation list.
    pub async fn conversation_stats(&self) -> Result<Vec<ConversationStats>> {
        sqlx::query_as::<_, ConversationStats>(
            r#"
            SELECT m.peer,
                   COUNT(m.id) AS message_count,
                   (SELECT created_at FROM call_log c
                    WHERE c.peer = m.peer ORDER BY c.id DESC LIMIT 1) AS last_call_at,
                   (SELECT error FROM call_log c
                    WHERE c.peer = m.peer ORDER BY c.id DESC LIMIT 1) AS last_call_error
            FROM messages m
            GROUP BY m.peer
            ORDER BY MAX(m.id) DESC
            "#,
        )
        .fetch_all(self.db.pool())
        .await
        .context("fetching conversation stats")
    }

    // ========== Replies ==========

    /// Record the outcome of one delivery attempt.
    pub async fn add_reply(
        &self,
        peer: &str,
        content: &str,
        in_reply_to: i64,
        status: ReplyStatus,
        error: Option<&str>,
    ) -> Result<i64> {
        let sent_at = Utc::now().to_rfc3339();

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO replies (peer, content, in_reply_to, status, error, sent_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(peer)
        .bind(content)
        .bind(in_reply_to)
        .bind(status.to_string())
        .bind(error)
        .bind(&sent_at)
        .fetch_one(self.db.pool())
        .await
        .context("inserting reply")?;

        Ok(id)
    }

    /// Most recent replies, newest first.
    pub async fn recent_replies(&self, limit: i64) -> Result<Vec<OutboundReply>> {
        sqlx::query_as::<_, OutboundReply>(
            r#"
            SELECT id, peer, content, in_reply_to, status, error, sent_at
            FROM replies
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await
        .context("fetching recent replies")
    }

    // ========== Call log ==========

    /// Append a call-log entry.
    pub async fn add_call(
        &self,
        peer: &str,
        request_chars: i64,
        response_chars: Option<i64>,
        latency_ms: i64,
        error: Option<&str>,
    ) -> Result<i64> {
        let created_at = Utc::now().to_rfc3339();

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO call_log (peer, request_chars, response_chars, latency_ms, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(peer)
        .bind(request_chars)
        .bind(response_chars)
        .bind(latency_ms)
        .bind(error)
        .bind(&created_at)
        .fetch_one(self.db.pool())
        .await
        .context("inserting call-log entry")?;

        Ok(id)
    }

    /// Most recent call-log entries, newest first.
    pub async fn recent_calls(&self, limit: i64) -> Result<Vec<CallRecord>> {
        sqlx::query_as::<_, CallRecord>(
            r#"
            SELECT id, peer, request_chars, response_chars, latency_ms, error, created_at
            FROM call_log
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await
        .context("fetching recent calls")
    }

    // ========== Cursors ==========

    /// Upsert the last processed store cursor for a peer.
    pub async fn set_cursor(&self, peer: &str, last_seen: i64) -> Result<()> {
        let updated_at = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO cursors (peer, last_seen, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(peer) DO UPDATE SET
                last_seen = excluded.last_seen,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(peer)
        .bind(last_seen)
        .bind(&updated_at)
        .execute(self.db.pool())
        .await
        .context("upserting cursor")?;

        Ok(())
    }

    /// All persisted cursors, for rebuilding conversation state on startup.
    pub async fn load_cursors(&self) -> Result<Vec<PeerCursor>> {
        sqlx::query_as::<_, PeerCursor>("SELECT peer, last_seen FROM cursors")
            .fetch_all(self.db.pool())
            .await
            .context("loading cursors")
    }

    /// Global fetch baseline: highest store ROWID ever observed.
    pub async fn baseline(&self) -> Result<Option<i64>> {
        let value = self.get_value(BASELINE_KEY).await?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    /// Persist the global fetch baseline.
    pub async fn set_baseline(&self, cursor: i64) -> Result<()> {
        self.set_value(BASELINE_KEY, &cursor.to_string()).await
    }

    // ========== Config KV ==========

    /// Read a config value.
    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(self.db.pool())
            .await
            .context("reading config value")
    }

    /// Write a config value.
    pub async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO config (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(self.db.pool())
        .await
        .context("writing config value")?;

        Ok(())
    }

    // ========== Maintenance ==========

    /// Delete history and call-log rows for one peer. The cursor stays:
    /// clearing context must not replay already-answered messages.
    pub async fn clear_peer(&self, peer: &str) -> Result<()> {
        sqlx::query("DELETE FROM messages WHERE peer = ?")
            .bind(peer)
            .execute(self.db.pool())
            .await
            .context("clearing messages for peer")?;
        sqlx::query("DELETE FROM call_log WHERE peer = ?")
            .bind(peer)
            .execute(self.db.pool())
            .await
            .context("clearing call log for peer")?;
        Ok(())
    }

    /// Delete all history and call-log rows.
    pub async fn clear_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM messages")
            .execute(self.db.pool())
            .await
            .context("clearing messages")?;
        sqlx::query("DELETE FROM call_log")
            .execute(self.db.pool())
            .await
            .context("clearing call log")?;
        Ok(())
    }

    /// Delete rows older than `days`. Returns the number deleted.
    pub async fn prune_older_than(&self, days: i64) -> Result<u64> {
        let threshold = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();
        let mut deleted = 0;

        for table in ["messages", "replies", "call_log"] {
            // created_at / sent_at are RFC 3339, so string comparison orders correctly.
            let column = if table == "replies" { "sent_at" } else { "created_at" };
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE {column} < ?"))
                .bind(&threshold)
                .execute(self.db.pool())
                .await
                .with_context(|| format!("pruning {table}"))?;
            deleted += result.rows_affected();
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_repo() -> HistoryRepository {
        let db = Database::in_memory().await.unwrap();
        HistoryRepository::new(db)
    }

    #[tokio::test]
    async fn messages_round_trip_oldest_first() {
        let repo = test_repo().await;
        repo.add_message("+15550001", "user", "hello", Some(11)).await.unwrap();
        repo.add_message("+15550001", "assistant", "hi there", None).await.unwrap();

        let messages = repo.recent_messages("+15550001", 10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[0].store_id, Some(11));
        assert_eq!(messages[1].role, "assistant");
    }

    #[tokio::test]
    async fn recent_messages_keeps_latest() {
        let repo = test_repo().await;
        for i in 0..6 {
            repo.add_message("peer", "user", &format!("m{i}"), None).await.unwrap();
        }

        let messages = repo.recent_messages("peer", 4).await.unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].content, "m2");
        assert_eq!(messages[3].content, "m5");
    }

    #[tokio::test]
    async fn failed_reply_is_recorded() {
        let repo = test_repo().await;
        repo.add_reply("peer", "text", 11, ReplyStatus::Failed, Some("osascript exited 1"))
            .await
            .unwrap();

        let replies = repo.recent_replies(10).await.unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].status, "failed");
        assert_eq!(replies[0].in_reply_to, 11);
        assert!(replies[0].error.as_deref().unwrap().contains("osascript"));
    }

    #[tokio::test]
    async fn cursors_upsert_and_reload() {
        let repo = test_repo().await;
        repo.set_cursor("a", 10).await.unwrap();
        repo.set_cursor("a", 12).await.unwrap();
        repo.set_cursor("b", 7).await.unwrap();

        let mut cursors = repo.load_cursors().await.unwrap();
        cursors.sort_by(|x, y| x.peer.cmp(&y.peer));
        assert_eq!(cursors.len(), 2);
        assert_eq!(cursors[0].last_seen, 12);
        assert_eq!(cursors[1].last_seen, 7);
    }

    #[tokio::test]
    async fn baseline_round_trip() {
        let repo = test_repo().await;
        assert_eq!(repo.baseline().await.unwrap(), None);
        repo.set_baseline(42).await.unwrap();
        assert_eq!(repo.baseline().await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn stats_report_last_call_error() {
        let repo = test_repo().await;
        repo.add_message("peer", "user", "hello", None).await.unwrap();
        repo.add_call("peer", 5, None, 120, Some("auth error")).await.unwrap();

        let stats = repo.conversation_stats().await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].message_count, 1);
        assert_eq!(stats[0].last_call_error.as_deref(), Some("auth error"));
    }
}
