//! Database models for history, replies, and call records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A persisted conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StoredMessage {
    pub id: i64,
    pub peer: String,
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
    /// ROWID of the originating chat.db message, if this is a user turn.
    pub store_id: Option<i64>,
    pub created_at: String,
}

/// Terminal state of an outbound reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Sent,
    Failed,
}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyStatus::Sent => write!(f, "sent"),
            ReplyStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ReplyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(ReplyStatus::Sent),
            "failed" => Ok(ReplyStatus::Failed),
            other => Err(format!("unknown reply status: {other}")),
        }
    }
}

/// A reply handed to the delivery mechanism, persisted whatever the outcome.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OutboundReply {
    pub id: i64,
    pub peer: String,
    pub content: String,
    /// ROWID of the inbound message this reply answers.
    pub in_reply_to: i64,
    pub status: String,
    pub error: Option<String>,
    pub sent_at: String,
}

/// One completion attempt in the append-only audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CallRecord {
    pub id: i64,
    pub peer: String,
    /// Total characters in the request payload messages.
    pub request_chars: i64,
    /// Characters in the completion text, absent on failure.
    pub response_chars: Option<i64>,
    pub latency_ms: i64,
    pub error: Option<String>,
    pub created_at: String,
}

/// Last processed store cursor for one peer.
#[derive(Debug, Clone, FromRow)]
pub struct PeerCursor {
    pub peer: String,
    pub last_seen: i64,
}

/// Per-peer summary for the console conversation list.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ConversationStats {
    pub peer: String,
    pub message_count: i64,
    pub last_call_at: Option<String>,
    pub last_call_error: Option<String>,
}
