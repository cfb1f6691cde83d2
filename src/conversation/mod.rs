//! In-memory per-conversation state: cursor, rolling history, in-flight claim.
//!
//! One conversation per remote peer. The registry enforces the core
//! invariants: at most one outstanding completion per conversation (the
//! in-flight claim), and a history buffer capped at `max_history` entries
//! with strict oldest-first eviction. Conversations are created on the
//! first inbound message from an unseen peer and never removed while the
//! process runs.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::store::InboundMessage;

/// Author of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn in a conversation's rolling context window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
struct Conversation {
    last_seen_cursor: i64,
    history: Vec<HistoryEntry>,
    in_flight: bool,
}

impl Conversation {
    fn new(last_seen_cursor: i64) -> Self {
        Self {
            last_seen_cursor,
            history: Vec::new(),
            in_flight: false,
        }
    }

    fn evict_to(&mut self, max_history: usize) {
        if self.history.len() > max_history {
            let excess = self.history.len() - max_history;
            self.history.drain(..excess);
        }
    }
}

/// Registry of all tracked conversations.
#[derive(Debug, Default)]
pub struct ConversationRegistry {
    conversations: DashMap<String, Conversation>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a conversation from persisted state on startup.
    pub fn restore(&self, peer: &str, last_seen_cursor: i64, history: Vec<HistoryEntry>) {
        self.conversations.insert(
            peer.to_string(),
            Conversation {
                last_seen_cursor,
                history,
                in_flight: false,
            },
        );
    }

    /// Claim the conversation for one completion cycle.
    ///
    /// Creates the conversation if the peer is unseen. Returns false if a
    /// completion is already outstanding, in which case the caller must
    /// not advance: the pending messages are left behind the cursor and
    /// merge into the next poll.
    pub fn try_claim(&self, peer: &str) -> bool {
        let mut entry = self
            .conversations
            .entry(peer.to_string())
            .or_insert_with(|| Conversation::new(0));
        if entry.in_flight {
            false
        } else {
            entry.in_flight = true;
            true
        }
    }

    /// Release the in-flight claim.
    pub fn release(&self, peer: &str) {
        if let Some(mut conversation) = self.conversations.get_mut(peer) {
            conversation.in_flight = false;
        }
    }

    /// Append new inbound messages as user turns and bump the cursor.
    ///
    /// Only the claim holder calls this. Returns the new cursor (max id
    /// observed). Eviction keeps the history within `max_history`.
    pub fn advance(&self, peer: &str, messages: &[InboundMessage], max_history: usize) -> i64 {
        let mut entry = self
            .conversations
            .entry(peer.to_string())
            .or_insert_with(|| Conversation::new(0));

        for message in messages {
            entry.history.push(HistoryEntry {
                role: Role::User,
                content: message.text.clone(),
                timestamp: message.received_at,
            });
            entry.last_seen_cursor = entry.last_seen_cursor.max(message.id);
        }
        entry.evict_to(max_history);
        entry.last_seen_cursor
    }

    /// Append a completion result as an assistant turn.
    pub fn append_assistant(&self, peer: &str, content: &str, max_history: usize) {
        if let Some(mut entry) = self.conversations.get_mut(peer) {
            entry.history.push(HistoryEntry {
                role: Role::Assistant,
                content: content.to_string(),
                timestamp: Utc::now(),
            });
            entry.evict_to(max_history);
        }
    }

    /// Snapshot of a conversation's history, oldest first.
    pub fn history(&self, peer: &str) -> Vec<HistoryEntry> {
        self.conversations
            .get(peer)
            .map(|c| c.history.clone())
            .unwrap_or_default()
    }

    /// Last processed cursor for a peer.
    pub fn last_seen(&self, peer: &str) -> Option<i64> {
        self.conversations.get(peer).map(|c| c.last_seen_cursor)
    }

    /// Lowest cursor across all tracked conversations.
    ///
    /// The fetch floor: an in-flight conversation holds its cursor back,
    /// so its deferred messages are re-read next cycle.
    pub fn min_cursor(&self) -> Option<i64> {
        self.conversations
            .iter()
            .map(|c| c.last_seen_cursor)
            .min()
    }

    /// Move an idle conversation's cursor up to the fetch head, so quiet
    /// peers do not drag the fetch floor down indefinitely.
    ///
    /// Returns false (and leaves the cursor alone) when the conversation
    /// is in flight or already at or past `cursor`.
    pub fn catch_up(&self, peer: &str, cursor: i64) -> bool {
        match self.conversations.get_mut(peer) {
            Some(mut conversation)
                if !conversation.in_flight && conversation.last_seen_cursor < cursor =>
            {
                conversation.last_seen_cursor = cursor;
                true
            }
            _ => false,
        }
    }

    /// All tracked peers.
    pub fn peers(&self) -> Vec<String> {
        self.conversations.iter().map(|c| c.key().clone()).collect()
    }

    /// Drop in-memory history for a peer (console "clear history").
    pub fn clear_history(&self, peer: &str) {
        if let Some(mut entry) = self.conversations.get_mut(peer) {
            entry.history.clear();
        }
    }

    /// Drop in-memory history for all peers.
    pub fn clear_all_history(&self) {
        for mut entry in self.conversations.iter_mut() {
            entry.history.clear();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
