//! Persistent conversation history, outbound replies, and the call log.

mod models;
mod repository;

pub use models::{
    CallRecord, ConversationStats, OutboundReply, PeerCursor, ReplyStatus, StoredMessage,
};
pub use repository::HistoryRepository;
