//! replyd: an auto-reply daemon for the macOS Messages app.
//!
//! The daemon polls the Messages `chat.db` for new inbound messages,
//! keeps a rolling per-conversation context, asks an OpenAI-compatible
//! chat-completions API for a reply, and sends it back through the
//! Messages app. A small HTTP console lets the operator inspect
//! conversations, the call log, and delivery outcomes, and edit the
//! runtime configuration while the daemon runs.

pub mod api;
pub mod completion;
pub mod conversation;
pub mod db;
pub mod delivery;
pub mod history;
pub mod retention;
pub mod settings;
pub mod store;
pub mod syncer;
