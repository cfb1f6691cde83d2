//! Client for the external chat-completion API.

mod client;
mod error;
mod types;

pub use client::{CompletionApi, CompletionClient};
pub use error::{CompletionError, CompletionResult};
pub use types::{ChatMessage, ChatRequest};
