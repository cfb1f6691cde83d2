//! Application state shared across handlers.

use std::sync::Arc;

use crate::completion::CompletionApi;
use crate::conversation::ConversationRegistry;
use crate::history::HistoryRepository;
use crate::settings::SettingsService;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Repository over persisted history, replies, and the call log.
    pub repo: HistoryRepository,
    /// Runtime config read/write access.
    pub settings: SettingsService,
    /// In-memory conversation state, shared with the sync loop.
    pub registry: Arc<ConversationRegistry>,
    /// Completion client, for the config test endpoint.
    pub completion: Arc<dyn CompletionApi>,
}

impl AppState {
    pub fn new(
        repo: HistoryRepository,
        settings: SettingsService,
        registry: Arc<ConversationRegistry>,
        completion: Arc<dyn CompletionApi>,
    ) -> Self {
        Self {
            repo,
            settings,
            registry,
            completion,
        }
    }
}
