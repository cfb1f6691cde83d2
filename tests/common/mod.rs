//! Test utilities and common setup.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use replyd::api;
use replyd::completion::{CompletionApi, CompletionError, CompletionResult};
use replyd::conversation::{ConversationRegistry, HistoryEntry};
use replyd::db::Database;
use replyd::history::HistoryRepository;
use replyd::settings::{RuntimeConfig, SettingsService};

/// Completion stub for console tests: echoes a canned reply, rejects the
/// credential when the api key is "bad-key".
pub struct StubCompletion;

#[async_trait]
impl CompletionApi for StubCompletion {
    async fn complete(
        &self,
        _history: &[HistoryEntry],
        config: &RuntimeConfig,
    ) -> CompletionResult<String> {
        if config.api_key == "bad-key" {
            return Err(CompletionError::Auth("invalid api key".to_string()));
        }
        Ok("stub reply".to_string())
    }
}

/// A console app over fresh in-memory state, plus handles for seeding.
pub struct TestApp {
    pub router: Router,
    pub repo: HistoryRepository,
    pub registry: Arc<ConversationRegistry>,
    pub settings: SettingsService,
}

/// Create a test application with all services initialized.
pub async fn test_app() -> TestApp {
    let db = Database::in_memory().await.unwrap();
    let repo = HistoryRepository::new(db);

    let defaults = RuntimeConfig {
        api_key: "test-key".to_string(),
        ..Default::default()
    };
    let settings = SettingsService::load(repo.clone(), defaults).await.unwrap();
    let registry = Arc::new(ConversationRegistry::new());

    let state = api::AppState::new(
        repo.clone(),
        settings.clone(),
        registry.clone(),
        Arc::new(StubCompletion),
    );

    TestApp {
        router: api::create_router(state),
        repo,
        registry,
        settings,
    }
}
