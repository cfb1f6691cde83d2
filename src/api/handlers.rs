//! Console request handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::conversation::{HistoryEntry, Role};
use crate::history::{CallRecord, ConversationStats, OutboundReply, StoredMessage};
use crate::settings::RuntimeConfig;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Default page size for list endpoints.
const DEFAULT_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

// ========== Health ==========

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ========== Conversations ==========

pub async fn list_conversations(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ConversationStats>>> {
    Ok(Json(state.repo.conversation_stats().await?))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(peer): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Vec<StoredMessage>>> {
    let messages = state.repo.messages_for_peer(&peer, query.limit).await?;
    if messages.is_empty() && state.registry.last_seen(&peer).is_none() {
        return Err(ApiError::not_found(format!("conversation {peer}")));
    }
    Ok(Json(messages))
}

#[derive(Debug, Serialize)]
pub struct ClearedResponse {
    pub cleared: String,
}

/// Clear one conversation's stored history and in-memory context. The
/// cursor is untouched: already-answered messages are not replayed.
pub async fn clear_conversation(
    State(state): State<AppState>,
    Path(peer): Path<String>,
) -> ApiResult<Json<ClearedResponse>> {
    state.repo.clear_peer(&peer).await?;
    state.registry.clear_history(&peer);
    info!(peer, "conversation history cleared");
    Ok(Json(ClearedResponse { cleared: peer }))
}

pub async fn clear_all_conversations(
    State(state): State<AppState>,
) -> ApiResult<Json<ClearedResponse>> {
    state.repo.clear_all().await?;
    state.registry.clear_all_history();
    info!("all conversation history cleared");
    Ok(Json(ClearedResponse {
        cleared: "all".to_string(),
    }))
}

// ========== Call log and replies ==========

pub async fn list_calls(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Vec<CallRecord>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    Ok(Json(state.repo.recent_calls(limit).await?))
}

pub async fn list_replies(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Vec<OutboundReply>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    Ok(Json(state.repo.recent_replies(limit).await?))
}

// ========== Runtime config ==========

/// Config as shown to the operator. The key itself never leaves the
/// process; only whether one is set.
#[derive(Debug, Serialize)]
pub struct ConfigView {
    pub api_key_set: bool,
    pub api_url: String,
    pub model_name: String,
    pub system_prompt: String,
    pub temperature: f64,
    pub max_history: usize,
}

impl From<RuntimeConfig> for ConfigView {
    fn from(config: RuntimeConfig) -> Self {
        Self {
            api_key_set: !config.api_key.is_empty(),
            api_url: config.api_url,
            model_name: config.model_name,
            system_prompt: config.system_prompt,
            temperature: config.temperature,
            max_history: config.max_history,
        }
    }
}

/// Partial config update; omitted fields keep their current value.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigUpdate {
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub model_name: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub max_history: Option<usize>,
}

impl ConfigUpdate {
    fn merge_into(self, mut config: RuntimeConfig) -> RuntimeConfig {
        if let Some(api_key) = self.api_key {
            config.api_key = api_key;
        }
        if let Some(api_url) = self.api_url {
            config.api_url = api_url;
        }
        if let Some(model_name) = self.model_name {
            config.model_name = model_name;
        }
        if let Some(system_prompt) = self.system_prompt {
            config.system_prompt = system_prompt;
        }
        if let Some(temperature) = self.temperature {
            config.temperature = temperature;
        }
        if let Some(max_history) = self.max_history {
            config.max_history = max_history;
        }
        config
    }
}

pub async fn get_config(State(state): State<AppState>) -> Json<ConfigView> {
    Json(state.settings.snapshot().await.into())
}

/// Apply a config update. Validation failures leave the active config
/// untouched; an accepted update takes effect on the next poll cycle.
pub async fn update_config(
    State(state): State<AppState>,
    Json(update): Json<ConfigUpdate>,
) -> ApiResult<Json<ConfigView>> {
    let merged = update.merge_into(state.settings.snapshot().await);
    let applied = state.settings.update(merged).await?;
    info!(model = applied.model_name, "runtime config updated");
    Ok(Json(applied.into()))
}

#[derive(Debug, Deserialize)]
pub struct ConfigTestRequest {
    #[serde(flatten)]
    pub update: ConfigUpdate,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConfigTestResponse {
    pub reply: String,
    pub latency_ms: u64,
}

/// Exercise a candidate config against the completion API without saving
/// it. Omitted fields fall back to the active config.
pub async fn test_config(
    State(state): State<AppState>,
    Json(request): Json<ConfigTestRequest>,
) -> ApiResult<Json<ConfigTestResponse>> {
    let candidate = request.update.merge_into(state.settings.snapshot().await);
    candidate
        .validate()
        .map_err(|invalid| ApiError::bad_request(invalid.to_string()))?;
    if !candidate.is_ready() {
        return Err(ApiError::bad_request("api_key is not set"));
    }

    let probe = vec![HistoryEntry {
        role: Role::User,
        content: request
            .message
            .unwrap_or_else(|| "Hello! This is a connectivity test.".to_string()),
        timestamp: Utc::now(),
    }];

    let started = Instant::now();
    let reply = state.completion.complete(&probe, &candidate).await?;
    Ok(Json(ConfigTestResponse {
        reply,
        latency_ms: started.elapsed().as_millis() as u64,
    }))
}
