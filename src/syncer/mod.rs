//! The message synchronization and reply-dispatch loop.
//!
//! Each cycle: snapshot the runtime config, fetch everything newer than
//! the lowest cursor across tracked conversations, then process each
//! conversation with new messages in its own task: claim in-flight,
//! advance history and cursor, call the completion API, deliver the
//! reply, append to the call log, release. A failure in one conversation
//! never aborts the others, and a conversation whose previous completion
//! is still outstanding keeps its cursor behind so the deferred messages
//! are re-fetched next tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::completion::CompletionApi;
use crate::conversation::{ConversationRegistry, HistoryEntry, Role};
use crate::delivery::MessageSender;
use crate::history::{HistoryRepository, ReplyStatus, StoredMessage};
use crate::settings::{RuntimeConfig, SettingsService};
use crate::store::{InboundMessage, MessageSource, StoreError};

/// Baseline sentinel: not yet resolved against the store.
const BASELINE_UNSET: i64 = -1;

/// Timing knobs for the loop.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Interval between poll cycles.
    pub poll_interval: Duration,
    /// Soft per-cycle deadline. Conversations still processing when it
    /// expires keep running (no mid-call cancellation), but the loop
    /// stops waiting and their claims defer further messages.
    pub cycle_deadline: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            cycle_deadline: Duration::from_secs(60),
        }
    }
}

/// Outcome of one poll cycle, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Inbound messages fetched from the store.
    pub fetched: usize,
    /// Conversations handed to a processing task.
    pub processed: usize,
    /// Conversations skipped because a completion was still outstanding.
    pub deferred: usize,
    /// 1 when the cycle deadline elapsed with tasks still running.
    pub timed_out: usize,
    /// Whether the store was unavailable and the cycle skipped.
    pub store_unavailable: bool,
}

/// The sync loop and its collaborators.
pub struct SyncService {
    store: Arc<dyn MessageSource>,
    completion: Arc<dyn CompletionApi>,
    sender: Arc<dyn MessageSender>,
    registry: Arc<ConversationRegistry>,
    repo: HistoryRepository,
    settings: SettingsService,
    options: SyncOptions,
    /// Highest store id ever fetched; floor for unseen peers.
    baseline: AtomicI64,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn MessageSource>,
        completion: Arc<dyn CompletionApi>,
        sender: Arc<dyn MessageSender>,
        registry: Arc<ConversationRegistry>,
        repo: HistoryRepository,
        settings: SettingsService,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            completion,
            sender,
            registry,
            repo,
            settings,
            options,
            baseline: AtomicI64::new(BASELINE_UNSET),
        }
    }

    /// Rebuild conversation state from persisted cursors and history.
    ///
    /// Without a persisted baseline the loop starts from "now": the first
    /// cycle resolves the store's latest cursor instead of replaying the
    /// entire message log.
    pub async fn restore(&self) -> Result<()> {
        let config = self.settings.snapshot().await;

        let cursors = self.repo.load_cursors().await?;
        for cursor in &cursors {
            let stored = self
                .repo
                .recent_messages(&cursor.peer, config.max_history as i64)
                .await?;
            let history = stored.iter().map(stored_to_entry).collect();
            self.registry.restore(&cursor.peer, cursor.last_seen, history);
        }

        if let Some(baseline) = self.repo.baseline().await? {
            self.baseline.store(baseline, Ordering::SeqCst);
        }

        if !cursors.is_empty() {
            info!(conversations = cursors.len(), "restored conversation state");
        }
        Ok(())
    }

    /// Run the loop until shutdown is requested. In-progress cycles
    /// finish; no new cycles start afterwards.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    match self.run_cycle().await {
                        Ok(report) if report.processed > 0 => {
                            debug!(
                                fetched = report.fetched,
                                processed = report.processed,
                                deferred = report.deferred,
                                "cycle complete"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "sync cycle failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("sync loop stopped");
    }

    /// Execute one poll cycle.
    pub async fn run_cycle(self: &Arc<Self>) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        // One consistent config snapshot per cycle; console edits apply
        // from the next cycle on.
        let config = self.settings.snapshot().await;
        if !config.is_ready() {
            debug!("api key not configured, skipping cycle");
            return Ok(report);
        }

        let baseline = self.baseline.load(Ordering::SeqCst);
        if baseline == BASELINE_UNSET {
            match self.store.latest_cursor().await {
                Ok(latest) => {
                    self.baseline.store(latest, Ordering::SeqCst);
                    self.repo.set_baseline(latest).await?;
                    info!(cursor = latest, "baselined message store to now");
                }
                Err(err) => {
                    warn!(error = %err, "message store unavailable, skipping cycle");
                    report.store_unavailable = true;
                }
            }
            return Ok(report);
        }

        let floor = self.registry.min_cursor().unwrap_or(baseline).min(baseline);
        let messages = match self.store.fetch_new(floor).await {
            Ok(messages) => messages,
            Err(err @ StoreError::Unavailable { .. }) => {
                warn!(error = %err, "message store unavailable, skipping cycle");
                report.store_unavailable = true;
                return Ok(report);
            }
        };

        report.fetched = messages.len();
        if messages.is_empty() {
            return Ok(report);
        }

        let max_id = messages.iter().map(|m| m.id).max().unwrap_or(baseline);
        if max_id > baseline {
            self.baseline.store(max_id, Ordering::SeqCst);
            self.repo.set_baseline(max_id).await?;
        }

        let mut tasks = Vec::new();
        let mut busy: std::collections::HashSet<String> = std::collections::HashSet::new();
        for (peer, batch) in group_by_peer(messages) {
            // Re-fetched rows already processed for this peer.
            let last_seen = self.registry.last_seen(&peer).unwrap_or(0);
            let batch: Vec<InboundMessage> =
                batch.into_iter().filter(|m| m.id > last_seen).collect();
            if batch.is_empty() {
                continue;
            }

            busy.insert(peer.clone());
            if !self.registry.try_claim(&peer) {
                debug!(peer, pending = batch.len(), "completion in flight, deferring");
                report.deferred += 1;
                continue;
            }

            report.processed += 1;
            let service = Arc::clone(self);
            let cycle_config = config.clone();
            tasks.push(tokio::spawn(async move {
                service.process_conversation(peer, batch, cycle_config).await;
            }));
        }

        // Idle conversations catch up to the fetch head so a quiet peer
        // does not hold the fetch floor down forever. Claimed and deferred
        // peers are excluded: a deferred peer's cursor must stay behind
        // its pending messages.
        for peer in self.registry.peers() {
            if busy.contains(&peer) {
                continue;
            }
            if self.registry.catch_up(&peer, max_id) {
                self.repo.set_cursor(&peer, max_id).await?;
            }
        }

        // Soft deadline: stop waiting, let stragglers finish detached.
        let all_done = futures::future::join_all(tasks);
        if tokio::time::timeout(self.options.cycle_deadline, all_done)
            .await
            .is_err()
        {
            warn!("cycle deadline exceeded, deferring unfinished conversations to next tick");
            report.timed_out += 1;
        }

        Ok(report)
    }

    /// Process one conversation's new messages end to end.
    async fn process_conversation(
        &self,
        peer: String,
        messages: Vec<InboundMessage>,
        config: RuntimeConfig,
    ) {
        if let Err(err) = self.process_inner(&peer, &messages, &config).await {
            // Repository failures land here; the conversation is retried
            // from its last persisted cursor on a later cycle.
            error!(peer, error = %err, "conversation processing failed");
        }
        self.registry.release(&peer);
    }

    async fn process_inner(
        &self,
        peer: &str,
        messages: &[InboundMessage],
        config: &RuntimeConfig,
    ) -> Result<()> {
        // Ingestion commits first: the cursor advances even if reply
        // generation fails, so a message is never completed twice.
        let cursor = self.registry.advance(peer, messages, config.max_history);
        for message in messages {
            self.repo
                .add_message(peer, Role::User.as_str(), &message.text, Some(message.id))
                .await?;
        }
        self.repo.set_cursor(peer, cursor).await?;

        let history = self.registry.history(peer);
        let request_chars = config.system_prompt.chars().count() as i64
            + history
                .iter()
                .map(|entry| entry.content.chars().count() as i64)
                .sum::<i64>();
        let in_reply_to = messages.last().map(|m| m.id).unwrap_or(cursor);

        let started = Instant::now();
        let result = self.completion.complete(&history, config).await;
        let latency_ms = started.elapsed().as_millis() as i64;

        match result {
            Ok(text) => {
                self.registry.append_assistant(peer, &text, config.max_history);
                self.repo
                    .add_message(peer, Role::Assistant.as_str(), &text, None)
                    .await?;
                self.repo
                    .add_call(
                        peer,
                        request_chars,
                        Some(text.chars().count() as i64),
                        latency_ms,
                        None,
                    )
                    .await?;

                // Exactly one attempt; the outcome is persisted either way.
                match self.sender.deliver(peer, &text).await {
                    Ok(()) => {
                        self.repo
                            .add_reply(peer, &text, in_reply_to, ReplyStatus::Sent, None)
                            .await?;
                        info!(peer, latency_ms, "reply sent");
                    }
                    Err(err) => {
                        self.repo
                            .add_reply(
                                peer,
                                &text,
                                in_reply_to,
                                ReplyStatus::Failed,
                                Some(&err.to_string()),
                            )
                            .await?;
                        warn!(peer, error = %err, "reply delivery failed");
                    }
                }
            }
            Err(err) => {
                warn!(peer, kind = err.kind(), error = %err, "completion failed");
                self.repo
                    .add_call(peer, request_chars, None, latency_ms, Some(&err.to_string()))
                    .await?;
            }
        }

        Ok(())
    }
}

/// Group fetched messages by peer, preserving arrival order.
fn group_by_peer(messages: Vec<InboundMessage>) -> Vec<(String, Vec<InboundMessage>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut grouped: Vec<(String, Vec<InboundMessage>)> = Vec::new();

    for message in messages {
        match index.get(&message.peer) {
            Some(&i) => grouped[i].1.push(message),
            None => {
                index.insert(message.peer.clone(), grouped.len());
                grouped.push((message.peer.clone(), vec![message]));
            }
        }
    }
    grouped
}

/// Map a persisted row back to an in-memory history entry.
fn stored_to_entry(stored: &StoredMessage) -> HistoryEntry {
    let role = match stored.role.as_str() {
        "assistant" => Role::Assistant,
        _ => Role::User,
    };
    HistoryEntry {
        role,
        content: stored.content.clone(),
        timestamp: parse_stored_timestamp(&stored.created_at),
    }
}

/// Stored timestamps are either RFC 3339 or SQLite's `datetime('now')`.
fn parse_stored_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|naive| naive.and_utc())
        })
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{CompletionError, CompletionResult};
    use crate::db::Database;
    use crate::delivery::SendError;
    use crate::store::StoreResult;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct FakeSource {
        messages: Mutex<Vec<InboundMessage>>,
        unavailable: std::sync::atomic::AtomicBool,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                messages: Mutex::new(Vec::new()),
                unavailable: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn push(&self, id: i64, peer: &str, text: &str) {
            self.messages.lock().unwrap().push(InboundMessage {
                id,
                peer: peer.to_string(),
                text: text.to_string(),
                received_at: Utc::now(),
            });
        }

        fn set_unavailable(&self, value: bool) {
            self.unavailable.store(value, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl MessageSource for FakeSource {
        async fn fetch_new(&self, since: i64) -> StoreResult<Vec<InboundMessage>> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable {
                    path: "fake".into(),
                    message: "locked".to_string(),
                });
            }
            Ok(self
                .messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.id > since)
                .cloned()
                .collect())
        }

        async fn latest_cursor(&self) -> StoreResult<i64> {
            Ok(self
                .messages
                .lock()
                .unwrap()
                .iter()
                .map(|m| m.id)
                .max()
                .unwrap_or(0))
        }
    }

    /// Replies "hi there"; errors when the latest user turn contains
    /// "auth-fail"; optionally blocks on a gate until notified. Records
    /// the model name of every config it is called with.
    struct FakeCompletion {
        calls: AtomicUsize,
        seen_models: Mutex<Vec<String>>,
        gate: Option<Arc<Notify>>,
    }

    impl FakeCompletion {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                seen_models: Mutex::new(Vec::new()),
                gate: None,
            }
        }

        fn gated(gate: Arc<Notify>) -> Self {
            Self { gate: Some(gate), ..Self::new() }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn seen_models(&self) -> Vec<String> {
            self.seen_models.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionApi for FakeCompletion {
        async fn complete(
            &self,
            history: &[HistoryEntry],
            config: &RuntimeConfig,
        ) -> CompletionResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_models.lock().unwrap().push(config.model_name.clone());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let last = history.last().map(|e| e.content.as_str()).unwrap_or("");
            if last.contains("auth-fail") {
                return Err(CompletionError::Auth("invalid api key".to_string()));
            }
            Ok("hi there".to_string())
        }
    }

    struct FakeSender {
        fail: bool,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl FakeSender {
        fn new(fail: bool) -> Self {
            Self { fail, sent: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl MessageSender for FakeSender {
        async fn deliver(&self, peer: &str, text: &str) -> Result<(), SendError> {
            if self.fail {
                return Err(SendError::Delivery {
                    status: "exit status: 1".to_string(),
                    stderr: "Messages got an error".to_string(),
                });
            }
            self.sent.lock().unwrap().push((peer.to_string(), text.to_string()));
            Ok(())
        }
    }

    struct Harness {
        service: Arc<SyncService>,
        source: Arc<FakeSource>,
        completion: Arc<FakeCompletion>,
        sender: Arc<FakeSender>,
        registry: Arc<ConversationRegistry>,
        repo: HistoryRepository,
    }

    async fn harness_with(completion: FakeCompletion, sender: FakeSender) -> Harness {
        let repo = HistoryRepository::new(Database::in_memory().await.unwrap());
        let mut defaults = RuntimeConfig::default();
        defaults.api_key = "test-key".to_string();
        defaults.max_history = 10;
        let settings = SettingsService::load(repo.clone(), defaults).await.unwrap();

        let source = Arc::new(FakeSource::new());
        let completion = Arc::new(completion);
        let sender = Arc::new(sender);
        let registry = Arc::new(ConversationRegistry::new());

        let service = Arc::new(SyncService::new(
            source.clone(),
            completion.clone(),
            sender.clone(),
            registry.clone(),
            repo.clone(),
            settings,
            SyncOptions {
                poll_interval: Duration::from_millis(10),
                cycle_deadline: Duration::from_millis(100),
            },
        ));

        Harness { service, source, completion, sender, registry, repo }
    }

    async fn harness() -> Harness {
        harness_with(FakeCompletion::new(), FakeSender::new(false)).await
    }

    #[tokio::test]
    async fn hello_round_trip() {
        let h = harness().await;
        h.registry.restore("P", 10, Vec::new());
        h.service.baseline.store(10, Ordering::SeqCst);
        h.source.push(11, "P", "hello");

        let report = h.service.run_cycle().await.unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.processed, 1);

        let history = h.registry.history("P");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, "hi there");

        assert_eq!(h.registry.last_seen("P"), Some(11));
        let cursors = h.repo.load_cursors().await.unwrap();
        assert_eq!(cursors[0].last_seen, 11);

        let sent = h.sender.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![("P".to_string(), "hi there".to_string())]);

        let calls = h.repo.recent_calls(10).await.unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].error.is_none());

        let replies = h.repo.recent_replies(10).await.unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].status, "sent");
        assert_eq!(replies[0].in_reply_to, 11);
    }

    #[tokio::test]
    async fn auth_error_still_advances_cursor() {
        let h = harness().await;
        h.service.baseline.store(10, Ordering::SeqCst);
        h.source.push(11, "P", "auth-fail please");

        h.service.run_cycle().await.unwrap();

        // No reply was created, the error is on the call log, and the
        // message is not reprocessed.
        assert!(h.repo.recent_replies(10).await.unwrap().is_empty());
        let calls = h.repo.recent_calls(10).await.unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].error.as_deref().unwrap().contains("invalid api key"));
        assert_eq!(h.registry.last_seen("P"), Some(11));

        let report = h.service.run_cycle().await.unwrap();
        assert_eq!(report.processed, 0);
        assert_eq!(h.completion.call_count(), 1);
    }

    #[tokio::test]
    async fn failed_send_is_recorded_not_dropped() {
        let h = harness_with(FakeCompletion::new(), FakeSender::new(true)).await;
        h.service.baseline.store(0, Ordering::SeqCst);
        h.source.push(1, "P", "hello");

        h.service.run_cycle().await.unwrap();

        let replies = h.repo.recent_replies(10).await.unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].status, "failed");
        assert!(replies[0].error.as_deref().unwrap().contains("Messages got an error"));
    }

    #[tokio::test]
    async fn in_flight_conversation_defers_to_next_cycle() {
        let gate = Arc::new(Notify::new());
        let h = harness_with(FakeCompletion::gated(gate.clone()), FakeSender::new(false)).await;
        h.service.baseline.store(0, Ordering::SeqCst);
        h.source.push(1, "P", "first");

        // The gated completion outlives the 100ms cycle deadline, so the
        // cycle returns with the claim still held.
        let report = h.service.run_cycle().await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.timed_out, 1);

        // New message while in flight: deferred, no second completion.
        h.source.push(2, "P", "second");
        let report = h.service.run_cycle().await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(h.completion.call_count(), 1);
        assert_eq!(h.registry.last_seen("P"), Some(1));

        // Let the outstanding completion finish, then the queued message
        // merges into the next cycle.
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;

        gate.notify_one();
        let report = h.service.run_cycle().await.unwrap();
        assert_eq!(report.processed, 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.registry.last_seen("P"), Some(2));
        assert_eq!(h.completion.call_count(), 2);
    }

    #[tokio::test]
    async fn in_progress_cycle_keeps_its_config_snapshot() {
        let gate = Arc::new(Notify::new());
        let h = harness_with(FakeCompletion::gated(gate.clone()), FakeSender::new(false)).await;
        h.service.baseline.store(0, Ordering::SeqCst);
        h.source.push(1, "P", "first");

        // The completion parks on the gate holding the snapshot taken at
        // the start of this cycle.
        let report = h.service.run_cycle().await.unwrap();
        assert_eq!(report.processed, 1);

        // Console edit lands while that completion is still outstanding.
        let mut updated = h.service.settings.snapshot().await;
        updated.model_name = "deepseek-reasoner".to_string();
        h.service.settings.update(updated).await.unwrap();

        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.completion.seen_models(), vec!["deepseek-chat"]);

        // The next cycle picks up the edit.
        h.source.push(2, "P", "second");
        gate.notify_one();
        let report = h.service.run_cycle().await.unwrap();
        assert_eq!(report.processed, 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            h.completion.seen_models(),
            vec!["deepseek-chat", "deepseek-reasoner"]
        );
    }

    #[tokio::test]
    async fn store_unavailable_skips_cycle_then_recovers() {
        let h = harness().await;
        h.service.baseline.store(0, Ordering::SeqCst);
        h.source.push(1, "P", "hello");
        h.source.set_unavailable(true);

        let report = h.service.run_cycle().await.unwrap();
        assert!(report.store_unavailable);
        assert_eq!(report.processed, 0);

        h.source.set_unavailable(false);
        let report = h.service.run_cycle().await.unwrap();
        assert_eq!(report.processed, 1);
    }

    #[tokio::test]
    async fn failures_are_isolated_per_conversation() {
        let h = harness().await;
        h.service.baseline.store(0, Ordering::SeqCst);
        h.source.push(1, "A", "auth-fail");
        h.source.push(2, "B", "hello");

        let report = h.service.run_cycle().await.unwrap();
        assert_eq!(report.processed, 2);

        // B got its reply despite A's completion failing.
        let sent = h.sender.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![("B".to_string(), "hi there".to_string())]);
        assert_eq!(h.registry.last_seen("A"), Some(1));
        assert_eq!(h.registry.last_seen("B"), Some(2));
    }

    #[tokio::test]
    async fn first_cycle_baselines_to_now() {
        let h = harness().await;
        h.source.push(7, "P", "pre-existing backlog");

        // Unset baseline resolves to the store's latest cursor without
        // replaying the backlog.
        let report = h.service.run_cycle().await.unwrap();
        assert_eq!(report.processed, 0);
        assert_eq!(h.repo.baseline().await.unwrap(), Some(7));

        h.source.push(8, "P", "fresh");
        let report = h.service.run_cycle().await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(h.registry.last_seen("P"), Some(8));
    }

    #[tokio::test]
    async fn missing_api_key_skips_cycle() {
        let repo = HistoryRepository::new(Database::in_memory().await.unwrap());
        let settings = SettingsService::load(repo.clone(), RuntimeConfig::default())
            .await
            .unwrap();
        let source = Arc::new(FakeSource::new());
        source.push(1, "P", "hello");
        let completion = Arc::new(FakeCompletion::new());

        let service = Arc::new(SyncService::new(
            source,
            completion.clone(),
            Arc::new(FakeSender::new(false)),
            Arc::new(ConversationRegistry::new()),
            repo,
            settings,
            SyncOptions::default(),
        ));

        let report = service.run_cycle().await.unwrap();
        assert_eq!(report, CycleReport::default());
        assert_eq!(completion.call_count(), 0);
    }

    #[test]
    fn group_by_peer_preserves_order() {
        let mk = |id, peer: &str| InboundMessage {
            id,
            peer: peer.to_string(),
            text: "x".to_string(),
            received_at: Utc::now(),
        };
        let grouped = group_by_peer(vec![mk(1, "a"), mk(2, "b"), mk(3, "a")]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, "a");
        assert_eq!(grouped[0].1.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(grouped[1].0, "b");
    }

    #[test]
    fn parses_sqlite_and_rfc3339_timestamps() {
        assert_eq!(
            parse_stored_timestamp("2026-08-24 10:00:00").timestamp(),
            parse_stored_timestamp("2026-08-24T10:00:00Z").timestamp()
        );
    }
}
