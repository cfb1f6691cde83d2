//! Periodic pruning of aged history, replies, and call-log rows.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::history::HistoryRepository;

/// How often the prune runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Retention policy for persisted records.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub enabled: bool,
    /// Rows older than this many days are deleted.
    pub days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { enabled: true, days: 30 }
    }
}

/// Run the daily sweep until shutdown. Prunes once at startup, then on
/// the sweep interval.
pub async fn run(
    repo: HistoryRepository,
    policy: RetentionPolicy,
    mut shutdown: watch::Receiver<bool>,
) {
    if !policy.enabled {
        info!("retention sweep disabled");
        return;
    }

    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match repo.prune_older_than(i64::from(policy.days)).await {
                    Ok(0) => {}
                    Ok(pruned) => info!(pruned, days = policy.days, "pruned aged records"),
                    Err(err) => warn!(error = %err, "retention sweep failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
