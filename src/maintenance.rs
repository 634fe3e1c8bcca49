use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::scheduler::Scheduler;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact once at least `threshold` records were appended since the last
/// compaction. Returns whether it compacted.
pub async fn compact_if_due(scheduler: &Scheduler, threshold: u64) -> bool {
    let appended = scheduler.journal_appends_since_compact().await;
    if appended < threshold {
        debug!(appended, threshold, "journal compaction not due");
        return false;
    }
    match scheduler.compact_journal().await {
        Ok(()) => true,
        Err(e) => {
            warn!("journal compaction skipped: {e}");
            false
        }
    }
}

/// Background task that keeps the journal from growing without bound.
pub async fn run_compactor(scheduler: Arc<Scheduler>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&scheduler, threshold).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulingPolicy;
    use crate::model::Client;
    use crate::notify::NotifyHub;
    use ulid::Ulid;

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let dir = std::env::temp_dir().join("vitrine_test_maintenance");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("threshold.journal");
        let _ = std::fs::remove_file(&path);

        let scheduler = Scheduler::open(
            &path,
            SchedulingPolicy::default(),
            Arc::new(NotifyHub::new()),
        )
        .unwrap();
        for i in 0..3 {
            scheduler
                .register_client(Client {
                    id: Ulid::new(),
                    name: format!("client {i}"),
                    email: None,
                    phone: None,
                })
                .await
                .unwrap();
        }

        assert!(!compact_if_due(&scheduler, 5).await);
        assert_eq!(scheduler.journal_appends_since_compact().await, 3);
        assert!(compact_if_due(&scheduler, 3).await);
        assert_eq!(scheduler.journal_appends_since_compact().await, 0);
    }
}
