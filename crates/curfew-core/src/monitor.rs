use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::{
    domain::is_tracked_url,
    engine::Engine,
    host::{redirect_tab, BrowserHost, TabId},
};

/// Per-tab watchdog that blocks the tab the moment the budget or curfew
/// kicks in, and drives milestone notifications meanwhile.
///
/// Cancelling is idempotent and dropping the handle cancels the task.
#[derive(Debug)]
pub struct MonitorHandle {
    tab_id: TabId,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Start watching `tab_id`, first tick one `period` from now
    #[must_use]
    pub fn spawn(
        engine: Engine,
        host: Arc<dyn BrowserHost>,
        tab_id: TabId,
        url: String,
        period: Duration,
    ) -> Self {
        log::debug!("Monitoring tab {tab_id} every {period:?}");
        let task = tokio::spawn(watch(engine, host, tab_id, url, period));
        Self {
            tab_id,
            task: Some(task),
        }
    }

    #[must_use]
    pub const fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Whether the task is still ticking
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            log::debug!("Stopped monitoring tab {}", self.tab_id);
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn watch(
    engine: Engine,
    host: Arc<dyn BrowserHost>,
    tab_id: TabId,
    url: String,
    period: Duration,
) {
    if !is_tracked_url(&url) {
        return;
    }

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match engine.blocker().should_block().await {
            Ok(true) => {
                if let Err(e) = engine.sessions().end_session().await {
                    log::warn!("Failed to end session before blocking tab {tab_id}: {e}");
                }
                redirect_tab(host.as_ref(), tab_id, Some(&url)).await;
                return;
            }
            Ok(false) => {
                if let Err(e) = engine.notifications().check().await {
                    log::warn!("Notification check failed: {e}");
                }
            }
            Err(e) => log::warn!("Block check failed for tab {tab_id}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::host::{block_page_url, CommandQueue, HostCommand};
    use crate::limits::{DAILY_LIMIT_MS, MONITOR_TICK};
    use crate::store::{MemoryStore, UsageStore};
    use chrono::{FixedOffset, TimeZone};
    use curfew_storage::{CanonicalDomain, PartialUsage};

    const URL: &str = "https://www.instagram.com/reels/";

    struct Fixture {
        engine: Engine,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        queue: Arc<CommandQueue>,
    }

    async fn fixture(used_ms: u64) -> Fixture {
        let noon = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 15, 12, 0, 0)
            .unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .set(PartialUsage {
                daily_usage_total: Some(used_ms),
                ..PartialUsage::default()
            })
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::new(noon));
        let queue = Arc::new(CommandQueue::new());
        let engine = Engine::new(store.clone(), clock.clone(), queue.clone());
        Fixture {
            engine,
            store,
            clock,
            queue,
        }
    }

    fn spawn(f: &Fixture, tab_id: TabId) -> MonitorHandle {
        MonitorHandle::spawn(
            f.engine.clone(),
            f.queue.clone(),
            tab_id,
            URL.to_string(),
            MONITOR_TICK,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocks_and_stops_when_budget_runs_out() {
        let f = fixture(DAILY_LIMIT_MS - 60_000).await;
        f.engine.sessions().start_session(URL).await.unwrap();
        let handle = spawn(&f, 4);

        f.clock.advance(chrono::Duration::minutes(2));
        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(!handle.is_active());
        assert_eq!(
            f.queue.pending(),
            vec![HostCommand::Redirect {
                tab_id: 4,
                url: block_page_url(Some(URL)),
            }]
        );
        let state = f.store.contents();
        assert_eq!(state.open_session(), None);
        assert_eq!(
            state.per_site_usage().get(CanonicalDomain::Instagram),
            2 * 60_000
        );
        assert_eq!(state.daily_usage_total(), DAILY_LIMIT_MS + 60_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifies_while_under_budget() {
        let f = fixture(46 * 60_000).await;
        let handle = spawn(&f, 1);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(handle.is_active());
        assert_eq!(f.queue.pending().len(), 1);
        assert_eq!(f.store.contents().notified_milestones(), vec![30]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(
            f.queue.pending().last(),
            Some(&HostCommand::ClearNotification { id: 1 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent_and_stops_ticks() {
        let f = fixture(DAILY_LIMIT_MS).await;
        let mut handle = spawn(&f, 2);
        assert!(handle.is_active());
        assert_eq!(handle.tab_id(), 2);

        handle.cancel();
        handle.cancel();
        assert!(!handle.is_active());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(f.queue.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let f = fixture(DAILY_LIMIT_MS).await;
        drop(spawn(&f, 3));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(f.queue.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_untracked_url_stops_immediately() {
        let f = fixture(DAILY_LIMIT_MS).await;
        let handle = MonitorHandle::spawn(
            f.engine.clone(),
            f.queue.clone(),
            5,
            "https://example.com/".to_string(),
            MONITOR_TICK,
        );

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!handle.is_active());
        assert!(f.queue.pending().is_empty());
    }
}
