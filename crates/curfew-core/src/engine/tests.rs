use super::*;
use crate::clock::ManualClock;
use crate::host::{CommandQueue, HostCommand};
use crate::limits::DAILY_LIMIT_MS;
use crate::notifications::{NotificationHandle, NotifyError};
use crate::store::MemoryStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, TimeZone};
use curfew_storage::{CanonicalDomain, PartialUsage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const X: &str = "https://x.com/home";
const REDDIT: &str = "https://www.reddit.com/r/rust";
const YOUTUBE: &str = "https://m.youtube.com/watch?v=42";

const MINUTE: u64 = 60_000;

fn at(day: u32, h: u32, m: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(3600)
        .unwrap()
        .with_ymd_and_hms(2024, 6, day, h, m, 0)
        .unwrap()
}

struct Harness {
    engine: Engine,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    queue: Arc<CommandQueue>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(at(15, 12, 0)));
    let queue = Arc::new(CommandQueue::new());
    let engine = Engine::new(store.clone(), clock.clone(), queue.clone());
    Harness {
        engine,
        store,
        clock,
        queue,
    }
}

fn per_site_sum(state: &PartialUsage) -> u64 {
    state.per_site_usage().iter().map(|(_, ms)| ms).sum()
}

fn shown(queue: &CommandQueue) -> Vec<String> {
    queue
        .pending()
        .into_iter()
        .filter_map(|command| match command {
            HostCommand::ShowNotification { body, .. } => Some(body),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Budget accounting
// ============================================================================

#[tokio::test]
async fn test_budget_edge_blocks_at_exactly_75_minutes() {
    let h = harness();
    h.engine.sessions().start_session(X).await.unwrap();

    h.clock.advance(Duration::minutes(74) + Duration::seconds(59));
    assert!(!h.engine.blocker().should_block().await.unwrap());

    h.clock.advance(Duration::seconds(1));
    assert!(h.engine.blocker().should_block().await.unwrap());

    h.engine.sessions().end_session().await.unwrap();
    let state = h.store.contents();
    assert_eq!(state.daily_usage_total(), DAILY_LIMIT_MS);
    assert_eq!(state.per_site_usage().get(CanonicalDomain::X), DAILY_LIMIT_MS);
    assert!(h.engine.blocker().should_block().await.unwrap());
}

#[tokio::test]
async fn test_handoff_folds_previous_domain_first() {
    let h = harness();
    h.engine.sessions().start_session(REDDIT).await.unwrap();
    h.clock.advance(Duration::minutes(40));

    h.engine.sessions().start_session(YOUTUBE).await.unwrap();

    let state = h.store.contents();
    assert_eq!(state.daily_usage_total(), 40 * MINUTE);
    assert_eq!(state.per_site_usage().get(CanonicalDomain::Reddit), 40 * MINUTE);
    assert_eq!(state.per_site_usage().get(CanonicalDomain::YouTube), 0);

    let session = state.open_session().unwrap();
    assert_eq!(session.domain, CanonicalDomain::YouTube);
    assert_eq!(session.start, h.clock.now_utc());
    assert_eq!(
        state.limit_target_time(),
        Some(h.clock.now_utc() + Duration::minutes(35))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ends_count_interval_once() {
    let h = harness();
    h.engine.sessions().start_session(REDDIT).await.unwrap();
    h.clock.advance(Duration::minutes(10));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine.sessions().end_session().await.unwrap()
        }));
    }
    let mut folded = Vec::new();
    for handle in handles {
        if let Some(ms) = handle.await.unwrap() {
            folded.push(ms);
        }
    }

    assert_eq!(folded, vec![10 * MINUTE]);
    assert_eq!(h.store.contents().daily_usage_total(), 10 * MINUTE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_transitions_lose_no_time() {
    let h = harness();
    let urls = [X, REDDIT, YOUTUBE, "https://www.instagram.com/"];

    for round in 0..5 {
        let mut handles = Vec::new();
        for (i, url) in urls.iter().enumerate() {
            let engine = h.engine.clone();
            let url = (*url).to_string();
            handles.push(tokio::spawn(async move {
                if (i + round) % 3 == 0 {
                    engine.sessions().end_session().await.map(|_| ())
                } else {
                    engine.sessions().start_session(&url).await.map(|_| ())
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let state = h.store.contents();
        assert_eq!(state.daily_usage_total(), per_site_sum(&state));
        assert_eq!(
            state.current_session_start.flatten().is_some(),
            state.current_session_domain.flatten().is_some()
        );
        h.clock.advance(Duration::minutes(3));
    }

    h.engine.sessions().end_session().await.unwrap();
    let state = h.store.contents();
    assert_eq!(state.daily_usage_total(), per_site_sum(&state));
    // Time only moves between rounds, so only whole 3-minute gaps are credited
    assert_eq!(state.daily_usage_total() % (3 * MINUTE), 0);
    assert!(state.daily_usage_total() <= 15 * MINUTE);
}

#[tokio::test]
async fn test_failed_write_does_not_block_later_operations() {
    let h = harness();
    h.store.fail_next_sets(1);
    assert!(h.engine.sessions().start_session(X).await.is_err());
    assert!(!h.engine.sessions().has_open_session().await.unwrap());

    h.engine.sessions().start_session(X).await.unwrap();
    h.clock.advance(Duration::minutes(2));
    assert_eq!(
        h.engine.sessions().end_session().await.unwrap(),
        Some(2 * MINUTE)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_read_in_queue_does_not_stall_followers() {
    let h = harness();
    h.engine.sessions().start_session(X).await.unwrap();
    h.clock.advance(Duration::minutes(1));
    h.store.fail_next_gets(1);

    let first = {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.sessions().end_session().await })
    };
    let second = {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.sessions().end_session().await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
    assert_eq!(h.store.contents().daily_usage_total(), MINUTE);
}

// ============================================================================
// Daily reset
// ============================================================================

#[tokio::test]
async fn test_reset_truncates_open_session() {
    let h = harness();
    h.engine.resets().initialize().await.unwrap();
    h.engine.sessions().start_session(REDDIT).await.unwrap();

    h.clock.set(at(16, 6, 31));
    assert!(h.engine.resets().check_and_reset().await.unwrap());
    assert_eq!(h.engine.sessions().end_session().await.unwrap(), None);
    assert_eq!(h.store.contents().daily_usage_total(), 0);

    assert!(!h.engine.resets().check_and_reset().await.unwrap());
}

// ============================================================================
// Milestone notifications
// ============================================================================

#[tokio::test]
async fn test_milestones_fire_once_in_descending_order() {
    let h = harness();
    h.engine.sessions().start_session(YOUTUBE).await.unwrap();
    let notifications = h.engine.notifications();

    // Remaining: 31, 29, 11, 9, 6, 4 minutes
    let steps = [(44, None), (2, Some(30)), (18, None), (2, Some(10)), (3, None), (2, Some(5))];
    for (advance, expected) in steps {
        h.clock.advance(Duration::minutes(advance));
        assert_eq!(notifications.check().await.unwrap(), expected);
    }
    assert_eq!(notifications.check().await.unwrap(), None);

    assert_eq!(
        shown(&h.queue),
        vec![
            "30 minutes of social media time remaining",
            "10 minutes of social media time remaining",
            "5 minutes of social media time remaining",
        ]
    );
    assert_eq!(h.store.contents().notified_milestones(), vec![30, 10, 5]);
}

#[tokio::test]
async fn test_large_jump_fires_one_milestone_per_check() {
    let h = harness();
    h.store
        .set(PartialUsage {
            daily_usage_total: Some(71 * MINUTE),
            ..PartialUsage::default()
        })
        .await
        .unwrap();

    let notifications = h.engine.notifications();
    assert_eq!(notifications.check().await.unwrap(), Some(30));
    assert_eq!(notifications.check().await.unwrap(), Some(10));
    assert_eq!(notifications.check().await.unwrap(), Some(5));
    assert_eq!(notifications.check().await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_notification_is_dismissed_after_five_seconds() {
    let h = harness();
    h.store
        .set(PartialUsage {
            daily_usage_total: Some(50 * MINUTE),
            ..PartialUsage::default()
        })
        .await
        .unwrap();
    h.engine.notifications().check().await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(4900)).await;
    assert_eq!(h.queue.pending().len(), 1);

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(
        h.queue.pending().last(),
        Some(&HostCommand::ClearNotification { id: 1 })
    );
}

/// Fails a set number of times, then records what it shows
#[derive(Default)]
struct FlakyNotifier {
    failures: AtomicUsize,
    shown: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for FlakyNotifier {
    async fn notify(&self, _title: &str, body: &str) -> Result<NotificationHandle, NotifyError> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(NotifyError::Unavailable("permission denied".to_string()));
        }
        let mut shown = self.shown.lock().unwrap();
        shown.push(body.to_string());
        Ok(NotificationHandle(shown.len() as u64))
    }

    async fn dismiss(&self, _handle: NotificationHandle) {}
}

#[tokio::test]
async fn test_failed_notification_is_retried_next_check() {
    let store = Arc::new(MemoryStore::with_state(PartialUsage {
        daily_usage_total: Some(50 * MINUTE),
        ..PartialUsage::default()
    }));
    let clock = Arc::new(ManualClock::new(at(15, 12, 0)));
    let notifier = Arc::new(FlakyNotifier {
        failures: AtomicUsize::new(1),
        ..FlakyNotifier::default()
    });
    let engine = Engine::new(store.clone(), clock, notifier.clone());

    assert_eq!(engine.notifications().check().await.unwrap(), None);
    assert!(store.contents().notified_milestones().is_empty());

    assert_eq!(engine.notifications().check().await.unwrap(), Some(30));
    assert_eq!(
        *notifier.shown.lock().unwrap(),
        vec!["30 minutes of social media time remaining"]
    );
}
