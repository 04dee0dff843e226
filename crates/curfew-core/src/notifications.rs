use async_trait::async_trait;
use curfew_storage::{PartialUsage, StoreError, UsageField};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::{
    clock::Clock,
    critical_section::CriticalSection,
    limits::{DAILY_LIMIT_MS, NOTIFICATION_DISMISS_AFTER, NOTIFICATION_MILESTONES},
    session_manager::elapsed_ms,
    store::UsageStore,
};

pub const NOTIFICATION_TITLE: &str = "Time Limits";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationHandle(pub u64);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification surface unavailable: {0}")]
    Unavailable(String),
}

/// Fire-and-forget notification surface
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str) -> Result<NotificationHandle, NotifyError>;

    async fn dismiss(&self, handle: NotificationHandle);
}

/// Whole minutes left, rounded up so 5.9 minutes reads as 6
#[must_use]
pub fn remaining_minutes(remaining_ms: i64) -> i64 {
    remaining_ms.div_euclid(60_000) + i64::from(remaining_ms.rem_euclid(60_000) != 0)
}

/// The largest milestone crossed and not yet notified.
///
/// Only one is returned even when several were crossed since the last
/// check, so a long suspend does not produce a burst of alerts.
#[must_use]
pub fn next_milestone(remaining_minutes: i64, notified: &[u32]) -> Option<u32> {
    NOTIFICATION_MILESTONES
        .into_iter()
        .find(|m| remaining_minutes <= i64::from(*m) && !notified.contains(m))
}

#[must_use]
pub fn milestone_message(milestone: u32) -> String {
    format!("{milestone} minutes of social media time remaining")
}

/// One-shot alerts as the remaining budget crosses each milestone
pub struct NotificationEngine {
    store: Arc<dyn UsageStore>,
    clock: Arc<dyn Clock>,
    section: CriticalSection,
    notifier: Arc<dyn Notifier>,
}

impl NotificationEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn UsageStore>,
        clock: Arc<dyn Clock>,
        section: CriticalSection,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            clock,
            section,
            notifier,
        }
    }

    /// Fire at most one pending milestone and record it.
    ///
    /// Returns the milestone that fired. A milestone is recorded only after
    /// the notifier accepted it, so a failed notification is retried on the
    /// next tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the usage record cannot be read or written
    pub async fn check(&self) -> Result<Option<u32>, StoreError> {
        self.section.run(move || self.check_transaction()).await
    }

    async fn check_transaction(&self) -> Result<Option<u32>, StoreError> {
        let current = self
            .store
            .get(&[
                UsageField::DailyUsageTotal,
                UsageField::CurrentSessionStart,
                UsageField::CurrentSessionDomain,
                UsageField::NotifiedMilestones,
            ])
            .await?;

        let mut total = current.daily_usage_total();
        if let Some(session) = current.open_session() {
            total = total.saturating_add(elapsed_ms(session.start, self.clock.now_utc()));
        }
        let remaining_ms = i64::try_from(DAILY_LIMIT_MS).unwrap_or(i64::MAX)
            - i64::try_from(total).unwrap_or(i64::MAX);

        let mut notified = current.notified_milestones();
        let Some(milestone) = next_milestone(remaining_minutes(remaining_ms), &notified) else {
            return Ok(None);
        };

        let handle = match self
            .notifier
            .notify(NOTIFICATION_TITLE, &milestone_message(milestone))
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!("Failed to show {milestone}-minute notification: {e}");
                return Ok(None);
            }
        };
        self.schedule_dismiss(handle);

        notified.push(milestone);
        self.store
            .set(PartialUsage {
                notified_milestones: Some(notified),
                ..PartialUsage::default()
            })
            .await?;

        log::info!("Notified {milestone}-minute milestone");
        Ok(Some(milestone))
    }

    fn schedule_dismiss(&self, handle: NotificationHandle) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            tokio::time::sleep(NOTIFICATION_DISMISS_AFTER).await;
            notifier.dismiss(handle).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_minutes_rounds_up() {
        assert_eq!(remaining_minutes(5 * 60_000), 5);
        assert_eq!(remaining_minutes(5 * 60_000 + 1), 6);
        assert_eq!(remaining_minutes(354_000), 6);
        assert_eq!(remaining_minutes(1), 1);
        assert_eq!(remaining_minutes(0), 0);
        assert_eq!(remaining_minutes(-1), 0);
        assert_eq!(remaining_minutes(-60_000), -1);
    }

    #[test]
    fn test_next_milestone_picks_largest_pending() {
        assert_eq!(next_milestone(31, &[]), None);
        assert_eq!(next_milestone(30, &[]), Some(30));
        assert_eq!(next_milestone(4, &[]), Some(30));
        assert_eq!(next_milestone(4, &[30]), Some(10));
        assert_eq!(next_milestone(4, &[30, 10]), Some(5));
        assert_eq!(next_milestone(4, &[30, 10, 5]), None);
    }

    #[test]
    fn test_next_milestone_skips_notified() {
        assert_eq!(next_milestone(29, &[30]), None);
        assert_eq!(next_milestone(10, &[30]), Some(10));
    }

    #[test]
    fn test_milestone_message() {
        assert_eq!(
            milestone_message(10),
            "10 minutes of social media time remaining"
        );
    }
}
