use chrono::{DateTime, Duration, FixedOffset, Utc};
use curfew_storage::{
    CanonicalDomain, OpenSession, PartialUsage, PerSiteUsage, StoreError, UsageField,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    clock::Clock, critical_section::CriticalSection, domain::canonicalize_url,
    limits::DAILY_LIMIT_MS, policy::is_reset_due, store::UsageStore,
};

/// Fields every session transition reads before writing
const SESSION_FIELDS: [UsageField; 4] = [
    UsageField::DailyUsageTotal,
    UsageField::PerSiteUsage,
    UsageField::CurrentSessionStart,
    UsageField::CurrentSessionDomain,
];

/// Milliseconds between `start` and `now`, zero if the clock went backwards
#[must_use]
pub fn elapsed_ms(start: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from(now.signed_duration_since(start).num_milliseconds()).unwrap_or(0)
}

/// Instant at which the budget runs out if a session opened at `start`
/// continues uninterrupted
#[must_use]
pub fn limit_target_time(start: DateTime<Utc>, daily_usage_total: u64) -> DateTime<Utc> {
    let remaining = DAILY_LIMIT_MS.saturating_sub(daily_usage_total);
    start + Duration::milliseconds(i64::try_from(remaining).unwrap_or(i64::MAX))
}

/// Read-only view of the usage record for status surfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub taken_at: DateTime<Utc>,
    /// Persisted total, excluding the open session
    pub daily_usage_total: u64,
    /// Persisted per-site usage, excluding the open session
    pub per_site_usage: PerSiteUsage,
    pub current_session_start: Option<DateTime<Utc>>,
    pub current_session_domain: Option<CanonicalDomain>,
    pub limit_target_time: Option<DateTime<Utc>>,
    pub last_reset_timestamp: Option<DateTime<Utc>>,
}

impl UsageSnapshot {
    fn open_session(&self) -> Option<OpenSession> {
        match (self.current_session_start, self.current_session_domain) {
            (Some(start), Some(domain)) => Some(OpenSession { domain, start }),
            _ => None,
        }
    }

    /// Elapsed time of the open session at `taken_at`
    #[must_use]
    pub fn session_elapsed(&self) -> u64 {
        self.open_session()
            .map_or(0, |session| elapsed_ms(session.start, self.taken_at))
    }

    /// Persisted total plus the open session
    #[must_use]
    pub fn live_total(&self) -> u64 {
        self.daily_usage_total.saturating_add(self.session_elapsed())
    }

    /// Per-site usage with the open session credited to its domain
    #[must_use]
    pub fn live_per_site(&self) -> PerSiteUsage {
        let mut usage = self.per_site_usage.clone();
        if let Some(session) = self.open_session() {
            usage.add(session.domain, self.session_elapsed());
        }
        usage
    }

    /// The record as it reads once a due daily reset is applied.
    ///
    /// For readers that must not write the reset themselves: past the
    /// boundary they see a zeroed day with no open session.
    #[must_use]
    pub fn rolled_over(self, now: &DateTime<FixedOffset>) -> Self {
        if !is_reset_due(self.last_reset_timestamp, now) {
            return self;
        }
        Self {
            taken_at: self.taken_at,
            daily_usage_total: 0,
            per_site_usage: PerSiteUsage::zeroed(),
            current_session_start: None,
            current_session_domain: None,
            limit_target_time: None,
            last_reset_timestamp: Some(now.with_timezone(&Utc)),
        }
    }

    /// Budget left. While a session is open this counts down towards the
    /// target fixed when the session opened.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        match (self.open_session(), self.limit_target_time) {
            (Some(_), Some(target)) => elapsed_ms(self.taken_at, target),
            _ => DAILY_LIMIT_MS.saturating_sub(self.live_total()),
        }
    }
}

/// Owns the open accounting interval.
///
/// `start_session` and `end_session` are read-modify-write transactions on the
/// shared record and always run inside the critical section, one at a time, in
/// arrival order.
pub struct SessionManager {
    store: Arc<dyn UsageStore>,
    clock: Arc<dyn Clock>,
    section: CriticalSection,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn UsageStore>,
        clock: Arc<dyn Clock>,
        section: CriticalSection,
    ) -> Self {
        Self {
            store,
            clock,
            section,
        }
    }

    /// Open a session for the domain of `url`.
    ///
    /// Untracked URLs are ignored. If another session is still open its
    /// elapsed time is folded into the totals first (atomic handoff).
    ///
    /// # Errors
    ///
    /// Returns an error if the storage round trip fails; nothing is written
    /// in that case
    pub async fn start_session(&self, url: &str) -> Result<Option<CanonicalDomain>, StoreError> {
        let Some(domain) = canonicalize_url(url) else {
            return Ok(None);
        };
        self.start_session_for(domain).await?;
        Ok(Some(domain))
    }

    /// Open a session for an already canonical domain
    ///
    /// # Errors
    ///
    /// Returns an error if the storage round trip fails
    pub async fn start_session_for(&self, domain: CanonicalDomain) -> Result<(), StoreError> {
        self.section
            .run(move || self.open_transaction(domain))
            .await
    }

    async fn open_transaction(&self, domain: CanonicalDomain) -> Result<(), StoreError> {
        let current = self.store.get(&SESSION_FIELDS).await?;
        let now = self.clock.now_utc();

        let mut total = current.daily_usage_total();
        let mut per_site = current.per_site_usage();
        if let Some(previous) = current.open_session() {
            let folded = elapsed_ms(previous.start, now);
            total = total.saturating_add(folded);
            per_site.add(previous.domain, folded);
            log::debug!(
                "Handing off {}ms from {} to {domain}",
                folded,
                previous.domain
            );
        }

        self.store
            .set(PartialUsage {
                daily_usage_total: Some(total),
                per_site_usage: Some(per_site),
                current_session_start: Some(Some(now)),
                current_session_domain: Some(Some(domain)),
                limit_target_time: Some(Some(limit_target_time(now, total))),
                ..PartialUsage::default()
            })
            .await?;

        log::info!("Started session on {domain} (used today: {total}ms)");
        Ok(())
    }

    /// Close the open session, folding its elapsed time into the totals.
    ///
    /// A no-op when nothing is open. Returns the folded duration.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage round trip fails
    pub async fn end_session(&self) -> Result<Option<u64>, StoreError> {
        self.section.run(move || self.close_transaction()).await
    }

    async fn close_transaction(&self) -> Result<Option<u64>, StoreError> {
        let current = self.store.get(&SESSION_FIELDS).await?;
        let Some(session) = current.open_session() else {
            return Ok(None);
        };
        let now = self.clock.now_utc();
        let folded = elapsed_ms(session.start, now);

        let mut per_site = current.per_site_usage();
        per_site.add(session.domain, folded);
        let total = current.daily_usage_total().saturating_add(folded);

        self.store
            .set(PartialUsage {
                daily_usage_total: Some(total),
                per_site_usage: Some(per_site),
                current_session_start: Some(None),
                current_session_domain: Some(None),
                limit_target_time: Some(None),
                ..PartialUsage::default()
            })
            .await?;

        log::info!(
            "Ended session on {} after {folded}ms (used today: {total}ms)",
            session.domain
        );
        Ok(Some(folded))
    }

    /// Whether a session is currently open. Not serialized.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails
    pub async fn has_open_session(&self) -> Result<bool, StoreError> {
        let current = self
            .store
            .get(&[UsageField::CurrentSessionStart, UsageField::CurrentSessionDomain])
            .await?;
        Ok(current.open_session().is_some())
    }

    /// Read-only view of the record. Not serialized, so it may be superseded
    /// by a transaction already in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails
    pub async fn snapshot(&self) -> Result<UsageSnapshot, StoreError> {
        let current = self
            .store
            .get(&[
                UsageField::DailyUsageTotal,
                UsageField::PerSiteUsage,
                UsageField::CurrentSessionStart,
                UsageField::CurrentSessionDomain,
                UsageField::LimitTargetTime,
                UsageField::LastResetTimestamp,
            ])
            .await?;
        let session = current.open_session();

        Ok(UsageSnapshot {
            taken_at: self.clock.now_utc(),
            daily_usage_total: current.daily_usage_total(),
            per_site_usage: current.per_site_usage(),
            current_session_start: session.map(|s| s.start),
            current_session_domain: session.map(|s| s.domain),
            limit_target_time: current.limit_target_time(),
            last_reset_timestamp: current.last_reset_timestamp,
        })
    }
}
