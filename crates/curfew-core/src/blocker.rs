use chrono::{DateTime, TimeZone, Utc};
use curfew_storage::{StoreError, UsageField};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    clock::Clock, limits::DAILY_LIMIT_MS, policy::is_curfew, session_manager::elapsed_ms,
    store::UsageStore,
};

/// Why access is blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReason {
    /// Inside the nightly window; wins over an exhausted budget
    Curfew,
    /// Today's usage reached the daily limit
    BudgetExhausted,
}

impl BlockReason {
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::Curfew => "Blocked until 6:30 AM.",
            Self::BudgetExhausted => "You've used your 75 minutes for today.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDecision {
    pub reason: Option<BlockReason>,
    /// True usage today, open session included
    pub total_usage: u64,
}

impl BlockDecision {
    #[must_use]
    pub const fn blocked(&self) -> bool {
        self.reason.is_some()
    }
}

/// Decision for `total_usage` at wall-clock `now`. Curfew wins over an
/// exhausted budget.
#[must_use]
pub fn decision_at<Tz: TimeZone>(total_usage: u64, now: &DateTime<Tz>) -> BlockDecision {
    let reason = if is_curfew(now) {
        Some(BlockReason::Curfew)
    } else if total_usage >= DAILY_LIMIT_MS {
        Some(BlockReason::BudgetExhausted)
    } else {
        None
    };
    BlockDecision {
        reason,
        total_usage,
    }
}

/// Decides whether tracked sites must be blocked right now.
///
/// Reads are not serialized with session transitions; a decision computed
/// while a transition is in flight is corrected on the next tick.
pub struct BlockDecisionEngine {
    store: Arc<dyn UsageStore>,
    clock: Arc<dyn Clock>,
}

impl BlockDecisionEngine {
    #[must_use]
    pub fn new(store: Arc<dyn UsageStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// # Errors
    ///
    /// Returns an error if the usage record cannot be read
    pub async fn decide(&self) -> Result<BlockDecision, StoreError> {
        let current = self
            .store
            .get(&[
                UsageField::DailyUsageTotal,
                UsageField::CurrentSessionStart,
                UsageField::CurrentSessionDomain,
            ])
            .await?;
        let now = self.clock.now();

        let mut total_usage = current.daily_usage_total();
        if let Some(session) = current.open_session() {
            total_usage =
                total_usage.saturating_add(elapsed_ms(session.start, now.with_timezone(&Utc)));
        }

        Ok(decision_at(total_usage, &now))
    }

    /// # Errors
    ///
    /// Returns an error if the usage record cannot be read
    pub async fn should_block(&self) -> Result<bool, StoreError> {
        Ok(self.decide().await?.blocked())
    }
}
