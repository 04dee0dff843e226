use curfew_storage::{PartialUsage, StoreError, UsageField, UsageState};
use std::sync::Arc;

use crate::{
    clock::Clock, critical_section::CriticalSection, policy::is_reset_due, store::UsageStore,
};

/// Seeds the usage record and clears it at the daily boundary
pub struct ResetScheduler {
    store: Arc<dyn UsageStore>,
    clock: Arc<dyn Clock>,
    section: CriticalSection,
}

impl ResetScheduler {
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

    /// Write defaults for every field the store does not hold yet.
    ///
    /// Existing values are never overwritten, so this is safe on every start.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage round trip fails
    pub async fn initialize(&self) -> Result<(), StoreError> {
        self.section
            .run(move || async move {
                let current = self.store.get(&UsageField::ALL).await?;
                let defaults = PartialUsage::from(UsageState::fresh(self.clock.now_utc()));
                let missing = current.missing_from(&defaults);
                if missing.is_empty() {
                    return Ok(());
                }
                log::info!("Initializing usage fields: {:?}", missing.fields());
                self.store.set(missing).await
            })
            .await
    }

    /// Reset the record if the daily boundary passed since the last reset.
    ///
    /// An open session is dropped without crediting its time to either day.
    /// Returns whether a reset happened.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage round trip fails
    pub async fn check_and_reset(&self) -> Result<bool, StoreError> {
        self.section
            .run(move || async move {
                let current = self.store.get(&[UsageField::LastResetTimestamp]).await?;
                let now = self.clock.now();
                if !is_reset_due(current.last_reset_timestamp, &now) {
                    return Ok(false);
                }

                let fresh = UsageState::fresh(self.clock.now_utc());
                self.store.set(PartialUsage::from(fresh)).await?;
                log::info!(
                    "Daily usage reset (previous reset: {:?})",
                    current.last_reset_timestamp
                );
                Ok(true)
            })
            .await
    }
}
