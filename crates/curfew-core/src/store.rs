use async_trait::async_trait;
use curfew_storage::{Database, PartialUsage, StoreError, UsageField};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Persistence primitives for the usage record.
///
/// Each call is atomic on its own. Nothing spans calls, so a logical
/// transaction is one `get` followed by one `set` inside the
/// [`CriticalSection`](crate::critical_section::CriticalSection).
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn get(&self, fields: &[UsageField]) -> Result<PartialUsage, StoreError>;

    async fn set(&self, partial: PartialUsage) -> Result<(), StoreError>;
}

#[async_trait]
impl UsageStore for Database {
    async fn get(&self, fields: &[UsageField]) -> Result<PartialUsage, StoreError> {
        self.read_fields(fields)
    }

    async fn set(&self, partial: PartialUsage) -> Result<(), StoreError> {
        self.write_fields(&partial)
    }
}

/// In-process store with failure injection.
///
/// Every call yields to the scheduler before touching state, so concurrent
/// callers interleave the way they would against a real storage round trip.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<PartialUsage>,
    failing_gets: AtomicUsize,
    failing_sets: AtomicUsize,
    sets: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_state(state: PartialUsage) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Snapshot of everything stored
    #[must_use]
    pub fn contents(&self) -> PartialUsage {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make the next `count` reads fail
    pub fn fail_next_gets(&self, count: usize) {
        self.failing_gets.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` writes fail
    pub fn fail_next_sets(&self, count: usize) {
        self.failing_sets.store(count, Ordering::SeqCst);
    }

    /// Number of successful writes so far
    #[must_use]
    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn get(&self, fields: &[UsageField]) -> Result<PartialUsage, StoreError> {
        tokio::task::yield_now().await;
        if Self::take_failure(&self.failing_gets) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        let state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(state.select(fields))
    }

    async fn set(&self, partial: PartialUsage) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        if Self::take_failure(&self.failing_sets) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        self.state
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .merge(partial);
        self.sets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
