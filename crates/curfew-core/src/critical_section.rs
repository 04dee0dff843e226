use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// FIFO mutual exclusion for read-modify-write transactions on the usage
/// record.
///
/// Operations are admitted in the order they call [`run`](Self::run) and each
/// runs to completion, storage round trips included, before the next one
/// starts. The guard is released however an operation ends, so an error in
/// one operation never stalls the ones queued behind it.
#[derive(Clone, Default)]
pub struct CriticalSection {
    gate: Arc<Mutex<()>>,
}

impl CriticalSection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<F, Fut, T>(&self, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        // tokio's Mutex hands out the lock in request order
        let _guard = self.gate.lock().await;
        op().await
    }
}
