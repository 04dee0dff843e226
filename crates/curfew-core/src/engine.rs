use std::sync::Arc;

use crate::{
    blocker::BlockDecisionEngine, clock::Clock, critical_section::CriticalSection,
    notifications::NotificationEngine, notifications::Notifier, reset::ResetScheduler,
    session_manager::SessionManager, store::UsageStore,
};

/// The accounting core wired to one store, one clock and one critical
/// section. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Engine {
    sessions: Arc<SessionManager>,
    blocker: Arc<BlockDecisionEngine>,
    notifications: Arc<NotificationEngine>,
    resets: Arc<ResetScheduler>,
}

impl Engine {
    #[must_use]
    pub fn new(
        store: Arc<dyn UsageStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let section = CriticalSection::new();
        Self {
            sessions: Arc::new(SessionManager::new(
                store.clone(),
                clock.clone(),
                section.clone(),
            )),
            blocker: Arc::new(BlockDecisionEngine::new(store.clone(), clock.clone())),
            notifications: Arc::new(NotificationEngine::new(
                store.clone(),
                clock.clone(),
                section.clone(),
                notifier,
            )),
            resets: Arc::new(ResetScheduler::new(store, clock, section)),
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn blocker(&self) -> &BlockDecisionEngine {
        &self.blocker
    }

    #[must_use]
    pub fn notifications(&self) -> &NotificationEngine {
        &self.notifications
    }

    #[must_use]
    pub fn resets(&self) -> &ResetScheduler {
        &self.resets
    }
}

#[cfg(test)]
mod tests;
