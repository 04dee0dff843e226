use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

use crate::notifications::{NotificationHandle, Notifier, NotifyError};

/// Browser tab identifier
pub type TabId = i64;

pub const BLOCK_PAGE: &str = "blocked.html";

/// Commands kept for the bridge; older ones are dropped past this
pub const MAX_PENDING_COMMANDS: usize = 256;

/// Closed tabs remembered for refusing late redirects
pub const MAX_CLOSED_TABS: usize = 256;

#[derive(Debug, Error)]
pub enum HostError {
    /// The tab was closed between the trigger and the action
    #[error("tab {0} no longer exists")]
    TabGone(TabId),
}

/// Actions the core asks of the browser
#[async_trait]
pub trait BrowserHost: Send + Sync {
    async fn redirect_to_block_page(
        &self,
        tab: TabId,
        original_url: Option<&str>,
    ) -> Result<(), HostError>;

    /// The tab was closed; later actions on it should fail with `TabGone`
    async fn forget_tab(&self, _tab: TabId) {}
}

/// Block page location, carrying the blocked URL so the page can restore it
#[must_use]
pub fn block_page_url(original_url: Option<&str>) -> String {
    match original_url {
        Some(url) => {
            let encoded: String = url::form_urlencoded::byte_serialize(url.as_bytes()).collect();
            format!("{BLOCK_PAGE}?originalUrl={encoded}")
        }
        None => BLOCK_PAGE.to_string(),
    }
}

/// Redirect `tab`, treating a tab that is already gone as nothing to do.
///
/// Returns whether the redirect was issued.
pub async fn redirect_tab(host: &dyn BrowserHost, tab: TabId, original_url: Option<&str>) -> bool {
    match host.redirect_to_block_page(tab, original_url).await {
        Ok(()) => {
            log::info!("Redirected tab {tab} to the block page");
            true
        }
        Err(HostError::TabGone(tab)) => {
            log::debug!("Tab {tab} closed before it could be redirected");
            false
        }
    }
}

/// Work queued for the browser bridge to carry out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostCommand {
    Redirect { tab_id: TabId, url: String },
    ShowNotification { id: u64, title: String, body: String },
    ClearNotification { id: u64 },
}

/// Host and notifier that queue commands for the browser bridge, which
/// drains them over IPC.
///
/// Both the command queue and the closed-tab list are bounded; the oldest
/// entries go first.
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: Mutex<VecDeque<HostCommand>>,
    closed_tabs: Mutex<VecDeque<TabId>>,
    next_notification: AtomicU64,
}

impl CommandQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, command: HostCommand) {
        log::debug!("Queued host command: {command:?}");
        let mut commands = self.commands.lock().unwrap_or_else(PoisonError::into_inner);
        if commands.len() >= MAX_PENDING_COMMANDS {
            if let Some(dropped) = commands.pop_front() {
                log::warn!("Command queue full, dropping undelivered {dropped:?}");
            }
        }
        commands.push_back(command);
    }

    /// Take every pending command, oldest first
    pub fn drain(&self) -> Vec<HostCommand> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    /// Pending commands without consuming them
    #[must_use]
    pub fn pending(&self) -> Vec<HostCommand> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Whether `tab` was closed. The entry is consumed: a refused redirect
    /// is the last thing that can target it.
    fn take_closed(&self, tab: TabId) -> bool {
        let mut closed = self.closed_tabs.lock().unwrap_or_else(PoisonError::into_inner);
        match closed.iter().position(|id| *id == tab) {
            Some(index) => {
                closed.remove(index);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl BrowserHost for CommandQueue {
    async fn redirect_to_block_page(
        &self,
        tab: TabId,
        original_url: Option<&str>,
    ) -> Result<(), HostError> {
        if self.take_closed(tab) {
            return Err(HostError::TabGone(tab));
        }
        self.push(HostCommand::Redirect {
            tab_id: tab,
            url: block_page_url(original_url),
        });
        Ok(())
    }

    async fn forget_tab(&self, tab: TabId) {
        let mut closed = self.closed_tabs.lock().unwrap_or_else(PoisonError::into_inner);
        if closed.contains(&tab) {
            return;
        }
        if closed.len() >= MAX_CLOSED_TABS {
            closed.pop_front();
        }
        closed.push_back(tab);
    }
}

#[async_trait]
impl Notifier for CommandQueue {
    async fn notify(&self, title: &str, body: &str) -> Result<NotificationHandle, NotifyError> {
        let id = self.next_notification.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("{title}: {body}");
        self.push(HostCommand::ShowNotification {
            id,
            title: title.to_string(),
            body: body.to_string(),
        });
        Ok(NotificationHandle(id))
    }

    async fn dismiss(&self, handle: NotificationHandle) {
        self.push(HostCommand::ClearNotification { id: handle.0 });
    }
}
