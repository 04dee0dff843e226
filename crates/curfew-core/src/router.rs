use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    domain::is_tracked_url,
    engine::Engine,
    host::{redirect_tab, BrowserHost, TabId},
    limits::MONITOR_TICK,
    monitor::MonitorHandle,
};

/// The tab currently in focus, as far as the router knows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTabContext {
    pub tab_id: Option<TabId>,
    pub url: Option<String>,
}

impl ActiveTabContext {
    fn tracked_url(&self) -> Option<(TabId, &str)> {
        match (self.tab_id, self.url.as_deref()) {
            (Some(tab_id), Some(url)) if is_tracked_url(url) => Some((tab_id, url)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: TabId,
    pub url: Option<String>,
}

/// Inputs from the browser and from UI surfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrowserEvent {
    /// The user switched to another tab
    TabActivated { tab_id: TabId, url: Option<String> },
    /// Navigation or reload; `url` is set only when the URL changed
    TabUpdated {
        tab_id: TabId,
        url: Option<String>,
        loading: bool,
    },
    TabRemoved { tab_id: TabId },
    /// `None` when the browser lost focus altogether
    WindowFocusChanged { active_tab: Option<TabInfo> },
    /// Page visibility reported from inside the tab
    VisibilityChanged {
        tab_id: TabId,
        url: Option<String>,
        visible: bool,
    },
    /// Periodic reset and status check
    AlarmTick,
    /// Block the active tab now
    RequestBlock,
    /// Re-check the active tab
    RequestStatusRefresh,
}

/// Applies browser events to the accounting core.
///
/// Owns the focused-tab context and the monitor for it. Every failure is
/// logged and swallowed; the next event or tick re-derives everything from
/// the stored timestamps.
pub struct EventRouter {
    engine: Engine,
    host: Arc<dyn BrowserHost>,
    context: ActiveTabContext,
    monitor: Option<MonitorHandle>,
    monitor_period: Duration,
}

impl EventRouter {
    #[must_use]
    pub fn new(engine: Engine, host: Arc<dyn BrowserHost>) -> Self {
        Self::with_monitor_period(engine, host, MONITOR_TICK)
    }

    #[must_use]
    pub fn with_monitor_period(
        engine: Engine,
        host: Arc<dyn BrowserHost>,
        monitor_period: Duration,
    ) -> Self {
        Self {
            engine,
            host,
            context: ActiveTabContext::default(),
            monitor: None,
            monitor_period,
        }
    }

    #[must_use]
    pub fn context(&self) -> &ActiveTabContext {
        &self.context
    }

    /// Tab currently being monitored, if any
    #[must_use]
    pub fn monitored_tab(&self) -> Option<TabId> {
        self.monitor
            .as_ref()
            .filter(|monitor| monitor.is_active())
            .map(MonitorHandle::tab_id)
    }

    pub async fn handle(&mut self, event: BrowserEvent) {
        log::debug!("Handling {event:?}");
        match event {
            BrowserEvent::TabActivated { tab_id, url } => {
                self.end_current_session().await;
                self.context = ActiveTabContext {
                    tab_id: Some(tab_id),
                    url: url.clone(),
                };
                if let Some(url) = url.filter(|url| is_tracked_url(url)) {
                    self.enter_tracked_tab(tab_id, &url).await;
                }
            }
            BrowserEvent::TabUpdated {
                tab_id,
                url,
                loading,
            } => self.tab_updated(tab_id, url, loading).await,
            BrowserEvent::TabRemoved { tab_id } => {
                self.host.forget_tab(tab_id).await;
                if self.context.tab_id == Some(tab_id) {
                    self.end_current_session().await;
                    self.context = ActiveTabContext::default();
                }
            }
            BrowserEvent::WindowFocusChanged { active_tab: None } => {
                self.end_current_session().await;
                self.context = ActiveTabContext::default();
            }
            BrowserEvent::WindowFocusChanged {
                active_tab: Some(tab),
            } => {
                self.end_current_session().await;
                self.context = ActiveTabContext {
                    tab_id: Some(tab.id),
                    url: tab.url.clone(),
                };
                if let Some(url) = tab.url.filter(|url| is_tracked_url(url)) {
                    self.enter_tracked_tab(tab.id, &url).await;
                }
            }
            BrowserEvent::VisibilityChanged {
                tab_id,
                url,
                visible,
            } => self.visibility_changed(tab_id, url, visible).await,
            BrowserEvent::AlarmTick => {
                if let Err(e) = self.engine.resets().check_and_reset().await {
                    log::warn!("Daily reset check failed: {e}");
                }
                self.check_current_tab().await;
            }
            BrowserEvent::RequestBlock => {
                if let Some(tab_id) = self.context.tab_id {
                    let url = self.context.url.clone();
                    self.block_tab(tab_id, url.as_deref()).await;
                }
            }
            BrowserEvent::RequestStatusRefresh => self.check_current_tab().await,
        }
    }

    /// Stop monitoring and close any open session
    pub async fn shutdown(&mut self) {
        self.end_current_session().await;
    }

    async fn tab_updated(&mut self, tab_id: TabId, url: Option<String>, loading: bool) {
        if self.context.tab_id != Some(tab_id) || (url.is_none() && !loading) {
            return;
        }

        let changed = url.is_some();
        if let Some(url) = url {
            self.end_current_session().await;
            self.context.url = Some(url);
        }

        let Some(url) = self.context.url.clone().filter(|url| is_tracked_url(url)) else {
            return;
        };
        match self.engine.blocker().should_block().await {
            Ok(true) => self.block_tab(tab_id, Some(&url)).await,
            Ok(false) if changed => self.start_tracking(tab_id, &url).await,
            Ok(false) => {}
            Err(e) => log::warn!("Block check failed for tab {tab_id}: {e}"),
        }
    }

    async fn visibility_changed(&mut self, tab_id: TabId, url: Option<String>, visible: bool) {
        if !visible {
            self.end_current_session().await;
            return;
        }
        let Some(url) = url.filter(|url| is_tracked_url(url)) else {
            return;
        };
        if self.context.tab_id == Some(tab_id) {
            self.context.url = Some(url.clone());
            self.start_tracking(tab_id, &url).await;
        } else if let Err(e) = self.engine.sessions().start_session(&url).await {
            log::warn!("Failed to start session for visible tab {tab_id}: {e}");
        }
    }

    /// Block the active tracked tab, or open a session for it if none is
    /// running
    async fn check_current_tab(&mut self) {
        let Some((tab_id, url)) = self
            .context
            .tracked_url()
            .map(|(tab_id, url)| (tab_id, url.to_string()))
        else {
            return;
        };

        match self.engine.blocker().should_block().await {
            Ok(true) => self.block_tab(tab_id, Some(&url)).await,
            Ok(false) => match self.engine.sessions().has_open_session().await {
                Ok(true) => {}
                Ok(false) => self.start_tracking(tab_id, &url).await,
                Err(e) => log::warn!("Failed to read session state: {e}"),
            },
            Err(e) => log::warn!("Block check failed for tab {tab_id}: {e}"),
        }
    }

    async fn enter_tracked_tab(&mut self, tab_id: TabId, url: &str) {
        match self.engine.blocker().should_block().await {
            Ok(true) => self.block_tab(tab_id, Some(url)).await,
            Ok(false) => self.start_tracking(tab_id, url).await,
            Err(e) => log::warn!("Block check failed for tab {tab_id}: {e}"),
        }
    }

    async fn start_tracking(&mut self, tab_id: TabId, url: &str) {
        if let Err(e) = self.engine.sessions().start_session(url).await {
            log::warn!("Failed to start session for tab {tab_id}: {e}");
        }
        self.stop_monitoring();
        self.monitor = Some(MonitorHandle::spawn(
            self.engine.clone(),
            self.host.clone(),
            tab_id,
            url.to_string(),
            self.monitor_period,
        ));
    }

    async fn block_tab(&mut self, tab_id: TabId, url: Option<&str>) {
        self.end_current_session().await;
        redirect_tab(self.host.as_ref(), tab_id, url).await;
    }

    async fn end_current_session(&mut self) {
        self.stop_monitoring();
        if let Err(e) = self.engine.sessions().end_session().await {
            log::warn!("Failed to end session: {e}");
        }
    }

    fn stop_monitoring(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.cancel();
        }
    }
}
