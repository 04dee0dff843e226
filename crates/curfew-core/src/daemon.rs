use crate::{
    clock::{Clock, SystemClock},
    config::{get_data_dir, CurfewConfig},
    engine::Engine,
    host::CommandQueue,
    ipc::{listen, DaemonIpcHandler},
    router::{BrowserEvent, EventRouter},
    store::UsageStore,
};
use anyhow::Result;
use curfew_storage::Database;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{Mutex, Notify},
    time::interval,
};

pub struct Daemon {
    engine: Engine,
    router: Arc<Mutex<EventRouter>>,
    ipc_handler: Arc<DaemonIpcHandler>,
    shutdown_signal: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    sock_path: PathBuf,
    alarm_interval_seconds: u64,
}

impl Daemon {
    /// Wire the daemon to the on-disk database and the system clock
    ///
    /// # Errors
    ///
    /// Returns an error if the data dir cannot be determined
    pub fn new(db: Database, config: &CurfewConfig) -> Result<Self> {
        let sock_path = config.socket_path(&get_data_dir()?);
        Ok(Self::with_parts(
            Arc::new(db),
            Arc::new(SystemClock),
            sock_path,
            config.alarm_interval_seconds,
        ))
    }

    #[must_use]
    pub fn with_parts(
        store: Arc<dyn UsageStore>,
        clock: Arc<dyn Clock>,
        sock_path: PathBuf,
        alarm_interval_seconds: u64,
    ) -> Self {
        let queue = Arc::new(CommandQueue::new());
        let engine = Engine::new(store, clock, queue.clone());
        let router = Arc::new(Mutex::new(EventRouter::new(engine.clone(), queue.clone())));
        let shutdown_signal = Arc::new(AtomicBool::new(false));
        let shutdown_notify = Arc::new(Notify::new());

        Self {
            engine: engine.clone(),
            router: router.clone(),
            ipc_handler: Arc::new(DaemonIpcHandler::new(
                engine,
                router,
                queue,
                shutdown_signal.clone(),
                shutdown_notify.clone(),
            )),
            shutdown_signal,
            shutdown_notify,
            sock_path,
            alarm_interval_seconds: alarm_interval_seconds.max(1),
        }
    }

    /// Seed missing fields and apply an overdue reset.
    ///
    /// A session left open by a crash or a forced stop is kept, so the
    /// downtime is credited to it when it next ends. Failures are logged;
    /// the alarm retries the reset.
    pub async fn startup(&self) {
        if let Err(e) = self.engine.resets().initialize().await {
            log::error!("Failed to initialize usage record: {e}");
        }
        match self.engine.sessions().snapshot().await {
            Ok(snapshot) => {
                if let (Some(domain), Some(start)) =
                    (snapshot.current_session_domain, snapshot.current_session_start)
                {
                    log::warn!(
                        "Found a session on {domain} open since {start}; the time since then will be counted when it ends"
                    );
                }
            }
            Err(e) => log::warn!("Failed to read the usage record on startup: {e}"),
        }
        match self.engine.resets().check_and_reset().await {
            Ok(true) => log::info!("Applied overdue daily reset on startup"),
            Ok(false) => {}
            Err(e) => log::error!("Startup reset check failed: {e}"),
        }
    }

    pub async fn run_with_signals(&mut self) -> Result<()> {
        self.startup().await;

        let sock_path = self.sock_path.clone();
        let ipc_handler = self.ipc_handler.clone();
        let listener = tokio::spawn(async move {
            if let Err(e) = listen(ipc_handler, &sock_path).await {
                log::error!("IPC listener failed: {e}");
            }
        });

        let mut interval = interval(Duration::from_secs(self.alarm_interval_seconds));
        // The first tick completes immediately; startup already covered it
        interval.tick().await;
        log::info!(
            "Daemon started with signal handling and IPC (alarm every {}s)",
            self.alarm_interval_seconds
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.router.lock().await.handle(BrowserEvent::AlarmTick).await;
                }
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Received Ctrl-C, shutting down...");
                    self.shutdown_signal.store(true, Ordering::SeqCst);
                }
                () = self.shutdown_notify.notified() => {
                    log::info!("Shutdown requested over IPC");
                }
            }

            if self.shutdown_signal.load(Ordering::SeqCst) {
                break;
            }
        }

        // Close the open session so its time is credited before exit
        self.router.lock().await.shutdown().await;
        listener.abort();
        if self.sock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.sock_path) {
                log::warn!("Failed to remove socket {}: {e}", self.sock_path.display());
            }
        }
        log::info!("Daemon shut down gracefully.");
        Ok(())
    }
}
