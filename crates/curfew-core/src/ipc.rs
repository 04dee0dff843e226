use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::{Mutex, Notify},
    time::timeout,
};

use crate::{
    blocker::BlockDecision,
    engine::Engine,
    host::{CommandQueue, HostCommand, TabId},
    router::{BrowserEvent, EventRouter},
    session_manager::UsageSnapshot,
};

/// Largest request the daemon accepts
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Clients must send their whole request within this window
pub const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// IPC request from the CLI or browser bridge to the daemon
#[derive(Serialize, Deserialize, Debug)]
pub enum IpcRequest {
    Status,
    Snapshot,
    CheckBlock,
    Event(BrowserEvent),
    DrainCommands,
    Shutdown,
}

/// IPC response from the daemon
#[derive(Serialize, Deserialize, Debug)]
pub enum IpcResponse {
    Status {
        running: bool,
        started_at: DateTime<Utc>,
        active_tab: Option<TabId>,
        active_url: Option<String>,
        monitored_tab: Option<TabId>,
        pending_commands: usize,
    },
    Snapshot(UsageSnapshot),
    Decision(BlockDecision),
    EventAccepted,
    Commands(Vec<HostCommand>),
    Shutdown,
    Error(String),
}

#[derive(Debug)]
pub struct IpcClient {
    sock_path: PathBuf,
}

impl IpcClient {
    #[must_use]
    pub fn new(sock_path: &Path) -> Self {
        Self {
            sock_path: sock_path.to_path_buf(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the daemon cannot be reached or replies with
    /// something undecodable.
    pub async fn send_command(&self, request: IpcRequest) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.sock_path)
            .await
            .with_context(|| format!("Failed to connect to {}", self.sock_path.display()))?;

        let encoded = bincode::serialize(&request)?;
        stream.write_all(&encoded).await?;
        stream.shutdown().await?;

        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).await?;
        let response: IpcResponse = bincode::deserialize(&buffer)?;

        Ok(response)
    }
}

pub struct DaemonIpcHandler {
    engine: Engine,
    router: Arc<Mutex<EventRouter>>,
    queue: Arc<CommandQueue>,
    shutdown_signal: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    started_at: DateTime<Utc>,
}

impl DaemonIpcHandler {
    #[must_use]
    pub fn new(
        engine: Engine,
        router: Arc<Mutex<EventRouter>>,
        queue: Arc<CommandQueue>,
        shutdown_signal: Arc<AtomicBool>,
        shutdown_notify: Arc<Notify>,
    ) -> Self {
        Self {
            engine,
            router,
            queue,
            shutdown_signal,
            shutdown_notify,
            started_at: Utc::now(),
        }
    }

    /// Answer one request. Storage failures become `IpcResponse::Error`.
    pub async fn respond(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Status => {
                let router = self.router.lock().await;
                let context = router.context();
                IpcResponse::Status {
                    running: true,
                    started_at: self.started_at,
                    active_tab: context.tab_id,
                    active_url: context.url.clone(),
                    monitored_tab: router.monitored_tab(),
                    pending_commands: self.queue.pending().len(),
                }
            }
            IpcRequest::Snapshot => match self.engine.sessions().snapshot().await {
                Ok(snapshot) => IpcResponse::Snapshot(snapshot),
                Err(e) => IpcResponse::Error(e.to_string()),
            },
            IpcRequest::CheckBlock => match self.engine.blocker().decide().await {
                Ok(decision) => IpcResponse::Decision(decision),
                Err(e) => {
                    log::warn!("Block check over IPC failed: {e}");
                    IpcResponse::Error(e.to_string())
                }
            },
            IpcRequest::Event(event) => {
                self.router.lock().await.handle(event).await;
                IpcResponse::EventAccepted
            }
            IpcRequest::DrainCommands => IpcResponse::Commands(self.queue.drain()),
            IpcRequest::Shutdown => {
                self.shutdown_signal.store(true, Ordering::SeqCst);
                self.shutdown_notify.notify_one();
                IpcResponse::Shutdown
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error if the response cannot be encoded or written
    pub async fn handle(&self, stream: &mut UnixStream, request: IpcRequest) -> Result<()> {
        let response = self.respond(request).await;
        let encoded = bincode::serialize(&response)?;
        stream.write_all(&encoded).await?;
        Ok(())
    }
}

/// Read one request, which ends when the client shuts down its write half.
async fn read_request(
    stream: &mut UnixStream,
    limit: usize,
    read_timeout: Duration,
) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    // One byte past the limit tells an oversized request from one that fits
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let mut capped = (&mut *stream).take(cap);
    timeout(read_timeout, capped.read_to_end(&mut buf))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "request not completed in time"))??;
    if buf.len() > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("request larger than {limit} bytes"),
        ));
    }
    Ok(buf)
}

/// Serve requests on `sock_path` until the task is dropped.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound
pub async fn listen(handler: Arc<DaemonIpcHandler>, sock_path: &Path) -> io::Result<()> {
    if sock_path.exists() {
        fs::remove_file(sock_path)?;
    }
    let listener = UnixListener::bind(sock_path)?;
    log::info!("IPC listening on {}", sock_path.display());

    loop {
        match listener.accept().await {
            Ok((mut stream, _)) => {
                let handler = handler.clone();
                tokio::spawn(async move {
                    let read =
                        read_request(&mut stream, MAX_REQUEST_BYTES, REQUEST_READ_TIMEOUT).await;
                    match read {
                        Ok(buf) if buf.is_empty() => {} // Connection closed
                        Ok(buf) => match bincode::deserialize::<IpcRequest>(&buf) {
                            Ok(request) => {
                                if let Err(e) = handler.handle(&mut stream, request).await {
                                    log::error!("IPC handle error: {e}");
                                }
                            }
                            Err(e) => {
                                log::error!("IPC deserialize error: {e}");
                            }
                        },
                        Err(e) => {
                            log::error!("IPC read error: {e}");
                        }
                    }
                });
            }
            Err(e) => {
                log::error!("IPC accept error: {e}");
            }
        }
    }
}
