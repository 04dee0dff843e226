//! Daemon lifecycle management commands
use anyhow::{Context, Result};
use curfew_core::{
    config::{CurfewConfig, LOG_FILE, PID_FILE},
    ipc::{IpcClient, IpcRequest, IpcResponse},
    Daemon,
};
use curfew_storage::Database;
use std::{env, fs, io, path::Path, process::Command, time::Duration};
use sysinfo::{Pid, System};

pub fn start_daemon(data_dir: &Path, config: &CurfewConfig) -> Result<()> {
    let pid_file_path = data_dir.join(PID_FILE);
    let sock_path = config.socket_path(data_dir);

    if let Some(pid) = read_pid(&pid_file_path) {
        if is_running(pid) {
            log::info!("Daemon is already running (PID: {pid}).");
            return Ok(());
        }
    }
    if pid_file_path.exists() {
        log::warn!("Removing stale PID file.");
        fs::remove_file(&pid_file_path)?;
    }

    if sock_path.exists() {
        log::warn!("Removing stale socket file.");
        fs::remove_file(&sock_path)?;
    }

    log::info!("Starting curfew daemon...");
    fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;

    let current_exe = env::current_exe()?;
    let current_dir = env::current_dir()?;
    let child = Command::new(current_exe)
        .arg("daemon-internal-start")
        .current_dir(current_dir)
        .spawn()?;

    log::info!("Daemon process started with PID: {}", child.id());
    fs::write(&pid_file_path, child.id().to_string())?;

    Ok(())
}

pub async fn run_daemon_process(config: CurfewConfig) -> Result<()> {
    // This is the detached daemon process; it logs to a file
    if let Err(e) = setup_daemon_logging() {
        // Without a log there is nowhere to report anything else
        eprintln!("Failed to set up daemon logging: {e:#}");
        return Err(e);
    }
    log::info!("Daemon process started internally.");

    if let Err(e) = daemon_main_logic(&config).await {
        log::error!("Daemon main logic exited with a fatal error: {e:#}");
        return Err(e);
    }

    Ok(())
}

async fn daemon_main_logic(config: &CurfewConfig) -> Result<()> {
    let db = Database::new(config.database_path()).context("Failed to open usage database")?;
    let mut daemon = Daemon::new(db, config)?;
    daemon.run_with_signals().await
}

pub async fn stop_daemon(data_dir: &Path, config: &CurfewConfig) -> Result<()> {
    let pid_file_path = data_dir.join(PID_FILE);
    let sock_path = config.socket_path(data_dir);

    if !pid_file_path.exists() {
        log::info!("Daemon is not running (no PID file).");
        // Also remove socket if it exists for consistency
        if sock_path.exists() {
            fs::remove_file(&sock_path)?;
        }
        return Ok(());
    }

    let pid = fs::read_to_string(&pid_file_path)?
        .trim()
        .parse::<usize>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    log::info!("Stopping curfew daemon (PID: {pid})...");
    let client = IpcClient::new(&sock_path);

    match client.send_command(IpcRequest::Shutdown).await {
        Ok(IpcResponse::Shutdown) => {
            log::info!("Daemon shutdown signal sent. Waiting for process to exit...");
            tokio::time::sleep(Duration::from_secs(2)).await;
            if kill_if_running(pid) {
                log::warn!("Daemon did not stop gracefully. Force killed.");
            } else {
                log::info!("Daemon stopped successfully.");
            }
        }
        Ok(resp) => log::error!("Received unexpected response from daemon: {resp:?}"),
        Err(e) => {
            log::error!("Failed to send shutdown command: {e}. Forcing cleanup.");
            if kill_if_running(pid) {
                log::info!("Process killed.");
            }
        }
    }

    // Cleanup
    fs::remove_file(&pid_file_path)?;
    if sock_path.exists() {
        fs::remove_file(&sock_path)?;
    }

    Ok(())
}

fn read_pid(pid_file_path: &Path) -> Option<usize> {
    fs::read_to_string(pid_file_path).ok()?.trim().parse().ok()
}

fn is_running(pid: usize) -> bool {
    System::new().refresh_process(Pid::from(pid))
}

/// Kill `pid` if it is still alive; returns whether it was
fn kill_if_running(pid: usize) -> bool {
    let mut sys = System::new();
    if !sys.refresh_process(Pid::from(pid)) {
        return false;
    }
    if let Some(process) = sys.process(Pid::from(pid)) {
        process.kill();
    }
    true
}

fn setup_daemon_logging() -> Result<()> {
    use curfew_core::config::get_data_dir;
    use std::fs::{create_dir_all, OpenOptions};

    let log_path = get_data_dir()?.join(LOG_FILE);

    if let Some(parent) = log_path.parent() {
        create_dir_all(parent)?;
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter_level(log::LevelFilter::Debug)
        .init();

    Ok(())
}
