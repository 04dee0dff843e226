//! Usage status and block checks

use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset};
use curfew_core::{
    blocker::decision_at,
    config::CurfewConfig,
    critical_section::CriticalSection,
    format::format_hms,
    ipc::{IpcClient, IpcRequest, IpcResponse},
    limits::DAILY_LIMIT_MS,
    policy::{is_curfew, next_reset, time_until_reset},
    BlockDecision, BlockReason, Clock, SessionManager, SystemClock, UsageSnapshot, UsageStore,
};
use curfew_storage::{CanonicalDomain, Database, PerSiteUsage};
use serde::Serialize;
use std::{path::Path, sync::Arc};
use tabled::{Table, Tabled};

#[derive(Debug, Serialize)]
struct StatusReport {
    daemon_running: bool,
    used_ms: u64,
    remaining_ms: u64,
    limit_ms: u64,
    per_site: PerSiteUsage,
    current_session_domain: Option<CanonicalDomain>,
    current_session_ms: u64,
    curfew_active: bool,
    blocked_reason: Option<BlockReason>,
    next_reset: DateTime<FixedOffset>,
    until_reset_ms: u64,
}

#[derive(Tabled)]
struct SiteRow {
    #[tabled(rename = "Site")]
    site: String,
    #[tabled(rename = "Used today")]
    used: String,
}

fn build_report(
    snapshot: &UsageSnapshot,
    now: &DateTime<FixedOffset>,
    daemon_running: bool,
) -> StatusReport {
    let used_ms = snapshot.live_total();

    StatusReport {
        daemon_running,
        used_ms,
        remaining_ms: snapshot.remaining(),
        limit_ms: DAILY_LIMIT_MS,
        per_site: snapshot.live_per_site(),
        current_session_domain: snapshot.current_session_domain,
        current_session_ms: snapshot.session_elapsed(),
        curfew_active: is_curfew(now),
        blocked_reason: decision_at(used_ms, now).reason,
        next_reset: next_reset(now),
        until_reset_ms: u64::try_from(time_until_reset(now).num_milliseconds()).unwrap_or(0),
    }
}

/// Local store for when the daemon is not reachable
fn open_store(config: &CurfewConfig) -> Result<Arc<dyn UsageStore>> {
    let db = Database::new(config.database_path()).context("Failed to open usage database")?;
    Ok(Arc::new(db))
}

/// Read the database directly, as the daemon would present it at `now`.
///
/// Nothing is written: a reset that is due shows as a fresh day and is left
/// for the daemon to persist.
async fn local_snapshot(
    config: &CurfewConfig,
    now: &DateTime<FixedOffset>,
) -> Result<UsageSnapshot> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let snapshot = SessionManager::new(open_store(config)?, clock, CriticalSection::new())
        .snapshot()
        .await?;
    Ok(snapshot.rolled_over(now))
}

async fn daemon_snapshot(client: &IpcClient) -> Option<UsageSnapshot> {
    match client.send_command(IpcRequest::Snapshot).await {
        Ok(IpcResponse::Snapshot(snapshot)) => Some(snapshot),
        Ok(other) => {
            log::warn!("Unexpected response from daemon: {other:?}");
            None
        }
        Err(e) => {
            log::debug!("Daemon not reachable: {e}");
            None
        }
    }
}

pub async fn show_status(data_dir: &Path, config: &CurfewConfig, json: bool) -> Result<()> {
    let sock_path = config.socket_path(data_dir);
    let client = IpcClient::new(&sock_path);

    let from_daemon = if sock_path.exists() {
        daemon_snapshot(&client).await
    } else {
        None
    };
    let daemon_running = from_daemon.is_some();
    let now = SystemClock.now();
    let snapshot = match from_daemon {
        Some(snapshot) => snapshot,
        None => local_snapshot(config, &now).await?,
    };

    let report = build_report(&snapshot, &now, daemon_running);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_report(&report);
    if daemon_running {
        if let Ok(IpcResponse::Status {
            active_tab,
            active_url,
            started_at,
            pending_commands,
            ..
        }) = client.send_command(IpcRequest::Status).await
        {
            println!("\nDaemon running since {}", started_at.format("%Y-%m-%d %H:%M:%S UTC"));
            if let (Some(tab), Some(url)) = (active_tab, active_url) {
                println!("  Active tab {tab}: {url}");
            }
            if pending_commands > 0 {
                println!("  {pending_commands} command(s) waiting for the browser bridge");
            }
        }
    }
    Ok(())
}

fn site_table(report: &StatusReport) -> Table {
    let rows: Vec<SiteRow> = report
        .per_site
        .iter()
        .map(|(domain, ms)| SiteRow {
            site: domain.label().to_string(),
            used: format_hms(ms),
        })
        .collect();
    Table::new(rows)
}

fn print_report(report: &StatusReport) {
    println!(
        "Daemon Status: {}",
        if report.daemon_running {
            "Running"
        } else {
            "Not running"
        }
    );
    println!(
        "\nUsed today: {} of {}",
        format_hms(report.used_ms),
        format_hms(report.limit_ms)
    );
    println!("Remaining:  {}", format_hms(report.remaining_ms));

    println!("\n{}", site_table(report));

    if let Some(domain) = report.current_session_domain {
        println!(
            "\nCurrent session: {} ({})",
            domain.label(),
            format_hms(report.current_session_ms)
        );
    }

    match report.blocked_reason {
        Some(reason) => println!("\nBlocked: {}", reason.message()),
        None => println!("\nNot blocked"),
    }
    println!(
        "Next reset: {} (in {})",
        report.next_reset.format("%Y-%m-%d %H:%M"),
        format_hms(report.until_reset_ms)
    );
}

pub async fn check_block(data_dir: &Path, config: &CurfewConfig) -> Result<()> {
    let sock_path = config.socket_path(data_dir);
    let decision = if sock_path.exists() {
        match IpcClient::new(&sock_path)
            .send_command(IpcRequest::CheckBlock)
            .await
        {
            Ok(IpcResponse::Decision(decision)) => decision,
            Ok(IpcResponse::Error(e)) => bail!("Daemon failed to decide: {e}"),
            Ok(other) => bail!("Unexpected response from daemon: {other:?}"),
            Err(e) => {
                log::warn!("Daemon not reachable ({e}), checking the database directly");
                local_decision(config).await?
            }
        }
    } else {
        local_decision(config).await?
    };

    match decision.reason {
        Some(reason) => println!("Blocked: {}", reason.message()),
        None => println!(
            "Not blocked ({} left today)",
            format_hms(DAILY_LIMIT_MS.saturating_sub(decision.total_usage))
        ),
    }
    Ok(())
}

async fn local_decision(config: &CurfewConfig) -> Result<BlockDecision> {
    let now = SystemClock.now();
    let snapshot = local_snapshot(config, &now).await?;
    Ok(decision_at(snapshot.live_total(), &now))
}
