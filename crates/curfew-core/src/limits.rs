//! Fixed budget, curfew and cadence constants. None of these are configurable.

use std::time::Duration;

/// Daily budget across all tracked domains (75 minutes)
pub const DAILY_LIMIT_MS: u64 = 75 * 60 * 1000;

/// Curfew starts at 22:30 local time
pub const CURFEW_START_MINUTES: u32 = 22 * 60 + 30;

/// Curfew ends at 06:30 local time (exclusive)
pub const CURFEW_END_MINUTES: u32 = 6 * 60 + 30;

/// Daily reset at 06:30 local time
pub const RESET_MINUTES: u32 = 6 * 60 + 30;

/// Remaining-time thresholds in minutes, largest first
pub const NOTIFICATION_MILESTONES: [u32; 3] = [30, 10, 5];

/// Cadence of the per-tab monitoring task
pub const MONITOR_TICK: Duration = Duration::from_secs(1);

/// Default cadence of the daemon's reset/status alarm
pub const ALARM_TICK_SECS: u64 = 60;

/// Milestone notifications are cleared after this long
pub const NOTIFICATION_DISMISS_AFTER: Duration = Duration::from_secs(5);
