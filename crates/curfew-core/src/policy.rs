//! Curfew and daily-reset windows.
//!
//! Everything here is evaluated in the wall-clock time of the `now` passed in,
//! so callers decide the timezone through their [`Clock`](crate::clock::Clock).

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};

use crate::limits::{CURFEW_END_MINUTES, CURFEW_START_MINUTES, RESET_MINUTES};

/// Minutes since local midnight
#[must_use]
pub fn minute_of_day<Tz: TimeZone>(now: &DateTime<Tz>) -> u32 {
    now.hour() * 60 + now.minute()
}

/// Whether `now` falls in the nightly window `[22:30, 06:30)`.
///
/// The window wraps past midnight, hence OR rather than AND.
#[must_use]
pub fn is_curfew<Tz: TimeZone>(now: &DateTime<Tz>) -> bool {
    let minutes = minute_of_day(now);
    minutes >= CURFEW_START_MINUTES || minutes < CURFEW_END_MINUTES
}

fn reset_on<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Tz> {
    let naive = date.and_time(NaiveTime::default()) + Duration::minutes(i64::from(RESET_MINUTES));
    tz.from_local_datetime(&naive)
        .earliest()
        // No 06:30 on this day (DST gap); treat the wall time as UTC
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

/// Today's reset instant, whether or not it has passed
#[must_use]
pub fn todays_reset<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    reset_on(&now.timezone(), now.date_naive())
}

/// Today's reset if it is still ahead, otherwise tomorrow's
#[must_use]
pub fn next_reset<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let today = todays_reset(now);
    if *now >= today {
        reset_on(&now.timezone(), now.date_naive() + Duration::days(1))
    } else {
        today
    }
}

/// Time left until [`next_reset`]
#[must_use]
pub fn time_until_reset<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    next_reset(now).signed_duration_since(now.clone())
}

/// Whether a daily reset should fire.
///
/// True iff `now` is at or past today's reset instant and the last reset
/// happened before it. Re-checking after a reset yields false until the next
/// boundary, whatever the polling cadence. A store that was never reset is
/// always due.
#[must_use]
pub fn is_reset_due<Tz: TimeZone>(last_reset: Option<DateTime<Utc>>, now: &DateTime<Tz>) -> bool {
    let Some(last_reset) = last_reset else {
        return true;
    };
    let today = todays_reset(now);
    *now >= today && last_reset < today.with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn local(day: u32, h: u32, m: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 6, day, h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_curfew_inside_window() {
        assert!(is_curfew(&local(15, 22, 30)));
        assert!(is_curfew(&local(15, 23, 59)));
        assert!(is_curfew(&local(16, 0, 0)));
        assert!(is_curfew(&local(16, 6, 29)));
    }

    #[test]
    fn test_curfew_outside_window() {
        assert!(!is_curfew(&local(15, 6, 30)));
        assert!(!is_curfew(&local(15, 12, 0)));
        assert!(!is_curfew(&local(15, 22, 29)));
    }

    #[test]
    fn test_curfew_uses_wall_clock_of_offset() {
        // 21:00 UTC is 23:00 at +02:00
        let utc = Utc.with_ymd_and_hms(2024, 6, 15, 21, 0, 0).unwrap();
        assert!(!is_curfew(&utc));
        assert!(is_curfew(&utc.with_timezone(&FixedOffset::east_opt(7200).unwrap())));
    }

    #[test]
    fn test_next_reset_later_today() {
        assert_eq!(next_reset(&local(15, 5, 0)), local(15, 6, 30));
    }

    #[test]
    fn test_next_reset_tomorrow_once_passed() {
        assert_eq!(next_reset(&local(15, 6, 30)), local(16, 6, 30));
        assert_eq!(next_reset(&local(15, 23, 0)), local(16, 6, 30));
    }

    #[test]
    fn test_next_reset_across_month_end() {
        let now = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 30, 8, 0, 0)
            .unwrap();
        let expected = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 7, 1, 6, 30, 0)
            .unwrap();
        assert_eq!(next_reset(&now), expected);
    }

    #[test]
    fn test_time_until_reset() {
        assert_eq!(time_until_reset(&local(15, 6, 0)), Duration::minutes(30));
        assert_eq!(time_until_reset(&local(15, 6, 30)), Duration::hours(24));
    }

    #[test]
    fn test_reset_due_after_boundary() {
        let yesterday = local(14, 6, 30).with_timezone(&Utc);
        assert!(is_reset_due(Some(yesterday), &local(15, 6, 31)));
    }

    #[test]
    fn test_reset_fires_once_per_boundary() {
        let yesterday = local(14, 6, 30).with_timezone(&Utc);
        assert!(is_reset_due(Some(yesterday), &local(15, 6, 31)));

        let just_reset = local(15, 6, 31).with_timezone(&Utc);
        assert!(!is_reset_due(Some(just_reset), &local(15, 6, 35)));
        assert!(!is_reset_due(Some(just_reset), &local(15, 23, 59)));
        assert!(!is_reset_due(Some(just_reset), &local(16, 6, 29)));
        assert!(is_reset_due(Some(just_reset), &local(16, 6, 30)));
    }

    #[test]
    fn test_reset_not_due_before_todays_boundary() {
        let yesterday = local(14, 7, 0).with_timezone(&Utc);
        assert!(!is_reset_due(Some(yesterday), &local(15, 6, 29)));
    }

    #[test]
    fn test_reset_due_when_never_reset() {
        assert!(is_reset_due(None, &local(15, 3, 0)));
    }
}
