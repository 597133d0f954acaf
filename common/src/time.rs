//! Time utilities and constants for the ledger.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Ledger timing constants.
pub mod constants {
    use super::Duration;

    /// Lifetime of a transfer authorization and its hold (24 hours).
    pub fn authorization_ttl() -> Duration {
        Duration::hours(24)
    }

    /// Interval of the hold-expiration sweep (5 minutes).
    pub fn hold_sweep_interval() -> std::time::Duration {
        std::time::Duration::from_secs(300)
    }

    /// Timeout of a single money-moving transaction (5 seconds).
    pub fn transaction_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(5)
    }

    /// Timeout of a manual journal posting (10 seconds).
    pub fn journal_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(10)
    }

    /// How long a row-lock wait may take before it counts as a conflict.
    pub fn lock_wait_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(1)
    }
}

/// Default timezone for day windows and the end-of-day job.
pub const DEFAULT_LEDGER_TIMEZONE: Tz = chrono_tz::Asia::Jakarta;

/// A timestamp (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Check if a timestamp has passed.
pub fn is_expired(expiry: Timestamp) -> bool {
    now() > expiry
}

/// Calculate expiry time from now.
pub fn expires_in(duration: Duration) -> Timestamp {
    now() + duration
}

/// Resolve a local wall-clock time in `tz` to UTC.
///
/// Ambiguous times resolve to the earliest instant; times inside a gap fall
/// back to reading the wall clock as UTC.
fn resolve_local(naive: NaiveDateTime, tz: Tz) -> Timestamp {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

/// A calendar day in the ledger timezone, as a half-open UTC interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    /// The local calendar date.
    pub date: NaiveDate,
    /// Local midnight at the start of the day.
    pub start: Timestamp,
    /// Local midnight at the start of the next day.
    pub end: Timestamp,
}

impl DayWindow {
    /// Build the window for `date` in `tz`.
    pub fn for_date(date: NaiveDate, tz: Tz) -> Self {
        let next = date.succ_opt().unwrap_or(NaiveDate::MAX);
        Self {
            date,
            start: resolve_local(date.and_time(NaiveTime::default()), tz),
            end: resolve_local(next.and_time(NaiveTime::default()), tz),
        }
    }

    /// Check whether a timestamp falls inside the window.
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// The local day in `tz` that contains `ts`.
pub fn day_window_containing(ts: Timestamp, tz: Tz) -> DayWindow {
    DayWindow::for_date(ts.with_timezone(&tz).date_naive(), tz)
}

/// Current local date in `tz`.
pub fn today_in(tz: Tz) -> NaiveDate {
    now().with_timezone(&tz).date_naive()
}

/// Local date before today in `tz`.
pub fn yesterday_in(tz: Tz) -> NaiveDate {
    let today = today_in(tz);
    today.pred_opt().unwrap_or(today)
}

/// Next instant strictly after `after` at which the local clock in `tz` reads `at`.
pub fn next_local_time(after: Timestamp, at: NaiveTime, tz: Tz) -> Timestamp {
    let local = after.with_timezone(&tz);
    let mut date = local.date_naive();
    if local.time() >= at {
        date = date.succ_opt().unwrap_or(date);
    }
    resolve_local(date.and_time(at), tz)
}

/// Duration extensions for convenient conversion.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}
