//! Date arithmetic shared by the attribute scheduler and the matching executor.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

/// Last as-of date the attribute scheduler may compute: `today - lag_days`.
pub fn attribute_cutoff(today: NaiveDate, lag_days: u32) -> NaiveDate {
    today - Duration::days(lag_days as i64)
}

/// Inclusive trailing window `[end - window_days + 1, end]`.
pub fn window_bounds(end: NaiveDate, window_days: u32) -> (NaiveDate, NaiveDate) {
    (end - Duration::days(window_days as i64 - 1), end)
}

/// Midnight (UTC) of the day containing `at`.
pub fn day_floor(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Iterate `start, start + step, ...` while `<= end`.
pub fn stepped_dates(
    start: NaiveDate,
    end: NaiveDate,
    step_days: u32,
) -> impl Iterator<Item = NaiveDate> {
    let step = Duration::days(step_days.max(1) as i64);
    std::iter::successors(Some(start), move |d| Some(*d + step)).take_while(move |d| *d <= end)
}
