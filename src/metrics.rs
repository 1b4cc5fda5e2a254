// src/metrics.rs
//
// Pure read-side projections over a session. Everything here is a function
// of its arguments; reports, dashboards and the violation detector all
// consume these.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

use crate::model::{AttendanceSession, BreakSession};

/// Whole minutes between clock-in and clock-out; `None` while the session is
/// open. Floor of elapsed seconds over 60.
pub fn duration_minutes(session: &AttendanceSession) -> Option<i64> {
    session
        .clock_out_time
        .map(|out| (out - session.clock_in_time).num_seconds().div_euclid(60))
}

/// Duration in hours, rounded to two decimals; `None` while open.
pub fn duration_hours(session: &AttendanceSession) -> Option<f64> {
    duration_minutes(session).map(|m| round2(m as f64 / 60.0))
}

/// Default overtime projection for a session with no matching rule.
pub fn is_overtime(session: &AttendanceSession, overtime_after_hours: f64) -> bool {
    duration_hours(session).is_some_and(|h| h > overtime_after_hours)
}

/// The calendar date of clock-in in the employee's configured timezone.
/// Grouping by UTC date instead produces user-visible off-by-one days for
/// late-evening and overnight sessions; the local date is the contractually
/// correct bucket.
pub fn work_date(session: &AttendanceSession, tz_offset_minutes: i32) -> NaiveDate {
    let offset = FixedOffset::east_opt(tz_offset_minutes * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
    session.clock_in_time.with_timezone(&offset).date_naive()
}

/// Minutes actually worked up to `now` (or clock-out, whichever is earlier):
/// wall-clock elapsed minus time spent on closed breaks. An open break does
/// not reduce the figure while it is still running.
pub fn worked_minutes(
    session: &AttendanceSession,
    breaks: &[BreakSession],
    now: DateTime<Utc>,
) -> i64 {
    let end = session.clock_out_time.map_or(now, |out| out.min(now));
    let elapsed_secs = (end - session.clock_in_time).num_seconds().max(0);
    let break_secs: i64 = breaks
        .iter()
        .filter(|b| b.session_id == session.id)
        .filter_map(|b| b.end_time.map(|e| (e - b.start_time).num_seconds().max(0)))
        .sum();
    (elapsed_secs - break_secs).max(0).div_euclid(60)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
