// src/work_time.rs
//! Derived durations for a ledger row.

use crate::model::{AttendanceRow, TimePair};
use crate::time_util::{format_hhmm, parse_time_of_day};

fn minutes(slot: &Option<String>) -> Option<i64> {
    let parsed = parse_time_of_day(slot.as_deref()?);
    // 0 means "absent" to the parser
    (parsed != 0).then_some(parsed as i64)
}

/// Span of a completed pair. Half-filled or unparseable pairs count as zero.
fn pair_minutes(pair: &TimePair) -> i64 {
    match (minutes(&pair.start), minutes(&pair.end)) {
        (Some(start), Some(end)) => end - start,
        _ => 0,
    }
}

/// Sum of completed breaks; a break that ends before it starts adds nothing.
pub fn break_minutes(row: &AttendanceRow) -> i64 {
    row.breaks.iter().map(pair_minutes).filter(|m| *m > 0).sum()
}

/// Sum of completed remote pairs; pairs with a negative span add nothing.
pub fn remote_minutes(row: &AttendanceRow) -> i64 {
    row.remote.iter().map(pair_minutes).filter(|m| *m > 0).sum()
}

/// On-site minutes worked: `(checkOut - checkIn) - breaks`. `None` when either
/// end is missing or the result would be negative.
pub fn work_minutes(row: &AttendanceRow) -> Option<i64> {
    let check_in = minutes(&row.check_in)?;
    let check_out = minutes(&row.check_out)?;
    let total = (check_out - check_in) - break_minutes(row);
    (total >= 0).then_some(total)
}

/// `HH:MM` on-site work time, or `None` if it cannot be computed.
pub fn compute_work_time(row: &AttendanceRow) -> Option<String> {
    work_minutes(row).map(format_hhmm)
}

/// `HH:MM` total of completed remote sessions, or `None` when there are none.
pub fn compute_remote_time(row: &AttendanceRow) -> Option<String> {
    if !row.remote.iter().any(TimePair::is_complete) {
        return None;
    }
    Some(format_hhmm(remote_minutes(row)))
}
