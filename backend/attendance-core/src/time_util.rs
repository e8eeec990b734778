// src/time_util.rs
//! Clock-time parsing and the handful of display formats shared by the ledger,
//! the notifier and the report.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;

static TIME_OF_DAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d{1,2}):(\d{2})(?::\d{2})?\s*([AaPp]\.?[Mm]\.?)?\s*$")
        .expect("time-of-day pattern compiles")
});

static ISO_DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)(?:\.\d+)?S)?)?$")
        .expect("ISO-8601 duration pattern compiles")
});

/// Ledger time-of-day format, e.g. `09:05 AM`.
pub const LEDGER_TIME_FORMAT: &str = "%I:%M %p";
/// Ledger date format, e.g. `January 01, 2024`.
pub const LEDGER_DATE_FORMAT: &str = "%B %d, %Y";
/// Timestamp format used by the biometric device.
pub const DEVICE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parses `"H:MM"` or `"H:MM AM/PM"` into minutes since midnight.
///
/// Returns `0` for empty or malformed input. Callers treat `0` as "absent",
/// never as midnight.
pub fn parse_time_of_day(text: &str) -> u32 {
    let Some(caps) = TIME_OF_DAY_RE.captures(text) else {
        return 0;
    };
    let (Ok(mut hours), Ok(minutes)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>()) else {
        return 0;
    };
    if minutes > 59 {
        return 0;
    }

    match caps.get(3).map(|m| m.as_str().replace('.', "").to_ascii_lowercase()) {
        Some(meridiem) => {
            if !(1..=12).contains(&hours) {
                return 0;
            }
            if meridiem == "pm" && hours < 12 {
                hours += 12;
            } else if meridiem == "am" && hours == 12 {
                hours = 0;
            }
        }
        None if hours > 23 => return 0,
        None => {}
    }

    hours * 60 + minutes
}

pub fn format_ledger_time(time: NaiveTime) -> String {
    time.format(LEDGER_TIME_FORMAT).to_string()
}

pub fn format_ledger_date(date: NaiveDate) -> String {
    date.format(LEDGER_DATE_FORMAT).to_string()
}

pub fn parse_ledger_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), LEDGER_DATE_FORMAT).ok()
}

/// Formats a minute count as zero-padded `HH:MM`.
pub fn format_hhmm(total_minutes: i64) -> String {
    format!("{:02}:{:02}", total_minutes / 60, total_minutes % 60)
}

/// Inverse of [`format_hhmm`], used when reading durations back from a sheet.
pub fn parse_hhmm(text: &str) -> Option<i64> {
    let (h, m) = text.trim().split_once(':')?;
    let hours: i64 = h.parse().ok()?;
    let minutes: i64 = m.parse().ok()?;
    (hours >= 0 && (0..60).contains(&minutes)).then_some(hours * 60 + minutes)
}

/// Chat-facing time, e.g. `9:05 AM`.
pub fn format_message_time(timestamp: NaiveDateTime) -> String {
    timestamp.format("%-I:%M %p").to_string()
}

/// Human elapsed time such as `1h 5m 30s`; zero parts are dropped and an empty
/// duration renders as `0s`.
pub fn format_elapsed(duration: Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{}s", seconds));
    }
    parts.join(" ")
}

/// Parses the subset of ISO-8601 durations the time-tracking API emits
/// (`PT8H30M`, `P1DT2H`, `PT45.5S`).
pub fn parse_iso8601_duration(text: &str) -> Option<Duration> {
    let caps = ISO_DURATION_RE.captures(text.trim())?;
    if caps.iter().skip(1).all(|c| c.is_none()) {
        return None;
    }
    let part = |i: usize| -> i64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .unwrap_or(0)
    };
    Some(
        Duration::days(part(1))
            + Duration::hours(part(2))
            + Duration::minutes(part(3))
            + Duration::seconds(part(4)),
    )
}

/// Parses a device timestamp. The device normally sends
/// `YYYY-MM-DD HH:MM:SS`; a `T` separator or a missing seconds field is
/// accepted as well.
pub fn parse_device_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    [
        DEVICE_TIMESTAMP_FORMAT,
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_meridiem_times_regardless_of_case_and_spacing() {
        assert_eq!(parse_time_of_day("9:00 AM"), 540);
        assert_eq!(parse_time_of_day("  9:00   am "), 540);
        assert_eq!(parse_time_of_day("05:05 PM"), 17 * 60 + 5);
        assert_eq!(parse_time_of_day("5:05pm"), 17 * 60 + 5);
        assert_eq!(parse_time_of_day("12:30 PM"), 12 * 60 + 30);
        assert_eq!(parse_time_of_day("12:30 a.m."), 30);
    }

    #[test]
    fn parses_plain_24_hour_times() {
        assert_eq!(parse_time_of_day("17:45"), 17 * 60 + 45);
        assert_eq!(parse_time_of_day("7:05"), 7 * 60 + 5);
        assert_eq!(parse_time_of_day("08:15:59"), 8 * 60 + 15);
    }

    #[test]
    fn malformed_input_yields_zero() {
        for input in ["", "   ", "abc", "9", "9:", ":30", "25:00", "9:75", "13:00 PM", "9:00 XM", "x9:00"] {
            assert_eq!(parse_time_of_day(input), 0, "input {:?}", input);
        }
    }

    #[test]
    fn ledger_time_round_trips_through_the_parser() {
        let t = NaiveTime::from_hms_opt(17, 5, 0).unwrap();
        let formatted = format_ledger_time(t);
        assert_eq!(formatted, "05:05 PM");
        assert_eq!(parse_time_of_day(&formatted), 17 * 60 + 5);
    }

    #[test]
    fn ledger_date_format() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(format_ledger_date(d), "January 01, 2024");
        assert_eq!(parse_ledger_date("January 01, 2024"), Some(d));
        assert_eq!(parse_ledger_date("2024-01-01"), None);
    }

    #[test]
    fn hhmm_formatting() {
        assert_eq!(format_hhmm(485), "08:05");
        assert_eq!(format_hhmm(0), "00:00");
        assert_eq!(parse_hhmm("08:05"), Some(485));
        assert_eq!(parse_hhmm("100:00"), Some(6000));
        assert_eq!(parse_hhmm("8h"), None);
    }

    #[test]
    fn elapsed_formatting_drops_zero_parts() {
        assert_eq!(format_elapsed(Duration::seconds(3930)), "1h 5m 30s");
        assert_eq!(format_elapsed(Duration::hours(2)), "2h");
        assert_eq!(format_elapsed(Duration::seconds(0)), "0s");
        assert_eq!(format_elapsed(Duration::seconds(61)), "1m 1s");
    }

    #[test]
    fn iso_durations() {
        assert_eq!(parse_iso8601_duration("PT1H5M"), Some(Duration::minutes(65)));
        assert_eq!(parse_iso8601_duration("PT45.5S"), Some(Duration::seconds(45)));
        assert_eq!(
            parse_iso8601_duration("P1DT2H"),
            Some(Duration::hours(26))
        );
        assert_eq!(parse_iso8601_duration("P"), None);
        assert_eq!(parse_iso8601_duration("1h"), None);
    }

    #[test]
    fn device_timestamps() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        assert_eq!(parse_device_timestamp("2024-01-01 09:00:00"), Some(expected));
        assert_eq!(parse_device_timestamp("2024-01-01T09:00"), Some(expected));
        assert_eq!(parse_device_timestamp("01/01/2024"), None);
    }

    #[test]
    fn message_time_has_no_leading_zero() {
        let ts = parse_device_timestamp("2024-01-01 09:05:00").unwrap();
        assert_eq!(format_message_time(ts), "9:05 AM");
    }
}
