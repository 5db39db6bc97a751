use chrono::{DateTime, Datelike, FixedOffset, Local, Timelike};

use crate::exec::address::strip_comments;

/// Date parts extractable by the `date` and `currentdate` tests (RFC 5260).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Year,
    Month,
    Day,
    Date,
    /// Modified Julian Day: days since 17 November 1858.
    Julian,
    Hour,
    Minute,
    Second,
    Time,
    Iso8601,
    /// RFC 2822 rendering with a numeric zone.
    Std11,
    Zone,
    /// Day of week, Sunday = 0.
    Weekday,
}

impl DatePart {
    pub fn from_name(name: &str) -> Option<DatePart> {
        match name {
            "year" => Some(DatePart::Year),
            "month" => Some(DatePart::Month),
            "day" => Some(DatePart::Day),
            "date" => Some(DatePart::Date),
            "julian" => Some(DatePart::Julian),
            "hour" => Some(DatePart::Hour),
            "minute" => Some(DatePart::Minute),
            "second" => Some(DatePart::Second),
            "time" => Some(DatePart::Time),
            "iso8601" => Some(DatePart::Iso8601),
            "std11" => Some(DatePart::Std11),
            "zone" => Some(DatePart::Zone),
            "weekday" => Some(DatePart::Weekday),
            _ => None,
        }
    }
}

/// Parse `+HHMM`/`-HHMM` into an offset.
pub(crate) fn parse_zone_offset(zone: &str) -> Option<FixedOffset> {
    let bytes = zone.as_bytes();
    if bytes.len() != 5 {
        return None;
    }
    let east = match bytes[0] {
        b'+' => true,
        b'-' => false,
        _ => return None,
    };
    let hours: i32 = zone[1..3].parse().ok()?;
    let minutes: i32 = zone[3..5].parse().ok()?;
    let seconds = hours * 3600 + minutes * 60;
    if east {
        FixedOffset::east_opt(seconds)
    } else {
        FixedOffset::west_opt(seconds)
    }
}

/// Parse a header date. RFC 2822 first (comments stripped), then RFC 3339,
/// then a few legacy renderings seen in the wild.
pub(crate) fn parse_date_header(value: &str) -> Option<DateTime<FixedOffset>> {
    let cleaned = strip_comments(value);
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(t) = DateTime::parse_from_rfc2822(cleaned) {
        return Some(t);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(cleaned) {
        return Some(t);
    }
    const LEGACY_FORMATS: &[&str] = &[
        "%d %b %Y %H:%M:%S %z",
        "%a, %d %b %Y %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S %z",
    ];
    LEGACY_FORMATS
        .iter()
        .find_map(|f| DateTime::parse_from_str(cleaned, f).ok())
}

pub(crate) fn extract_date_part(t: DateTime<FixedOffset>, part: DatePart) -> String {
    match part {
        DatePart::Year => t.year().to_string(),
        DatePart::Month => format!("{:02}", t.month()),
        DatePart::Day => format!("{:02}", t.day()),
        DatePart::Date => t.format("%Y-%m-%d").to_string(),
        DatePart::Julian => modified_julian_day(t).to_string(),
        DatePart::Hour => format!("{:02}", t.hour()),
        DatePart::Minute => format!("{:02}", t.minute()),
        DatePart::Second => format!("{:02}", t.second()),
        DatePart::Time => t.format("%H:%M:%S").to_string(),
        DatePart::Iso8601 => t.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
        DatePart::Std11 => t.format("%a, %d %b %Y %H:%M:%S %z").to_string(),
        DatePart::Zone => t.format("%z").to_string(),
        DatePart::Weekday => t.weekday().num_days_from_sunday().to_string(),
    }
}

// Julian day number of the civil date, shifted to the MJD epoch.
pub(crate) fn modified_julian_day(t: DateTime<FixedOffset>) -> i64 {
    let year = t.year() as i64;
    let month = t.month() as i64;
    let day = t.day() as i64;

    let a = (14 - month) / 12;
    let y = year + 4800 - a;
    let m = month + 12 * a - 3;
    let jdn = day + (153 * m + 2) / 5 + 365 * y + y / 4 - y / 100 + y / 400 - 32045;
    jdn - 2400001
}

/// Shift into the host's local zone, flattened to a fixed offset.
pub(crate) fn to_local(t: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let local = t.with_timezone(&Local);
    local.with_timezone(local.offset())
}

pub(crate) fn local_now() -> DateTime<FixedOffset> {
    let now = Local::now();
    now.with_timezone(now.offset())
}
