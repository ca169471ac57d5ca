///
/// Date and time conversions.
///
/// Moves chrono types to and from the engine's representations: ISO-8601
/// text and fractional Julian day numbers. The Julian arithmetic follows the
/// engine's own date functions, so values produced by `julianday()` read
/// back to the same millisecond.
///

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

const MS_PER_DAY: i64 = 86_400_000;
const HALF_DAY_MS: i64 = 43_200_000;

const TEXT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M%:z",
    "%Y-%m-%dT%H:%M%:z",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

/// Converts a fractional Julian day number to a timestamp with millisecond
/// precision. Returns `None` for values outside the calendar range.
pub fn from_julian_day(jd: f64) -> Option<NaiveDateTime> {
    if !jd.is_finite() || !(0.0..=5_373_484.499_999).contains(&jd) {
        return None;
    }
    let ijd = (jd * MS_PER_DAY as f64 + 0.5) as i64;

    let z = ((ijd + HALF_DAY_MS) / MS_PER_DAY) as i32;
    let alpha = ((z as f64 - 1_867_216.25) / 36_524.25) as i32;
    let a = z + 1 + alpha - (alpha / 4);
    let b = a + 1524;
    let c = ((b as f64 - 122.1) / 365.25) as i32;
    let d = (36525 * (c & 32767)) / 100;
    let e = ((b - d) as f64 / 30.6001) as i32;
    let x1 = (30.6001 * e as f64) as i32;
    let day = b - d - x1;
    let month = if e < 14 { e - 1 } else { e - 13 };
    let year = if month > 2 { c - 4716 } else { c - 4715 };

    let mut s = ((ijd + HALF_DAY_MS) % MS_PER_DAY) as i32;
    let mut frac = s as f64 / 1000.0;
    s = frac as i32;
    frac -= s as f64;
    let hour = s / 3600;
    s -= hour * 3600;
    let minute = s / 60;
    frac += (s - minute * 60) as f64;
    let second = frac as i32;
    let millis = (((frac - second as f64) * 1000.0).round() as i32).min(999);

    NaiveDate::from_ymd_opt(year, month as u32, day as u32)?.and_hms_milli_opt(
        hour as u32,
        minute as u32,
        second as u32,
        millis as u32,
    )
}

/// Converts a timestamp to a fractional Julian day number.
pub fn to_julian_day(value: &NaiveDateTime) -> f64 {
    let mut year = value.year() as i64;
    let mut month = value.month() as i64;
    let day = value.day() as i64;
    if month <= 2 {
        year -= 1;
        month += 12;
    }
    let a = year / 100;
    let b = 2 - a + (a / 4);
    let x1 = 36525 * (year + 4716) / 100;
    let x2 = 306_001 * (month + 1) / 10_000;
    // (x1 + x2 + day + b - 1524.5) days, kept in integer milliseconds
    let mut ijd = (x1 + x2 + day + b - 1524) * MS_PER_DAY - HALF_DAY_MS;
    ijd += value.hour() as i64 * 3_600_000
        + value.minute() as i64 * 60_000
        + value.second() as i64 * 1000
        + (value.nanosecond() / 1_000_000).min(999) as i64;
    ijd as f64 / MS_PER_DAY as f64
}

/// Parses ISO-8601 text without a zone designator. A bare date reads as
/// midnight.
pub fn parse_naive(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for format in NAIVE_FORMATS {
        if let Ok(value) = NaiveDateTime::parse_from_str(text, format) {
            return Some(value);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    parse_with_offset(text).map(|value| value.naive_local())
}

/// Parses ISO-8601 text carrying a zone designator (`Z` or `±hh:mm`).
pub fn parse_with_offset(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    if let Ok(value) = DateTime::parse_from_rfc3339(text) {
        return Some(value);
    }
    OFFSET_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(text, format).ok())
}

pub fn parse_time(text: &str) -> Option<NaiveTime> {
    let text = text.trim();
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
        .or_else(|| parse_naive(text).map(|value| value.time()))
}

pub fn format_naive(value: &NaiveDateTime) -> String {
    value.format(TEXT_FORMAT).to_string()
}

pub fn format_with_offset(value: &DateTime<FixedOffset>) -> String {
    value.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string()
}

pub fn format_date(value: &NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

pub fn format_time(value: &NaiveTime) -> String {
    value.format("%H:%M:%S%.f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timestamp(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_milli_opt(h, mi, s, ms)
            .unwrap()
    }

    #[test]
    fn test_julian_noon_is_whole_day() {
        let value = from_julian_day(2_456_573.0).unwrap();
        assert_eq!(value, timestamp(2013, 10, 7, 12, 0, 0, 0));
    }

    #[test]
    fn test_julian_epoch() {
        // 1970-01-01 00:00 UTC
        let value = from_julian_day(2_440_587.5).unwrap();
        assert_eq!(value, timestamp(1970, 1, 1, 0, 0, 0, 0));
    }

    #[test]
    fn test_julian_round_trip_keeps_milliseconds() {
        let original = timestamp(2013, 10, 7, 8, 23, 19, 120);
        let jd = to_julian_day(&original);
        assert_eq!(from_julian_day(jd).unwrap(), original);
    }

    #[test]
    fn test_to_julian_matches_engine_constants() {
        assert_eq!(to_julian_day(&timestamp(2013, 10, 7, 12, 0, 0, 0)), 2_456_573.0);
        assert_eq!(to_julian_day(&timestamp(2000, 1, 1, 0, 0, 0, 0)), 2_451_544.5);
    }

    #[test]
    fn test_julian_out_of_range() {
        assert!(from_julian_day(-1.0).is_none());
        assert!(from_julian_day(f64::NAN).is_none());
    }

    #[test]
    fn test_parse_text_forms() {
        assert_eq!(
            parse_naive("2014-04-15 10:47:16").unwrap(),
            timestamp(2014, 4, 15, 10, 47, 16, 0)
        );
        assert_eq!(
            parse_naive("2014-04-15T10:47:16.250").unwrap(),
            timestamp(2014, 4, 15, 10, 47, 16, 250)
        );
        assert_eq!(
            parse_naive("2014-04-15").unwrap(),
            timestamp(2014, 4, 15, 0, 0, 0, 0)
        );
        assert!(parse_naive("not a date").is_none());
    }

    #[test]
    fn test_parse_offset() {
        let value = parse_with_offset("2014-04-15 10:47:16+02:00").unwrap();
        assert_eq!(value.offset().local_minus_utc(), 7200);
        let utc = parse_with_offset("2014-04-15T10:47:16Z").unwrap();
        assert_eq!(utc.offset().local_minus_utc(), 0);
    }

    #[test]
    fn test_parse_time() {
        let value = parse_time("12:06:29").unwrap();
        assert_eq!(value, NaiveTime::from_hms_opt(12, 6, 29).unwrap());
    }

    #[test]
    fn test_format_text() {
        assert_eq!(
            format_naive(&timestamp(2014, 4, 15, 10, 47, 16, 0)),
            "2014-04-15 10:47:16"
        );
        assert_eq!(
            format_naive(&timestamp(2014, 4, 15, 10, 47, 16, 500)),
            "2014-04-15 10:47:16.500"
        );
    }
}
