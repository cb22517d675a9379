//! Timestamp normalization for log records and file names.
//!
//! The canonical record timestamp is `YYYY.MM.DD-HH.MM.SS`, but older files
//! use a space or `:` between fields. Every variant is canonicalized the same
//! way: split into numeric groups, then build the date from the first six.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

/// Characters accepted between the numeric groups of a timestamp.
const SEPARATORS: &[char] = &['.', '-', ' ', ':', '/', '_', 'T', ','];

/// Length of `YYYY.MM.DD-HH.MM.SS`.
const EMBEDDED_LEN: usize = 19;

/// Parse a record timestamp in any of the accepted delimiter variants.
///
/// An optional seventh group (milliseconds) is ignored. Times are taken as UTC.
pub fn parse_log_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() || raw.chars().any(|c| !c.is_ascii_digit() && !SEPARATORS.contains(&c)) {
        return None;
    }

    let groups: Vec<&str> = raw
        .split(|c: char| !c.is_ascii_digit())
        .filter(|g| !g.is_empty())
        .collect();
    if !(6..=7).contains(&groups.len()) || groups[0].len() != 4 {
        return None;
    }
    if groups[1..6].iter().any(|g| g.len() > 2) {
        return None;
    }

    let num = |i: usize| groups[i].parse::<u32>().ok();
    let year = groups[0].parse::<i32>().ok()?;
    let date = NaiveDate::from_ymd_opt(year, num(1)?, num(2)?)?;
    let naive = date.and_hms_opt(num(3)?, num(4)?, num(5)?)?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Find an embedded `YYYY.MM.DD-HH.MM.SS` stamp anywhere in a file name.
pub fn find_embedded_timestamp(name: &str) -> Option<DateTime<Utc>> {
    let bytes = name.as_bytes();
    if bytes.len() < EMBEDDED_LEN {
        return None;
    }
    (0..=bytes.len() - EMBEDDED_LEN)
        .filter(|&start| is_embedded_shape(&bytes[start..start + EMBEDDED_LEN]))
        .find_map(|start| parse_log_timestamp(&name[start..start + EMBEDDED_LEN]))
}

fn is_embedded_shape(window: &[u8]) -> bool {
    window.iter().enumerate().all(|(i, b)| match i {
        4 | 7 | 13 | 16 => *b == b'.',
        10 => *b == b'-',
        _ => b.is_ascii_digit(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_canonical_format() {
        let ts = parse_log_timestamp("2025.05.01-12.34.56").unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day()), (2025, 5, 1));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (12, 34, 56));
    }

    #[test]
    fn test_delimiter_variants_agree() {
        let canonical = parse_log_timestamp("2025.05.01-12.34.56");
        assert!(canonical.is_some());
        for variant in [
            "2025.05.01 12.34.56",
            "2025.05.01-12:34:56",
            "2025-05-01 12:34:56",
            "2025.05.01-12.34.56:789",
            " 2025.05.01-12.34.56 ",
        ] {
            assert_eq!(parse_log_timestamp(variant), canonical, "variant {variant:?}");
        }
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_log_timestamp("").is_none());
        assert!(parse_log_timestamp("not a date").is_none());
        assert!(parse_log_timestamp("2025.13.01-12.34.56").is_none());
        assert!(parse_log_timestamp("25.05.01-12.34.56").is_none());
        assert!(parse_log_timestamp("2025.05.01").is_none());
        assert!(parse_log_timestamp("2025.05.01-25.00.00").is_none());
    }

    #[test]
    fn test_embedded_in_filename() {
        let ts = find_embedded_timestamp("2025.03.15-08.00.00.csv").unwrap();
        assert_eq!((ts.month(), ts.day(), ts.hour()), (3, 15, 8));

        let ts = find_embedded_timestamp("deathlog_2024.12.31-23.59.59_backup.csv").unwrap();
        assert_eq!(ts.year(), 2024);

        assert!(find_embedded_timestamp("deathlog.csv").is_none());
        assert!(find_embedded_timestamp("2025-03-15 08:00:00.csv").is_none());
    }
}
