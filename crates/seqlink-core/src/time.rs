// SPDX-License-Identifier: Apache-2.0

//! Timestamp parsing and formatting helpers.
//!
//! Everything the pipeline emits is UTC `YYYY-MM-DDTHH:MM:SSZ`. Inputs
//! arrive in several dialects: ISO 8601 with or without zone, bare dates,
//! and the PostgreSQL export style found in the JGA date CSVs
//! (`2014-07-07 14:00:37.208+09`).

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

pub const UTC_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[must_use]
pub fn format_utc(dt: DateTime<Utc>) -> String {
    dt.format(UTC_FORMAT).to_string()
}

#[must_use]
pub fn now_utc_string() -> String {
    format_utc(Utc::now())
}

/// Parse a timestamp in any of the accepted dialects into UTC.
#[must_use]
pub fn parse_flexible(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "-" {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    // PostgreSQL export style: space separator, optional fraction,
    // offset without minutes ("+09").
    let fixed = fix_postgres_style(trimmed);
    if let Ok(dt) = DateTime::parse_from_rfc3339(&fixed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
    }
    None
}

/// Normalize a timestamp string to UTC `YYYY-MM-DDTHH:MM:SSZ`, or `None`
/// when it cannot be parsed.
#[must_use]
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    parse_flexible(raw).map(format_utc)
}

fn fix_postgres_style(raw: &str) -> String {
    let mut fixed = raw.replacen(' ', "T", 1);
    // "+09" / "-05" offsets need minutes for RFC 3339.
    let bytes = fixed.as_bytes();
    if bytes.len() >= 3 {
        let tail = &fixed[fixed.len() - 3..];
        let mut chars = tail.chars();
        let sign = chars.next();
        if matches!(sign, Some('+') | Some('-'))
            && chars.clone().all(|c| c.is_ascii_digit())
            && chars.count() == 2
        {
            fixed.push_str(":00");
        }
    }
    fixed.replace("Z", "+00:00")
}

/// Subtract the safety margin from an incremental cutoff timestamp.
/// Upstream sources back-date records after publication; the margin
/// re-materializes anything touched inside that window.
#[must_use]
pub fn apply_margin(since: DateTime<Utc>, margin_days: i64) -> DateTime<Utc> {
    since - chrono::Duration::days(margin_days)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_passes_through() {
        assert_eq!(
            normalize_timestamp("2026-01-30T00:00:00Z").as_deref(),
            Some("2026-01-30T00:00:00Z")
        );
    }

    #[test]
    fn postgres_export_style_is_repaired() {
        assert_eq!(
            normalize_timestamp("2014-07-07 14:00:37.208+09").as_deref(),
            Some("2014-07-07T05:00:37Z")
        );
    }

    #[test]
    fn bare_date_becomes_midnight_utc() {
        assert_eq!(
            normalize_timestamp("2025-12-30").as_deref(),
            Some("2025-12-30T00:00:00Z")
        );
    }

    #[test]
    fn dash_and_empty_are_null() {
        assert_eq!(normalize_timestamp("-"), None);
        assert_eq!(normalize_timestamp("  "), None);
        assert_eq!(normalize_timestamp("not a date"), None);
    }

    #[test]
    fn margin_moves_the_cutoff_back() {
        let since = parse_flexible("2026-01-30T00:00:00Z").expect("since");
        let cutoff = apply_margin(since, 30);
        assert_eq!(format_utc(cutoff), "2025-12-31T00:00:00Z");
    }
}
