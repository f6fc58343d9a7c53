//! Mail `Date:` header parsing.
//!
//! Headers in the wild are messy: RFC 2822 with or without a trailing
//! comment (`(UTC)`, `(PDT)`), ISO 8601 from exporters, and a handful of
//! bare legacy shapes. Parsing is lenient and never fails outright —
//! callers that need a timestamp fall back to "now".

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Bare formats tried after the RFC parsers, in order.
const LEGACY_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M",
];

/// Parse a `Date:` header into UTC. Returns `None` when nothing matches.
pub fn parse_mail_date(raw: &str) -> Option<DateTime<Utc>> {
    let cleaned = strip_comment(raw.trim());
    if cleaned.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(cleaned) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(cleaned) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in LEGACY_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(cleaned, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(cleaned, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return Some(Utc.from_utc_datetime(&naive));
    }
    None
}

/// Parse a `Date:` header, falling back to the current time.
pub fn mail_date_or_now(raw: &str) -> DateTime<Utc> {
    parse_mail_date(raw).unwrap_or_else(Utc::now)
}

/// Year of the message, from the header or from "now" when unparseable.
pub fn year_of(raw: &str) -> i32 {
    use chrono::Datelike;
    mail_date_or_now(raw).year()
}

/// Drop a trailing parenthesized comment: `"… +0000 (UTC)"` → `"… +0000"`.
fn strip_comment(s: &str) -> &str {
    match s.rfind('(') {
        Some(idx) if s.ends_with(')') => s[..idx].trim_end(),
        _ => s,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use rstest::rstest;

    #[rstest]
    #[case("Tue, 01 Jul 2025 10:00:00 +0000", 2025)]
    #[case("Tue, 01 Jul 2025 10:00:00 +0000 (UTC)", 2025)]
    #[case("01 Jul 2025 10:00:00 +0200", 2025)]
    #[case("2024-03-05T08:30:00Z", 2024)]
    #[case("2024-03-05 08:30:00", 2024)]
    #[case("05 Mar 2024 08:30:00", 2024)]
    #[case("2024-03-05", 2024)]
    fn parses_common_header_shapes(#[case] raw: &str, #[case] year: i32) {
        let dt = parse_mail_date(raw).expect("should parse");
        assert_eq!(dt.year(), year);
    }

    #[test]
    fn timezone_is_normalized_to_utc() {
        let dt = parse_mail_date("Tue, 01 Jul 2025 10:00:00 +0200").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-07-01T08:00:00+00:00");
    }

    #[rstest]
    #[case("")]
    #[case("not a date")]
    #[case("32 Foo 20xx")]
    fn garbage_returns_none(#[case] raw: &str) {
        assert!(parse_mail_date(raw).is_none());
    }

    #[test]
    fn fallback_year_is_current_year_for_garbage() {
        assert_eq!(year_of("???"), Utc::now().year());
    }
}
