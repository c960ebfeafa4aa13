//! Envelope extraction: subject, sender and date from raw RFC 5322 headers.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use mail_parser::{HeaderName, MessageParser};
use tracing::warn;

use crate::model::message::Envelope;

/// Build an [`Envelope`] from a raw message.
///
/// Never fails: missing fields become empty strings, and the date falls
/// back to `internal_date`, then to the Unix epoch.
pub fn read_envelope(raw: &[u8], internal_date: Option<DateTime<Utc>>) -> Envelope {
    let header_bytes = &raw[..header_end(raw)];
    let parsed = MessageParser::default().parse(header_bytes);

    let subject = parsed
        .as_ref()
        .and_then(|msg| msg.subject())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let sender = parsed
        .as_ref()
        .and_then(|msg| msg.from())
        .and_then(|from| from.first())
        .and_then(|addr| addr.address().or_else(|| addr.name()))
        .map(String::from)
        .unwrap_or_default();

    let header_date = parsed
        .as_ref()
        .and_then(|msg| msg.date())
        .and_then(|dt| DateTime::parse_from_rfc3339(&dt.to_rfc3339()).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            parsed
                .as_ref()
                .and_then(|msg| msg.header_raw(HeaderName::Date))
                .and_then(|raw| parse_date(&unfold(raw)))
        });

    Envelope {
        subject,
        date: header_date.or(internal_date).unwrap_or(DateTime::UNIX_EPOCH),
        sender,
    }
}

/// Collapse folded header whitespace into single spaces.
fn unfold(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Byte offset where the header block ends (first blank line), or the input length.
fn header_end(data: &[u8]) -> usize {
    for i in 0..data.len().saturating_sub(1) {
        if data[i] == b'\n' && data[i + 1] == b'\n' {
            return i + 1;
        }
        if data[i..].starts_with(b"\r\n\r\n") {
            return i + 2;
        }
    }
    data.len()
}

/// Parse a date string in the many formats found in the wild.
///
/// Handles RFC 2822, RFC 3339, IMAP `DD-MMM-YYYY` dates and trailing
/// named time zones such as `EST`.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    const FORMATS: [&str; 6] = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M:%S",
        "%b %d %H:%M:%S %Y",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
    ];

    let no_dow = strip_day_of_week(trimmed);
    let candidates = [
        no_dow.to_string(),
        normalize_imap_date(no_dow),
        replace_named_tz(&normalize_imap_date(no_dow)),
    ];

    for candidate in &candidates {
        for fmt in FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(candidate, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(candidate, fmt) {
                return Some(Utc.from_utc_datetime(&ndt));
            }
        }
    }

    warn!(date = trimmed, "Could not parse date");
    None
}

/// Strip a leading day-of-week (`"Thu, "` or `"Thu "`).
fn strip_day_of_week(s: &str) -> &str {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    for day in DAYS {
        if let Some(rest) = s.strip_prefix(day) {
            if let Some(rest) = rest.strip_prefix(',').or_else(|| rest.strip_prefix(' ')) {
                return rest.trim_start();
            }
        }
    }
    s
}

/// `"16-JUL-2025 03:01:03"` → `"16 Jul 2025 03:01:03"`.
fn normalize_imap_date(s: &str) -> String {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    for month in MONTHS {
        for spelled in [month.to_uppercase(), month.to_lowercase(), month.to_string()] {
            let pattern = format!("-{spelled}-");
            if s.contains(&pattern) {
                return s.replacen(&pattern, &format!(" {month} "), 1);
            }
        }
    }
    s.to_string()
}

/// Replace a trailing time zone abbreviation with its numeric offset.
fn replace_named_tz(s: &str) -> String {
    const ZONES: [(&str, &str); 13] = [
        ("CEST", "+0200"),
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("MST", "-0700"),
        ("MDT", "-0600"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("CET", "+0100"),
        ("JST", "+0900"),
    ];
    for (name, offset) in ZONES {
        if let Some(stripped) = s.strip_suffix(name) {
            return format!("{stripped}{offset}");
        }
    }
    s.to_string()
}
