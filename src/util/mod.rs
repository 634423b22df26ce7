//! Shared helpers: latin1 transcoding, 14-digit timestamps, canned responses.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Decode a byte slice as ISO-8859-1 (one byte per char, no failure mode).
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Encode a string as ISO-8859-1. Chars above U+00FF are masked to their low
/// byte, matching the transcoding the tokenizer round-trips through.
pub fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars().map(|c| (c as u32 & 0xff) as u8).collect()
}

/// True if `value` starts with any of the given prefixes.
pub fn starts_with_any(value: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|p| value.starts_with(p))
}

/// Format a date as the 14-digit replay timestamp (YYYYMMDDhhmmss).
pub fn get_ts(date: &DateTime<Utc>) -> String {
    date.format("%Y%m%d%H%M%S").to_string()
}

/// Epoch seconds of a date, as a string (consumed by the client runtime).
pub fn get_seconds_str(date: &DateTime<Utc>) -> String {
    date.timestamp().to_string()
}

/// Parse a possibly-truncated replay timestamp, padding missing fields the
/// same way the classic wayback tools do (month/day default to 01).
pub fn ts_to_date(ts: &str) -> Option<DateTime<Utc>> {
    if ts.is_empty() || !ts.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    const TEMPLATE: &[u8] = b"20010101000000";
    let mut full = TEMPLATE.to_vec();
    for (i, b) in ts.bytes().take(14).enumerate() {
        full[i] = b;
    }
    let full = String::from_utf8(full).ok()?;
    let naive = NaiveDateTime::parse_from_str(&full, "%Y%m%d%H%M%S").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Uniform not-found page. Every unresolvable replay target degrades to this,
/// never to an error status bubble-up.
pub fn not_found(msg: &str) -> Response {
    let content = format!("<html><body>\n<h2>Archived Page Not Found</h2>\n{msg}\n</body></html>");
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/html")],
        content,
    )
        .into_response()
}
