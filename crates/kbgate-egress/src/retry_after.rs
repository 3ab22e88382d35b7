//! `Retry-After` header parsing
//!
//! Throttled knowledge base, memory and model calls may tell us how long to
//! back off, either as delta-seconds or as an HTTP-date (RFC 7231).

use tracing::debug;

/// Parse a `retry-after` header value into seconds from now.
///
/// Past HTTP-dates yield `Some(0)`; unparseable values yield `None`.
///
/// ```
/// use kbgate_egress::parse_retry_after;
///
/// assert_eq!(parse_retry_after("15"), Some(15));
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
pub fn parse_retry_after(header_value: &str) -> Option<u64> {
    let value = header_value.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }

    let target = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let seconds = target
        .signed_duration_since(chrono::Utc::now())
        .num_seconds()
        .max(0) as u64;

    debug!(retry_after_seconds = seconds, "Parsed HTTP-date retry-after");
    Some(seconds)
}
