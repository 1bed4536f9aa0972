//! Queue name grammar: construction and parsing of the name classes in §3.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use std::sync::OnceLock;

pub const PENDING_QUEUE: &str = "pend";
pub const PENDING_WORK_QUEUE: &str = "pend.work";
pub const FAIL_WORK_QUEUE: &str = "fail.work";

const RETRY_PREFIX: &str = "retr_";
const FAIL_PREFIX: &str = "fail_";

fn retry_queue_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^retr_(\d+)_#(\d+)$").expect("static regex is valid"))
}

/// Build a fresh retry queue name: `retr_{timestamp}_#{attempt}`.
///
/// Timestamp is UTC, microsecond precision, formatted `YYYYMMDDHHMMSSffffff`.
pub fn retry_queue_name(now: DateTime<Utc>, attempt: u32) -> String {
    format!("{RETRY_PREFIX}{}_#{attempt}", now.format("%Y%m%d%H%M%S%6f"))
}

/// Build a retry queue name with a bumped attempt count, keeping the
/// original timestamp. Used when renaming `queue` after a failed attempt.
pub fn retry_queue_with_attempt(queue: &str, new_attempt: u32) -> Option<String> {
    let (timestamp, _) = parse_retry_queue(queue)?;
    Some(format!("{RETRY_PREFIX}{timestamp}_#{new_attempt}"))
}

/// Parse a retry queue name into `(timestamp_str, attempt)`. Returns `None`
/// if the name doesn't match `^retr_(\d+)_#(\d+)$` (§3) — callers log and
/// skip such queues rather than deleting them.
pub fn parse_retry_queue(queue: &str) -> Option<(String, u32)> {
    let caps = retry_queue_regex().captures(queue)?;
    let timestamp = caps.get(1)?.as_str().to_string();
    let attempt: u32 = caps.get(2)?.as_str().parse().ok()?;
    Some((timestamp, attempt))
}

/// Build a dated fail queue name: `fail_{YYYYMMDD}`.
pub fn fail_queue_name(now: DateTime<Utc>) -> String {
    format!("{FAIL_PREFIX}{}", now.format("%Y%m%d"))
}

/// Parse the date out of a fail queue name, if it matches `fail_{YYYYMMDD}`.
pub fn parse_fail_queue_date(queue: &str) -> Option<NaiveDate> {
    let rest = queue.strip_prefix(FAIL_PREFIX)?;
    NaiveDate::parse_from_str(rest, "%Y%m%d").ok()
}

pub fn is_retry_queue(queue: &str) -> bool {
    queue.starts_with(RETRY_PREFIX)
}

pub fn is_fail_queue(queue: &str) -> bool {
    queue.starts_with(FAIL_PREFIX) && queue != FAIL_WORK_QUEUE
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn retry_queue_name_format() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let name = retry_queue_name(ts, 0);
        assert_eq!(name, "retr_20240101000000000000_#0");
    }

    #[test]
    fn parse_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 5, 4, 3, 2).unwrap();
        let name = retry_queue_name(ts, 7);
        let (timestamp, attempt) = parse_retry_queue(&name).unwrap();
        assert_eq!(attempt, 7);
        assert_eq!(timestamp, "20240605040302000000");
    }

    #[test]
    fn rejects_malformed_names() {
        assert!(parse_retry_queue("retr_not_a_timestamp").is_none());
        assert!(parse_retry_queue("retr_123_noattempt").is_none());
        assert!(parse_retry_queue("pend").is_none());
    }

    #[test]
    fn bump_attempt_preserves_timestamp() {
        let bumped = retry_queue_with_attempt("retr_20240101000000000000_#3", 4).unwrap();
        assert_eq!(bumped, "retr_20240101000000000000_#4");
    }

    #[test]
    fn fail_queue_name_and_parse() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let name = fail_queue_name(ts);
        assert_eq!(name, "fail_20240101");
        assert_eq!(
            parse_fail_queue_date(&name).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
    }

    #[test]
    fn classifies_queue_names() {
        assert!(is_retry_queue("retr_1_#0"));
        assert!(!is_retry_queue("pend"));
        assert!(is_fail_queue("fail_20240101"));
        assert!(!is_fail_queue("fail.work"));
    }
}
