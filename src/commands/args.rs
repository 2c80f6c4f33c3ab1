//! Argument parsing shared by the command bodies.

use super::CommandError;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Parses a signed 64-bit integer argument.
pub(crate) fn parse_int(arg: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotInteger)
}

/// Parses a score. Accepts `inf`, `+inf` and `-inf`; rejects NaN.
pub(crate) fn parse_float(arg: &[u8]) -> Result<f64, CommandError> {
    let text = std::str::from_utf8(arg).map_err(|_| CommandError::NotFloat)?;
    let value = match text.to_ascii_lowercase().as_str() {
        "inf" | "+inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        other => other.parse().map_err(|_| CommandError::NotFloat)?,
    };
    if value.is_nan() {
        return Err(CommandError::NotFloat);
    }
    Ok(value)
}

/// Parses a non-negative index (SELECT).
pub(crate) fn parse_index(arg: &[u8]) -> Result<usize, CommandError> {
    let n = parse_int(arg)?;
    usize::try_from(n).map_err(|_| CommandError::InvalidDbIndex)
}

/// Case-insensitive match of an option keyword.
pub(crate) fn is_keyword(arg: &[u8], keyword: &str) -> bool {
    arg.eq_ignore_ascii_case(keyword.as_bytes())
}

/// Deadline `amount` units from now. Non-positive amounts give a deadline in
/// the past, which callers treat as "delete now".
pub(crate) fn relative_deadline(
    amount: i64,
    unit_ms: i64,
    command: &str,
) -> Result<SystemTime, CommandError> {
    let millis = amount
        .checked_mul(unit_ms)
        .ok_or_else(|| CommandError::InvalidExpire(command.into()))?;
    if millis <= 0 {
        return Ok(UNIX_EPOCH);
    }
    SystemTime::now()
        .checked_add(Duration::from_millis(millis as u64))
        .ok_or_else(|| CommandError::InvalidExpire(command.into()))
}

/// Deadline at `amount` units after the Unix epoch.
pub(crate) fn absolute_deadline(
    amount: i64,
    unit_ms: i64,
    command: &str,
) -> Result<SystemTime, CommandError> {
    let millis = amount
        .checked_mul(unit_ms)
        .ok_or_else(|| CommandError::InvalidExpire(command.into()))?;
    if millis <= 0 {
        return Ok(UNIX_EPOCH);
    }
    UNIX_EPOCH
        .checked_add(Duration::from_millis(millis as u64))
        .ok_or_else(|| CommandError::InvalidExpire(command.into()))
}

/// A strictly positive TTL, as SET EX/PX and SETEX require.
pub(crate) fn positive_ttl(amount: i64, unit_ms: i64, command: &str) -> Result<Duration, CommandError> {
    match amount.checked_mul(unit_ms) {
        Some(millis) if millis > 0 => Ok(Duration::from_millis(millis as u64)),
        _ => Err(CommandError::InvalidExpire(command.into())),
    }
}

/// Resolves a Redis-style `start..=stop` range (negative indexes count from
/// the end) against a length. Returns `None` when the range is empty.
pub(crate) fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int(b"42"), Ok(42));
        assert_eq!(parse_int(b"-7"), Ok(-7));
        assert_eq!(parse_int(b"4x"), Err(CommandError::NotInteger));
        assert_eq!(parse_int(b"99999999999999999999"), Err(CommandError::NotInteger));
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float(b"1.5"), Ok(1.5));
        assert_eq!(parse_float(b"-inf"), Ok(f64::NEG_INFINITY));
        assert_eq!(parse_float(b"nan"), Err(CommandError::NotFloat));
        assert_eq!(parse_float(b"abc"), Err(CommandError::NotFloat));
    }

    #[test]
    fn test_normalize_range() {
        assert_eq!(normalize_range(0, -1, 5), Some((0, 4)));
        assert_eq!(normalize_range(-2, -1, 5), Some((3, 4)));
        assert_eq!(normalize_range(1, 100, 5), Some((1, 4)));
        assert_eq!(normalize_range(-100, 1, 5), Some((0, 1)));
        assert_eq!(normalize_range(3, 1, 5), None);
        assert_eq!(normalize_range(5, 10, 5), None);
        assert_eq!(normalize_range(0, -1, 0), None);
    }

    #[test]
    fn test_deadlines() {
        assert_eq!(relative_deadline(0, 1000, "expire"), Ok(UNIX_EPOCH));
        assert!(relative_deadline(10, 1000, "expire").unwrap() > SystemTime::now());
        assert_eq!(
            relative_deadline(i64::MAX, 1000, "expire"),
            Err(CommandError::InvalidExpire("expire".into()))
        );
        assert_eq!(
            absolute_deadline(1, 1000, "expireat"),
            Ok(UNIX_EPOCH + Duration::from_secs(1))
        );
        assert!(positive_ttl(0, 1, "set").is_err());
    }
}
