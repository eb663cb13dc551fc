//! Validator suite (§4.9): the stock field validators and their dispatch
//! into [`ValidatedValue`](crate::ipc::ValidatedValue).
//!
//! Grounded on `original_source/kcgi.c::kvalid_string/email/udouble/double/
//! int/uint` and the `valid_email`/`trim` heuristics they share. `date` and
//! `stringne` have no surviving C implementation body in the retrieval
//! pack (`kcgi.h` only declares them) and are this crate's own design,
//! noted in `DESIGN.md`.

use crate::ipc::ValidatedValue;

/// A validator inspects a raw value and either rejects it (`None`) or
/// returns the typed value to record alongside it.
pub type Validator = fn(&[u8]) -> Option<ValidatedValue>;

/// Trim ASCII whitespace, returning the trimmed slice and its start offset
/// within `value` (the `value_start - parsed_start` quantity §4.9 wants
/// encoded as the `StringOffset`).
fn trim(value: &[u8]) -> (&[u8], usize) {
    let start = value.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(value.len());
    let end = value.iter().rposition(|b| !b.is_ascii_whitespace()).map(|i| i + 1).unwrap_or(start);
    (&value[start..end], start)
}

/// Any value at all, unconditionally accepted as a string (`kvalid_string`:
/// always true once the byte string has no interior NUL truncation, which
/// a `&[u8]` already guarantees by construction). The parsed string is the
/// whole value, so the offset is 0.
pub fn valid_string(_value: &[u8]) -> Option<ValidatedValue> {
    Some(ValidatedValue::StringOffset(0))
}

/// A non-empty string.
pub fn valid_stringne(value: &[u8]) -> Option<ValidatedValue> {
    if value.is_empty() {
        None
    } else {
        Some(ValidatedValue::StringOffset(0))
    }
}

/// A simple heuristic email address check (deliberately not RFC-compliant,
/// matching the source's own comment). Local part: alphanumeric plus
/// ``!#$%&'*+-/=?^_`{|}~.``; domain: alphanumeric plus `-.`.
pub fn valid_email(value: &[u8]) -> Option<ValidatedValue> {
    let (trimmed, offset) = trim(value);
    let len = trimmed.len();
    if len < 5 || len > 254 {
        return None;
    }
    let at = trimmed.iter().position(|&b| b == b'@')?;
    let local = &trimmed[..at];
    if local.is_empty() || local.len() > 64 {
        return None;
    }
    const LOCAL_SPECIALS: &[u8] = b"!#$%&'*+-/=?^_`{|}~.";
    if !local.iter().all(|&b| b.is_ascii_alphanumeric() || LOCAL_SPECIALS.contains(&b)) {
        return None;
    }
    let domain = &trimmed[at + 1..];
    if domain.len() < 4 || domain.len() > 254 {
        return None;
    }
    if !domain.iter().all(|&b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.') {
        return None;
    }
    Some(ValidatedValue::StringOffset(offset as i64))
}

/// A floating-point value with at most two digits after the last `.`,
/// parseable in full (no trailing garbage, not empty).
pub fn valid_double(value: &[u8]) -> Option<ValidatedValue> {
    if value.is_empty() {
        return None;
    }
    if let Some(dot) = value.iter().rposition(|&b| b == b'.') {
        if value.len() - dot - 1 > 2 {
            return None;
        }
    }
    let text = std::str::from_utf8(value).ok()?;
    let parsed: f64 = text.parse().ok()?;
    if parsed.is_infinite() {
        return None;
    }
    Some(ValidatedValue::Double(parsed))
}

/// [`valid_double`] additionally requiring a positive, normal value.
pub fn valid_udouble(value: &[u8]) -> Option<ValidatedValue> {
    match valid_double(value)? {
        ValidatedValue::Double(d) if d.is_normal() && d > 0.0 => Some(ValidatedValue::Double(d)),
        _ => None,
    }
}

/// A full-range signed 64-bit integer, trimmed of surrounding whitespace.
pub fn valid_int(value: &[u8]) -> Option<ValidatedValue> {
    let (trimmed, _) = trim(value);
    let text = std::str::from_utf8(trimmed).ok()?;
    let parsed: i64 = text.parse().ok()?;
    Some(ValidatedValue::Integer(parsed))
}

/// A strictly positive 64-bit integer (`kvalid_uint`'s `strtonum(1,
/// INT64_MAX)` range), trimmed of surrounding whitespace.
pub fn valid_uint(value: &[u8]) -> Option<ValidatedValue> {
    let (trimmed, _) = trim(value);
    let text = std::str::from_utf8(trimmed).ok()?;
    let parsed: i64 = text.parse().ok()?;
    if parsed < 1 {
        return None;
    }
    Some(ValidatedValue::Integer(parsed))
}

/// An ISO-8601 calendar date `YYYY-MM-DD`, with a plausible month/day
/// range (no surviving source body to crib from; this crate's own
/// design, see `DESIGN.md`).
pub fn valid_date(value: &[u8]) -> Option<ValidatedValue> {
    let text = std::str::from_utf8(value).ok()?;
    let mut parts = text.split('-');
    let year: i64 = parts.next()?.parse().ok()?;
    let month: i64 = parts.next()?.parse().ok()?;
    let day: i64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some(ValidatedValue::Integer(year * 10000 + month * 100 + day))
}

/// One entry of a validator dispatch table: the field key it applies to
/// and the validator function to run against its raw value.
pub struct FieldValidator {
    pub key: Vec<u8>,
    pub validator: Validator,
}

/// Run the validator whose key matches `key`, if any. No matching entry
/// means the field is left unvalidated (caller should record state
/// `Unchecked`, per §3).
pub fn dispatch(table: &[FieldValidator], key: &[u8], value: &[u8]) -> Option<ValidatedValue> {
    table.iter().find(|entry| entry.key == key).and_then(|entry| (entry.validator)(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_always_accepts() {
        assert!(valid_string(b"anything").is_some());
        assert!(valid_string(b"").is_some());
    }

    #[test]
    fn stringne_rejects_empty() {
        assert!(valid_stringne(b"").is_none());
        assert!(valid_stringne(b"x").is_some());
    }

    #[test]
    fn email_accepts_plausible_address_and_reports_trim_offset() {
        assert_eq!(valid_email(b"  Foo.Bar@Example.com  "), Some(ValidatedValue::StringOffset(2)));
        assert_eq!(valid_email(b"Foo.Bar@Example.com"), Some(ValidatedValue::StringOffset(0)));
        assert!(valid_email(b"no-at-sign").is_none());
        assert!(valid_email(b"a@b").is_none());
    }

    #[test]
    fn double_rejects_more_than_two_fractional_digits() {
        assert!(valid_double(b"1.23").is_some());
        assert!(valid_double(b"1.234").is_none());
    }

    #[test]
    fn udouble_requires_positive() {
        assert!(valid_udouble(b"1.5").is_some());
        assert!(valid_udouble(b"-1.5").is_none());
        assert!(valid_udouble(b"0").is_none());
    }

    #[test]
    fn int_parses_full_range_and_trims() {
        assert_eq!(valid_int(b" -42 "), Some(ValidatedValue::Integer(-42)));
        assert!(valid_int(b"not-a-number").is_none());
    }

    #[test]
    fn uint_rejects_non_positive() {
        assert!(valid_uint(b"0").is_none());
        assert!(valid_uint(b"-1").is_none());
        assert_eq!(valid_uint(b"7"), Some(ValidatedValue::Integer(7)));
    }

    #[test]
    fn date_parses_iso8601() {
        assert_eq!(valid_date(b"2026-07-28"), Some(ValidatedValue::Integer(20260728)));
        assert!(valid_date(b"2026-13-01").is_none());
        assert!(valid_date(b"not-a-date").is_none());
    }

    #[test]
    fn dispatch_finds_matching_key() {
        let table = vec![FieldValidator { key: b"age".to_vec(), validator: valid_uint }];
        assert_eq!(dispatch(&table, b"age", b"30"), Some(ValidatedValue::Integer(30)));
        assert_eq!(dispatch(&table, b"missing", b"30"), None);
    }
}
