//! Raw bus payload → [`Event`].
//!
//! Normalization is total: every input, including empty and binary payloads,
//! produces a fully populated event. Structured payloads are JSON objects;
//! anything else is read as a bare numeric literal.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::event::{Event, UNKNOWN_SUBJECT};

/// Keys accepted for the subject, in lookup order.
const SUBJECT_KEYS: &[&str] = &["subject", "token", "symbol"];
/// Keys accepted for the value, in lookup order.
const VALUE_KEYS: &[&str] = &["value", "rsi"];

/// Normalize a raw payload using the current time for missing timestamps.
pub fn normalize(raw: &[u8]) -> Event {
    normalize_at(raw, Utc::now())
}

/// Normalize a raw payload with an explicit receipt time.
pub fn normalize_at(raw: &[u8], now: DateTime<Utc>) -> Event {
    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(fields)) => from_fields(&fields, raw, now),
        _ => Event::unknown(now, parse_bare_number(raw)),
    }
}

fn from_fields(fields: &Map<String, Value>, raw: &[u8], now: DateTime<Utc>) -> Event {
    let subject = SUBJECT_KEYS
        .iter()
        .find_map(|key| fields.get(*key).and_then(subject_of))
        .unwrap_or_else(|| UNKNOWN_SUBJECT.to_string());

    let timestamp = fields
        .get("timestamp")
        .and_then(timestamp_of)
        .unwrap_or(now);

    // A missing or non-numeric value falls through to the bare-number read of
    // the whole payload, which yields 0 for any JSON object.
    let value = VALUE_KEYS
        .iter()
        .find_map(|key| fields.get(*key).and_then(number_of))
        .unwrap_or_else(|| parse_bare_number(raw));

    Event::new(subject, timestamp, value)
}

fn subject_of(value: &Value) -> Option<String> {
    let s = value.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn timestamp_of(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?;
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn number_of(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Read the payload as a bare number; 0 when it is not one.
fn parse_bare_number(raw: &[u8]) -> f64 {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|n| n.is_finite())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn well_formed_payload() {
        let raw = br#"{"subject":"BTC","timestamp":"2024-01-01T00:00:00Z","value":55.2}"#;
        let event = normalize_at(raw, now());
        assert_eq!(event.subject, "BTC");
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(event.value, 55.2);
    }

    #[test]
    fn not_json_becomes_unknown_zero() {
        let event = normalize_at(b"not-json", now());
        assert_eq!(event, Event::unknown(now(), 0.0));
    }

    #[test]
    fn bare_number_text() {
        let event = normalize_at(b"42.5", now());
        assert_eq!(event.subject, UNKNOWN_SUBJECT);
        assert_eq!(event.timestamp, now());
        assert_eq!(event.value, 42.5);
    }

    #[test]
    fn bare_number_with_whitespace() {
        let event = normalize_at(b"  17\n", now());
        assert_eq!(event.value, 17.0);
        assert!(event.is_unknown());
    }

    #[test]
    fn empty_payload() {
        let event = normalize_at(b"", now());
        assert_eq!(event, Event::unknown(now(), 0.0));
    }

    #[test]
    fn binary_garbage() {
        let event = normalize_at(&[0xff, 0xfe, 0x00, 0x80], now());
        assert_eq!(event, Event::unknown(now(), 0.0));
    }

    #[test]
    fn non_finite_literals_become_zero() {
        assert_eq!(normalize_at(b"NaN", now()).value, 0.0);
        assert_eq!(normalize_at(b"inf", now()).value, 0.0);
    }

    #[test]
    fn missing_timestamp_uses_receipt_time() {
        let event = normalize_at(br#"{"subject":"ETH","value":3.5}"#, now());
        assert_eq!(event.subject, "ETH");
        assert_eq!(event.timestamp, now());
        assert_eq!(event.value, 3.5);
    }

    #[test]
    fn unparseable_timestamp_uses_receipt_time() {
        let event = normalize_at(br#"{"subject":"ETH","timestamp":"yesterday","value":1}"#, now());
        assert_eq!(event.timestamp, now());
    }

    #[test]
    fn offset_timestamp_converted_to_utc() {
        let raw = br#"{"subject":"ETH","timestamp":"2024-01-01T02:00:00+02:00","value":1}"#;
        let event = normalize_at(raw, now());
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn missing_value_is_zero_and_keeps_subject() {
        let event = normalize_at(br#"{"subject":"SOL"}"#, now());
        assert_eq!(event.subject, "SOL");
        assert_eq!(event.value, 0.0);
    }

    #[test]
    fn non_numeric_value_is_zero() {
        let event = normalize_at(br#"{"subject":"SOL","value":"high"}"#, now());
        assert_eq!(event.value, 0.0);
        let event = normalize_at(br#"{"subject":"SOL","value":[1,2]}"#, now());
        assert_eq!(event.value, 0.0);
    }

    #[test]
    fn numeric_string_value() {
        let event = normalize_at(br#"{"subject":"SOL","value":" 12.25 "}"#, now());
        assert_eq!(event.value, 12.25);
    }

    #[test]
    fn legacy_field_names() {
        let raw = br#"{"token":"BONK","timestamp":"2024-01-01T00:00:00Z","rsi":71.3}"#;
        let event = normalize_at(raw, now());
        assert_eq!(event.subject, "BONK");
        assert_eq!(event.value, 71.3);
    }

    #[test]
    fn canonical_keys_win_over_legacy() {
        let raw = br#"{"subject":"A","token":"B","value":1,"rsi":2}"#;
        let event = normalize_at(raw, now());
        assert_eq!(event.subject, "A");
        assert_eq!(event.value, 1.0);
    }

    #[test]
    fn empty_or_non_string_subject_is_unknown() {
        assert!(normalize_at(br#"{"subject":"  ","value":1}"#, now()).is_unknown());
        assert!(normalize_at(br#"{"subject":42,"value":1}"#, now()).is_unknown());
        assert!(normalize_at(br#"{"value":1}"#, now()).is_unknown());
    }

    #[test]
    fn json_array_is_not_structured() {
        let event = normalize_at(b"[1,2,3]", now());
        assert_eq!(event, Event::unknown(now(), 0.0));
    }

    #[test]
    fn json_number_is_read_as_bare_number() {
        let event = normalize_at(b"99", now());
        assert_eq!(event, Event::unknown(now(), 99.0));
    }

    #[test]
    fn json_string_is_unknown_zero() {
        let event = normalize_at(b"\"hello\"", now());
        assert_eq!(event, Event::unknown(now(), 0.0));
    }

    #[test]
    fn normalize_uses_wall_clock() {
        let before = Utc::now();
        let event = normalize(b"oops");
        let after = Utc::now();
        assert!(event.timestamp >= before && event.timestamp <= after);
    }
}
