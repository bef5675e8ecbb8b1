use crate::error::{AppError, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// Longest client key accepted; matches the `idempotency_key` column width.
pub const MAX_KEY_LENGTH: usize = 255;

/// Client-supplied idempotency key, trimmed and non-blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Parses a raw header value. Absent or whitespace-only input yields `Ok(None)`,
    /// which disables idempotency for the call.
    pub fn parse(raw: Option<&str>) -> Result<Option<Self>> {
        let trimmed = match raw.map(str::trim) {
            Some(value) if !value.is_empty() => value,
            _ => return Ok(None),
        };

        if trimmed.len() > MAX_KEY_LENGTH {
            return Err(AppError::InvalidArgument(format!(
                "idempotency key exceeds {} characters",
                MAX_KEY_LENGTH
            )));
        }

        Ok(Some(Self(trimmed.to_string())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IdempotencyKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Computes SHA-256 fingerprints over a canonical JSON encoding of a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestFingerprinter;

impl RequestFingerprinter {
    pub fn new() -> Self {
        Self
    }

    /// Returns the lowercase hex digest (64 characters) of the canonical request encoding.
    ///
    /// Fails with `InvalidArgument` when the request serializes to a zero value
    /// (`null`, `{}`, `[]` or an empty string).
    pub fn fingerprint<T: Serialize + ?Sized>(&self, request: &T) -> Result<String> {
        let value = serde_json::to_value(request)?;
        if is_zero_value(&value) {
            return Err(AppError::InvalidArgument(
                "request payload is empty".to_string(),
            ));
        }

        let canonical = canonicalize(value);
        let encoded = serde_json::to_vec(&canonical)?;

        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        Ok(hex::encode(hasher.finalize()))
    }
}

fn is_zero_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Rebuilds objects with keys in sorted order, whatever map ordering serde_json was built with.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut sorted = Map::new();
            for (key, nested) in entries {
                sorted.insert(key, canonicalize(nested));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_fingerprint_consistency() {
        let fingerprinter = RequestFingerprinter::new();
        let request = json!({"merchant_id": "m-1", "amount": "100.00", "currency": "USD"});

        let first = fingerprinter.fingerprint(&request).unwrap();
        let second = fingerprinter.fingerprint(&request).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_field_order_does_not_matter() {
        let fingerprinter = RequestFingerprinter::new();

        let mut forward = HashMap::new();
        forward.insert("amount", "100.00");
        forward.insert("currency", "USD");
        forward.insert("merchant_id", "m-1");

        let reordered = json!({"merchant_id": "m-1", "currency": "USD", "amount": "100.00"});

        assert_eq!(
            fingerprinter.fingerprint(&forward).unwrap(),
            fingerprinter.fingerprint(&reordered).unwrap()
        );
    }

    #[test]
    fn test_nested_objects_are_canonicalized() {
        let fingerprinter = RequestFingerprinter::new();
        let a = json!({"outer": {"b": 2, "a": 1}, "list": [{"y": 1, "x": 2}]});
        let b = json!({"list": [{"x": 2, "y": 1}], "outer": {"a": 1, "b": 2}});

        assert_eq!(
            fingerprinter.fingerprint(&a).unwrap(),
            fingerprinter.fingerprint(&b).unwrap()
        );
    }

    #[test]
    fn test_changed_value_changes_fingerprint() {
        let fingerprinter = RequestFingerprinter::new();
        let a = json!({"amount": "100.00", "currency": "USD"});
        let b = json!({"amount": "200.00", "currency": "USD"});

        assert_ne!(
            fingerprinter.fingerprint(&a).unwrap(),
            fingerprinter.fingerprint(&b).unwrap()
        );
    }

    #[test]
    fn test_zero_value_rejected() {
        let fingerprinter = RequestFingerprinter::new();
        for empty in [json!(null), json!({}), json!([]), json!("")] {
            assert!(matches!(
                fingerprinter.fingerprint(&empty),
                Err(AppError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_key_parse() {
        assert_eq!(IdempotencyKey::parse(None).unwrap(), None);
        assert_eq!(IdempotencyKey::parse(Some("")).unwrap(), None);
        assert_eq!(IdempotencyKey::parse(Some("  \t ")).unwrap(), None);

        let key = IdempotencyKey::parse(Some("  order-42 ")).unwrap().unwrap();
        assert_eq!(key.as_str(), "order-42");
        assert_eq!(key.to_string(), "order-42");
    }

    #[test]
    fn test_key_too_long() {
        let long = "k".repeat(MAX_KEY_LENGTH + 1);
        assert!(matches!(
            IdempotencyKey::parse(Some(&long)),
            Err(AppError::InvalidArgument(_))
        ));
    }
}
