//! RFC 8785 (JSON Canonicalization Scheme) serialization.
//!
//! Every AP2 signature and hash is computed over the canonical form: object
//! keys sorted lexicographically at every depth, no insignificant whitespace,
//! and numbers restricted to integers that round-trip exactly. Input that
//! cannot be canonicalized deterministically is rejected rather than coerced,
//! so a pre-signature hash and a post-signature hash of the same mandate can
//! never drift apart.
//!
//! AP2 payloads carry money as digit strings and timestamps as either RFC 3339
//! strings or integer seconds, so the integer-only number profile loses
//! nothing. Strings are emitted as provided; callers are expected to supply
//! NFC-normalized text (all seeded catalog data is).

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum CanonicalizationError {
    /// A number that is not an exact integer within the JSON-safe range.
    #[error("non-canonical number: {0}")]
    NonCanonicalNumber(String),
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Serializes `value` to its RFC 8785 canonical byte form.
///
/// Relies on `serde_json`'s sorted `Map` representation (the `preserve_order`
/// feature must stay off workspace-wide) and compact output, after validating
/// that the tree contains no floating-point numbers.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalizationError> {
    let tree = serde_json::to_value(value)?;
    check_numbers(&tree)?;
    Ok(serde_json::to_string(&tree)?.into_bytes())
}

/// Like [`to_canonical_json`], over an already-parsed [`Value`].
pub fn value_to_canonical_json(tree: &Value) -> Result<Vec<u8>, CanonicalizationError> {
    check_numbers(tree)?;
    Ok(serde_json::to_string(tree)?.into_bytes())
}

fn check_numbers(value: &Value) -> Result<(), CanonicalizationError> {
    match value {
        Value::Number(n) => {
            if n.is_f64() {
                return Err(CanonicalizationError::NonCanonicalNumber(n.to_string()));
            }
            // i64/u64 always round-trip in shortest form.
            Ok(())
        }
        Value::Array(items) => items.iter().try_for_each(check_numbers),
        Value::Object(map) => map.values().try_for_each(check_numbers),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_sorted_at_every_depth() {
        let value = json!({"zeta": {"b": 1, "a": 2}, "alpha": [{"y": 1, "x": 2}]});
        let bytes = value_to_canonical_json(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"alpha":[{"x":2,"y":1}],"zeta":{"a":2,"b":1}}"#
        );
    }

    #[test]
    fn test_no_insignificant_whitespace() {
        let value = json!({"a": [1, 2, 3], "b": "x y"});
        let bytes = value_to_canonical_json(&value).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"a":[1,2,3],"b":"x y"}"#);
    }

    #[test]
    fn test_floats_rejected() {
        let value = json!({"amount": 93.5});
        assert!(matches!(
            value_to_canonical_json(&value),
            Err(CanonicalizationError::NonCanonicalNumber(_))
        ));
    }

    #[test]
    fn test_integers_accepted() {
        let value = json!({"iat": 1700000000_u64, "neg": -5});
        assert!(value_to_canonical_json(&value).is_ok());
    }

    #[test]
    fn test_canonical_roundtrip_fixed_point() {
        // P3: canonicalizing a reparsed canonical form is a no-op.
        let value = json!({"b": {"d": 4, "c": [true, null, "s"]}, "a": 1});
        let once = value_to_canonical_json(&value).unwrap();
        let reparsed: Value = serde_json::from_slice(&once).unwrap();
        let twice = value_to_canonical_json(&reparsed).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_non_ascii_passes_through() {
        let value = json!({"name": "麦商店"});
        let bytes = value_to_canonical_json(&value).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"name":"麦商店"}"#);
    }
}
