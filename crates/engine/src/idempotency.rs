//! Idempotency keys for tool invocations.
//!
//! A key identifies one `(thread, call index, capability, input)` tuple.
//! Inputs are canonicalized before hashing: `serde_json`'s map keeps keys
//! sorted, so two inputs that differ only in key order hash the same.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// SHA-256 over the length-prefixed fields, hex encoded.
pub fn idempotency_key(thread_id: &str, step_index: u64, capability: &str, input: &Value) -> String {
    let canonical = canonicalize(input);
    let mut hasher = Sha256::new();
    for field in [thread_id.as_bytes(), capability.as_bytes(), canonical.as_bytes()] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field);
    }
    hasher.update(step_index.to_be_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize(input: &Value) -> String {
    serde_json::to_string(input).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_is_stable() {
        let a = idempotency_key("t1", 0, "math_solver", &json!({"expression": "1+1"}));
        let b = idempotency_key("t1", 0, "math_solver", &json!({"expression": "1+1"}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn key_ignores_field_order() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":{"y":2,"x":3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":{"x":3,"y":2},"a":1}"#).unwrap();
        assert_eq!(
            idempotency_key("t", 1, "cap", &a),
            idempotency_key("t", 1, "cap", &b)
        );
    }

    #[test]
    fn every_component_matters() {
        let input = json!({"q": "x"});
        let base = idempotency_key("t1", 0, "cap", &input);
        assert_ne!(base, idempotency_key("t2", 0, "cap", &input));
        assert_ne!(base, idempotency_key("t1", 1, "cap", &input));
        assert_ne!(base, idempotency_key("t1", 0, "other", &input));
        assert_ne!(base, idempotency_key("t1", 0, "cap", &json!({"q": "y"})));
    }

    #[test]
    fn field_boundaries_do_not_collide() {
        let input = json!(null);
        assert_ne!(
            idempotency_key("ab", 0, "c", &input),
            idempotency_key("a", 0, "bc", &input)
        );
    }
}
