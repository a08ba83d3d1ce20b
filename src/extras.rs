//! Validation of the provider-extras map with security guardrails.
//!
//! Extras pass straight through to the provider wire request, so secret-like
//! keys are blocked outright and size is capped. A violation fails the whole
//! suite before any trial starts.

use serde_json::{Map, Value};

use crate::error::SalvoError;

/// Keys blocked from extras, matched case-insensitively.
const BLOCKED_KEYS: &[&str] = &[
    "api_key",
    "api_secret",
    "secret",
    "secret_key",
    "token",
    "access_token",
    "refresh_token",
    "password",
    "authorization",
    "bearer",
];

const MAX_EXTRAS_KEYS: usize = 10;
const MAX_EXTRAS_BYTES: usize = 4096;

pub fn validate_extras(extras: &Map<String, Value>) -> Result<(), SalvoError> {
    for key in extras.keys() {
        let lowered = key.to_ascii_lowercase();
        if BLOCKED_KEYS.contains(&lowered.as_str()) {
            return Err(SalvoError::ExtrasRejected(format!(
                "key '{key}' looks like a secret or credential; configure secrets \
                 via environment variables, not scenario extras"
            )));
        }
    }

    if extras.len() > MAX_EXTRAS_KEYS {
        return Err(SalvoError::ExtrasRejected(format!(
            "{} keys exceeds the limit of {MAX_EXTRAS_KEYS}",
            extras.len()
        )));
    }

    let serialized = serde_json::to_vec(extras)?;
    if serialized.len() > MAX_EXTRAS_BYTES {
        return Err(SalvoError::ExtrasRejected(format!(
            "serialized size {} bytes exceeds the limit of {MAX_EXTRAS_BYTES} bytes",
            serialized.len()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map_of(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn clean_extras_pass() {
        let extras = map_of(&[("top_p", json!(0.9)), ("logprobs", json!(true))]);
        assert!(validate_extras(&extras).is_ok());
    }

    #[test]
    fn secret_key_is_blocked_case_insensitively() {
        let extras = map_of(&[("API_KEY", json!("sk-nope"))]);
        let err = validate_extras(&extras).unwrap_err();
        assert!(matches!(err, SalvoError::ExtrasRejected(_)));
    }

    #[test]
    fn too_many_keys_rejected() {
        let extras: Map<String, Value> = (0..11)
            .map(|i| (format!("key_{i}"), json!(i)))
            .collect();
        assert!(validate_extras(&extras).is_err());
    }

    #[test]
    fn oversized_extras_rejected() {
        let extras = map_of(&[("blob", json!("x".repeat(5000)))]);
        assert!(validate_extras(&extras).is_err());
    }
}
