//! Resumable cursors
//!
//! A cursor is URL-safe base64 (no padding) over a small JSON payload:
//!
//! ```text
//! { "v": 1, "qh": "<24 hex>", "skip": 50, "apiCursor": "...", "ts": 1700000000000 }
//! ```
//!
//! `qh` binds the cursor to the query that produced it: the first 24 hex
//! characters of SHA-256 over the query's canonical JSON, minus `cursor`.

use super::error::{QueryError, QueryResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Payload format version
pub const CURSOR_VERSION: u32 = 1;

const HASH_LEN: usize = 24;

/// Decoded cursor contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPayload {
    pub v: u32,
    /// Query hash
    pub qh: String,
    /// Records to drop after ordering
    pub skip: usize,
    /// Adapter cursor to resume FETCH from
    #[serde(rename = "apiCursor", default, skip_serializing_if = "Option::is_none")]
    pub api_cursor: Option<String>,
    /// Creation time, epoch milliseconds
    pub ts: i64,
}

impl CursorPayload {
    pub fn new(fingerprint: &str, skip: usize, api_cursor: Option<String>, now_ms: i64) -> Self {
        Self {
            v: CURSOR_VERSION,
            qh: fingerprint.to_string(),
            skip,
            api_cursor,
            ts: now_ms,
        }
    }

    pub fn encode(&self) -> String {
        // Serializing a plain struct of strings and integers cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> QueryResult<Self> {
        let invalid = || QueryError::validation("Invalid cursor format", "cursor");
        let bytes = URL_SAFE_NO_PAD.decode(token.trim()).map_err(|_| invalid())?;
        serde_json::from_slice(&bytes).map_err(|_| invalid())
    }
}

/// Fingerprint of a query document, ignoring its `cursor`
pub fn hash_query(query: &Value) -> String {
    let canonical = match query {
        Value::Object(object) => {
            let mut object = object.clone();
            object.remove("cursor");
            Value::Object(object)
        }
        other => other.clone(),
    };

    // serde_json maps are key-sorted, so this rendering is canonical
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    digest
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
        .chars()
        .take(HASH_LEN)
        .collect()
}

/// Decode a cursor and check it belongs to this query and has not expired
pub fn validate(token: &str, fingerprint: &str, now_ms: i64, ttl_secs: u64) -> QueryResult<CursorPayload> {
    let payload = CursorPayload::decode(token)?;

    if payload.v != CURSOR_VERSION {
        return Err(QueryError::validation(
            format!("Unsupported cursor version {}", payload.v),
            "cursor",
        ));
    }
    if payload.qh != fingerprint {
        return Err(QueryError::validation("Query does not match cursor", "cursor"));
    }
    let age_ms = now_ms.saturating_sub(payload.ts);
    if age_ms > (ttl_secs as i64).saturating_mul(1000) {
        return Err(QueryError::validation("Cursor expired", "cursor"));
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn message(result: QueryResult<CursorPayload>) -> String {
        match result {
            Err(QueryError::Validation { message, field }) => {
                assert_eq!(field.as_deref(), Some("cursor"));
                message
            }
            other => panic!("expected cursor validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_hash_is_stable_and_ignores_cursor() {
        let a = hash_query(&json!({"from": "persons", "limit": 10}));
        let b = hash_query(&json!({"limit": 10, "from": "persons", "cursor": "xyz"}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 24);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, hash_query(&json!({"from": "companies", "limit": 10})));
    }

    #[test]
    fn test_validate_accepts_fresh_cursor() {
        let payload = CursorPayload::new("abc", 50, Some("200".to_string()), NOW);
        let token = payload.encode();
        assert!(!token.contains('='));

        let decoded = validate(&token, "abc", NOW + 1_000, 3600).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_validate_rejections() {
        assert_eq!(message(validate("not base64!", "abc", NOW, 3600)), "Invalid cursor format");

        let other_query = CursorPayload::new("def", 0, None, NOW).encode();
        assert_eq!(
            message(validate(&other_query, "abc", NOW, 3600)),
            "Query does not match cursor"
        );

        let stale = CursorPayload::new("abc", 0, None, NOW).encode();
        assert_eq!(
            message(validate(&stale, "abc", NOW + 3_601_000, 3600)),
            "Cursor expired"
        );

        let mut future = CursorPayload::new("abc", 0, None, NOW);
        future.v = 2;
        assert_eq!(
            message(validate(&future.encode(), "abc", NOW, 3600)),
            "Unsupported cursor version 2"
        );
    }
}
