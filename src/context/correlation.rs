//! Correlation identifiers

use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Longest inbound id accepted verbatim
const MAX_INBOUND_LEN: usize = 128;

/// Opaque identifier shared by every operation of one logical request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Generate a new random id.
    ///
    /// Falls back to a timestamp plus a pseudo-random suffix when the OS
    /// entropy source is unavailable, so a request is never left uncorrelated.
    pub fn new() -> Self {
        let mut bytes = [0u8; 16];
        match OsRng.try_fill_bytes(&mut bytes) {
            Ok(()) => {
                let id = uuid::Builder::from_random_bytes(bytes).into_uuid();
                Self(Arc::from(id.to_string()))
            }
            Err(_) => Self::synthesize(),
        }
    }

    /// Timestamp-based id
    pub fn synthesize() -> Self {
        let suffix: u32 = rand::thread_rng().gen();
        Self(Arc::from(format!(
            "{}-{:08x}",
            chrono::Utc::now().format("%Y%m%d%H%M%S%3f"),
            suffix
        )))
    }

    /// Accept an inbound id if it is usable, otherwise create a new one
    pub fn get_or_create(existing: Option<&str>) -> Self {
        match existing.map(str::trim) {
            Some(id) if Self::is_acceptable(id) => Self(Arc::from(id)),
            _ => Self::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_acceptable(id: &str) -> bool {
        !id.is_empty()
            && id.len() <= MAX_INBOUND_LEN
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = CorrelationId::new();
        let b = CorrelationId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_inbound_id_is_reused() {
        let id = CorrelationId::get_or_create(Some("  abc-123  "));
        assert_eq!(id.as_str(), "abc-123");
    }

    #[test]
    fn test_unusable_inbound_id_is_replaced() {
        assert_ne!(CorrelationId::get_or_create(Some("")).as_str(), "");
        let injected = CorrelationId::get_or_create(Some("bad id\nwith newline"));
        assert!(!injected.as_str().contains('\n'));
        let long = "a".repeat(500);
        assert_ne!(CorrelationId::get_or_create(Some(&long)).as_str(), long);
    }

    #[test]
    fn test_synthesized_id_shape() {
        let id = CorrelationId::synthesize();
        assert!(id.as_str().contains('-'));
        assert!(id.as_str().len() > 17);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = CorrelationId::get_or_create(Some("req-42"));
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""req-42""#);
        let back: CorrelationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
