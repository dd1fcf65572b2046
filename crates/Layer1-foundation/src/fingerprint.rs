//! Fingerprints for cacheable units of work
//!
//! A [`Fingerprint`] is the blake3 digest of
//! `(unit identity, content digest, computation version, config digest)`.
//! It depends only on those bytes, so it is stable across process restarts.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Domain tag mixed into every fingerprint
const FINGERPRINT_DOMAIN: &[u8] = b"enrich.fingerprint.v1";

/// Opaque, fixed-length identifier of a cacheable computation
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Wrap raw digest bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex (64 chars)
    pub fn to_hex(&self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }

    /// Parse from 64 hex chars
    pub fn from_hex(hex: &str) -> Result<Self> {
        blake3::Hash::from_hex(hex)
            .map(|h| Self(*h.as_bytes()))
            .map_err(|e| Error::InvalidInput(format!("bad fingerprint hex: {}", e)))
    }

    /// First 12 hex chars, for logs
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// FingerprintBuilder
// ============================================================================

/// Builds fingerprints from the four identifying components
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintBuilder;

impl FingerprintBuilder {
    /// Deterministically derive a fingerprint.
    ///
    /// `config_digest` may be empty (default configuration); every other
    /// component must be non-empty. No component may contain control
    /// characters.
    pub fn build(
        unit_identity: &str,
        content_digest: &str,
        computation_version: &str,
        config_digest: &str,
    ) -> Result<Fingerprint> {
        require_non_empty("unit identity", unit_identity)?;
        require_non_empty("content digest", content_digest)?;
        require_non_empty("computation version", computation_version)?;
        reject_control_chars("unit identity", unit_identity)?;
        reject_control_chars("content digest", content_digest)?;
        reject_control_chars("computation version", computation_version)?;
        reject_control_chars("config digest", config_digest)?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(FINGERPRINT_DOMAIN);
        for part in [
            unit_identity,
            content_digest,
            computation_version,
            config_digest,
        ] {
            // Length prefix keeps field boundaries fixed
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }

        Ok(Fingerprint(*hasher.finalize().as_bytes()))
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn reject_control_chars(field: &str, value: &str) -> Result<()> {
    if value.chars().any(char::is_control) {
        return Err(Error::InvalidInput(format!(
            "{} contains control characters",
            field
        )));
    }
    Ok(())
}

// ============================================================================
// Digest helpers
// ============================================================================

/// Hex digest of raw content
pub fn content_digest(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

/// Ordered digest over a sequence of part digests
///
/// `["a", "b"]` and `["b", "a"]` produce different digests.
pub fn digest_parts<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = blake3::Hasher::new();
    let mut count = 0u64;
    for part in parts {
        let part = part.as_ref();
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
        count += 1;
    }
    hasher.update(&count.to_le_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Digest of a JSON configuration
///
/// Object keys are sorted first so key order never changes the digest.
pub fn config_digest(value: &serde_json::Value) -> String {
    let mut hasher = blake3::Hasher::new();
    hash_json_value(value, &mut hasher);
    hasher.finalize().to_hex().to_string()
}

fn hash_json_value(value: &serde_json::Value, hasher: &mut blake3::Hasher) {
    use serde_json::Value;

    match value {
        Value::Null => {
            hasher.update(&[0]);
        }
        Value::Bool(b) => {
            hasher.update(&[1, *b as u8]);
        }
        Value::Number(n) => {
            hasher.update(&[2]);
            let s = n.to_string();
            hasher.update(&(s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        Value::String(s) => {
            hasher.update(&[3]);
            hasher.update(&(s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        Value::Array(arr) => {
            hasher.update(&[4]);
            hasher.update(&(arr.len() as u64).to_le_bytes());
            for item in arr {
                hash_json_value(item, hasher);
            }
        }
        Value::Object(obj) => {
            hasher.update(&[5]);
            hasher.update(&(obj.len() as u64).to_le_bytes());
            let mut keys: Vec<_> = obj.keys().collect();
            keys.sort();
            for key in keys {
                hasher.update(&(key.len() as u64).to_le_bytes());
                hasher.update(key.as_bytes());
                if let Some(v) = obj.get(key) {
                    hash_json_value(v, hasher);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_is_deterministic() {
        let a = FingerprintBuilder::build("session-1", "abc", "v1", "cfg").unwrap();
        let b = FingerprintBuilder::build("session-1", "abc", "v1", "cfg").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hex_and_short_forms() {
        let fp = FingerprintBuilder::build("u", "d", "v", "").unwrap();
        assert_eq!(fp.to_hex().len(), 64);
        assert_eq!(fp.short().len(), 12);
        assert!(fp.to_hex().starts_with(&fp.short()));
    }

    #[test]
    fn test_any_field_changes_fingerprint() {
        let base = FingerprintBuilder::build("u1", "d1", "v1", "c1").unwrap();
        assert_ne!(base, FingerprintBuilder::build("u2", "d1", "v1", "c1").unwrap());
        assert_ne!(base, FingerprintBuilder::build("u1", "d2", "v1", "c1").unwrap());
        assert_ne!(base, FingerprintBuilder::build("u1", "d1", "v2", "c1").unwrap());
        assert_ne!(base, FingerprintBuilder::build("u1", "d1", "v1", "c2").unwrap());
    }

    #[test]
    fn test_field_boundaries_do_not_shift() {
        let a = FingerprintBuilder::build("ab", "c", "v", "").unwrap();
        let b = FingerprintBuilder::build("a", "bc", "v", "").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_input_rejected() {
        assert!(matches!(
            FingerprintBuilder::build("", "d", "v", ""),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            FingerprintBuilder::build("u", "  ", "v", ""),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            FingerprintBuilder::build("u", "d", "", ""),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            FingerprintBuilder::build("u\n", "d", "v", ""),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            FingerprintBuilder::build("u", "d", "v", "c\0"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_hex_roundtrip() {
        let fp = FingerprintBuilder::build("u", "d", "v", "c").unwrap();
        assert_eq!(Fingerprint::from_hex(&fp.to_hex()).unwrap(), fp);
        assert!(Fingerprint::from_hex("not-hex").is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let fp = FingerprintBuilder::build("u", "d", "v", "c").unwrap();
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", fp.to_hex()));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }

    #[test]
    fn test_config_digest_order_independent() {
        let a = json!({"model": "vision-2", "detail": "high"});
        let b = json!({"detail": "high", "model": "vision-2"});
        assert_eq!(config_digest(&a), config_digest(&b));
        assert_ne!(config_digest(&a), config_digest(&json!({"model": "vision-3"})));
    }

    #[test]
    fn test_digest_parts_is_ordered() {
        assert_eq!(digest_parts(["a", "b"]), digest_parts(vec!["a", "b"]));
        assert_ne!(digest_parts(["a", "b"]), digest_parts(["b", "a"]));
        assert_ne!(digest_parts(["ab"]), digest_parts(["a", "b"]));
    }

    #[test]
    fn test_content_digest() {
        assert_eq!(content_digest(b"frame"), content_digest(b"frame"));
        assert_ne!(content_digest(b"frame-1"), content_digest(b"frame-2"));
    }
}
