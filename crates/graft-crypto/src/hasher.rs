use graft_types::ContentHash;
use serde_json::{Map, Value as JsonValue};

/// Domain-separated BLAKE3 content hasher.
///
/// The domain tag is prepended to every computation so that fragments and
/// any other content hashed by the workspace can never collide.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for stored graph fragments.
    pub const FRAGMENT: Self = Self {
        domain: "graft-fragment-v1",
    };

    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> ContentHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        ContentHash::from_hash(*hasher.finalize().as_bytes())
    }

    /// Hash a fragment body over its canonical bytes.
    pub fn hash_fragment(&self, body: &Map<String, JsonValue>) -> Result<ContentHash, HasherError> {
        Ok(self.hash(&canonical_bytes(body)?))
    }

    /// Hash a serializable value as compact JSON.
    pub fn hash_json<T: serde::Serialize>(&self, value: &T) -> Result<ContentHash, HasherError> {
        let data =
            serde_json::to_vec(value).map_err(|e| HasherError::Serialization(e.to_string()))?;
        Ok(self.hash(&data))
    }

    /// Verify that data produces the expected hash.
    pub fn verify(&self, data: &[u8], expected: &ContentHash) -> bool {
        self.hash(data) == *expected
    }

    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Canonical bytes of a fragment body.
///
/// Top-level `id` and `__`-prefixed members are excluded; everything else is
/// written as compact JSON in insertion order.
pub fn canonical_bytes(body: &Map<String, JsonValue>) -> Result<Vec<u8>, HasherError> {
    let canonical: Map<String, JsonValue> = body
        .iter()
        .filter(|(k, _)| k.as_str() != "id" && !k.starts_with("__"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    serde_json::to_vec(&canonical).map_err(|e| HasherError::Serialization(e.to_string()))
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),
}
