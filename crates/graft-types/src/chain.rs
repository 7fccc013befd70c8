use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;

/// Name of the implicit base of every chain.
pub const BASE_TYPE: &str = "Base";

/// Ordered type discriminator, most-derived segment first.
///
/// Serialized as the colon-joined form, e.g. `"Objects.Wall:Objects.Element"`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TypeChain {
    segments: Vec<String>,
}

impl TypeChain {
    /// Parse a colon-delimited discriminator. Empty segments are rejected.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        if s.is_empty() {
            return Err(TypeError::InvalidTypeChain(s.to_string()));
        }
        let segments: Vec<String> = s.split(':').map(str::to_string).collect();
        if segments.iter().any(|seg| seg.trim().is_empty()) {
            return Err(TypeError::InvalidTypeChain(s.to_string()));
        }
        Ok(Self { segments })
    }

    /// Read a discriminator that came out of storage.
    ///
    /// Never fails: blank segments are dropped, and a discriminator with no
    /// segments left becomes `Base`.
    pub fn from_stored(s: &str) -> Self {
        let segments: Vec<String> = s
            .split(':')
            .filter(|seg| !seg.trim().is_empty())
            .map(str::to_string)
            .collect();
        if segments.is_empty() {
            Self::base()
        } else {
            Self { segments }
        }
    }

    /// A chain with a single segment.
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            segments: vec![name.into()],
        }
    }

    /// The chain of an untyped node.
    pub fn base() -> Self {
        Self::single(BASE_TYPE)
    }

    /// Build from segments ordered most-derived first.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, TypeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty() || s.contains(':')) {
            return Err(TypeError::InvalidTypeChain(segments.join(":")));
        }
        Ok(Self { segments })
    }

    pub fn most_derived(&self) -> &str {
        &self.segments[0]
    }

    /// Segments in resolution order (most-derived first).
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_base(&self) -> bool {
        self.segments.len() == 1 && self.segments[0] == BASE_TYPE
    }

    pub fn as_discriminator(&self) -> String {
        self.segments.join(":")
    }
}

impl Default for TypeChain {
    fn default() -> Self {
        Self::base()
    }
}

impl fmt::Debug for TypeChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeChain({})", self.as_discriminator())
    }
}

impl fmt::Display for TypeChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_discriminator())
    }
}

impl Serialize for TypeChain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_discriminator())
    }
}

impl<'de> Deserialize<'de> for TypeChain {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
