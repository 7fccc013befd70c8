//! Fragment envelope: the reserved keys, reference and chunk bodies, and the
//! closure table carried by root fragments.

use std::collections::BTreeMap;
use std::fmt;

use graft_types::ContentHash;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{DecomposeError, FragmentError};

pub const TYPE_KEY: &str = "_type";
pub const ID_KEY: &str = "id";
pub const REFERENCE_TYPE: &str = "reference";
pub const REFERENCE_ID_KEY: &str = "referencedId";
pub const CHUNK_TYPE: &str = "chunk";
pub const CHUNK_DATA_KEY: &str = "data";
pub const CLOSURE_KEY: &str = "__closure";
pub const FORMAT_KEY: &str = "__format";

/// Serialization format of a stored graph.
///
/// `V1` roots carry at most a depth-only closure and are composed by walking
/// references on demand. `V2` roots carry full ancestor paths, which lets the
/// composer prefetch every descendant deepest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatVersion {
    V1,
    V2,
}

impl FormatVersion {
    pub const CURRENT: Self = Self::V2;

    pub fn as_u64(self) -> u64 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    /// Detect the format of a root fragment. Anything without a `__format`
    /// of 2 or more is treated as `V1`.
    pub fn of(body: &Map<String, JsonValue>) -> Self {
        match body.get(FORMAT_KEY).and_then(JsonValue::as_u64) {
            Some(n) if n >= 2 => Self::V2,
            _ => Self::V1,
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_u64())
    }
}

/// Where a descendant sits below the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClosureEntry {
    /// Dot-separated hashes from the root down to the direct parent.
    Path(String),
    /// Depth only, as written by older producers.
    Depth(u64),
}

impl ClosureEntry {
    /// Distance from the root; direct children are at depth 1.
    pub fn depth(&self) -> u64 {
        match self {
            Self::Path(path) => path.split('.').count() as u64,
            Self::Depth(depth) => *depth,
        }
    }

    fn to_json(&self) -> JsonValue {
        match self {
            Self::Path(path) => JsonValue::String(path.clone()),
            Self::Depth(depth) => JsonValue::from(*depth),
        }
    }
}

/// Every fragment transitively referenced by a root, keyed by hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosureTable {
    entries: BTreeMap<ContentHash, ClosureEntry>,
}

impl ClosureTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry unless the hash is already present. Returns whether
    /// the entry was added.
    pub fn insert(&mut self, hash: ContentHash, entry: ClosureEntry) -> bool {
        match self.entries.entry(hash) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    pub fn get(&self, hash: &ContentHash) -> Option<&ClosureEntry> {
        self.entries.get(hash)
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ContentHash, &ClosureEntry)> {
        self.entries.iter()
    }

    pub fn hashes(&self) -> Vec<ContentHash> {
        self.entries.keys().copied().collect()
    }

    /// Hashes ordered deepest first. Ties break on the hash.
    pub fn deepest_first(&self) -> Vec<ContentHash> {
        let mut ordered: Vec<(u64, ContentHash)> =
            self.entries.iter().map(|(h, e)| (e.depth(), *h)).collect();
        ordered.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        ordered.into_iter().map(|(_, h)| h).collect()
    }

    pub fn to_json(&self) -> JsonValue {
        let map: Map<String, JsonValue> = self
            .entries
            .iter()
            .map(|(hash, entry)| (hash.to_hex(), entry.to_json()))
            .collect();
        JsonValue::Object(map)
    }

    /// Parse the `__closure` value of a root. Accepts path strings and
    /// integer depths.
    pub fn from_json(value: &JsonValue) -> Result<Self, String> {
        let object = value
            .as_object()
            .ok_or_else(|| "closure is not an object".to_string())?;
        let mut table = Self::new();
        for (key, entry) in object {
            let hash = ContentHash::from_hex(key).map_err(|e| format!("closure key {key}: {e}"))?;
            let entry = match entry {
                JsonValue::String(path) => ClosureEntry::Path(path.clone()),
                JsonValue::Number(n) => ClosureEntry::Depth(n.as_u64().ok_or_else(|| {
                    format!("closure depth of {key} is not a positive integer")
                })?),
                _ => return Err(format!("closure entry {key} is neither a path nor a depth")),
            };
            table.insert(hash, entry);
        }
        Ok(table)
    }

    /// The closure of a stored root fragment. A root without a closure has
    /// no descendants.
    pub fn of_fragment(hash: &ContentHash, bytes: &[u8]) -> Result<Self, FragmentError> {
        let body = parse_fragment(hash, bytes)?;
        match body.get(CLOSURE_KEY) {
            Some(value) => Self::from_json(value)
                .map_err(|reason| FragmentError::malformed(*hash, CLOSURE_KEY, reason)),
            None => Ok(Self::new()),
        }
    }
}

/// Decode stored bytes into a fragment object.
pub fn parse_fragment(
    hash: &ContentHash,
    bytes: &[u8],
) -> Result<Map<String, JsonValue>, FragmentError> {
    match serde_json::from_slice::<JsonValue>(bytes) {
        Ok(JsonValue::Object(body)) => Ok(body),
        Ok(_) => Err(FragmentError::malformed(*hash, "$", "fragment is not a JSON object")),
        Err(e) => Err(FragmentError::malformed(*hash, "$", e.to_string())),
    }
}

/// The `_type` of an object, if it has a string one.
pub fn discriminator(object: &Map<String, JsonValue>) -> Option<&str> {
    object.get(TYPE_KEY).and_then(JsonValue::as_str)
}

/// `{"_type": "reference", "referencedId": hash}`.
pub fn reference(hash: &ContentHash) -> JsonValue {
    let mut body = Map::new();
    body.insert(TYPE_KEY.into(), JsonValue::from(REFERENCE_TYPE));
    body.insert(REFERENCE_ID_KEY.into(), JsonValue::from(hash.to_hex()));
    JsonValue::Object(body)
}

/// If `value` is a reference object, its target. `Some(Err)` when the
/// object claims to be a reference but has no valid target.
pub fn reference_target(value: &JsonValue) -> Option<Result<ContentHash, String>> {
    let object = value.as_object()?;
    if discriminator(object) != Some(REFERENCE_TYPE) {
        return None;
    }
    Some(
        object
            .get(REFERENCE_ID_KEY)
            .and_then(JsonValue::as_str)
            .ok_or_else(|| format!("reference without {REFERENCE_ID_KEY}"))
            .and_then(|hex| ContentHash::from_hex(hex).map_err(|e| e.to_string())),
    )
}

/// `{"_type": "chunk", "data": [...]}`.
pub fn chunk(data: Vec<JsonValue>) -> Map<String, JsonValue> {
    let mut body = Map::new();
    body.insert(TYPE_KEY.into(), JsonValue::from(CHUNK_TYPE));
    body.insert(CHUNK_DATA_KEY.into(), JsonValue::Array(data));
    body
}

/// Bytes written to a transport: the hashed body plus `id`, and for a root
/// the closure and format markers. `_type` and `id` lead.
pub fn stored_bytes(
    body: &Map<String, JsonValue>,
    hash: &ContentHash,
    closure: Option<&ClosureTable>,
) -> Result<Vec<u8>, DecomposeError> {
    let mut stored = Map::new();
    if let Some(type_value) = body.get(TYPE_KEY) {
        stored.insert(TYPE_KEY.into(), type_value.clone());
    }
    stored.insert(ID_KEY.into(), JsonValue::from(hash.to_hex()));
    for (key, value) in body {
        if key != TYPE_KEY && key != ID_KEY {
            stored.insert(key.clone(), value.clone());
        }
    }
    if let Some(closure) = closure {
        stored.insert(CLOSURE_KEY.into(), closure.to_json());
        stored.insert(FORMAT_KEY.into(), JsonValue::from(FormatVersion::CURRENT.as_u64()));
    }
    serde_json::to_vec(&stored).map_err(|e| DecomposeError::invalid(e.to_string()))
}
