use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Either a caller-supplied opaque token or a partition-assigned integer.
///
/// Unique within a partition; the system does not guarantee global
/// uniqueness across partitions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VectorId {
    Int(u64),
    Str(String),
}

impl VectorId {
    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            VectorId::Int(n) => n.to_le_bytes().to_vec(),
            VectorId::Str(s) => s.as_bytes().to_vec(),
        }
    }
}

impl fmt::Display for VectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorId::Int(n) => write!(f, "{n}"),
            VectorId::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for VectorId {
    fn from(n: u64) -> Self {
        VectorId::Int(n)
    }
}

impl From<String> for VectorId {
    fn from(s: String) -> Self {
        VectorId::Str(s)
    }
}

impl From<&str> for VectorId {
    fn from(s: &str) -> Self {
        VectorId::Str(s.to_string())
    }
}

/// Untyped scalar/array/nested-object metadata attached to a vector.
pub type Metadata = HashMap<String, serde_json::Value>;

/// The two distance metrics supported by the core.
///
/// Other metrics (dot product, Manhattan) are not part of the core index
/// path and are deliberately omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Euclidean,
    Cosine,
}

impl Default for DistanceMetric {
    fn default() -> Self {
        DistanceMetric::Euclidean
    }
}

/// A dense vector together with its id and optional metadata, as handed
/// across component boundaries (the vector store itself keys on id and
/// stores data/metadata separately — see `nbase_vectorstore::VectorStore`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: VectorId,
    pub data: Vec<f32>,
    pub metadata: Option<Metadata>,
}

/// A single scored neighbor returned from a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredId {
    pub id: VectorId,
    pub distance: f32,
    pub metadata: Option<Metadata>,
}

/// A user-supplied predicate over (id, metadata), used to filter candidate
/// results during clustered and HNSW search.
///
/// A full request-filtering DSL is an external collaborator concern and is
/// out of scope here; the core only needs a boolean predicate to compose
/// with its own tombstone filter.
pub type Filter<'a> = dyn Fn(&VectorId, Option<&Metadata>) -> bool + Send + Sync + 'a;
