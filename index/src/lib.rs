//! HNSW graph index. Soft-delete via tombstones, per-dimension entry
//! points, and dimension-aware neighbor rejection so one index can serve a
//! partition whose vectors don't all share a dimension.
//!
//! The index holds no reference to its owning vector store, avoiding a
//! cyclic dependency: every operation that needs to read a vector or its
//! metadata takes a [`VectorSource`] argument instead of storing a handle.

mod hnsw;

pub use hnsw::{HnswIndex, SearchOptions};

use nbase_common::{Metadata, VectorId};

/// Non-owning lookup back into the partition's vector store. Implemented by
/// whatever owns the backing data (typically the clustered store wrapping
/// this index's partition).
pub trait VectorSource: Send + Sync {
    fn get_vector(&self, id: &VectorId) -> Option<Vec<f32>>;

    fn get_metadata(&self, _id: &VectorId) -> Option<Metadata> {
        None
    }
}

/// A `VectorSource` with no metadata, for pure-geometry tests and
/// build-from-scratch helpers that don't need it.
pub struct VectorOnlySource<'a>(pub &'a dyn Fn(&VectorId) -> Option<Vec<f32>>);

impl<'a> VectorSource for VectorOnlySource<'a> {
    fn get_vector(&self, id: &VectorId) -> Option<Vec<f32>> {
        (self.0)(id)
    }
}
