//! Unified search coordinator and event-driven auto-save: the
//! result cache, the concurrency gate, rerank strategies, the coordinator
//! itself, and the `Database` facade that wires it to the partition manager.

pub mod cache;
pub mod coordinator;
pub mod database;
pub mod gate;
pub mod rerank;

pub use cache::{cache_key, vector_fingerprint, CacheKeyInputs, ResultCache};
pub use coordinator::{SearchCoordinator, SearchOptions};
pub use database::Database;
pub use gate::{ConcurrencyGate, GatePermit};
pub use rerank::RerankMethod;
