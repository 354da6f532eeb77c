pub mod config;
pub mod distance;
pub mod error;
pub mod events;
pub mod types;

pub use error::{NbaseError, Result};
pub use events::{Event, EventBus};
pub use types::*;
