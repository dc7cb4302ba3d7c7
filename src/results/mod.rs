//! Result types and container for search results
//!
//! Defines the result model shared by every backend and the merge logic the
//! orchestrator applies across sub-queries.

mod container;
mod types;

pub use container::{deduplicate, sort_by_relevance, ResultContainer};
pub use types::*;
