//! Search orchestration module
//!
//! Plans a query into sub-queries, dispatches them to the registered
//! capabilities and merges the answers into one ranked list.

mod models;
mod orchestrator;
mod planner;

pub use models::*;
pub use orchestrator::{Orchestrator, SearchResponse, SearchStatus};
pub use planner::QueryPlanner;
