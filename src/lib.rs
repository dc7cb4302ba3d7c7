//! RAG Orchestrator: resilient query orchestration over retrieval backends
//!
//! A question is planned into focused sub-queries, dispatched to a hybrid
//! document index and a public-web augmenter, and merged into one ranked
//! answer. Every remote call runs under per-dependency retry and circuit
//! breaking, and results are cached per sub-query and backend.

pub mod cache;
pub mod config;
pub mod context;
pub mod engines;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod network;
pub mod resilience;
pub mod results;
pub mod search;
pub mod web;

pub use config::Settings;
pub use context::{CorrelationId, RequestContext};
pub use engines::SearchCapability;
pub use error::{Error, Result};
pub use results::{ResultContainer, SearchResult};
pub use search::{Orchestrator, Query, SearchOptions, SearchResponse};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
