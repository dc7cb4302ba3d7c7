//! HTTP networking module
//!
//! Provides the HTTP client used by the language model, the index backend and
//! the web augmentation sources.

mod client;
mod headers;
mod request;

pub use client::HttpClient;
pub use headers::user_agent;
pub use request::{HttpMethod, HttpRequest, HttpResponse};
