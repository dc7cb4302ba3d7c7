//! Default outgoing headers

/// User agent identifying this service to the sources it queries
pub fn user_agent() -> String {
    format!(
        "Mozilla/5.0 (compatible; rag-orchestrator/{}; +https://github.com/rag-orchestrator)",
        crate::VERSION
    )
}

/// Accept header for HTML pages
pub fn accept_html() -> &'static str {
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"
}

/// Accept header for JSON APIs
pub fn accept_json() -> &'static str {
    "application/json"
}
