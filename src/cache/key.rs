//! Deterministic cache key derivation

use crate::results::BackendKind;
use crate::search::SearchOptions;
use sha2::{Digest, Sha256};

/// Lower-case, trim and collapse internal whitespace
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fingerprint of (query, options, backend).
///
/// Only options that change the result set take part; `enable_caching` does
/// not. Filters are a `BTreeMap`, so their order never affects the key. The
/// backend is kept as a readable prefix so keys can be invalidated per backend.
pub fn generate_key(query: &str, options: &SearchOptions, backend: BackendKind) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_query(query).as_bytes());
    hasher.update([0u8]);
    hasher.update(options.max_results.to_le_bytes());
    hasher.update(format!("{:.6}", options.min_relevance_score).as_bytes());
    hasher.update([options.include_metadata as u8]);
    for (name, value) in &options.filters {
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
        hasher.update([b'=']);
        hasher.update(value.to_string().as_bytes());
    }

    format!("{}:{:x}", backend.as_str(), hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ignores_case_and_whitespace() {
        let options = SearchOptions::default();
        let a = generate_key("Honda CBR600RR top speed", &options, BackendKind::Index);
        let b = generate_key("  honda   cbr600rr TOP speed\n", &options, BackendKind::Index);
        assert_eq!(a, b);
        assert_eq!(a, generate_key("Honda CBR600RR top speed", &options, BackendKind::Index));
    }

    #[test]
    fn test_key_depends_on_backend_and_options() {
        let options = SearchOptions::default();
        let index = generate_key("q", &options, BackendKind::Index);
        let web = generate_key("q", &options, BackendKind::WebAugmentation);
        assert_ne!(index, web);
        assert!(index.starts_with("index:"));
        assert!(web.starts_with("web_augmentation:"));

        let capped = generate_key("q", &options.clone().with_max_results(3), BackendKind::Index);
        assert_ne!(index, capped);

        let uncached = generate_key("q", &options.clone().with_caching(false), BackendKind::Index);
        assert_eq!(index, uncached);
    }

    #[test]
    fn test_filter_order_is_irrelevant() {
        let a = SearchOptions::default()
            .with_filter("make", "honda")
            .with_filter("year", 2021);
        let b = SearchOptions::default()
            .with_filter("year", 2021)
            .with_filter("make", "honda");
        assert_eq!(
            generate_key("q", &a, BackendKind::Index),
            generate_key("q", &b, BackendKind::Index)
        );
    }
}
