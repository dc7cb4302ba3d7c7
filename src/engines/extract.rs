//! HTML to plain text extraction for web augmentation results

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

static PARAGRAPH_SELECTOR: Lazy<Option<Selector>> =
    Lazy::new(|| Selector::parse("article p, main p, p, li").ok());
static BODY_SELECTOR: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("body").ok());
static WHITESPACE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\s+").ok());

/// Elements whose text never counts as content
const SKIPPED: &[&str] = &[
    "script", "style", "noscript", "nav", "footer", "header", "aside", "form", "template",
];

/// Extract readable text from an HTML page, truncated to `max_chars`.
///
/// Paragraph-like elements are preferred; when a page has none the whole
/// body is used. Text under navigation, scripts and similar chrome is dropped.
pub fn extract_text(html: &str, max_chars: usize) -> String {
    let document = Html::parse_document(html);

    let mut paragraphs = Vec::new();
    if let Some(selector) = PARAGRAPH_SELECTOR.as_ref() {
        for element in document.select(selector) {
            let text = normalize_whitespace(&visible_text(element));
            if text.len() > 1 && !paragraphs.contains(&text) {
                paragraphs.push(text);
            }
        }
    }

    let text = if paragraphs.is_empty() {
        BODY_SELECTOR
            .as_ref()
            .and_then(|selector| document.select(selector).next())
            .map(|body| normalize_whitespace(&visible_text(body)))
            .unwrap_or_default()
    } else {
        paragraphs.join(" ")
    };

    truncate_chars(&text, max_chars)
}

fn visible_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|e| SKIPPED.contains(&e.name()))
        });
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    out
}

pub fn normalize_whitespace(text: &str) -> String {
    match WHITESPACE.as_ref() {
        Some(re) => re.replace_all(text.trim(), " ").into_owned(),
        None => text.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}

/// Cut at `max_chars`, backing off to the last word boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => {
            let head = &text[..cut];
            let head = match head.rfind(' ') {
                Some(space) if space > cut / 2 => &head[..space],
                _ => head,
            };
            format!("{}...", head.trim_end())
        }
    }
}

/// Lower-cased query terms worth matching on
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| term.chars().count() >= 3)
        .map(str::to_lowercase)
    {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Up to `max` sentences that mention any of `terms`
pub fn highlights(text: &str, terms: &[String], max: usize) -> Vec<String> {
    text.split_inclusive(&['.', '!', '?'][..])
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
        .filter(|sentence| {
            let lower = sentence.to_lowercase();
            terms.iter().any(|term| lower.contains(term.as_str()))
        })
        .take(max)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html>
          <head><style>p { color: red; }</style></head>
          <body>
            <nav><p>Home | About</p></nav>
            <article>
              <p>The Honda CBR600RR is a 599 cc sport bike.</p>
              <p>Its top speed is about 250 km/h.</p>
            </article>
            <script>var tracking = true;</script>
            <footer><p>Copyright</p></footer>
          </body>
        </html>"#;

    #[test]
    fn test_extracts_paragraphs_without_chrome() {
        let text = extract_text(PAGE, 2000);
        assert!(text.contains("599 cc sport bike"));
        assert!(text.contains("250 km/h"));
        assert!(!text.contains("Home | About"));
        assert!(!text.contains("Copyright"));
        assert!(!text.contains("tracking"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn test_falls_back_to_body_text() {
        let text = extract_text("<html><body><div>Plain  text\n here</div></body></html>", 100);
        assert_eq!(text, "Plain text here");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "héllo wörld and more words";
        let cut = truncate_chars(text, 12);
        assert!(cut.ends_with("..."));
        assert!(cut.starts_with("héllo"));
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn test_highlights() {
        let terms = query_terms("CBR600RR top speed");
        assert_eq!(terms, vec!["cbr600rr", "top", "speed"]);
        let found = highlights(
            "It is red. Its top speed is 250 km/h. It weighs 186 kg.",
            &terms,
            3,
        );
        assert_eq!(found, vec!["Its top speed is 250 km/h."]);
    }
}
