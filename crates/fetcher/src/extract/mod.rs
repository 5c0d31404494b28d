use std::collections::{HashMap, HashSet};

use scraper::{Html, Selector};
use url::Url;

mod article;
mod structural;

pub use article::ArticleExtractor;
pub use structural::StructuralExtractor;

/// Output of one extraction strategy.
#[derive(Clone, Debug, Default)]
pub struct Extraction {
    /// Page title, collapsed to a single line.
    pub title: Option<String>,
    /// Block-level contents joined with single line breaks.
    pub text: String,
    /// Absolute outbound links, deduplicated in encounter order.
    pub links: Vec<String>,
    /// author / date / sitename / language when the page exposes them.
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("no extractable content")]
    NoContent,
}

/// One extraction strategy. The fetcher tries strategies in order and takes
/// the first that yields text.
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, html: &str, base_url: &Url) -> Result<Extraction, ExtractError>;
}

/// Default strategy order: article-style first, structural fallback.
pub fn default_extractors() -> Vec<Box<dyn Extractor>> {
    vec![
        Box::new(ArticleExtractor),
        Box::new(StructuralExtractor),
    ]
}

/// Absolute http(s) anchor targets, fragment-stripped, deduplicated in
/// encounter order.
pub(crate) fn absolute_links(document: &Html, base_url: &Url) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
        {
            continue;
        }

        let Ok(mut resolved) = base_url.join(href) else {
            continue;
        };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        resolved.set_fragment(None);

        let link = resolved.to_string();
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }

    links
}

/// Collapse runs of whitespace (including newlines) into single spaces.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut previous_was_space = false;
    for character in text.chars() {
        if character.is_whitespace() {
            if !previous_was_space {
                result.push(' ');
                previous_was_space = true;
            }
        } else {
            result.push(character);
            previous_was_space = false;
        }
    }
    result.trim().to_string()
}

/// `<title>` contents as a single line, when present and non-empty.
pub(crate) fn document_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let title = document.select(&selector).next()?;
    let collapsed = collapse_whitespace(&title.text().collect::<String>());
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_links_dedup_in_encounter_order() {
        let html = Html::parse_document(
            r##"<html><body>
                <a href="/a">first</a>
                <a href="https://other.test/x">second</a>
                <a href="/a">duplicate</a>
                <a href="#section">fragment only</a>
                <a href="mailto:x@y.test">mail</a>
                <a href="/b#frag">fragment stripped</a>
            </body></html>"##,
        );
        let base = Url::parse("https://example.com/page").unwrap();

        let links = absolute_links(&html, &base);
        assert_eq!(
            links,
            vec![
                "https://example.com/a",
                "https://other.test/x",
                "https://example.com/b"
            ]
        );
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("hello   world"), "hello world");
        assert_eq!(collapse_whitespace("  hello\n\n  world  "), "hello world");
    }

    #[test]
    fn test_document_title_is_single_line() {
        let html = Html::parse_document("<html><head><title>A\n  Split   Title</title></head></html>");
        assert_eq!(document_title(&html).as_deref(), Some("A Split Title"));
    }
}
