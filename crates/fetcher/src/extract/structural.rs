use std::collections::HashSet;

use scraper::{Html, Selector};
use url::Url;

use super::{absolute_links, collapse_whitespace, document_title, ExtractError, Extraction, Extractor};

/// Subtrees that carry no content: scripts, styles, chrome.
const STRIP_SELECTORS: &[&str] = &[
    "head", "script", "style", "nav", "footer", "header", "aside", "noscript", "svg",
];

/// Elements that delimit text blocks in the output.
const BLOCK_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "blockquote", "pre", "td", "th", "dt", "dd",
    "figcaption", "caption", "div", "section", "article", "main", "body",
];

/// Structural fallback extractor.
///
/// Strips non-content subtrees, then walks the remaining tree collecting
/// text grouped by nearest block-level ancestor, one line per block. Works
/// on any HTML, so it never defers to a later strategy — only truly empty
/// pages fail.
pub struct StructuralExtractor;

impl Extractor for StructuralExtractor {
    fn name(&self) -> &'static str {
        "structural"
    }

    fn extract(&self, html: &str, base_url: &Url) -> Result<Extraction, ExtractError> {
        let document = Html::parse_document(html);

        // Collect roots of subtrees to skip.
        let mut skip_ids = HashSet::new();
        for selector_text in STRIP_SELECTORS {
            if let Ok(selector) = Selector::parse(selector_text) {
                for element in document.select(&selector) {
                    skip_ids.insert(element.id());
                }
            }
        }

        let mut blocks: Vec<String> = Vec::new();
        let mut current_block = None;
        let mut current_parts: Vec<String> = Vec::new();

        for node in document.tree.nodes() {
            // Skip if this node or any ancestor is in the skip set.
            let mut should_skip = false;
            let mut check_id = Some(node.id());
            while let Some(id) = check_id {
                if skip_ids.contains(&id) {
                    should_skip = true;
                    break;
                }
                check_id = document
                    .tree
                    .get(id)
                    .and_then(|n| n.parent())
                    .map(|parent| parent.id());
            }
            if should_skip {
                continue;
            }

            let Some(text) = node.value().as_text() else {
                continue;
            };
            let trimmed = text.text.trim();
            if trimmed.is_empty() {
                continue;
            }

            // Group text by nearest block-level ancestor (including self).
            let mut block_id = None;
            let mut check_id = Some(node.id());
            while let Some(id) = check_id {
                let Some(candidate) = document.tree.get(id) else {
                    break;
                };
                if let Some(element) = candidate.value().as_element() {
                    if BLOCK_TAGS.contains(&element.name()) {
                        block_id = Some(id);
                        break;
                    }
                }
                check_id = candidate.parent().map(|parent| parent.id());
            }

            if block_id != current_block {
                flush_block(&mut blocks, &mut current_parts);
                current_block = block_id;
            }
            current_parts.push(trimmed.to_string());
        }
        flush_block(&mut blocks, &mut current_parts);

        if blocks.is_empty() {
            return Err(ExtractError::NoContent);
        }

        Ok(Extraction {
            title: document_title(&document),
            text: blocks.join("\n"),
            links: absolute_links(&document, base_url),
            metadata: Default::default(),
        })
    }
}

fn flush_block(blocks: &mut Vec<String>, parts: &mut Vec<String>) {
    if parts.is_empty() {
        return;
    }
    let block = collapse_whitespace(&parts.join(" "));
    parts.clear();
    if !block.is_empty() {
        blocks.push(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html>
        <head><title>Test Page</title></head>
        <body>
            <nav>Navigation here</nav>
            <div>
                <h1>Article Title</h1>
                <p>This is the main content of the page.</p>
                <p>Second paragraph with <em>emphasis</em> inline.</p>
            </div>
            <footer>Footer content</footer>
            <script>alert('bad');</script>
        </body>
        </html>"#;

    #[test]
    fn test_strips_chrome_and_scripts() {
        let base = Url::parse("https://example.com/").unwrap();
        let extraction = StructuralExtractor.extract(PAGE, &base).unwrap();

        assert!(extraction.text.contains("Article Title"));
        assert!(extraction.text.contains("main content"));
        assert!(!extraction.text.contains("Navigation here"));
        assert!(!extraction.text.contains("Footer content"));
        assert!(!extraction.text.contains("alert"));
    }

    #[test]
    fn test_blocks_are_line_separated() {
        let base = Url::parse("https://example.com/").unwrap();
        let extraction = StructuralExtractor.extract(PAGE, &base).unwrap();

        let lines: Vec<&str> = extraction.text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Article Title",
                "This is the main content of the page.",
                "Second paragraph with emphasis inline."
            ]
        );
    }

    #[test]
    fn test_title_from_head() {
        let base = Url::parse("https://example.com/").unwrap();
        let extraction = StructuralExtractor.extract(PAGE, &base).unwrap();
        assert_eq!(extraction.title.as_deref(), Some("Test Page"));
    }

    #[test]
    fn test_empty_page_is_no_content() {
        let base = Url::parse("https://example.com/").unwrap();
        assert!(matches!(
            StructuralExtractor.extract("<html><body></body></html>", &base),
            Err(ExtractError::NoContent)
        ));
    }
}
