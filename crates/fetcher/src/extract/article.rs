use std::collections::HashMap;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{absolute_links, collapse_whitespace, document_title, ExtractError, Extraction, Extractor};

/// Containers tried in order when looking for the main content.
const CONTAINER_SELECTORS: &[&str] = &["article", "main", "[role=\"main\"]", "#content", ".post"];

/// Block-level elements whose text forms the article body.
const BLOCK_SELECTOR: &str = "p, h1, h2, h3, h4, h5, h6, li, blockquote, pre, figcaption";

/// Readability-style extractor.
///
/// Prefers a semantically marked main container and reads page metadata
/// from `<meta>` tags. Fails with `NoContent` on pages without a usable
/// container so the structural fallback gets its turn.
pub struct ArticleExtractor;

impl Extractor for ArticleExtractor {
    fn name(&self) -> &'static str {
        "article"
    }

    fn extract(&self, html: &str, base_url: &Url) -> Result<Extraction, ExtractError> {
        let document = Html::parse_document(html);

        let container = best_container(&document).ok_or(ExtractError::NoContent)?;
        let text = block_text(container)?;

        let mut extraction = Extraction {
            title: meta_content(&document, "meta[property=\"og:title\"]")
                .or_else(|| document_title(&document)),
            text,
            links: absolute_links(&document, base_url),
            metadata: page_metadata(&document),
        };

        if extraction.title.is_none() {
            // A heading inside the container is better than nothing.
            extraction.title = first_heading(container);
        }

        Ok(extraction)
    }
}

/// The candidate container with the most text wins.
fn best_container(document: &Html) -> Option<ElementRef<'_>> {
    let mut best: Option<(usize, ElementRef)> = None;

    for selector_text in CONTAINER_SELECTORS {
        let Ok(selector) = Selector::parse(selector_text) else {
            continue;
        };
        for candidate in document.select(&selector) {
            let length = candidate.text().map(str::len).sum::<usize>();
            if length > best.map(|(best_length, _)| best_length).unwrap_or(0) {
                best = Some((length, candidate));
            }
        }
    }

    best.map(|(_, container)| container)
}

/// Block contents joined with single line breaks. Elements that contain
/// another matching block are skipped so nested structures are emitted once,
/// at the innermost level.
fn block_text(container: ElementRef<'_>) -> Result<String, ExtractError> {
    let selector = Selector::parse(BLOCK_SELECTOR).map_err(|_| ExtractError::NoContent)?;

    let mut blocks = Vec::new();
    for element in container.select(&selector) {
        if element.select(&selector).next().is_some() {
            continue;
        }
        let block = collapse_whitespace(&element.text().collect::<String>());
        if !block.is_empty() {
            blocks.push(block);
        }
    }

    if blocks.is_empty() {
        return Err(ExtractError::NoContent);
    }
    Ok(blocks.join("\n"))
}

fn first_heading(container: ElementRef<'_>) -> Option<String> {
    let selector = Selector::parse("h1, h2").ok()?;
    let heading = container.select(&selector).next()?;
    let text = collapse_whitespace(&heading.text().collect::<String>());
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn meta_content(document: &Html, selector_text: &str) -> Option<String> {
    let selector = Selector::parse(selector_text).ok()?;
    let element = document.select(&selector).next()?;
    let content = element.value().attr("content")?.trim();
    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}

fn page_metadata(document: &Html) -> HashMap<String, String> {
    let mut metadata = HashMap::new();

    let author = meta_content(document, "meta[name=\"author\"]")
        .or_else(|| meta_content(document, "meta[property=\"article:author\"]"));
    if let Some(author) = author {
        metadata.insert("author".to_string(), author);
    }

    let date = meta_content(document, "meta[property=\"article:published_time\"]")
        .or_else(|| meta_content(document, "meta[name=\"date\"]"));
    if let Some(date) = date {
        metadata.insert("date".to_string(), date);
    }

    if let Some(sitename) = meta_content(document, "meta[property=\"og:site_name\"]") {
        metadata.insert("sitename".to_string(), sitename);
    }

    let language = html_lang(document)
        .or_else(|| meta_content(document, "meta[property=\"og:locale\"]"));
    if let Some(language) = language {
        metadata.insert("language".to_string(), language);
    }

    metadata
}

fn html_lang(document: &Html) -> Option<String> {
    let selector = Selector::parse("html[lang]").ok()?;
    let element = document.select(&selector).next()?;
    let lang = element.value().attr("lang")?.trim();
    if lang.is_empty() {
        None
    } else {
        Some(lang.to_string())
    }
}
