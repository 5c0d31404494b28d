use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use quick_xml::events::Event;

use trawler_common::types::AdmitReport;
use trawler_common::urls;

use crate::frontier::{FrontierError, UrlFrontier};

/// How many child sitemaps one sitemap index may fan out to.
const MAX_CHILD_SITEMAPS: usize = 10;

/// Counters for seed ingestion.
#[derive(Clone, Copy, Debug, Default)]
pub struct SeedStats {
    pub total_loaded: u64,
    pub added_to_frontier: u64,
    pub duplicates: u64,
    pub invalid: u64,
    pub sources_processed: u64,
}

/// Loads seed URLs into the frontier from files, remote lists, and sitemaps.
///
/// Validation rejects entries without an http/https scheme, without a host,
/// or without a dot in the host; bare entries like `example.com` are
/// repaired to https first. A local seen-set keeps one loading session from
/// hammering the frontier with its own duplicates.
pub struct SeedLoader {
    frontier: Arc<UrlFrontier>,
    http: reqwest::Client,
    default_priority: f64,
    seen: HashSet<String>,
    stats: SeedStats,
}

impl SeedLoader {
    pub fn new(frontier: Arc<UrlFrontier>, default_priority: f64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("trawler-seeds/0.1")
            .build()
            .expect("Failed to build HTTP client");

        Self {
            frontier,
            http,
            default_priority,
            seen: HashSet::new(),
            stats: SeedStats::default(),
        }
    }

    pub fn stats(&self) -> SeedStats {
        self.stats
    }

    /// Add one seed. Returns true when the frontier accepted it.
    pub async fn add_seed(
        &mut self,
        raw: &str,
        priority: Option<f64>,
        category: Option<&str>,
    ) -> Result<bool, FrontierError> {
        let repaired = urls::ensure_scheme(raw);

        if !urls::is_valid_crawl_url(&repaired) {
            self.stats.invalid += 1;
            tracing::warn!(url = %raw, "Invalid seed URL");
            return Ok(false);
        }

        let normalized = match urls::normalize(&repaired) {
            Ok(normalized) => normalized,
            Err(e) => {
                self.stats.invalid += 1;
                tracing::warn!(url = %raw, error = %e, "Unparseable seed URL");
                return Ok(false);
            }
        };

        if !self.seen.insert(normalized.clone()) {
            self.stats.duplicates += 1;
            return Ok(false);
        }

        let priority = priority.unwrap_or(self.default_priority);
        let mut metadata: HashMap<String, String> = HashMap::from([
            ("seed".to_string(), "true".to_string()),
            ("depth".to_string(), "0".to_string()),
            ("priority".to_string(), priority.to_string()),
        ]);
        if let Some(category) = category {
            metadata.insert("category".to_string(), category.to_string());
        }

        let added = self
            .frontier
            .admit(&normalized, priority, Some(&metadata), false)
            .await?;

        if added {
            self.stats.total_loaded += 1;
            self.stats.added_to_frontier += 1;
            tracing::debug!(url = %normalized, "Seed added");
        } else {
            self.stats.duplicates += 1;
        }

        Ok(added)
    }

    /// Add a batch of seeds, reporting added/duplicate/invalid splits.
    pub async fn add_seeds(
        &mut self,
        raw_urls: &[String],
        priority: Option<f64>,
        category: Option<&str>,
    ) -> Result<AdmitReport, FrontierError> {
        let mut report = AdmitReport::default();
        let invalid_before = self.stats.invalid;
        let duplicates_before = self.stats.duplicates;

        for raw in raw_urls {
            if self.add_seed(raw, priority, category).await? {
                report.added += 1;
            }
        }

        report.invalid_skipped = self.stats.invalid - invalid_before;
        report.duplicates_skipped = self.stats.duplicates - duplicates_before;
        Ok(report)
    }

    /// Load seeds from a local file, dispatching on extension:
    /// `.txt` (one URL per line, `#` comments), `.csv` (requires a `url`
    /// column, optional `priority` and `category`), `.json` (array of
    /// strings or objects).
    pub async fn load_from_file(
        &mut self,
        path: &Path,
        priority: Option<f64>,
        category: Option<&str>,
    ) -> Result<u64, SeedError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let loaded = match extension.as_str() {
            "txt" => {
                let content = std::fs::read_to_string(path)?;
                self.load_plain_text(&content, priority, category).await?
            }
            "csv" => self.load_csv(path, priority, category).await?,
            "json" => {
                let content = std::fs::read_to_string(path)?;
                self.load_json(&content, priority, category).await?
            }
            other => {
                return Err(SeedError::UnsupportedFormat(other.to_string()));
            }
        };

        self.stats.sources_processed += 1;
        tracing::info!(count = loaded, path = %path.display(), "Loaded seeds from file");
        Ok(loaded)
    }

    /// One URL per line; blank lines and `#` comments ignored.
    pub async fn load_plain_text(
        &mut self,
        content: &str,
        priority: Option<f64>,
        category: Option<&str>,
    ) -> Result<u64, SeedError> {
        let mut loaded = 0;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if self.add_seed(line, priority, category).await? {
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    async fn load_csv(
        &mut self,
        path: &Path,
        priority: Option<f64>,
        category: Option<&str>,
    ) -> Result<u64, SeedError> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| SeedError::Parse(e.to_string()))?;

        let headers = reader
            .headers()
            .map_err(|e| SeedError::Parse(e.to_string()))?
            .clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|header| header.eq_ignore_ascii_case(name))
        };

        let url_column = column("url")
            .or_else(|| column("link"))
            .ok_or_else(|| SeedError::Parse("CSV has no url column".to_string()))?;
        let priority_column = column("priority");
        let category_column = column("category");

        let mut loaded = 0;
        for record in reader.records() {
            let record = record.map_err(|e| SeedError::Parse(e.to_string()))?;
            let Some(url) = record.get(url_column).filter(|url| !url.is_empty()) else {
                continue;
            };

            let row_priority = priority_column
                .and_then(|idx| record.get(idx))
                .and_then(|value| value.parse::<f64>().ok())
                .or(priority);
            let row_category = category_column
                .and_then(|idx| record.get(idx))
                .filter(|value| !value.is_empty())
                .or(category);

            // Borrow of `record` ends before the await below.
            let url = url.to_string();
            let row_category = row_category.map(str::to_string);
            if self
                .add_seed(&url, row_priority, row_category.as_deref())
                .await?
            {
                loaded += 1;
            }
        }

        Ok(loaded)
    }

    /// JSON array of URL strings or `{url, priority?, category?}` objects.
    pub async fn load_json(
        &mut self,
        content: &str,
        priority: Option<f64>,
        category: Option<&str>,
    ) -> Result<u64, SeedError> {
        let data: serde_json::Value =
            serde_json::from_str(content).map_err(|e| SeedError::Parse(e.to_string()))?;

        let Some(items) = data.as_array() else {
            return Err(SeedError::Parse("JSON seed file must be an array".to_string()));
        };

        let mut loaded = 0;
        for item in items {
            let (url, item_priority, item_category) = match item {
                serde_json::Value::String(url) => (url.clone(), priority, category.map(str::to_string)),
                serde_json::Value::Object(object) => {
                    let Some(url) = object.get("url").and_then(|value| value.as_str()) else {
                        continue;
                    };
                    let item_priority = object
                        .get("priority")
                        .and_then(|value| value.as_f64())
                        .or(priority);
                    let item_category = object
                        .get("category")
                        .and_then(|value| value.as_str())
                        .map(str::to_string)
                        .or_else(|| category.map(str::to_string));
                    (url.to_string(), item_priority, item_category)
                }
                _ => continue,
            };

            if self
                .add_seed(&url, item_priority, item_category.as_deref())
                .await?
            {
                loaded += 1;
            }
        }

        Ok(loaded)
    }

    /// Fetch a remote seed list; JSON content types get the JSON treatment,
    /// everything else is one-URL-per-line text.
    pub async fn load_from_url(
        &mut self,
        source_url: &str,
        priority: Option<f64>,
        category: Option<&str>,
    ) -> Result<u64, SeedError> {
        let response = self
            .http
            .get(source_url)
            .send()
            .await
            .map_err(|e| SeedError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| SeedError::Http(e.to_string()))?;

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| SeedError::Http(e.to_string()))?;

        let loaded = if content_type.contains("json") {
            self.load_json(&body, priority, category).await?
        } else {
            self.load_plain_text(&body, priority, category).await?
        };

        self.stats.sources_processed += 1;
        tracing::info!(count = loaded, url = %source_url, "Loaded seeds from URL");
        Ok(loaded)
    }

    /// Load seeds from an XML sitemap, recursing through sitemap indices.
    /// Recursion is capped at 10 child sitemaps per index and `max_urls`
    /// total.
    pub fn load_from_sitemap<'a>(
        &'a mut self,
        sitemap_url: &'a str,
        priority: Option<f64>,
        max_urls: u64,
    ) -> Pin<Box<dyn Future<Output = Result<u64, SeedError>> + Send + 'a>> {
        Box::pin(async move {
            let body = self
                .http
                .get(sitemap_url)
                .send()
                .await
                .map_err(|e| SeedError::Http(e.to_string()))?
                .error_for_status()
                .map_err(|e| SeedError::Http(e.to_string()))?
                .text()
                .await
                .map_err(|e| SeedError::Http(e.to_string()))?;

            let document = parse_sitemap(&body)?;
            let mut loaded = 0;

            if document.is_index {
                for child in document.locations.iter().take(MAX_CHILD_SITEMAPS) {
                    if loaded >= max_urls {
                        break;
                    }
                    loaded += self
                        .load_from_sitemap(child, priority, max_urls - loaded)
                        .await?;
                }
            } else {
                for url in &document.locations {
                    if loaded >= max_urls {
                        break;
                    }
                    if self.add_seed(url, priority, None).await? {
                        loaded += 1;
                    }
                }
                self.stats.sources_processed += 1;
            }

            tracing::info!(count = loaded, url = %sitemap_url, "Loaded seeds from sitemap");
            Ok(loaded)
        })
    }
}

struct SitemapDocument {
    /// `<loc>` entries in document order.
    locations: Vec<String>,
    /// True when the root element is `<sitemapindex>`.
    is_index: bool,
}

fn parse_sitemap(xml: &str) -> Result<SitemapDocument, SeedError> {
    let mut reader = quick_xml::Reader::from_str(xml);

    let mut locations = Vec::new();
    let mut is_index = false;
    let mut root_seen = false;
    let mut in_loc = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                let name = element.local_name();
                if !root_seen {
                    root_seen = true;
                    is_index = name.as_ref() == b"sitemapindex";
                }
                if name.as_ref() == b"loc" {
                    in_loc = true;
                }
            }
            Ok(Event::Text(text)) if in_loc => {
                let location = text
                    .unescape()
                    .map_err(|e| SeedError::Parse(e.to_string()))?
                    .trim()
                    .to_string();
                if !location.is_empty() {
                    locations.push(location);
                }
            }
            Ok(Event::End(element)) => {
                if element.local_name().as_ref() == b"loc" {
                    in_loc = false;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(SeedError::Parse(e.to_string())),
        }
    }

    Ok(SitemapDocument {
        locations,
        is_index,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("Seed file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Seed parse error: {0}")]
    Parse(String),

    #[error("Seed fetch error: {0}")]
    Http(String),

    #[error("Unsupported seed file format: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Frontier(#[from] FrontierError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_urlset_sitemap() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
                <url><loc>https://example.com/a</loc></url>
                <url><loc>https://example.com/b</loc><lastmod>2024-01-01</lastmod></url>
            </urlset>"#;

        let document = parse_sitemap(xml).unwrap();
        assert!(!document.is_index);
        assert_eq!(
            document.locations,
            vec!["https://example.com/a", "https://example.com/b"]
        );
    }

    #[test]
    fn test_parse_sitemap_index() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
                <sitemap><loc>https://example.com/sitemap-news.xml</loc></sitemap>
                <sitemap><loc>https://example.com/sitemap-blog.xml</loc></sitemap>
            </sitemapindex>"#;

        let document = parse_sitemap(xml).unwrap();
        assert!(document.is_index);
        assert_eq!(document.locations.len(), 2);
    }

    #[test]
    fn test_parse_sitemap_rejects_mismatched_tags() {
        assert!(parse_sitemap("<urlset><loc>https://x.test/a</wrong></urlset>").is_err());
    }
}
