//! Seed ingestion tests against a live coordination store.
//! All tests are `#[ignore]` — run with `cargo test -- --ignored` and a
//! redis-compatible store at REDIS_URL.

use std::io::Write;
use std::sync::Arc;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use trawler_common::config::FrontierConfig;
use trawler_frontier::{CoordinationStore, SeedLoader, UrlFrontier};

async fn fresh_frontier(prefix: &str) -> Arc<UrlFrontier> {
    let store_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
    let store = CoordinationStore::connect(&store_url)
        .await
        .expect("Failed to connect to coordination store");

    let frontier = Arc::new(UrlFrontier::new(
        store,
        FrontierConfig {
            key_prefix: format!("trawler_seed_test:{}", prefix),
            expected_items: 100_000,
            ..FrontierConfig::default()
        },
    ));
    frontier.clear().await.expect("Failed to clear frontier");
    frontier
}

#[tokio::test]
#[ignore]
async fn test_add_seeds_reports_added_duplicate_invalid() {
    let frontier = fresh_frontier("report").await;
    let mut loader = SeedLoader::new(Arc::clone(&frontier), 100.0);

    let report = loader
        .add_seeds(
            &[
                "https://a.test/page".to_string(),
                "https://a.test/page".to_string(), // duplicate
                "ftp://b.test/file".to_string(),   // bad scheme
                "https://nodot/page".to_string(),  // no dot in host
                "c.test/bare".to_string(),         // repaired to https
            ],
            None,
            Some("news"),
        )
        .await
        .expect("add_seeds failed");

    assert_eq!(report.added, 2);
    assert_eq!(report.duplicates_skipped, 1);
    assert_eq!(report.invalid_skipped, 2);

    let stats = frontier.stats().await.unwrap();
    assert_eq!(stats.urls_added, 2);

    // Seed metadata landed with the URL.
    let metadata = frontier.metadata_of("https://a.test/page").await.unwrap();
    assert_eq!(metadata.get("seed").map(String::as_str), Some("true"));
    assert_eq!(metadata.get("category").map(String::as_str), Some("news"));
    assert_eq!(metadata.get("depth").map(String::as_str), Some("0"));
}

#[tokio::test]
#[ignore]
async fn test_load_plain_text_file() {
    let frontier = fresh_frontier("txt").await;
    let mut loader = SeedLoader::new(Arc::clone(&frontier), 100.0);

    let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
    writeln!(file, "# comment line").unwrap();
    writeln!(file, "https://t.test/one").unwrap();
    writeln!(file).unwrap();
    writeln!(file, "https://t.test/two").unwrap();
    file.flush().unwrap();

    let loaded = loader
        .load_from_file(file.path(), None, None)
        .await
        .expect("load failed");
    assert_eq!(loaded, 2);
    assert_eq!(loader.stats().sources_processed, 1);
}

#[tokio::test]
#[ignore]
async fn test_load_csv_file_with_priority_column() {
    let frontier = fresh_frontier("csv").await;
    let mut loader = SeedLoader::new(Arc::clone(&frontier), 100.0);

    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(file, "url,priority,category").unwrap();
    writeln!(file, "https://c.test/high,500,docs").unwrap();
    writeln!(file, "https://c.test/default,,").unwrap();
    file.flush().unwrap();

    let loaded = loader
        .load_from_file(file.path(), None, None)
        .await
        .expect("load failed");
    assert_eq!(loaded, 2);

    let metadata = frontier.metadata_of("https://c.test/high").await.unwrap();
    assert_eq!(metadata.get("priority").map(String::as_str), Some("500"));
}

#[tokio::test]
#[ignore]
async fn test_load_json_array_of_objects() {
    let frontier = fresh_frontier("json").await;
    let mut loader = SeedLoader::new(Arc::clone(&frontier), 100.0);

    let loaded = loader
        .load_json(
            r#"[
                "https://j.test/plain",
                {"url": "https://j.test/scored", "priority": 250.0, "category": "blog"},
                {"not_a_url": true}
            ]"#,
            None,
            None,
        )
        .await
        .expect("load failed");
    assert_eq!(loaded, 2);
}

#[tokio::test]
#[ignore]
async fn test_load_sitemap_recurses_through_index() {
    let server = MockServer::start().await;
    let index = format!(
        r#"<?xml version="1.0"?>
        <sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
            <sitemap><loc>{0}/sitemap-a.xml</loc></sitemap>
        </sitemapindex>"#,
        server.uri()
    );
    let child = r#"<?xml version="1.0"?>
        <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
            <url><loc>https://s.test/page-one</loc></url>
            <url><loc>https://s.test/page-two</loc></url>
            <url><loc>https://s.test/page-three</loc></url>
        </urlset>"#;

    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap-a.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(child))
        .mount(&server)
        .await;

    let frontier = fresh_frontier("sitemap").await;
    let mut loader = SeedLoader::new(Arc::clone(&frontier), 100.0);

    // max_urls caps the recursion.
    let loaded = loader
        .load_from_sitemap(&format!("{}/sitemap.xml", server.uri()), None, 2)
        .await
        .expect("sitemap load failed");
    assert_eq!(loaded, 2);
}
