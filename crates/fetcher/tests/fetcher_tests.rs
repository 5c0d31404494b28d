//! End-to-end fetcher tests against a local mock HTTP server.

use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use trawler_common::config::FetcherConfig;
use trawler_common::types::ScrapeOutcome;
use trawler_fetcher::{CircuitState, Fetcher};

const ARTICLE_BODY: &str = r#"
    <html lang="en">
    <head><title>Mock Article</title></head>
    <body>
        <article>
            <h1>Mock Article</h1>
            <p>This paragraph exists to push the extracted text comfortably past
            the minimum content length used by the fetcher configuration.</p>
            <p>Another paragraph with <a href="/next-page">an outbound link</a>
            for link extraction checks.</p>
        </article>
    </body>
    </html>"#;

/// Fast-retry config so tests don't sleep for real backoff durations.
fn test_config() -> FetcherConfig {
    FetcherConfig {
        max_retries: 3,
        retry_base_seconds: 0.01,
        retry_cap_seconds: 0.05,
        connect_timeout_seconds: 2.0,
        read_timeout_seconds: 2.0,
        total_timeout_seconds: 5.0,
        min_content_length: 100,
        ..FetcherConfig::default()
    }
}

#[tokio::test]
async fn test_success_extracts_content_and_links() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/article"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE_BODY))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(test_config()).unwrap();
    let url = format!("{}/article", server.uri());
    let result = fetcher.fetch(&url, None).await;

    assert_eq!(result.outcome, ScrapeOutcome::Success);
    assert_eq!(result.status_code, Some(200));
    assert_eq!(result.retry_count, 0);
    assert_eq!(result.title.as_deref(), Some("Mock Article"));
    assert!(result.text.as_deref().unwrap().contains("minimum content length"));
    assert!(result.bytes_downloaded > 0);
    assert!(result.response_time >= 0.0);
    assert!(result
        .links
        .iter()
        .any(|link| link.ends_with("/next-page")));
}

#[tokio::test]
async fn test_rate_limited_is_not_a_breaker_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(test_config()).unwrap();
    let url = format!("{}/busy", server.uri());
    let result = fetcher.fetch(&url, None).await;

    assert_eq!(result.outcome, ScrapeOutcome::RateLimited);
    assert_eq!(result.status_code, Some(429));
    // 429 is retried, so the fetch exhausts its retry budget.
    assert_eq!(result.retry_count, 3);

    let host = url::Url::parse(&url).unwrap();
    let host = format!(
        "{}:{}",
        host.host_str().unwrap(),
        host.port().unwrap()
    );
    assert_eq!(fetcher.breaker_state(&host), CircuitState::Closed);
}

#[tokio::test]
async fn test_forbidden_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(test_config()).unwrap();
    let result = fetcher.fetch(&format!("{}/private", server.uri()), None).await;

    assert_eq!(result.outcome, ScrapeOutcome::Blocked);
    assert_eq!(result.retry_count, 0);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(test_config()).unwrap();
    let result = fetcher.fetch(&format!("{}/missing", server.uri()), None).await;

    assert_eq!(result.outcome, ScrapeOutcome::HttpError);
    assert_eq!(result.status_code, Some(404));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_server_error_is_retried_then_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(test_config()).unwrap();
    let result = fetcher.fetch(&format!("{}/flaky", server.uri()), None).await;

    assert_eq!(result.outcome, ScrapeOutcome::HttpError);
    assert_eq!(result.status_code, Some(500));
    assert_eq!(result.retry_count, 3);
    // max_retries + 1 attempts total.
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_breaker_trips_after_failure_streak_and_recovers() {
    let server = MockServer::start().await;
    // Five 5xx responses, then the server recovers.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(5)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE_BODY))
        .mount(&server)
        .await;

    let config = FetcherConfig {
        max_retries: 4,
        retry_base_seconds: 0.01,
        retry_cap_seconds: 0.05,
        breaker_failure_threshold: 5,
        breaker_recovery_seconds: 0.3,
        min_content_length: 100,
        ..FetcherConfig::default()
    };
    let fetcher = Fetcher::new(config).unwrap();
    let url = format!("{}/fragile", server.uri());

    // Five consecutive failures open the circuit.
    let result = fetcher.fetch(&url, None).await;
    assert_eq!(result.outcome, ScrapeOutcome::HttpError);
    assert_eq!(server.received_requests().await.unwrap().len(), 5);

    // While open, no request goes out.
    let rejected = fetcher.fetch(&url, None).await;
    assert_eq!(rejected.outcome, ScrapeOutcome::CircuitOpen);
    assert_eq!(server.received_requests().await.unwrap().len(), 5);

    // After the recovery window, one probe succeeds and closes the circuit.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let recovered = fetcher.fetch(&url, None).await;
    assert_eq!(recovered.outcome, ScrapeOutcome::Success);
    assert_eq!(server.received_requests().await.unwrap().len(), 6);

    let parsed = url::Url::parse(&url).unwrap();
    let host = format!("{}:{}", parsed.host_str().unwrap(), parsed.port().unwrap());
    assert_eq!(fetcher.breaker_state(&host), CircuitState::Closed);
}

#[tokio::test]
async fn test_timeout_exhausts_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(ARTICLE_BODY)
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let config = FetcherConfig {
        max_retries: 3,
        retry_base_seconds: 0.01,
        retry_cap_seconds: 0.05,
        connect_timeout_seconds: 1.0,
        read_timeout_seconds: 1.0,
        total_timeout_seconds: 0.1,
        ..FetcherConfig::default()
    };
    let fetcher = Fetcher::new(config).unwrap();
    let result = fetcher.fetch(&format!("{}/slow", server.uri()), None).await;

    assert_eq!(result.outcome, ScrapeOutcome::Timeout);
    assert_eq!(result.retry_count, 3);
}

#[tokio::test]
async fn test_short_content_is_extraction_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body><p>too short</p></body></html>"),
        )
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(test_config()).unwrap();
    let url = format!("{}/thin", server.uri());
    let result = fetcher.fetch(&url, None).await;

    assert_eq!(result.outcome, ScrapeOutcome::ExtractionError);
    assert_eq!(result.error_message.as_deref(), Some("Content too short"));
    // Terminal: no retries, and not a breaker failure.
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    let parsed = url::Url::parse(&url).unwrap();
    let host = format!("{}:{}", parsed.host_str().unwrap(), parsed.port().unwrap());
    assert_eq!(fetcher.breaker_state(&host), CircuitState::Closed);
}

#[tokio::test]
async fn test_structural_fallback_when_no_article_container() {
    let server = MockServer::start().await;
    let page = r#"
        <html>
        <head><title>Plain Page</title></head>
        <body>
            <div>
                <p>A page without any article or main container still yields
                text through the structural fallback extractor, provided the
                body carries enough content to clear the minimum length.</p>
            </div>
        </body>
        </html>"#;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(test_config()).unwrap();
    let result = fetcher.fetch(&format!("{}/plain", server.uri()), None).await;

    assert_eq!(result.outcome, ScrapeOutcome::Success);
    assert_eq!(result.title.as_deref(), Some("Plain Page"));
    assert!(result
        .text
        .as_deref()
        .unwrap()
        .contains("structural fallback"));
}

#[tokio::test]
async fn test_custom_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(wiremock::matchers::header("X-Crawl-Tag", "trawler-test"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE_BODY))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(test_config()).unwrap();
    let headers = std::collections::HashMap::from([(
        "X-Crawl-Tag".to_string(),
        "trawler-test".to_string(),
    )]);
    let result = fetcher
        .fetch(&format!("{}/tagged", server.uri()), Some(&headers))
        .await;

    assert_eq!(result.outcome, ScrapeOutcome::Success);
}
