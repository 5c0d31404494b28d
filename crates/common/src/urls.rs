use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum UrlError {
    #[error("URL parse error: {0}")]
    Parse(String),

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("URL has no host")]
    MissingHost,
}

/// Canonicalize a URL for dedup and queueing.
///
/// Lowercases scheme and host, strips default ports, collapses an empty path
/// to `/`, strips the trailing slash on non-root paths, sorts query
/// parameters, and drops the fragment. Applying it twice yields the same
/// string.
pub fn normalize(raw: &str) -> Result<String, UrlError> {
    let mut url = Url::parse(raw.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlError::UnsupportedScheme(other.to_string())),
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }

    // The url crate already lowercases scheme and host and drops the default
    // port for the scheme during parsing.
    url.set_fragment(None);

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    match url.query() {
        Some("") | None => url.set_query(None),
        Some(query) => {
            let mut params: Vec<&str> = query.split('&').collect();
            params.sort_unstable();
            url.set_query(Some(&params.join("&")));
        }
    }

    Ok(url.to_string())
}

/// Lowercased network location of a URL: host, plus the port when it is not
/// the scheme default.
pub fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

/// Whether a URL is acceptable as crawl input: http/https scheme, a host,
/// and at least one dot in the host.
pub fn is_valid_crawl_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return false;
    }

    match parsed.host_str() {
        Some(host) => host.contains('.'),
        None => false,
    }
}

/// Repair a bare seed entry like `example.com/page` by assuming https.
pub fn ensure_scheme(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}
