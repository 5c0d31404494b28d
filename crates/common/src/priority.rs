use url::Url;

/// Signals feeding a URL's priority score. Higher scores are crawled first.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrioritySignals {
    pub is_seed: bool,
    /// Crawl depth from the seed that discovered this URL.
    pub depth: u32,
    /// Priority of the page the link was found on; 0 when unknown.
    pub parent_priority: f64,
    /// Anchor-text relevance on a 0–1 scale.
    pub anchor_relevance: f64,
    /// Domain authority on a 0–1 scale.
    pub domain_authority: f64,
}

impl PrioritySignals {
    pub fn seed() -> Self {
        Self {
            is_seed: true,
            ..Self::default()
        }
    }

    pub fn child_of(parent_priority: f64, depth: u32) -> Self {
        Self {
            depth,
            parent_priority,
            ..Self::default()
        }
    }
}

/// Score a URL from link-graph signals and URL structure.
///
/// Seeds get a flat 1000; inherited priority decays by 0.8 per depth level;
/// long paths and query-heavy URLs are penalized; https gets a small boost.
pub fn score(url: &str, signals: PrioritySignals) -> f64 {
    let mut priority = 0.0;

    if signals.is_seed {
        priority += 1000.0;
    }

    let depth_decay = 0.8_f64.powi(signals.depth as i32);
    priority += signals.parent_priority * 0.5 * depth_decay;

    priority += signals.anchor_relevance * 100.0;
    priority += signals.domain_authority * 50.0;

    if let Ok(parsed) = Url::parse(url) {
        let path_segments = parsed
            .path()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .count();
        priority -= path_segments as f64 * 2.0;

        if let Some(query) = parsed.query() {
            if !query.is_empty() {
                priority -= query.split('&').count() as f64 * 5.0;
            }
        }

        if parsed.scheme() == "https" {
            priority += 5.0;
        }
    }

    priority
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_dominates() {
        let seed = score("https://example.com/", PrioritySignals::seed());
        let child = score(
            "https://example.com/a/b",
            PrioritySignals::child_of(seed, 1),
        );
        assert!(seed > child);
        assert!(seed >= 1000.0);
    }

    #[test]
    fn test_depth_decay() {
        let shallow = score("https://example.com/a", PrioritySignals::child_of(100.0, 1));
        let deep = score("https://example.com/a", PrioritySignals::child_of(100.0, 4));
        assert!(shallow > deep);
    }

    #[test]
    fn test_url_structure_penalties() {
        let short = score("https://example.com/a", PrioritySignals::default());
        let long = score("https://example.com/a/b/c/d", PrioritySignals::default());
        assert_eq!(short - long, 6.0);

        let plain = score("https://example.com/a", PrioritySignals::default());
        let query_heavy = score("https://example.com/a?x=1&y=2", PrioritySignals::default());
        assert_eq!(plain - query_heavy, 10.0);
    }

    #[test]
    fn test_https_boost() {
        let https = score("https://example.com/a", PrioritySignals::default());
        let http = score("http://example.com/a", PrioritySignals::default());
        assert_eq!(https - http, 5.0);
    }

    #[test]
    fn test_unknown_parent_priority_is_zero() {
        let signals = PrioritySignals {
            is_seed: true,
            ..PrioritySignals::default()
        };
        // 1000 (seed) − 0 (root path) + 5 (https); no parent term.
        assert_eq!(score("https://example.com/", signals), 1005.0);
    }
}
