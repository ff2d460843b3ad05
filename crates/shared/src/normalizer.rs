//! Canonicalization and filtering of candidate article URLs.

use url::Url;

use crate::config::ScrapeSettings;

const ARTICLE_PATH_SEGMENTS: &[&str] = &["/news/", "/article/", "/view/"];
const ARTICLE_EXTENSIONS: &[&str] = &[".html", ".php", ".do"];

/// Filters out ad/tracker links and non-article pages, and strips fragments.
///
/// `normalize` is pure: no I/O, and feeding its output back in returns the
/// same value.
#[derive(Debug, Clone)]
pub struct UrlNormalizer {
    blacklist: Vec<String>,
    allow_hosts: Vec<String>,
    unwanted_patterns: Vec<String>,
    aggregator_hosts: Vec<String>,
}

impl UrlNormalizer {
    pub fn new(settings: &ScrapeSettings) -> Self {
        Self {
            blacklist: lowercase(&settings.ad_domain_blacklist),
            allow_hosts: lowercase(&settings.homepage_allow_hosts),
            unwanted_patterns: settings.unwanted_url_patterns.clone(),
            aggregator_hosts: lowercase(&settings.aggregator_hosts),
        }
    }

    pub fn normalize(&self, raw: &str) -> Option<String> {
        let mut url = Url::parse(raw.trim()).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let host = url.host_str()?.to_ascii_lowercase();

        if self.blacklist.iter().any(|ad| host.contains(ad.as_str())) {
            return None;
        }

        url.set_fragment(None);
        let serialized = url.as_str();
        if self
            .unwanted_patterns
            .iter()
            .any(|p| serialized.contains(p.as_str()))
        {
            return None;
        }

        let allowed_homepage = self.allow_hosts.iter().any(|h| host.contains(h.as_str()));
        if !allowed_homepage && !looks_like_article(url.path()) {
            return None;
        }

        Some(url.into())
    }

    /// True when the link points at a news index that wraps publisher URLs.
    pub fn is_aggregator(&self, raw: &str) -> bool {
        Url::parse(raw.trim())
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .map(|host| {
                self.aggregator_hosts
                    .iter()
                    .any(|a| host == *a || host.ends_with(&format!(".{a}")))
            })
            .unwrap_or(false)
    }
}

fn looks_like_article(path: &str) -> bool {
    if path.chars().any(|c| c.is_ascii_digit()) {
        return true;
    }
    let lower = path.to_ascii_lowercase();
    ARTICLE_PATH_SEGMENTS.iter().any(|seg| lower.contains(seg))
        || ARTICLE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn lowercase(items: &[String]) -> Vec<String> {
    items.iter().map(|s| s.to_ascii_lowercase()).collect()
}
