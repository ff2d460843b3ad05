//! Representative-image selection for resolved articles.
//!
//! Candidates come from a cascade (social meta tags, then images inside
//! figures or the article body, then any image on the page). Each one is
//! filtered by URL first and then downloaded to check its real size.

use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::ScrapeSettings;
use crate::http::HttpFetcher;

const BODY_SCAN_LIMIT: usize = 5;
const PAGE_SCAN_LIMIT: usize = 10;

#[derive(Debug, Clone)]
struct ImageRules {
    blocked_hosts: Vec<String>,
    unwanted_patterns: Vec<String>,
    min_width: u32,
    min_height: u32,
    min_ratio: f64,
    max_ratio: f64,
    min_wide_ratio: Option<f64>,
}

pub struct ImageSelector {
    fetcher: HttpFetcher,
    rules: ImageRules,
    body_selector: Option<Selector>,
    thumbnail_suffix: Regex,
    default_image_url: String,
    timeout: Duration,
    budget: Duration,
    max_bytes: u64,
}

impl ImageSelector {
    pub fn new(fetcher: HttpFetcher, settings: &ScrapeSettings) -> Self {
        let mut body_scope = vec!["figure img".to_string(), "picture img".to_string()];
        body_scope.extend(settings.body_selectors.iter().map(|s| format!("{s} img")));

        Self {
            fetcher,
            rules: ImageRules {
                blocked_hosts: settings
                    .image_blocked_hosts
                    .iter()
                    .map(|s| s.to_ascii_lowercase())
                    .collect(),
                unwanted_patterns: settings
                    .unwanted_image_patterns
                    .iter()
                    .map(|s| s.to_ascii_lowercase())
                    .collect(),
                min_width: settings.min_image_width,
                min_height: settings.min_image_height,
                min_ratio: settings.min_aspect_ratio,
                max_ratio: settings.max_aspect_ratio,
                min_wide_ratio: settings.min_wide_ratio,
            },
            body_selector: Selector::parse(&body_scope.join(", ")).ok(),
            thumbnail_suffix: Regex::new(r"(?i)_[vws]\d+(\.[a-z0-9]+)$")
                .expect("thumbnail pattern is valid"),
            default_image_url: settings.default_image_url.clone(),
            timeout: settings.image_timeout,
            budget: settings.image_budget,
            max_bytes: settings.max_image_bytes,
        }
    }

    /// Best image for the page, or the configured placeholder. Validation
    /// stops once the image budget is spent.
    pub async fn select_image(&self, html: &str, base_url: &str) -> String {
        let candidates = self.image_candidates(html, base_url);
        let search = async {
            for candidate in candidates {
                if self.validate_image(&candidate).await {
                    debug!(image = %candidate, page = base_url, "image accepted");
                    return Some(candidate);
                }
            }
            None
        };
        match tokio::time::timeout(self.budget, search).await {
            Ok(Some(image)) => image,
            Ok(None) => self.default_image_url.clone(),
            Err(_) => {
                debug!(page = base_url, budget = ?self.budget, "image budget spent");
                self.default_image_url.clone()
            }
        }
    }

    /// Absolute candidate URLs in cascade order, already filtered by URL
    /// rules and deduplicated. Nothing is downloaded here.
    pub fn image_candidates(&self, html: &str, base_url: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let base = Url::parse(base_url).ok();
        let mut ordered: Vec<String> = Vec::new();

        if let Some(meta) = meta_image(&document) {
            if let Some(thumb) = resolve_url(base.as_ref(), &meta) {
                if let Some(original) = self.original_of_thumbnail(&thumb) {
                    ordered.push(original);
                }
                ordered.push(thumb);
            }
        }

        if let Some(selector) = &self.body_selector {
            ordered.extend(
                document
                    .select(selector)
                    .filter_map(|img| img_source(img.value()))
                    .take(BODY_SCAN_LIMIT)
                    .filter_map(|src| resolve_url(base.as_ref(), &src)),
            );
        }

        if let Ok(any_img) = Selector::parse("img") {
            ordered.extend(
                document
                    .select(&any_img)
                    .filter_map(|img| img_source(img.value()))
                    .take(PAGE_SCAN_LIMIT)
                    .filter_map(|src| resolve_url(base.as_ref(), &src)),
            );
        }

        let mut seen = HashSet::new();
        ordered
            .into_iter()
            .filter(|url| self.is_valid_candidate(url))
            .filter(|url| seen.insert(url.clone()))
            .collect()
    }

    /// URL-level screening: aggregator CDNs, logos, icons, spacers and the like.
    pub fn is_valid_candidate(&self, image_url: &str) -> bool {
        let lower = image_url.to_ascii_lowercase();
        if let Some(host) = Url::parse(&lower).ok().and_then(|u| u.host_str().map(str::to_string)) {
            if self
                .rules
                .blocked_hosts
                .iter()
                .any(|blocked| host == *blocked || host.ends_with(&format!(".{blocked}")))
            {
                return false;
            }
        }
        !self
            .rules
            .unwanted_patterns
            .iter()
            .any(|p| lower.contains(p.as_str()))
    }

    /// Download the image and check type, size and shape. Any failure is
    /// a rejection.
    pub async fn validate_image(&self, image_url: &str) -> bool {
        let fetched = match self.fetcher.fetch_bytes(image_url, self.timeout, self.max_bytes).await {
            Ok(f) => f,
            Err(e) => {
                debug!(image = image_url, error = %e, "image fetch failed");
                return false;
            }
        };
        if !fetched.content_type.contains("image") {
            debug!(image = image_url, content_type = %fetched.content_type, "not an image");
            return false;
        }
        match image_dimensions(&fetched.bytes) {
            Some((width, height)) => {
                let ok = self.accepts_dimensions(width, height);
                if !ok {
                    debug!(image = image_url, width, height, "image rejected by size/shape");
                }
                ok
            }
            None => false,
        }
    }

    pub fn accepts_dimensions(&self, width: u32, height: u32) -> bool {
        let rules = &self.rules;
        if width < rules.min_width || height < rules.min_height || height == 0 {
            return false;
        }
        let ratio = f64::from(width) / f64::from(height);
        if ratio < rules.min_ratio || ratio > rules.max_ratio {
            return false;
        }
        rules.min_wide_ratio.map_or(true, |floor| ratio >= floor)
    }

    /// `photo_v150.jpg` → `photo.jpg`, when the URL looks like a resized copy.
    fn original_of_thumbnail(&self, image_url: &str) -> Option<String> {
        let mut url = Url::parse(image_url).ok()?;
        let path = url.path().to_string();
        if !self.thumbnail_suffix.is_match(&path) {
            return None;
        }
        let original = self.thumbnail_suffix.replace(&path, "$1").into_owned();
        url.set_path(&original);
        Some(url.into())
    }
}

fn meta_image(document: &Html) -> Option<String> {
    let selectors = [
        r#"meta[property="og:image"]"#,
        r#"meta[name="og:image"]"#,
        r#"meta[name="twitter:image"]"#,
        r#"meta[property="twitter:image"]"#,
    ];
    selectors.iter().find_map(|s| {
        let selector = Selector::parse(s).ok()?;
        document
            .select(&selector)
            .filter_map(|m| m.value().attr("content"))
            .map(str::trim)
            .find(|c| !c.is_empty())
            .map(str::to_string)
    })
}

fn img_source(img: &scraper::node::Element) -> Option<String> {
    let direct = ["src", "data-src", "data-original"]
        .iter()
        .filter_map(|attr| img.attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty() && !v.starts_with("data:"));
    if let Some(src) = direct {
        return Some(src.to_string());
    }
    img.attr("srcset")
        .and_then(|set| set.split(',').next())
        .and_then(|first| first.split_whitespace().next())
        .map(str::to_string)
}

fn resolve_url(base: Option<&Url>, src: &str) -> Option<String> {
    let src = src.trim();
    if src.is_empty() {
        return None;
    }
    if let Some(rest) = src.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if src.starts_with("http://") || src.starts_with("https://") {
        return Some(src.to_string());
    }
    base?.join(src).ok().map(String::from)
}

fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}
