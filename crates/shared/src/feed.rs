use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::Html;
use tracing::{info, warn};

use crate::config::RunSettings;
use crate::error::{Error, Result};
use crate::http::HttpFetcher;
use crate::models::{excerpt, CandidateEntry};

/// Anything that can produce raw candidate entries for a run.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn collect(&self) -> Result<Vec<CandidateEntry>>;
}

/// Google News search, one RSS query per keyword group.
pub struct GoogleNewsSource {
    fetcher: HttpFetcher,
    settings: RunSettings,
    base_url: String,
    hl: String,
    gl: String,
    ceid: String,
}

impl GoogleNewsSource {
    pub fn new(fetcher: HttpFetcher, settings: RunSettings) -> Self {
        Self {
            fetcher,
            settings,
            base_url: "https://news.google.com".to_string(),
            hl: "ko".to_string(),
            gl: "KR".to_string(),
            ceid: "KR:ko".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_locale(mut self, hl: &str, gl: &str) -> Self {
        self.hl = hl.to_string();
        self.gl = gl.to_string();
        self.ceid = format!("{gl}:{hl}");
        self
    }

    fn search_url(&self, query: &str) -> String {
        format!(
            "{}/rss/search?q={}&hl={}&gl={}&ceid={}",
            self.base_url,
            urlencoding::encode(query),
            self.hl,
            self.gl,
            urlencoding::encode(&self.ceid)
        )
    }

    async fn search(&self, query: &str) -> Result<Vec<CandidateEntry>> {
        let url = self.search_url(query);
        let page = self.fetcher.fetch_html(&url).await?;
        let channel = rss::Channel::read_from(page.body.as_bytes())
            .map_err(|e| Error::Parse(format!("failed to parse news feed: {e}")))?;
        Ok(channel.items().iter().filter_map(entry_from_item).collect())
    }
}

#[async_trait]
impl CandidateSource for GoogleNewsSource {
    async fn collect(&self) -> Result<Vec<CandidateEntry>> {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        let mut last_error = None;
        let mut succeeded = 0;

        for group in &self.settings.keyword_groups {
            let query = build_query(group, &self.settings.exclude_terms, self.settings.lookback_hours);
            match self.search(&query).await {
                Ok(found) => {
                    succeeded += 1;
                    info!(query, found = found.len(), "news search");
                    for entry in found {
                        if seen.insert(entry.source_link.clone()) {
                            entries.push(entry);
                        }
                    }
                }
                Err(e) => {
                    warn!(query, error = %e, "news search failed");
                    last_error = Some(e);
                }
            }
        }

        if succeeded == 0 {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        entries.truncate(self.settings.max_candidates);
        Ok(entries)
    }
}

/// `a OR "b c" -x when:24h`
pub fn build_query(keywords: &[String], exclude: &[String], lookback_hours: u32) -> String {
    let terms = keywords
        .iter()
        .map(|k| quote_phrase(k))
        .collect::<Vec<_>>()
        .join(" OR ");
    let mut query = terms;
    for term in exclude {
        query.push_str(" -");
        query.push_str(&quote_phrase(term));
    }
    query.push_str(&format!(" when:{lookback_hours}h"));
    query
}

fn quote_phrase(term: &str) -> String {
    let term = term.trim();
    if term.contains(char::is_whitespace) {
        format!("\"{term}\"")
    } else {
        term.to_string()
    }
}

fn entry_from_item(item: &rss::Item) -> Option<CandidateEntry> {
    let link = item.link()?.trim();
    let title = item.title()?.trim();
    if link.is_empty() || title.is_empty() {
        return None;
    }

    let mut entry = CandidateEntry::new(title, link);
    entry.published_at = item
        .pub_date()
        .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
        .map(|d| d.with_timezone(&Utc));
    if let Some(description) = item.description() {
        let fragment = Html::parse_fragment(description);
        let text = fragment.root_element().text().collect::<Vec<_>>().join(" ");
        entry = entry.with_snippet(excerpt(&text, 150));
    }
    Some(entry)
}
