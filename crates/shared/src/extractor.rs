use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::config::ScrapeSettings;
use crate::error::Result;
use crate::http::HttpFetcher;

const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "iframe", "button"];

/// Pulls readable article text out of publisher pages.
#[derive(Clone)]
pub struct ContentExtractor {
    fetcher: HttpFetcher,
    selectors: Vec<Selector>,
    min_chars: usize,
}

impl ContentExtractor {
    pub fn new(fetcher: HttpFetcher, settings: &ScrapeSettings) -> Self {
        let selectors = settings
            .body_selectors
            .iter()
            .filter_map(|s| Selector::parse(s).ok())
            .collect();

        Self {
            fetcher,
            selectors,
            min_chars: settings.min_body_chars,
        }
    }

    /// Fetch `url` and return its HTML together with the extracted body.
    /// `Ok(None)` means the page loaded but had too little text to use.
    pub async fn fetch_article(&self, url: &str) -> Result<Option<(String, String)>> {
        let page = self.fetcher.fetch_html(url).await?;
        Ok(self
            .extract_body(&page.body)
            .map(|text| (page.body, text)))
    }

    /// Body text of `html`, or `None` when it is shorter than the threshold.
    pub fn extract_body(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let text = extract_body_text(&document, &self.selectors);
        let chars = text.chars().count();
        if chars < self.min_chars {
            debug!(chars, min = self.min_chars, "body too short");
            return None;
        }
        Some(text)
    }
}

/// Text of the first article container that has any, else every `<p>`.
pub fn extract_body_text(document: &Html, selectors: &[Selector]) -> String {
    for selector in selectors {
        for element in document.select(selector) {
            let text = visible_text(element);
            if !text.is_empty() {
                return text;
            }
        }
    }

    let Ok(paragraphs) = Selector::parse("p") else {
        return String::new();
    };
    document
        .select(&paragraphs)
        .map(visible_text)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn visible_text(element: ElementRef) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| SKIPPED_TAGS.contains(&e.name()))
        });
        if !hidden {
            parts.push(text);
        }
    }
    parts
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
