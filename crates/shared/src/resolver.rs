use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

use crate::config::ScrapeSettings;
use crate::extractor::ContentExtractor;
use crate::http::HttpFetcher;
use crate::images::ImageSelector;
use crate::models::{CandidateEntry, ResolvedArticle};
use crate::normalizer::UrlNormalizer;
use crate::renderer::PageRenderer;
use crate::summarizer::Summarizer;

/// Turns a raw candidate into a fully resolved article, or gives up.
#[async_trait]
pub trait ArticleResolver: Send + Sync {
    async fn resolve(&self, entry: &CandidateEntry) -> Option<ResolvedArticle>;
}

/// Follows aggregator wrappers to the publisher, then pulls body text,
/// a representative image and an optional model summary.
pub struct ContentResolver {
    normalizer: UrlNormalizer,
    renderer: Arc<dyn PageRenderer>,
    render_slots: Arc<Semaphore>,
    render_timeout: Duration,
    task_timeout: Duration,
    extractor: ContentExtractor,
    images: ImageSelector,
    summarizer: Option<Summarizer>,
}

impl ContentResolver {
    pub fn new(
        fetcher: HttpFetcher,
        renderer: Arc<dyn PageRenderer>,
        settings: &ScrapeSettings,
    ) -> Self {
        Self {
            normalizer: UrlNormalizer::new(settings),
            renderer,
            render_slots: Arc::new(Semaphore::new(settings.render_workers.max(1))),
            render_timeout: settings.render_timeout,
            task_timeout: settings.task_timeout,
            extractor: ContentExtractor::new(fetcher.clone(), settings),
            images: ImageSelector::new(fetcher, settings),
            summarizer: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn normalizer(&self) -> &UrlNormalizer {
        &self.normalizer
    }

    /// Publisher URL behind `link`. Aggregator links are rendered; direct
    /// links only need normalizing.
    pub async fn canonical_link(&self, link: &str) -> Option<String> {
        if !self.normalizer.is_aggregator(link) {
            return self.normalizer.normalize(link);
        }

        let page = {
            let _slot = self.render_slots.acquire().await.ok()?;
            match self.renderer.render(link, self.render_timeout).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(link, error = %e, "render failed");
                    return None;
                }
            }
        };

        if !self.normalizer.is_aggregator(&page.final_url) {
            if let Some(url) = self.normalizer.normalize(&page.final_url) {
                return Some(url);
            }
        }
        pick_outbound_link(&page.html, &page.final_url, &self.normalizer)
    }

    /// Publisher link plus page HTML and body text. This is the part a
    /// candidate cannot do without, so it alone runs under the task timeout.
    async fn locate(&self, entry: &CandidateEntry) -> Option<(String, String, String)> {
        let Some(canonical) = self.canonical_link(&entry.source_link).await else {
            debug!(title = %entry.title, link = %entry.source_link, "no usable publisher link");
            return None;
        };

        match self.extractor.fetch_article(&canonical).await {
            Ok(Some((html, body))) => Some((canonical, html, body)),
            Ok(None) => {
                debug!(url = %canonical, "body too thin, skipping");
                None
            }
            Err(e) => {
                debug!(url = %canonical, error = %e, "article fetch failed");
                None
            }
        }
    }
}

#[async_trait]
impl ArticleResolver for ContentResolver {
    async fn resolve(&self, entry: &CandidateEntry) -> Option<ResolvedArticle> {
        let located = tokio::time::timeout(self.task_timeout, self.locate(entry)).await;
        let (canonical, html, body) = match located {
            Ok(found) => found?,
            Err(_) => {
                warn!(title = %entry.title, timeout = ?self.task_timeout, "resolution timed out");
                return None;
            }
        };

        // Image and summary carry their own deadlines and degrade on expiry.
        let image_url = self.images.select_image(&html, &canonical).await;
        let summary = match &self.summarizer {
            Some(summarizer) => summarizer.summarize(&entry.title, &body).await,
            None => None,
        };

        Some(ResolvedArticle::new(
            entry.title.clone(),
            canonical,
            body,
            Some(image_url),
            summary,
            entry.snippet.clone(),
        ))
    }
}

/// The outbound link with the longest anchor text on a rendered aggregator
/// page. Links that do not normalize or that stay on an aggregator are
/// skipped; the first one wins a tie.
pub fn pick_outbound_link(html: &str, page_url: &str, normalizer: &UrlNormalizer) -> Option<String> {
    let document = Html::parse_document(html);
    let anchors = Selector::parse("a[href]").ok()?;
    let base = Url::parse(page_url).ok();

    let mut best: Option<(usize, String)> = None;
    for anchor in document.select(&anchors) {
        let Some(href) = anchor.value().attr("href").map(str::trim) else {
            continue;
        };
        let lower = href.to_ascii_lowercase();
        if href.is_empty() || lower.starts_with("mailto:") || lower.starts_with("javascript:") {
            continue;
        }

        let absolute = match &base {
            Some(base) => match base.join(href) {
                Ok(url) => url.to_string(),
                Err(_) => continue,
            },
            None => href.to_string(),
        };
        if normalizer.is_aggregator(&absolute) {
            continue;
        }
        let Some(normalized) = normalizer.normalize(&absolute) else {
            continue;
        };

        let text_len = anchor.text().collect::<String>().trim().chars().count();
        if best.as_ref().map_or(true, |(len, _)| text_len > *len) {
            best = Some((text_len, normalized));
        }
    }

    best.map(|(_, url)| url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::llm::TextGenerator;
    use crate::renderer::RenderedPage;
    use httpmock::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const AGGREGATOR_LINK: &str = "https://news.google.com/rss/articles/CBMiXYZ";

    /// Serves one canned page for every render call.
    struct CannedRenderer {
        page: Option<RenderedPage>,
        calls: AtomicUsize,
    }

    impl CannedRenderer {
        fn new(final_url: &str, html: &str) -> Arc<Self> {
            Arc::new(Self {
                page: Some(RenderedPage {
                    final_url: final_url.to_string(),
                    html: html.to_string(),
                }),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                page: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PageRenderer for CannedRenderer {
        async fn render(&self, _url: &str, timeout: Duration) -> Result<RenderedPage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.page.clone().ok_or(Error::Timeout(timeout))
        }
    }

    struct FixedGenerator;

    #[async_trait]
    impl TextGenerator for FixedGenerator {
        async fn generate(&self, _system: &str, _user: &str, _json: bool) -> Result<String> {
            Ok("one\ntwo\nthree".to_string())
        }
    }

    fn settings() -> ScrapeSettings {
        ScrapeSettings {
            default_image_url: "https://placeholder.example/news.png".to_string(),
            ..ScrapeSettings::default()
        }
    }

    fn resolver(renderer: Arc<CannedRenderer>) -> ContentResolver {
        let settings = settings();
        let fetcher = HttpFetcher::new(&settings).unwrap();
        ContentResolver::new(fetcher, renderer, &settings)
    }

    fn article_page() -> String {
        format!(
            "<html><body><div id=\"articleBody\">{}</div></body></html>",
            "화물차 운송 시장이 빠르게 재편되고 있다. ".repeat(20)
        )
    }

    #[test]
    fn longest_anchor_text_wins() {
        let normalizer = UrlNormalizer::new(&ScrapeSettings::default());
        let html = r#"
            <a href="https://news.google.com/topics/abc">Google News top stories for you today</a>
            <a href="mailto:desk@example.com">Write to the desk about this very long subject</a>
            <a href="https://www.klnews.co.kr/news/articleView.html?idxno=1">Short</a>
            <a href="https://www.klnews.co.kr/news/articleView.html?idxno=2#top">Cold chain capacity doubles in Icheon</a>
            <a href="https://www.klnews.co.kr/">The publisher homepage with a long anchor text here</a>
            <a href="https://www.klnews.co.kr/news/articleView.html?idxno=3">Cold chain capacity doubles in Busan</a>
        "#;

        assert_eq!(
            pick_outbound_link(html, AGGREGATOR_LINK, &normalizer),
            Some("https://www.klnews.co.kr/news/articleView.html?idxno=2".to_string())
        );
    }

    #[test]
    fn relative_links_resolve_against_the_page() {
        let normalizer = UrlNormalizer::new(&ScrapeSettings::default());
        let html = r#"<a href="/news/articleView.html?idxno=9">Relative article link</a>"#;
        assert_eq!(
            pick_outbound_link(html, "https://www.klnews.co.kr/", &normalizer),
            Some("https://www.klnews.co.kr/news/articleView.html?idxno=9".to_string())
        );
        assert_eq!(pick_outbound_link("<p>nothing</p>", AGGREGATOR_LINK, &normalizer), None);
    }

    #[tokio::test]
    async fn final_url_off_the_aggregator_is_canonical() {
        let renderer = CannedRenderer::new(
            "https://www.klnews.co.kr/news/articleView.html?idxno=5#top",
            "<a href=\"https://other.example.com/news/1\">A much longer anchor text than any other</a>",
        );
        let link = resolver(renderer).canonical_link(AGGREGATOR_LINK).await;
        assert_eq!(link.as_deref(), Some("https://www.klnews.co.kr/news/articleView.html?idxno=5"));
    }

    #[tokio::test]
    async fn direct_links_skip_the_renderer() {
        let renderer = CannedRenderer::failing();
        let r = resolver(renderer.clone());

        assert_eq!(
            r.canonical_link("https://www.klnews.co.kr/news/articleView.html?idxno=7").await,
            Some("https://www.klnews.co.kr/news/articleView.html?idxno=7".to_string())
        );
        assert_eq!(r.canonical_link("https://doubleclick.net/news/1").await, None);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn render_failure_drops_the_candidate() {
        let renderer = CannedRenderer::failing();
        let entry = CandidateEntry::new("t", AGGREGATOR_LINK);
        assert!(resolver(renderer.clone()).resolve(&entry).await.is_none());
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolves_through_aggregator_to_publisher() {
        let server = MockServer::start_async().await;
        let page = server
            .mock_async(|when, then| {
                when.method(GET).path("/news/42");
                then.status(200).body(article_page());
            })
            .await;

        let renderer = CannedRenderer::new(
            AGGREGATOR_LINK,
            &format!("<a href=\"{}\">Truck market reshuffles as rates climb</a>", server.url("/news/42")),
        );
        let settings = settings();
        let fetcher = HttpFetcher::new(&settings).unwrap();
        let summarizer = Summarizer::new(Arc::new(FixedGenerator));
        let r = ContentResolver::new(fetcher, renderer, &settings).with_summarizer(summarizer);

        let entry = CandidateEntry::new("Truck market reshuffles", AGGREGATOR_LINK).with_snippet("feed text");
        let article = r.resolve(&entry).await.unwrap();

        page.assert_async().await;
        assert_eq!(article.canonical_link(), server.url("/news/42"));
        assert_eq!(article.title(), "Truck market reshuffles");
        assert!(article.body_text().starts_with("화물차 운송"));
        assert_eq!(article.image_url(), Some("https://placeholder.example/news.png"));
        assert_eq!(article.summary(), Some("one\ntwo\nthree"));
    }

    #[tokio::test]
    async fn thin_pages_are_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/news/43");
                then.status(200).body("<html><body><article>Too short.</article></body></html>");
            })
            .await;

        let entry = CandidateEntry::new("t", server.url("/news/43"));
        assert!(resolver(CannedRenderer::failing()).resolve(&entry).await.is_none());
    }
}
