//! One collection run: search, filter against what was already sent,
//! resolve in parallel, deduplicate and select.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::config::ScrapeSettings;
use crate::error::Result;
use crate::feed::CandidateSource;
use crate::history::HistoryStore;
use crate::ledger::SentLinkLedger;
use crate::models::{CandidateEntry, ResolvedArticle, SelectedArticle};
use crate::normalizer::UrlNormalizer;
use crate::resolver::ArticleResolver;
use crate::selection::SelectionEngine;

/// Counts from each stage plus the final selection.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub found: usize,
    pub already_sent: usize,
    pub resolved: usize,
    pub fresh: usize,
    pub selected: Vec<SelectedArticle>,
}

pub struct Pipeline {
    source: Arc<dyn CandidateSource>,
    resolver: Arc<dyn ArticleResolver>,
    engine: SelectionEngine,
    normalizer: UrlNormalizer,
    ledger: SentLinkLedger,
    history: HistoryStore,
    workers: usize,
    task_deadline: Duration,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn CandidateSource>,
        resolver: Arc<dyn ArticleResolver>,
        engine: SelectionEngine,
        ledger: SentLinkLedger,
        history: HistoryStore,
        settings: &ScrapeSettings,
    ) -> Self {
        Self {
            source,
            resolver,
            engine,
            normalizer: UrlNormalizer::new(settings),
            ledger,
            history,
            workers: settings.resolve_workers.max(1),
            task_deadline: settings.task_deadline(),
        }
    }

    /// Everything up to and including selection. Nothing is written; call
    /// [`Pipeline::commit`] once the result has been delivered.
    pub async fn run(&self, target_count: usize) -> Result<RunReport> {
        let sent = self.ledger.load()?;
        let history = self.history.load()?;

        let entries = self.source.collect().await?;
        let found = entries.len();

        let mut seen_sources = HashSet::new();
        let pending: Vec<CandidateEntry> = entries
            .into_iter()
            .filter(|e| seen_sources.insert(e.source_link.clone()))
            .filter(|e| !self.was_sent(&sent, &e.source_link))
            .collect();
        let already_sent = seen_sources.len() - pending.len();
        info!(found, already_sent, pending = pending.len(), "candidates collected");

        let resolved = self.resolve_all(pending).await;
        let resolved_count = resolved.len();

        let mut seen_links = HashSet::new();
        let fresh: Vec<ResolvedArticle> = resolved
            .into_iter()
            .filter(|a| !sent.contains(a.canonical_link()))
            .filter(|a| seen_links.insert(a.canonical_link().to_string()))
            .collect();
        info!(resolved = resolved_count, fresh = fresh.len(), "articles resolved");

        let selected = self.engine.select(&fresh, &history, target_count).await;

        Ok(RunReport {
            found,
            already_sent,
            resolved: resolved_count,
            fresh: fresh.len(),
            selected,
        })
    }

    /// Record a delivered selection in the ledger and the history file.
    pub fn commit(&self, selected: &[SelectedArticle], sent_on: NaiveDate) -> Result<()> {
        let links: Vec<String> = selected.iter().map(|a| a.link.clone()).collect();
        self.ledger.append(&links)?;
        self.history.save(selected, sent_on)?;
        info!(links = links.len(), ledger = %self.ledger.path().display(), "delivery recorded");
        Ok(())
    }

    fn was_sent(&self, sent: &HashSet<String>, link: &str) -> bool {
        if sent.contains(link.trim()) {
            return true;
        }
        self.normalizer
            .normalize(link)
            .is_some_and(|normalized| sent.contains(&normalized))
    }

    /// Resolve with bounded parallelism and a deadline per candidate. The
    /// deadline leaves room for the image and summary budgets on top of
    /// the resolver's own link and body timeout. The result keeps the
    /// order the source returned.
    async fn resolve_all(&self, pending: Vec<CandidateEntry>) -> Vec<ResolvedArticle> {
        let task_deadline = self.task_deadline;
        let mut results: Vec<(usize, ResolvedArticle)> = stream::iter(pending.into_iter().enumerate())
            .map(|(index, entry)| {
                let resolver = Arc::clone(&self.resolver);
                async move {
                    match tokio::time::timeout(task_deadline, resolver.resolve(&entry)).await {
                        Ok(article) => article.map(|a| (index, a)),
                        Err(_) => {
                            warn!(title = %entry.title, ?task_deadline, "candidate abandoned");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.workers)
            .filter_map(|r| async move { r })
            .collect()
            .await;

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, article)| article).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TextGenerator;
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StaticSource(Vec<CandidateEntry>);

    #[async_trait]
    impl CandidateSource for StaticSource {
        async fn collect(&self) -> Result<Vec<CandidateEntry>> {
            Ok(self.0.clone())
        }
    }

    /// Maps source links to publisher links and records every call.
    struct MapResolver {
        targets: HashMap<String, String>,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
        stall: Option<String>,
    }

    impl MapResolver {
        fn new(pairs: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                targets: pairs
                    .iter()
                    .map(|(from, to)| (from.to_string(), to.to_string()))
                    .collect(),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                stall: None,
            })
        }
    }

    #[async_trait]
    impl ArticleResolver for MapResolver {
        async fn resolve(&self, entry: &CandidateEntry) -> Option<ResolvedArticle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(entry.source_link.clone());
            if self.stall.as_deref() == Some(entry.source_link.as_str()) {
                std::future::pending::<()>().await;
            }
            let link = self.targets.get(&entry.source_link)?;
            Some(ResolvedArticle::new(
                entry.title.clone(),
                link.clone(),
                "본문".repeat(150),
                None,
                Some(format!("about {}", entry.title)),
                None,
            ))
        }
    }

    /// Always ranks candidates in the order given.
    struct InOrder;

    #[async_trait]
    impl TextGenerator for InOrder {
        async fn generate(&self, _system: &str, _user: &str, _json: bool) -> Result<String> {
            Ok(r#"{"selected_indices": [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]}"#.to_string())
        }
    }

    fn entry(i: usize) -> CandidateEntry {
        CandidateEntry::new(format!("story {i}"), format!("https://news.google.com/rss/articles/{i}"))
    }

    fn publisher(i: usize) -> String {
        format!("https://www.klnews.co.kr/news/articleView.html?idxno={i}")
    }

    fn pipeline(
        dir: &tempfile::TempDir,
        entries: Vec<CandidateEntry>,
        resolver: Arc<MapResolver>,
    ) -> Pipeline {
        let engine = SelectionEngine::new(Arc::new(InOrder))
            .with_retry_policy(RetryPolicy::new(1, Duration::from_millis(1)));
        Pipeline::new(
            Arc::new(StaticSource(entries)),
            resolver,
            engine,
            SentLinkLedger::new(dir.path().join("sent_links.txt")),
            HistoryStore::new(dir.path().join("history.json"), 1),
            &ScrapeSettings::default(),
        )
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    #[tokio::test]
    async fn ledgered_links_are_never_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            CandidateEntry::new("old", publisher(1)),
            CandidateEntry::new("old with fragment", format!("{}#comments", publisher(2))),
            CandidateEntry::new("new", publisher(3)),
        ];
        SentLinkLedger::new(dir.path().join("sent_links.txt"))
            .append(&[publisher(1), publisher(2)])
            .unwrap();
        let resolver = MapResolver::new(&[(publisher(3).as_str(), publisher(3).as_str())]);

        let report = pipeline(&dir, entries, resolver.clone()).run(10).await.unwrap();

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*resolver.seen.lock().unwrap(), vec![publisher(3)]);
        assert_eq!(report.already_sent, 2);
        assert_eq!(report.selected.len(), 1);
        assert_eq!(report.selected[0].link, publisher(3));
    }

    #[tokio::test]
    async fn same_publisher_link_is_kept_once() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b, c) = (entry(1), entry(2), entry(3));
        let resolver = MapResolver::new(&[
            (a.source_link.as_str(), publisher(10).as_str()),
            (b.source_link.as_str(), publisher(10).as_str()),
            (c.source_link.as_str(), publisher(11).as_str()),
        ]);

        let report = pipeline(&dir, vec![a, b.clone(), b, c], resolver.clone())
            .run(10)
            .await
            .unwrap();

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.resolved, 3);
        assert_eq!(report.fresh, 2);
        let links: Vec<&str> = report.selected.iter().map(|s| s.link.as_str()).collect();
        assert_eq!(links, vec![publisher(10).as_str(), publisher(11).as_str()]);
        assert_eq!(report.selected[0].title, "story 1");
    }

    #[tokio::test]
    async fn nothing_is_delivered_twice_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let entries: Vec<CandidateEntry> = (0..4).map(entry).collect();
        let pairs: Vec<(String, String)> = (0..4)
            .map(|i| (entry(i).source_link, publisher(i)))
            .collect();
        let pair_refs: Vec<(&str, &str)> = pairs.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();

        let first = pipeline(&dir, entries.clone(), MapResolver::new(&pair_refs));
        let report = first.run(2).await.unwrap();
        assert_eq!(report.selected.len(), 2);
        first.commit(&report.selected, day(15)).unwrap();

        // The aggregator links differ on the next day but lead to the same articles.
        let next_entries: Vec<CandidateEntry> = (0..4)
            .map(|i| CandidateEntry::new(format!("story {i}"), format!("https://news.google.com/rss/articles/n{i}")))
            .collect();
        let next_pairs: Vec<(String, String)> = (0..4)
            .map(|i| (format!("https://news.google.com/rss/articles/n{i}"), publisher(i)))
            .collect();
        let next_refs: Vec<(&str, &str)> = next_pairs.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();

        let second = pipeline(&dir, next_entries, MapResolver::new(&next_refs));
        let again = second.run(10).await.unwrap();

        let first_links: HashSet<&str> = report.selected.iter().map(|s| s.link.as_str()).collect();
        assert_eq!(again.selected.len(), 2);
        assert!(again.selected.iter().all(|s| !first_links.contains(s.link.as_str())));

        let history = HistoryStore::new(dir.path().join("history.json"), 1).load().unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn empty_search_selects_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = MapResolver::new(&[]);
        let report = pipeline(&dir, Vec::new(), resolver.clone()).run(10).await.unwrap();

        assert!(report.selected.is_empty());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("sent_links.txt").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_resolution_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (entry(1), entry(2));
        let resolver = Arc::new(MapResolver {
            targets: [
                (a.source_link.clone(), publisher(1)),
                (b.source_link.clone(), publisher(2)),
            ]
            .into_iter()
            .collect(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            stall: Some(a.source_link.clone()),
        });

        let report = pipeline(&dir, vec![a, b], resolver).run(10).await.unwrap();

        assert_eq!(report.resolved, 1);
        assert_eq!(report.selected[0].link, publisher(2));
    }

    /// Accepts the request and never answers.
    struct SilentModel;

    #[async_trait]
    impl TextGenerator for SilentModel {
        async fn generate(&self, _system: &str, _user: &str, _json: bool) -> Result<String> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn stalled_summary_does_not_cost_the_article() {
        use crate::http::HttpFetcher;
        use crate::resolver::ContentResolver;
        use crate::renderer::HttpRenderer;
        use crate::summarizer::Summarizer;
        use httpmock::prelude::*;

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/news/42");
                then.status(200).body(format!(
                    "<html><body><div id=\"articleBody\">{}</div></body></html>",
                    "물류센터 자동화 투자가 늘고 있다. ".repeat(20)
                ));
            })
            .await;

        // The summary deadline alone is longer than the link and body timeout.
        let settings = ScrapeSettings {
            task_timeout: Duration::from_secs(1),
            image_budget: Duration::from_secs(1),
            summary_timeout: Duration::from_millis(1500),
            ..ScrapeSettings::default()
        };
        let fetcher = HttpFetcher::new(&settings).unwrap();
        let summarizer = Summarizer::new(Arc::new(SilentModel)).with_timeout(settings.summary_timeout);
        let resolver = ContentResolver::new(
            fetcher.clone(),
            Arc::new(HttpRenderer::new(fetcher)),
            &settings,
        )
        .with_summarizer(summarizer);

        let dir = tempfile::tempdir().unwrap();
        let link = server.url("/news/42");
        let pipeline = Pipeline::new(
            Arc::new(StaticSource(vec![CandidateEntry::new("자동화 투자", link.clone())])),
            Arc::new(resolver),
            SelectionEngine::new(Arc::new(InOrder))
                .with_retry_policy(RetryPolicy::new(1, Duration::from_millis(1))),
            SentLinkLedger::new(dir.path().join("sent_links.txt")),
            HistoryStore::new(dir.path().join("history.json"), 1),
            &settings,
        );

        let report = pipeline.run(10).await.unwrap();

        assert_eq!(report.resolved, 1);
        assert_eq!(report.selected.len(), 1);
        let article = &report.selected[0];
        assert_eq!(article.link, link);
        assert_eq!(article.ai_summary, None);
        assert!(article.summary.starts_with("물류센터 자동화"));
        assert_eq!(article.image_url.as_deref(), Some(settings.default_image_url.as_str()));
    }
}
