// Public modules
pub mod briefing;
pub mod config;
pub mod error;
pub mod extractor;
pub mod feed;
pub mod history;
pub mod http;
pub mod images;
pub mod ledger;
pub mod llm;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod renderer;
pub mod resolver;
pub mod retry;
pub mod selection;
pub mod summarizer;

// Re-export commonly used types
pub use briefing::{BriefingWriter, Digest};
pub use config::{Config, RendererKind, RunMode, RunSettings, ScrapeSettings};
pub use error::{Error, Result};
pub use extractor::ContentExtractor;
pub use feed::{CandidateSource, GoogleNewsSource};
pub use history::HistoryStore;
pub use http::HttpFetcher;
pub use images::ImageSelector;
pub use ledger::SentLinkLedger;
pub use llm::TextGenerator;
pub use models::{CandidateEntry, HistoryRecord, ResolvedArticle, SelectedArticle};
pub use normalizer::UrlNormalizer;
pub use pipeline::{Pipeline, RunReport};
pub use renderer::{HttpRenderer, PageRenderer, PlaywrightRenderer};
pub use resolver::{ArticleResolver, ContentResolver};
pub use retry::{with_retry, RetryPolicy};
pub use selection::SelectionEngine;
pub use summarizer::Summarizer;
