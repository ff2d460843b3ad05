use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::Error;
use crate::llm::TextGenerator;
use crate::retry::{with_retry, RetryPolicy};

/// Bodies shorter than this are not worth a model call.
const MIN_SUMMARY_INPUT_CHARS: usize = 100;
/// Only the opening of the article is sent.
const MAX_INPUT_CHARS: usize = 2000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(45);

/// Writes the short per-article summaries the selection step ranks on.
pub struct Summarizer {
    generator: Arc<dyn TextGenerator>,
    semaphore: Arc<Semaphore>,
    language: String,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Summarizer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            // Keep concurrency low to stay under provider rate limits
            semaphore: Arc::new(Semaphore::new(2)),
            language: "Korean".to_string(),
            retry: RetryPolicy::model(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Upper bound on one summary, waiting for a permit included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Three-line summary of the article, or `None` if the body is too
    /// thin, every attempt failed or the deadline passed.
    pub async fn summarize(&self, title: &str, body: &str) -> Option<String> {
        if body.chars().count() < MIN_SUMMARY_INPUT_CHARS {
            return None;
        }
        match tokio::time::timeout(self.timeout, self.request(title, body)).await {
            Ok(summary) => summary,
            Err(_) => {
                warn!(title, timeout = ?self.timeout, "summary timed out");
                None
            }
        }
    }

    async fn request(&self, title: &str, body: &str) -> Option<String> {
        let _permit = self.semaphore.acquire().await.ok()?;

        let system = format!(
            "You are a news editor who delivers only the essentials. \
             Always answer in {}.",
            self.language
        );
        let user = format!(
            "Summarize the news article below in exactly three short lines that a \
             general reader can follow. Use only facts stated in the article.\n\n\
             [Title]: {}\n[Body]:\n{}",
            title,
            leading_chars(body, MAX_INPUT_CHARS)
        );

        let result = with_retry(self.retry, |_: &Error| true, |_| {
            self.generator.generate(&system, &user, false)
        })
        .await;

        match result {
            Ok(text) => {
                let text = text.trim().to_string();
                debug!(title, chars = text.chars().count(), "summarized");
                (!text.is_empty()).then_some(text)
            }
            Err(e) => {
                warn!(title, error = %e, "summary failed");
                None
            }
        }
    }
}

/// The first `max_chars` characters of `text`.
pub fn leading_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
