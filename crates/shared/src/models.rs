use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// An unresolved article reference surfaced by a feed or search query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateEntry {
    pub title: String,
    /// Usually an aggregator wrapper link, sometimes the publisher URL itself.
    pub source_link: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Plain-text description from the feed, if it had one.
    pub snippet: Option<String>,
}

impl CandidateEntry {
    pub fn new(title: impl Into<String>, source_link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source_link: source_link.into(),
            published_at: None,
            snippet: None,
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        let snippet = snippet.into();
        if !snippet.trim().is_empty() {
            self.snippet = Some(snippet);
        }
        self
    }
}

/// A candidate whose publisher URL, body text and image have been resolved.
///
/// Only the content resolver constructs these, after the link passed the
/// normalizer and the body passed the length threshold, so holding one is
/// proof both checks succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArticle {
    title: String,
    canonical_link: String,
    body_text: String,
    image_url: Option<String>,
    summary: Option<String>,
    snippet: Option<String>,
}

impl ResolvedArticle {
    pub(crate) fn new(
        title: String,
        canonical_link: String,
        body_text: String,
        image_url: Option<String>,
        summary: Option<String>,
        snippet: Option<String>,
    ) -> Self {
        Self {
            title,
            canonical_link,
            body_text,
            image_url,
            summary,
            snippet,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn canonical_link(&self) -> &str {
        &self.canonical_link
    }

    pub fn body_text(&self) -> &str {
        &self.body_text
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    /// Model-written summary, if summarization succeeded.
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Best available description: model summary, then the feed snippet,
    /// then the opening of the body.
    pub fn summary_or_excerpt(&self) -> String {
        if let Some(summary) = self.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            return summary.trim().to_string();
        }
        if let Some(snippet) = self.snippet.as_deref().filter(|s| !s.trim().is_empty()) {
            return snippet.trim().to_string();
        }
        excerpt(&self.body_text, 200)
    }
}

/// One article in the final, ranked output handed to the downstream consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedArticle {
    pub title: String,
    pub link: String,
    /// Display text: the model summary when there is one, otherwise the
    /// feed snippet or a body excerpt.
    pub summary: String,
    /// The model summary alone. `None` means `summary` is a fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    pub image_url: Option<String>,
}

impl From<&ResolvedArticle> for SelectedArticle {
    fn from(article: &ResolvedArticle) -> Self {
        Self {
            title: article.title.clone(),
            link: article.canonical_link.clone(),
            summary: article.summary_or_excerpt(),
            ai_summary: article
                .summary
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            image_url: article.image_url.clone(),
        }
    }
}

/// A previously delivered article, kept as context for the next selection.
/// Image and body are not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub title: String,
    pub link: String,
    pub summary: String,
    pub sent_on: NaiveDate,
}

impl HistoryRecord {
    pub fn from_selected(article: &SelectedArticle, sent_on: NaiveDate) -> Self {
        Self {
            title: article.title.clone(),
            link: article.link.clone(),
            summary: article.summary.clone(),
            sent_on,
        }
    }
}

/// First `max_chars` characters of `text` with whitespace collapsed,
/// followed by an ellipsis when something was cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut out: String = collapsed.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(summary: Option<&str>, snippet: Option<&str>) -> ResolvedArticle {
        ResolvedArticle::new(
            "Title".to_string(),
            "https://example.com/news/1".to_string(),
            "Body   text\nwith  spacing".to_string(),
            None,
            summary.map(str::to_string),
            snippet.map(str::to_string),
        )
    }

    #[test]
    fn summary_prefers_model_output() {
        let a = article(Some("Model summary"), Some("Snippet"));
        assert_eq!(a.summary_or_excerpt(), "Model summary");
    }

    #[test]
    fn summary_falls_back_to_snippet_then_body() {
        assert_eq!(article(None, Some("Snippet")).summary_or_excerpt(), "Snippet");
        assert_eq!(
            article(Some("  "), None).summary_or_excerpt(),
            "Body text with spacing"
        );
    }

    #[test]
    fn excerpt_counts_characters_not_bytes() {
        let text = "물류센터 자동화 확대";
        assert_eq!(excerpt(text, 4), "물류센터...");
        assert_eq!(excerpt(text, 100), text);
    }

    #[test]
    fn empty_snippet_is_treated_as_absent() {
        let entry = CandidateEntry::new("t", "https://example.com/1").with_snippet("   ");
        assert_eq!(entry.snippet, None);
    }

    #[test]
    fn history_record_drops_image() {
        let selected = SelectedArticle {
            title: "t".into(),
            link: "https://example.com/1".into(),
            summary: "s".into(),
            ai_summary: None,
            image_url: Some("https://example.com/a.jpg".into()),
        };
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let json = serde_json::to_string(&HistoryRecord::from_selected(&selected, date)).unwrap();
        assert!(!json.contains("a.jpg"));
        assert!(json.contains("2026-10-16"));
    }

    #[test]
    fn fallback_summary_is_not_reported_as_model_output() {
        let with_model = SelectedArticle::from(&article(Some(" Model summary "), Some("Snippet")));
        assert_eq!(with_model.ai_summary.as_deref(), Some("Model summary"));
        assert_eq!(with_model.summary, "Model summary");

        let without = SelectedArticle::from(&article(None, Some("Snippet")));
        assert_eq!(without.summary, "Snippet");
        assert_eq!(without.ai_summary, None);
        let json = serde_json::to_value(&without).unwrap();
        assert!(json.get("ai_summary").is_none());

        let blank = SelectedArticle::from(&article(Some("  "), None));
        assert_eq!(blank.ai_summary, None);
    }
}
