use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::Error;
use crate::llm::{extract_json_object, TextGenerator};
use crate::models::{HistoryRecord, ResolvedArticle, SelectedArticle};
use crate::retry::{with_retry, RetryPolicy};

const SYSTEM_PROMPT: &str = "You are a senior news editor. You pick the most important \
stories for today's briefing and never send readers the same story twice.";

/// Picks the final ranked list from resolved candidates, folding same-event
/// stories together and steering away from what was already delivered.
pub struct SelectionEngine {
    generator: Arc<dyn TextGenerator>,
    retry: RetryPolicy,
}

impl SelectionEngine {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            retry: RetryPolicy::model(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// At most `target_count` articles in the model's rank order. Falls back
    /// to the first `target_count` candidates when the model never gives a
    /// usable answer.
    pub async fn select(
        &self,
        candidates: &[ResolvedArticle],
        history: &[HistoryRecord],
        target_count: usize,
    ) -> Vec<SelectedArticle> {
        if candidates.is_empty() || target_count == 0 {
            return Vec::new();
        }

        let want = target_count.min(candidates.len());
        let prompt = build_prompt(candidates, history, want);

        let generator = &self.generator;
        let prompt = prompt.as_str();
        let len = candidates.len();
        let picked = with_retry(self.retry, |_: &Error| true, |_| async move {
            let text = generator.generate(SYSTEM_PROMPT, prompt, true).await?;
            parse_selected_indices(&text, len)
        })
        .await;

        let indices = match picked {
            Ok(indices) => {
                info!(picked = indices.len(), of = candidates.len(), "model selection");
                indices.into_iter().take(target_count).collect()
            }
            Err(e) => {
                warn!(error = %e, "selection failed, keeping the first {want} candidates");
                fallback_indices(candidates.len(), target_count)
            }
        };

        indices
            .into_iter()
            .map(|i| SelectedArticle::from(&candidates[i]))
            .collect()
    }
}

fn build_prompt(candidates: &[ResolvedArticle], history: &[HistoryRecord], want: usize) -> String {
    let history_block = if history.is_empty() {
        "(no previously sent news)".to_string()
    } else {
        history
            .iter()
            .map(|h| format!("- {} / {}", h.title, h.summary.replace('\n', " ")))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let candidate_block = candidates
        .iter()
        .enumerate()
        .map(|(i, article)| {
            format!(
                "Article #{i}\nTitle: {}\nSummary: {}",
                article.title(),
                article.summary_or_excerpt()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"Recently sent news:
{history_block}

Candidate articles:
{candidate_block}

RULES (in priority order):
1. Several articles about the same event count as one. Keep only the representative with the most specific title and summary.
2. Skip any article whose topic overlaps the recently sent news, unless it reports a material new development.
3. Prefer reporting of facts and announcements over opinion, analysis, columns and interviews.
4. Return exactly {want} article numbers, most important first.

Respond as JSON:
{{"selected_indices": [3, 0, 7]}}"#
    )
}

/// Indices from a `{"selected_indices": [...]}` reply. Entries that are not
/// non-negative integers below `len` are dropped and repeats are kept once.
/// Anything that is not a JSON object with that array is an error.
pub fn parse_selected_indices(text: &str, len: usize) -> crate::Result<Vec<usize>> {
    let json = extract_json_object(text)
        .ok_or_else(|| Error::Parse("no JSON object in selection reply".to_string()))?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| Error::Parse(format!("selection reply is not valid JSON: {e}")))?;
    let entries = value
        .get("selected_indices")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Parse("selection reply has no selected_indices array".to_string()))?;

    let mut seen = HashSet::new();
    Ok(entries
        .iter()
        .filter_map(Value::as_u64)
        .filter_map(|i| usize::try_from(i).ok())
        .filter(|&i| i < len && seen.insert(i))
        .collect())
}

fn fallback_indices(len: usize, target_count: usize) -> Vec<usize> {
    (0..len.min(target_count)).collect()
}
