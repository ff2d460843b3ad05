//! The short editor's note that opens a delivery: a few sentences on the
//! overall picture plus a handful of topic bullets, written in Markdown.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RunMode;
use crate::error::Error;
use crate::llm::TextGenerator;
use crate::models::SelectedArticle;
use crate::retry::{with_retry, RetryPolicy};

/// What one run hands to the downstream consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    /// Markdown overview of the selection, absent if it could not be written.
    pub briefing: Option<String>,
    pub articles: Vec<SelectedArticle>,
}

pub struct BriefingWriter {
    generator: Arc<dyn TextGenerator>,
    language: String,
    retry: RetryPolicy,
}

impl BriefingWriter {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            language: "Korean".to_string(),
            retry: RetryPolicy::model(),
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

    /// Markdown briefing over `articles`. Nothing selected means no model
    /// call and no briefing; a failed or empty reply is also `None`.
    pub async fn write(&self, articles: &[SelectedArticle], mode: RunMode) -> Option<String> {
        if articles.is_empty() {
            return None;
        }

        let system = system_prompt(mode, &self.language);
        let user = user_prompt(articles, mode);

        let result = with_retry(self.retry, |_: &Error| true, |_| {
            self.generator.generate(&system, &user, false)
        })
        .await;

        match result {
            Ok(text) => {
                let text = text.trim().to_string();
                debug!(?mode, chars = text.chars().count(), "briefing written");
                (!text.is_empty()).then_some(text)
            }
            Err(e) => {
                warn!(?mode, error = %e, "briefing failed");
                None
            }
        }
    }
}

fn system_prompt(mode: RunMode, language: &str) -> String {
    let role = match mode {
        RunMode::Daily => {
            "You are the editor of a morning logistics newsletter. Readers have two \
             minutes and want to know what happened yesterday."
        }
        RunMode::Weekly => {
            "You are a logistics industry analyst writing the weekly review. Readers \
             want the direction of the market, not a list of events."
        }
    };
    format!(
        "{role} Put company and organisation names in double quotes. \
         Always answer in {language}."
    )
}

fn user_prompt(articles: &[SelectedArticle], mode: RunMode) -> String {
    let context = articles
        .iter()
        .map(|a| format!("Title: {}\nSummary: {}", a.title, a.summary.replace('\n', " ")))
        .collect::<Vec<_>>()
        .join("\n\n");

    let layout = match mode {
        RunMode::Daily => {
            "Write today's briefing in Markdown:\n\
             ## 📰 a headline for the day\n\
             Two or three sentences on what matters most today.\n\
             ### ✨ Today's topics\n\
             Two or three bullets, one topic each, each a single sentence."
        }
        RunMode::Weekly => {
            "Write this week's review in Markdown:\n\
             ## 📊 a headline for the week's trend\n\
             Two or three sentences on how the market moved this week and why.\n\
             ### 🧐 Issues of the week\n\
             Two or three bullets, each naming an issue and what it means for the industry."
        }
    };

    format!("{layout}\n\nUse only the articles below.\n\n{context}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct NoteTaker {
        reply: Option<String>,
        calls: AtomicUsize,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl NoteTaker {
        fn replying(reply: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_string),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for NoteTaker {
        async fn generate(&self, system: &str, user: &str, json: bool) -> crate::Result<String> {
            assert!(!json);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push((system.to_string(), user.to_string()));
            self.reply.clone().ok_or_else(|| Error::Model("overloaded".into()))
        }
    }

    fn writer(generator: Arc<NoteTaker>) -> BriefingWriter {
        BriefingWriter::new(generator).with_retry_policy(RetryPolicy::new(2, Duration::from_millis(1)))
    }

    fn selected(title: &str, summary: &str) -> SelectedArticle {
        SelectedArticle {
            title: title.to_string(),
            link: format!("https://www.klnews.co.kr/news/{title}"),
            summary: summary.to_string(),
            ai_summary: None,
            image_url: None,
        }
    }

    #[tokio::test]
    async fn nothing_selected_means_no_briefing() {
        let g = NoteTaker::replying(Some("## 📰 unused"));
        assert_eq!(writer(g.clone()).write(&[], RunMode::Daily).await, None);
        assert_eq!(g.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn daily_briefing_lists_every_article() {
        let g = NoteTaker::replying(Some("  ## 📰 Cold chain expands\n\n- one  "));
        let articles = [
            selected("콜드체인 확대", "line one\nline two"),
            selected("화물차 운임 상승", "운임이 올랐다"),
        ];

        let note = writer(g.clone()).write(&articles, RunMode::Daily).await;

        assert_eq!(note.as_deref(), Some("## 📰 Cold chain expands\n\n- one"));
        let prompts = g.prompts.lock().unwrap();
        let (system, user) = &prompts[0];
        assert!(system.contains("Korean"));
        assert!(user.contains("## 📰"));
        assert!(user.contains("Title: 콜드체인 확대\nSummary: line one line two"));
        assert!(user.contains("Title: 화물차 운임 상승"));
        assert!(!user.contains("## 📊"));
    }

    #[tokio::test]
    async fn weekly_briefing_asks_for_trends() {
        let g = NoteTaker::replying(Some("## 📊 Automation keeps growing"));
        writer(g.clone())
            .write(&[selected("물류 로봇", "도입 확대")], RunMode::Weekly)
            .await;

        let prompts = g.prompts.lock().unwrap();
        let (system, user) = &prompts[0];
        assert!(system.contains("weekly review"));
        assert!(user.contains("## 📊"));
        assert!(user.contains("### 🧐"));
        assert!(!user.contains("## 📰"));
    }

    #[tokio::test]
    async fn failed_or_blank_replies_give_no_briefing() {
        let failing = NoteTaker::replying(None);
        let articles = [selected("t", "s")];
        assert_eq!(writer(failing.clone()).write(&articles, RunMode::Daily).await, None);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);

        let blank = NoteTaker::replying(Some("   "));
        assert_eq!(writer(blank).write(&articles, RunMode::Daily).await, None);
    }

    #[test]
    fn digest_serializes_briefing_and_articles() {
        let digest = Digest {
            briefing: None,
            articles: vec![selected("t", "s")],
        };
        let json = serde_json::to_value(&digest).unwrap();
        assert!(json["briefing"].is_null());
        assert_eq!(json["articles"][0]["title"], "t");
    }
}
