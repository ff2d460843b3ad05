use rand::seq::IndexedRandom;
use reqwest::header::{HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;

use crate::config::ScrapeSettings;
use crate::error::{Error, Result};
use crate::retry::{with_retry, RetryPolicy};

const FALLBACK_USER_AGENT: &str = "Mozilla/5.0 (compatible; NewsDigest/1.0)";

/// A fetched page body plus the URL it was finally served from.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: String,
    pub body: String,
}

/// Raw bytes plus the declared content type.
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Shared HTTP transport. Built once and cloned into workers; the inner
/// `reqwest::Client` is reference counted so clones share one pool.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    user_agents: Vec<String>,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(settings: &ScrapeSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.http_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            // consent and paywall interstitials bounce through cookie checks
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            user_agents: settings.user_agents.clone(),
            retry: RetryPolicy::transport(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn user_agent(&self) -> HeaderValue {
        self.user_agents
            .choose(&mut rand::rng())
            .and_then(|ua| HeaderValue::from_str(ua).ok())
            .unwrap_or_else(|| HeaderValue::from_static(FALLBACK_USER_AGENT))
    }

    /// GET with retry on 429/5xx and dropped connections. Any other non-2xx
    /// status is returned as `Error::Status` straight away.
    async fn get(&self, url: &str, timeout: Option<Duration>) -> Result<Response> {
        with_retry(self.retry, Error::is_transient, |attempt| async move {
            if attempt > 0 {
                debug!(url, attempt, "retrying GET");
            }
            let mut request = self.client.get(url).header(USER_AGENT, self.user_agent());
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(Error::Status {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }
            Ok(response)
        })
        .await
    }

    pub async fn fetch_html(&self, url: &str) -> Result<FetchedPage> {
        let response = self.get(url, None).await?;
        let final_url = response.url().to_string();
        let body = response.text().await?;
        Ok(FetchedPage { final_url, body })
    }

    /// Download at most `max_bytes`. A declared length over the cap is
    /// refused before the body is read; an undeclared one is cut off once
    /// the stream passes the cap.
    pub async fn fetch_bytes(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: u64,
    ) -> Result<FetchedBytes> {
        let mut response = self.get(url, Some(timeout)).await?;
        let too_large = || Error::TooLarge {
            url: url.to_string(),
            limit: max_bytes,
        };
        if response.content_length().is_some_and(|len| len > max_bytes) {
            return Err(too_large());
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if (bytes.len() + chunk.len()) as u64 > max_bytes {
                return Err(too_large());
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(FetchedBytes {
            content_type,
            bytes,
        })
    }
}
