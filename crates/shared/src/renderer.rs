use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::{Error, Result};
use crate::http::HttpFetcher;

/// The DOM of a page after it finished loading, and where it ended up.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub final_url: String,
    pub html: String,
}

/// Loads a page the way a browser would. Aggregator links forward to the
/// publisher with client-side script, so resolving them needs more than GET.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str, timeout: Duration) -> Result<RenderedPage>;
}

/// Server-side redirects only. Good enough for publisher links and for
/// aggregators that still answer with a 30x.
pub struct HttpRenderer {
    fetcher: HttpFetcher,
}

impl HttpRenderer {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    async fn render(&self, url: &str, timeout: Duration) -> Result<RenderedPage> {
        let page = tokio::time::timeout(timeout, self.fetcher.fetch_html(url))
            .await
            .map_err(|_| Error::Timeout(timeout))??;
        Ok(RenderedPage {
            final_url: page.final_url,
            html: page.body,
        })
    }
}

/// Headless Chromium driven by a small Node + Playwright script.
///
/// Expects `node` on PATH (or `node_bin`) and the `playwright` npm package
/// with Chromium installed. Each call launches its own browser, so callers
/// bound concurrency.
pub struct PlaywrightRenderer {
    node_bin: String,
    user_agent: Option<String>,
}

impl PlaywrightRenderer {
    pub fn new() -> Self {
        Self {
            node_bin: std::env::var("NEWS_NODE").unwrap_or_else(|_| "node".to_string()),
            user_agent: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Confirm Node.js starts and can load Playwright. Meant to run once
    /// before any network work, so a broken install stops the run instead
    /// of silently dropping every aggregator candidate.
    pub async fn check(&self) -> Result<()> {
        let deadline = Duration::from_secs(15);
        let status = tokio::process::Command::new(&self.node_bin)
            .arg("-e")
            .arg("require('playwright')")
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        let status = tokio::time::timeout(deadline, status)
            .await
            .map_err(|_| {
                Error::Config(format!("{} did not answer within {deadline:?}", self.node_bin))
            })?
            .map_err(|e| Error::Config(format!("rendering requires Node.js and Playwright: {e}")))?;
        if !status.success() {
            return Err(Error::Config(format!(
                "{} could not load the playwright package ({status})",
                self.node_bin
            )));
        }
        debug!(node = %self.node_bin, "playwright available");
        Ok(())
    }
}

impl Default for PlaywrightRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ScriptOutput {
    ok: bool,
    #[serde(default)]
    final_url: Option<String>,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

const RENDER_JS: &str = r#"
const fs = require('fs');
function out(obj) { process.stdout.write(JSON.stringify(obj)); }

async function main() {
  let req;
  try { req = JSON.parse(fs.readFileSync(0, 'utf8')); } catch (e) { return out({ ok: false, error: 'bad args' }); }
  let pw;
  try { pw = require('playwright'); } catch (e) { return out({ ok: false, error: 'playwright is not installed' }); }

  const timeoutMs = Number(req.timeout_ms || 20000);
  let browser;
  try {
    browser = await pw.chromium.launch({ headless: true, args: ['--disable-blink-features=AutomationControlled'] });
    const ctxOpts = { locale: 'ko-KR' };
    if (req.user_agent) ctxOpts.userAgent = req.user_agent;
    const context = await browser.newContext(ctxOpts);
    const page = await context.newPage();
    await page.route('**/*', (route) => {
      const rt = route.request().resourceType();
      if (rt === 'image' || rt === 'media' || rt === 'font') return route.abort();
      return route.continue();
    });
    await page.goto(req.url, { waitUntil: 'domcontentloaded', timeout: timeoutMs });
    await page.waitForSelector('a', { state: 'attached', timeout: timeoutMs });
    try { await page.waitForLoadState('networkidle', { timeout: Math.min(5000, timeoutMs) }); } catch (_) {}
    out({ ok: true, final_url: page.url(), html: await page.content() });
  } catch (e) {
    out({ ok: false, error: String(e && e.message ? e.message : e) });
  } finally {
    try { if (browser) await browser.close(); } catch (_) {}
  }
}

main().catch((e) => out({ ok: false, error: String(e) }));
"#;

#[async_trait]
impl PageRenderer for PlaywrightRenderer {
    async fn render(&self, url: &str, timeout: Duration) -> Result<RenderedPage> {
        let args = serde_json::json!({
            "url": url,
            "timeout_ms": timeout.as_millis() as u64,
            "user_agent": self.user_agent,
        })
        .to_string();

        let mut child = tokio::process::Command::new(&self.node_bin)
            .arg("-e")
            .arg(RENDER_JS)
            .kill_on_drop(true)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Config(format!("rendering requires Node.js and Playwright: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(args.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Render("missing stdout pipe".to_string()))?;

        // The script has its own timeout; this one catches a wedged browser.
        let hard_timeout = timeout + Duration::from_secs(10);
        let mut buf = Vec::new();
        let read = async {
            stdout.read_to_end(&mut buf).await?;
            child.wait().await
        };
        let status = tokio::time::timeout(hard_timeout, read)
            .await
            .map_err(|_| Error::Timeout(hard_timeout))??;
        debug!(url, ?status, bytes = buf.len(), "render finished");

        let output: ScriptOutput = serde_json::from_slice(&buf)
            .map_err(|e| Error::Render(format!("unreadable renderer output: {e}")))?;
        if !output.ok {
            return Err(Error::Render(
                output.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        Ok(RenderedPage {
            final_url: output.final_url.unwrap_or_else(|| url.to_string()),
            html: output.html.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScrapeSettings;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn http_renderer_follows_redirects() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/rss/articles/abc");
                then.status(302).header("location", "/news/42");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/news/42");
                then.status(200).body("<html><body>hi</body></html>");
            })
            .await;

        let fetcher = HttpFetcher::new(&ScrapeSettings::default()).unwrap();
        let page = HttpRenderer::new(fetcher)
            .render(&server.url("/rss/articles/abc"), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(page.final_url, server.url("/news/42"));
        assert!(page.html.contains("hi"));
    }

    #[tokio::test]
    async fn missing_node_is_a_config_error() {
        let renderer = PlaywrightRenderer {
            node_bin: "/nonexistent/node-binary".to_string(),
            user_agent: None,
        };
        let err = renderer
            .render("https://news.google.com/rss/articles/x", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    fn renderer_with(node_bin: &str) -> PlaywrightRenderer {
        PlaywrightRenderer {
            node_bin: node_bin.to_string(),
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn check_fails_without_node() {
        let err = renderer_with("/nonexistent/node-binary").check().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn check_reports_a_failing_interpreter() {
        // `false` exits non-zero like node does when the package is missing.
        let err = renderer_with("false").check().await.unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("playwright")));
        assert!(renderer_with("true").check().await.is_ok());
    }
}
