use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Which text-generation backend to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenAi,
}

impl Provider {
    fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Some(Provider::Anthropic),
            "openai" | "gpt" => Some(Provider::OpenAi),
            _ => None,
        }
    }

    fn key_var(&self) -> &'static str {
        match self {
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Provider::Anthropic => "claude-3-5-haiku-20241022",
            Provider::OpenAi => "gpt-4o-mini",
        }
    }
}

/// How aggregator wrapper pages get rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererKind {
    /// Headless Chromium through Node + Playwright.
    Playwright,
    /// Plain HTTP GET, following server-side redirects only.
    Http,
}

/// Daily and weekly runs search different keywords over different windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Daily,
    Weekly,
}

impl RunMode {
    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "daily" => Some(RunMode::Daily),
            "weekly" => Some(RunMode::Weekly),
            _ => None,
        }
    }
}

/// Per-mode search and selection parameters.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub mode: RunMode,
    pub lookback_hours: u32,
    pub target_count: usize,
    pub max_candidates: usize,
    /// Number of previous runs the selection engine gets to see.
    pub history_depth: usize,
    pub keyword_groups: Vec<Vec<String>>,
    pub exclude_terms: Vec<String>,
}

fn groups(raw: &[&[&str]]) -> Vec<Vec<String>> {
    raw.iter()
        .map(|g| g.iter().map(|s| s.to_string()).collect())
        .collect()
}

fn strings(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

impl RunSettings {
    pub fn for_mode(mode: RunMode) -> Self {
        match mode {
            RunMode::Daily => Self {
                mode,
                lookback_hours: 24,
                target_count: 10,
                max_candidates: 30,
                history_depth: 1,
                keyword_groups: groups(&[
                    &["물류", "화물", "운송", "배송", "물류산업"],
                    &["육상운송", "화물차", "트럭", "물류센터", "물류창고"],
                    &["풀필먼트", "콜드체인", "라스트마일", "미들마일"],
                    &["공급망", "SCM", "이커머스 물류", "3PL", "디지털 물류"],
                    &["스마트물류", "물류자동화", "물류기술", "물류 로봇"],
                    &["화물 주선", "운송 중개", "화물정보망", "화물운송플랫폼"],
                ]),
                exclude_terms: strings(&["해운", "항공"]),
            },
            RunMode::Weekly => Self {
                mode,
                lookback_hours: 168,
                target_count: 15,
                max_candidates: 60,
                history_depth: 1,
                keyword_groups: groups(&[
                    &["물류산업 동향", "공급망 관리", "SCM", "물류 M&A", "이커머스 물류"],
                    &["육상운송", "화물차 파업", "물류센터", "철도운송", "콜드체인"],
                    &["해상운송", "항공운송", "컨테이너선", "항공화물", "해상운임"],
                    &["스마트물류", "물류자동화", "물류 로봇", "디지털 물류", "AI 물류"],
                ]),
                exclude_terms: Vec::new(),
            },
        }
    }
}

/// Scraping, validation and concurrency knobs. Defaults mirror what the
/// Korean news sites we read actually need.
#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    pub ad_domain_blacklist: Vec<String>,
    /// Hosts whose homepages count as articles.
    pub homepage_allow_hosts: Vec<String>,
    pub unwanted_url_patterns: Vec<String>,
    /// Search/news indexes whose links wrap the real publisher URL.
    pub aggregator_hosts: Vec<String>,
    pub image_blocked_hosts: Vec<String>,
    pub unwanted_image_patterns: Vec<String>,
    pub body_selectors: Vec<String>,
    pub user_agents: Vec<String>,
    pub default_image_url: String,
    pub min_image_width: u32,
    pub min_image_height: u32,
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
    /// Extra floor favouring landscape images; `None` disables it.
    pub min_wide_ratio: Option<f64>,
    pub min_body_chars: usize,
    pub http_timeout: Duration,
    pub image_timeout: Duration,
    pub render_timeout: Duration,
    /// Deadline for finding the publisher link and its body text.
    pub task_timeout: Duration,
    /// Total time spent validating image candidates for one article.
    pub image_budget: Duration,
    /// Total time one article may wait for its summary, permit included.
    pub summary_timeout: Duration,
    /// Image downloads larger than this are refused.
    pub max_image_bytes: u64,
    pub resolve_workers: usize,
    pub render_workers: usize,
}

impl ScrapeSettings {
    /// Outer deadline for one candidate: the required stage plus both
    /// optional enrichments.
    pub fn task_deadline(&self) -> Duration {
        self.task_timeout + self.image_budget + self.summary_timeout
    }
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            ad_domain_blacklist: strings(&[
                "contentsfeed.com",
                "googleadservices.com",
                "doubleclick.net",
                "msn.com",
                "nate.com",
                "zum.com",
                "ads.mtgroup.kr",
            ]),
            homepage_allow_hosts: strings(&["hyundai.co.kr"]),
            unwanted_url_patterns: strings(&[
                "/admin/",
                "/login",
                "LoginForm.html",
                "/join/",
                "/member/",
                "v.daum.net/v/",
                "cooper=RSS",
                "articleList.html",
            ]),
            aggregator_hosts: strings(&["news.google.com"]),
            image_blocked_hosts: strings(&["news.google.com", "googleusercontent.com"]),
            unwanted_image_patterns: strings(&[
                "logo",
                "icon",
                "favicon",
                "banner",
                "btn",
                "button",
                "spinner",
                "loading",
                "spacer.gif",
                "1x1.gif",
                "gravatar.com",
                "googleusercontent.com/profile",
                "profile_img",
                "avatar",
            ]),
            body_selectors: strings(&[
                "#article-view-content-div",
                "#articleBody",
                "#articeBody",
                "#newsct_article",
                "#article_body",
                ".article_body",
                ".article-body",
                ".news_body",
                "[itemprop=articleBody]",
                "article",
            ]),
            user_agents: strings(&[
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:129.0) Gecko/20100101 Firefox/129.0",
            ]),
            default_image_url: "https://via.placeholder.com/600x300.png?text=News".to_string(),
            min_image_width: 300,
            min_image_height: 150,
            min_aspect_ratio: 0.25,
            max_aspect_ratio: 4.0,
            min_wide_ratio: Some(1.2),
            min_body_chars: 200,
            http_timeout: Duration::from_secs(10),
            image_timeout: Duration::from_secs(5),
            render_timeout: Duration::from_secs(20),
            task_timeout: Duration::from_secs(60),
            image_budget: Duration::from_secs(15),
            summary_timeout: Duration::from_secs(45),
            max_image_bytes: 8 * 1024 * 1024,
            resolve_workers: 4,
            render_workers: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub renderer: RendererKind,
    /// Holds the sent-link ledger and the history file.
    pub data_dir: PathBuf,
    /// Replaces the mode's keyword groups when set (`NEWS_KEYWORDS`).
    pub keyword_override: Option<Vec<Vec<String>>>,
    pub scrape: ScrapeSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::try_load_dotenv();

        let provider = match env::var("NEWS_PROVIDER") {
            Ok(name) => Provider::from_name(&name).with_context(|| {
                format!("NEWS_PROVIDER={name} is not supported. Use 'anthropic' or 'openai'.")
            })?,
            Err(_) => Provider::Anthropic,
        };

        let api_key = env::var(provider.key_var())
            .ok()
            .filter(|k| !k.trim().is_empty())
            .with_context(|| {
                format!(
                    "{key} not found.\n\n\
                    To fix this, create ~/.config/news-digest/.env with:\n  \
                    {key}=your_key_here\n\n\
                    Set NEWS_PROVIDER=openai to use OPENAI_API_KEY instead.",
                    key = provider.key_var()
                )
            })?;

        let model = env::var("NEWS_MODEL").unwrap_or_else(|_| provider.default_model().to_string());

        let renderer = match env::var("NEWS_RENDERER").as_deref() {
            Ok("http") => RendererKind::Http,
            _ => RendererKind::Playwright,
        };

        let data_dir = match env::var("NEWS_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::data_local_dir()
                .context("Could not determine local data directory")?
                .join("news-digest"),
        };

        let keyword_override = env::var("NEWS_KEYWORDS")
            .ok()
            .map(|raw| parse_keyword_groups(&raw))
            .filter(|g| !g.is_empty());

        Ok(Self {
            provider,
            api_key,
            model,
            renderer,
            data_dir,
            keyword_override,
            scrape: ScrapeSettings::default(),
        })
    }

    pub fn run_settings(&self, mode: RunMode) -> RunSettings {
        let mut settings = RunSettings::for_mode(mode);
        if let Some(groups) = &self.keyword_override {
            settings.keyword_groups = groups.clone();
        }
        settings
    }

    pub fn ledger_path(&self, mode: RunMode) -> PathBuf {
        match mode {
            RunMode::Daily => self.data_dir.join("sent_links.txt"),
            RunMode::Weekly => self.data_dir.join("sent_links_weekly.txt"),
        }
    }

    pub fn history_path(&self, mode: RunMode) -> PathBuf {
        match mode {
            RunMode::Daily => self.data_dir.join("history.json"),
            RunMode::Weekly => self.data_dir.join("history_weekly.json"),
        }
    }

    fn try_load_dotenv() {
        // 1. Current directory (for development)
        if dotenvy::dotenv().is_ok() {
            return;
        }

        // 2. ~/.config/news-digest/.env
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("news-digest").join(".env");
            if config_path.exists() && dotenvy::from_path(&config_path).is_ok() {
                return;
            }
        }

        // 3. ~/.env
        if let Some(home_dir) = dirs::home_dir() {
            let home_path = home_dir.join(".env");
            if home_path.exists() {
                let _ = dotenvy::from_path(&home_path);
            }
        }
    }
}

/// `a,b,c;d,e` → `[[a, b, c], [d, e]]`
fn parse_keyword_groups(raw: &str) -> Vec<Vec<String>> {
    raw.split(';')
        .map(|group| {
            group
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|g| !g.is_empty())
        .collect()
}
