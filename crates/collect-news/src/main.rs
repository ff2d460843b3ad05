use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use shared::{
    BriefingWriter, Config, ContentResolver, Digest, GoogleNewsSource, HistoryStore, HttpFetcher,
    HttpRenderer, PageRenderer, Pipeline, PlaywrightRenderer, RendererKind, RunMode,
    SelectionEngine, SentLinkLedger, Summarizer, TextGenerator,
};
use std::io::{self as stdio, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "collect-news")]
#[command(about = "Collect, deduplicate and select the day's logistics news")]
struct Args {
    /// Run mode (daily, weekly)
    #[arg(short, long, default_value = "daily")]
    mode: String,

    /// Write the briefing and selected articles here as JSON instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Do everything except recording the delivery
    #[arg(long)]
    dry_run: bool,

    /// Number of articles to select (defaults to the mode's count)
    #[arg(short, long)]
    count: Option<usize>,

    /// Search window in hours (defaults to the mode's window)
    #[arg(long)]
    hours: Option<u32>,
}

/// Progress goes to stdout unless stdout carries the JSON result.
struct Console {
    to_stderr: bool,
}

impl Console {
    fn say(&self, line: impl AsRef<str>) {
        if self.to_stderr {
            eprintln!("{}", line.as_ref());
        } else {
            println!("{}", line.as_ref());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(stdio::stderr)
        .init();

    let args = Args::parse();
    let console = Console {
        to_stderr: args.output.is_none(),
    };

    let mode = RunMode::from_slug(&args.mode)
        .ok_or_else(|| anyhow::anyhow!("Invalid mode: {}. Use 'daily' or 'weekly'", args.mode))?;
    let config = Config::from_env()?;
    info!(
        provider = ?config.provider,
        model = %config.model,
        renderer = ?config.renderer,
        data_dir = %config.data_dir.display(),
        "configuration loaded"
    );

    let mut settings = config.run_settings(mode);
    if let Some(count) = args.count {
        settings.target_count = count;
    }
    if let Some(hours) = args.hours {
        settings.lookback_hours = hours;
    }

    console.say(format!(
        "📰 Collecting {:?} news: last {}h, {} articles",
        mode, settings.lookback_hours, settings.target_count
    ));

    let fetcher = HttpFetcher::new(&config.scrape).context("Failed to create HTTP client")?;
    let generator: Arc<dyn TextGenerator> = Arc::from(
        shared::llm::from_config(&config).context("Failed to create model client")?,
    );
    let renderer: Arc<dyn PageRenderer> = match config.renderer {
        RendererKind::Playwright => {
            let mut renderer = PlaywrightRenderer::new();
            if let Some(ua) = config.scrape.user_agents.first() {
                renderer = renderer.with_user_agent(ua.clone());
            }
            renderer.check().await.context(
                "Playwright renderer unavailable; install Node.js and playwright or set NEWS_RENDERER=http",
            )?;
            Arc::new(renderer)
        }
        RendererKind::Http => Arc::new(HttpRenderer::new(fetcher.clone())),
    };

    let resolver = ContentResolver::new(fetcher.clone(), renderer, &config.scrape)
        .with_summarizer(
            Summarizer::new(Arc::clone(&generator)).with_timeout(config.scrape.summary_timeout),
        );
    let source = GoogleNewsSource::new(fetcher, settings.clone());
    let pipeline = Pipeline::new(
        Arc::new(source),
        Arc::new(resolver),
        SelectionEngine::new(Arc::clone(&generator)),
        SentLinkLedger::new(config.ledger_path(mode)),
        HistoryStore::new(config.history_path(mode), settings.history_depth),
        &config.scrape,
    );

    console.say("\n🔎 Searching, resolving and selecting...");
    console.say("  (This may take a few minutes...)");
    let report = pipeline
        .run(settings.target_count)
        .await
        .context("News collection failed")?;

    console.say(format!("✓ Found {} candidates", report.found));
    if report.already_sent > 0 {
        console.say(format!("✓ Skipped {} already sent", report.already_sent));
    }
    console.say(format!(
        "✓ Resolved {} articles, {} new",
        report.resolved, report.fresh
    ));

    if report.selected.is_empty() {
        console.say("\nNo new articles to send.");
        return Ok(());
    }
    console.say(format!("✓ Selected {} articles", report.selected.len()));

    let briefing = BriefingWriter::new(generator)
        .write(&report.selected, mode)
        .await;
    if briefing.is_none() {
        console.say("⚠ Briefing unavailable, sending articles only");
    }
    let digest = Digest {
        briefing,
        articles: report.selected.clone(),
    };

    let json = serde_json::to_string_pretty(&digest).context("Failed to serialize digest")?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            console.say(format!("\n✅ Selection saved to: {}", path.display()));
        }
        None => {
            let mut stdout = stdio::stdout().lock();
            writeln!(stdout, "{json}")?;
            stdout.flush()?;
        }
    }

    if args.dry_run {
        console.say("\n⚠ Dry run: sent-link ledger and history left unchanged");
        return Ok(());
    }

    pipeline
        .commit(&report.selected, Local::now().date_naive())
        .context("Failed to record delivered links")?;
    console.say(format!(
        "✓ Recorded {} links in {}",
        report.selected.len(),
        config.ledger_path(mode).display()
    ));

    Ok(())
}
