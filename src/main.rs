use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use flairfeed::config::{Config, StrategyKind};
use flairfeed::pipeline;

#[derive(Parser, Debug)]
#[command(
    name = "flairfeed",
    version,
    about = "Filter a subreddit feed down to news-flaired posts linking to their articles"
)]
struct Args {
    /// Feed to filter
    #[arg(long, value_name = "URL")]
    feed: Option<String>,

    /// Where to write the rewritten feed (parent directories are created)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// How to look up each submission's flair and link
    #[arg(long, value_enum)]
    strategy: Option<StrategyKind>,

    /// Flair label that marks a submission as news
    #[arg(long)]
    flair: Option<String>,

    /// User agent sent with every request
    #[arg(long)]
    user_agent: Option<String>,

    /// Reddit application client id (falls back to REDDIT_CLIENT_ID)
    #[arg(long)]
    client_id: Option<String>,

    /// Reddit application client secret (falls back to REDDIT_CLIENT_SECRET)
    #[arg(long)]
    client_secret: Option<String>,

    /// Maximum number of submissions looked up at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Attempts per submission before giving up
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(feed) = self.feed {
            config.feed_url = feed;
        }
        if let Some(output) = self.output {
            config.output_path = output;
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        if let Some(flair) = self.flair {
            config.flair = flair;
        }
        if let Some(user_agent) = self.user_agent {
            config.user_agent = user_agent;
        }
        if let Some(client_id) = self.client_id {
            config.client_id = Some(client_id);
        }
        if let Some(client_secret) = self.client_secret {
            config.client_secret = Some(client_secret);
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --debug
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    args.apply(&mut config);
    config.apply_env();
    tracing::debug!(?config, "Effective configuration");

    let summary = pipeline::run(&config)
        .await
        .with_context(|| format!("Failed to filter {}", config.feed_url))?;

    tracing::info!(
        entries = summary.entries,
        skipped = summary.skipped,
        qualifying = summary.qualifying,
        not_qualifying = summary.not_qualifying,
        unresolvable = summary.unresolvable,
        "Run complete"
    );
    println!(
        "Wrote {} of {} entries to {} ({} not news, {} unresolvable)",
        summary.kept,
        summary.kept + summary.removed,
        config.output_path.display(),
        summary.not_qualifying,
        summary.unresolvable,
    );

    Ok(())
}
