//! One end-to-end run: fetch, parse, resolve, rewrite, write.
//!
//! Stages run strictly in order. Only the resolve stage fans out, and every
//! failure inside it stays attached to its entry; anything that escapes as a
//! [`PipelineError`] aborts the run before the output file is touched.

use std::path::Path;
use thiserror::Error;

use crate::config::{Config, StrategyKind};
use crate::feed::{self, FeedParseError, FetchError, RewriteError};
use crate::resolve::{self, PageScraper, RedditApi, ResolveError, SubmissionSource};
use crate::sink::{self, SinkError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Failed to fetch feed: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] FeedParseError),
    #[error("API strategy needs a client id and secret (set REDDIT_CLIENT_ID and REDDIT_CLIENT_SECRET)")]
    MissingCredentials,
    #[error("Reddit API authentication failed: {0}")]
    Auth(#[source] ResolveError),
    #[error("Failed to rewrite feed: {0}")]
    Rewrite(#[from] RewriteError),
    #[error(transparent)]
    Write(#[from] SinkError),
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Entries with a usable permalink.
    pub entries: usize,
    /// Entries dropped by the parser (no link, repeated permalink).
    pub skipped: usize,
    pub qualifying: usize,
    pub not_qualifying: usize,
    pub unresolvable: usize,
    /// Entries left in the written document.
    pub kept: usize,
    pub removed: usize,
}

/// Runs the pipeline with the strategy selected in `config`.
pub async fn run(config: &Config) -> Result<RunSummary, PipelineError> {
    let timeout = config.request_timeout();
    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(timeout) // Whole request, body included
        .build()
        .map_err(PipelineError::Client)?;

    match config.strategy {
        StrategyKind::Scrape => {
            let source = PageScraper::new(client.clone(), timeout);
            run_with(config, &client, &source).await
        }
        StrategyKind::Api => {
            let credentials = config
                .credentials()
                .ok_or(PipelineError::MissingCredentials)?;
            let source = RedditApi::connect(
                client.clone(),
                &credentials,
                &config.auth_base,
                &config.api_base,
                timeout,
            )
            .await
            .map_err(PipelineError::Auth)?;
            run_with(config, &client, &source).await
        }
    }
}

/// Runs the pipeline against an already constructed submission source.
pub async fn run_with<S: SubmissionSource>(
    config: &Config,
    client: &reqwest::Client,
    source: &S,
) -> Result<RunSummary, PipelineError> {
    tracing::info!(url = %config.feed_url, "Fetching feed");
    let raw = feed::fetch_feed(client, &config.feed_url, config.request_timeout()).await?;

    tracing::info!(bytes = raw.len(), "Parsing feed");
    let parsed = feed::parse_entries(&raw)?;
    let entries = parsed.entries.len();

    let report = resolve::resolve_all(
        source,
        &config.retry_policy(),
        &config.flair,
        parsed.entries,
        config.concurrency,
    )
    .await;

    tracing::info!(qualifying = report.mapping.len(), "Rewriting feed");
    let outcome = feed::rewrite(&raw, &report.mapping)?;

    write(&outcome.document, &config.output_path)?;

    Ok(RunSummary {
        entries,
        skipped: parsed.skipped,
        qualifying: report.qualifying(),
        not_qualifying: report.not_qualifying(),
        unresolvable: report.unresolvable(),
        kept: outcome.kept,
        removed: outcome.removed,
    })
}

fn write(document: &[u8], path: &Path) -> Result<(), SinkError> {
    tracing::info!(path = %path.display(), "Writing feed");
    sink::write_feed(document, path)
}
