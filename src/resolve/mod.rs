//! Per-entry resolution: is a submission flaired as news, and where does it link?
//!
//! Two interchangeable [`SubmissionSource`] implementations supply the raw
//! facts about a submission:
//!
//! - [`scrape`] - fetches the rendered permalink page and reads the flair and
//!   outbound link from the HTML
//! - [`api`] - asks the Reddit API for the submission record
//!
//! Both feed the same qualification predicate ([`classify`]) and run under
//! the same [`RetryPolicy`]; only the set of errors worth retrying differs,
//! and each source decides that through [`SubmissionSource::is_transient`].
//!
//! [`resolve_all`] drives every entry of a feed through a bounded number of
//! concurrent resolutions and collects the qualifying ones into a
//! [`UrlMapping`].

pub mod api;
mod retry;
pub mod scrape;

pub use api::{ApiCredentials, RedditApi};
pub use retry::{RetryError, RetryPolicy};
pub use scrape::PageScraper;

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use thiserror::Error;

use crate::feed::FeedEntry;
use crate::util::article_url;

/// Flair label of the community's news category.
pub const NEWS_FLAIR: &str = ":post-news: News";

/// Errors a [`SubmissionSource`] can report for a single submission.
///
/// Whether a variant is retried depends on the source: scraping retries
/// timeouts and connection failures, the API retries 403 and 429 responses.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Forbidden (HTTP 403)")]
    Forbidden,
    #[error("Rate limited (HTTP 429)")]
    RateLimited,
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Page has no flair link")]
    MissingFlair,
    #[error("Flair link is malformed: {0}")]
    MalformedFlair(String),
    #[error("Not a submission permalink: {0}")]
    InvalidPermalink(String),
    #[error("Submission not found")]
    NotFound,
    #[error("Invalid response body: {0}")]
    Decode(String),
}

/// What a source learned about one submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inspection {
    /// Flair label, `None` when the submission carries no flair.
    pub flair: Option<String>,
    /// Outbound link as found, possibly relative to the permalink.
    pub article_url: Option<String>,
}

/// A place that can tell us a submission's flair and outbound link.
pub trait SubmissionSource {
    /// Looks up the submission behind `permalink`. Makes one attempt; retrying
    /// is the caller's business.
    fn inspect(
        &self,
        permalink: &str,
    ) -> impl Future<Output = Result<Inspection, ResolveError>> + Send;

    /// Whether `error` may go away if the same request is made again.
    fn is_transient(&self, error: &ResolveError) -> bool;
}

/// Why an entry could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    /// A failure that retrying would not fix (malformed page, missing fields).
    Terminal(String),
    /// Every attempt failed transiently.
    Exhausted { attempts: u32, last_error: String },
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unresolved::Terminal(reason) => f.write_str(reason),
            Unresolved::Exhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {attempts} attempts: {last_error}"),
        }
    }
}

/// Outcome of resolving one feed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionResult {
    Qualifying(String),
    NotQualifying,
    Unresolvable(Unresolved),
}

/// Permalink to article URL, for qualifying entries only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlMapping {
    urls: HashMap<String, String>,
}

impl UrlMapping {
    /// Records an article URL. Returns false, leaving the mapping untouched,
    /// if the permalink is already present.
    pub fn insert(&mut self, permalink: String, article_url: String) -> bool {
        match self.urls.entry(permalink) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(article_url);
                true
            }
        }
    }

    pub fn get(&self, permalink: &str) -> Option<&str> {
        self.urls.get(permalink).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// One entry and what became of it.
#[derive(Debug, Clone)]
pub struct EntryOutcome {
    pub entry: FeedEntry,
    pub result: ResolutionResult,
}

/// Everything the resolve stage produced.
#[derive(Debug, Clone, Default)]
pub struct ResolveReport {
    pub mapping: UrlMapping,
    /// One outcome per input entry, in document order.
    pub outcomes: Vec<EntryOutcome>,
}

impl ResolveReport {
    pub fn qualifying(&self) -> usize {
        self.count(|r| matches!(r, ResolutionResult::Qualifying(_)))
    }

    pub fn not_qualifying(&self) -> usize {
        self.count(|r| matches!(r, ResolutionResult::NotQualifying))
    }

    pub fn unresolvable(&self) -> usize {
        self.count(|r| matches!(r, ResolutionResult::Unresolvable(_)))
    }

    fn count(&self, pred: impl Fn(&ResolutionResult) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.result)).count()
    }
}

/// Applies the qualification predicate to an inspection.
///
/// A submission qualifies when its flair equals `label` exactly. A
/// qualifying submission still needs a usable outbound link: one that
/// resolves, relative to the permalink if need be, to an http(s) URL.
pub fn classify(permalink: &str, inspection: Inspection, label: &str) -> ResolutionResult {
    if inspection.flair.as_deref() != Some(label) {
        return ResolutionResult::NotQualifying;
    }

    let Some(href) = inspection.article_url else {
        return ResolutionResult::Unresolvable(Unresolved::Terminal(
            "no outbound article link".to_string(),
        ));
    };

    match article_url(&href, permalink) {
        Ok(url) => ResolutionResult::Qualifying(url),
        Err(e) => ResolutionResult::Unresolvable(Unresolved::Terminal(format!(
            "unusable article link {href:?}: {e}"
        ))),
    }
}

/// Resolves a single entry, retrying transient failures per `policy`.
pub async fn resolve_entry<S: SubmissionSource>(
    source: &S,
    policy: &RetryPolicy,
    label: &str,
    entry: &FeedEntry,
) -> ResolutionResult {
    let permalink = entry.permalink.as_str();
    let attempt = policy
        .run(
            move |attempt| {
                tracing::debug!(permalink = %permalink, attempt, "Inspecting submission");
                source.inspect(permalink)
            },
            |e| source.is_transient(e),
        )
        .await;

    match attempt {
        Ok(inspection) => classify(permalink, inspection, label),
        Err(RetryError::Permanent(e)) => {
            ResolutionResult::Unresolvable(Unresolved::Terminal(e.to_string()))
        }
        Err(RetryError::Exhausted { attempts, last }) => {
            tracing::warn!(
                permalink = %permalink,
                attempts,
                error = %last,
                "Retry limit reached, dropping entry"
            );
            ResolutionResult::Unresolvable(Unresolved::Exhausted {
                attempts,
                last_error: last.to_string(),
            })
        }
    }
}

/// Resolves every entry, up to `concurrency` at a time.
///
/// Each entry runs its own retry loop, so a struggling entry never holds up
/// or cancels the others beyond occupying one concurrency slot. Results are
/// gathered by this function alone, which is the only writer of the mapping.
pub async fn resolve_all<S: SubmissionSource>(
    source: &S,
    policy: &RetryPolicy,
    label: &str,
    entries: Vec<FeedEntry>,
    concurrency: usize,
) -> ResolveReport {
    let mut outcomes: Vec<EntryOutcome> = stream::iter(entries)
        .map(|entry| async move {
            tracing::info!(permalink = %entry.permalink, "Fetching");
            let result = resolve_entry(source, policy, label, &entry).await;
            EntryOutcome { entry, result }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    outcomes.sort_by_key(|o| o.entry.position);

    let mut mapping = UrlMapping::default();
    for outcome in &outcomes {
        let permalink = &outcome.entry.permalink;
        match &outcome.result {
            ResolutionResult::Qualifying(url) => {
                if mapping.insert(permalink.clone(), url.clone()) {
                    tracing::info!(permalink = %permalink, article = %url, "Recording");
                } else {
                    tracing::warn!(permalink = %permalink, "Permalink already recorded, ignoring");
                }
            }
            ResolutionResult::NotQualifying => {
                tracing::info!(permalink = %permalink, "Not news");
            }
            ResolutionResult::Unresolvable(reason) => {
                tracing::info!(permalink = %permalink, reason = %reason, "Unresolvable");
            }
        }
    }

    ResolveReport { mapping, outcomes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const PERMALINK: &str = "https://www.reddit.com/r/formula1/comments/abc/title/";

    fn news(url: &str) -> Inspection {
        Inspection {
            flair: Some(NEWS_FLAIR.to_string()),
            article_url: Some(url.to_string()),
        }
    }

    fn entry(permalink: &str, position: usize) -> FeedEntry {
        FeedEntry {
            permalink: permalink.to_string(),
            position,
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(2))
    }

    /// Scripted source: each permalink replays its queue of responses, then
    /// repeats the last one.
    struct ScriptedSource {
        script: Mutex<HashMap<String, Vec<Result<Inspection, fn() -> ResolveError>>>>,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(script: Vec<(&str, Vec<Result<Inspection, fn() -> ResolveError>>)>) -> Self {
            Self {
                script: Mutex::new(
                    script
                        .into_iter()
                        .map(|(k, v)| (k.to_string(), v))
                        .collect(),
                ),
                calls: AtomicU32::new(0),
            }
        }
    }

    impl SubmissionSource for ScriptedSource {
        async fn inspect(&self, permalink: &str) -> Result<Inspection, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let queue = script.get_mut(permalink).expect("unscripted permalink");
            let next = if queue.len() > 1 {
                queue.remove(0)
            } else {
                queue[0].clone()
            };
            next.map_err(|make| make())
        }

        fn is_transient(&self, error: &ResolveError) -> bool {
            matches!(error, ResolveError::RateLimited)
        }
    }

    fn rate_limited() -> ResolveError {
        ResolveError::RateLimited
    }

    fn missing_flair() -> ResolveError {
        ResolveError::MissingFlair
    }

    #[test]
    fn test_classify_news_with_link() {
        assert_eq!(
            classify(PERMALINK, news("https://example.com/a"), NEWS_FLAIR),
            ResolutionResult::Qualifying("https://example.com/a".to_string())
        );
    }

    #[test]
    fn test_classify_other_flair() {
        let inspection = Inspection {
            flair: Some(":post-discussion: Discussion".to_string()),
            article_url: Some("https://example.com/a".to_string()),
        };
        assert_eq!(
            classify(PERMALINK, inspection, NEWS_FLAIR),
            ResolutionResult::NotQualifying
        );
    }

    #[test]
    fn test_classify_no_flair() {
        let inspection = Inspection {
            flair: None,
            article_url: Some("https://example.com/a".to_string()),
        };
        assert_eq!(
            classify(PERMALINK, inspection, NEWS_FLAIR),
            ResolutionResult::NotQualifying
        );
    }

    #[test]
    fn test_classify_news_without_link_is_unresolvable() {
        let inspection = Inspection {
            flair: Some(NEWS_FLAIR.to_string()),
            article_url: None,
        };
        assert!(matches!(
            classify(PERMALINK, inspection, NEWS_FLAIR),
            ResolutionResult::Unresolvable(Unresolved::Terminal(_))
        ));
    }

    #[test]
    fn test_classify_keeps_absolute_link_as_found() {
        assert_eq!(
            classify(PERMALINK, news("  https://example.com  "), NEWS_FLAIR),
            ResolutionResult::Qualifying("https://example.com".to_string())
        );
        assert_eq!(
            classify(PERMALINK, news("https://Example.com/a%7eb?x=1&y"), NEWS_FLAIR),
            ResolutionResult::Qualifying("https://Example.com/a%7eb?x=1&y".to_string())
        );
    }

    #[test]
    fn test_classify_news_with_bad_scheme_is_unresolvable() {
        assert!(matches!(
            classify(PERMALINK, news("javascript:void(0)"), NEWS_FLAIR),
            ResolutionResult::Unresolvable(Unresolved::Terminal(_))
        ));
    }

    #[test]
    fn test_classify_is_case_and_whitespace_sensitive() {
        for flair in [":post-news: news", " :post-news: News", "News"] {
            let inspection = Inspection {
                flair: Some(flair.to_string()),
                article_url: Some("https://example.com/a".to_string()),
            };
            assert_eq!(
                classify(PERMALINK, inspection, NEWS_FLAIR),
                ResolutionResult::NotQualifying,
                "flair {flair:?} should not qualify"
            );
        }
    }

    proptest! {
        #[test]
        fn prop_only_exact_label_qualifies(flair in ".*") {
            let inspection = Inspection {
                flair: Some(flair.clone()),
                article_url: Some("https://example.com/a".to_string()),
            };
            let result = classify(PERMALINK, inspection, NEWS_FLAIR);
            if flair == NEWS_FLAIR {
                prop_assert_eq!(result, ResolutionResult::Qualifying("https://example.com/a".to_string()));
            } else {
                prop_assert_eq!(result, ResolutionResult::NotQualifying);
            }
        }

        #[test]
        fn prop_classify_is_deterministic(flair in proptest::option::of(".{0,20}"), path in "[a-z]{1,10}") {
            let inspection = Inspection {
                flair,
                article_url: Some(format!("https://example.com/{path}")),
            };
            let first = classify(PERMALINK, inspection.clone(), NEWS_FLAIR);
            let second = classify(PERMALINK, inspection, NEWS_FLAIR);
            prop_assert_eq!(first, second);
        }
    }

    #[test]
    fn test_mapping_rejects_second_insert() {
        let mut mapping = UrlMapping::default();
        assert!(mapping.insert(PERMALINK.to_string(), "https://example.com/a".to_string()));
        assert!(!mapping.insert(PERMALINK.to_string(), "https://example.com/b".to_string()));
        assert_eq!(mapping.get(PERMALINK), Some("https://example.com/a"));
        assert_eq!(mapping.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_entry_retries_transient_then_succeeds() {
        let source = ScriptedSource::new(vec![(
            PERMALINK,
            vec![
                Err(rate_limited),
                Err(rate_limited),
                Ok(news("https://example.com/b")),
            ],
        )]);

        let result =
            resolve_entry(&source, &fast_policy(10), NEWS_FLAIR, &entry(PERMALINK, 0)).await;

        assert_eq!(
            result,
            ResolutionResult::Qualifying("https://example.com/b".to_string())
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_resolve_entry_gives_up_at_cap() {
        let source = ScriptedSource::new(vec![(PERMALINK, vec![Err(rate_limited)])]);

        let result =
            resolve_entry(&source, &fast_policy(4), NEWS_FLAIR, &entry(PERMALINK, 0)).await;

        assert!(matches!(
            result,
            ResolutionResult::Unresolvable(Unresolved::Exhausted { attempts: 4, .. })
        ));
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_resolve_entry_does_not_retry_terminal_error() {
        let source = ScriptedSource::new(vec![(PERMALINK, vec![Err(missing_flair)])]);

        let result =
            resolve_entry(&source, &fast_policy(10), NEWS_FLAIR, &entry(PERMALINK, 0)).await;

        assert_eq!(
            result,
            ResolutionResult::Unresolvable(Unresolved::Terminal(
                "Page has no flair link".to_string()
            ))
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_entry_is_idempotent() {
        let source = ScriptedSource::new(vec![(PERMALINK, vec![Ok(news("https://example.com/a"))])]);
        let policy = fast_policy(3);

        let first = resolve_entry(&source, &policy, NEWS_FLAIR, &entry(PERMALINK, 0)).await;
        let second = resolve_entry(&source, &policy, NEWS_FLAIR, &entry(PERMALINK, 0)).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_resolve_all_builds_mapping_from_qualifying_only() {
        let a = "https://www.reddit.com/r/formula1/comments/a/x/";
        let b = "https://www.reddit.com/r/formula1/comments/b/x/";
        let c = "https://www.reddit.com/r/formula1/comments/c/x/";
        let d = "https://www.reddit.com/r/formula1/comments/d/x/";
        let source = ScriptedSource::new(vec![
            (a, vec![Ok(news("https://example.com/a"))]),
            (
                b,
                vec![Ok(Inspection {
                    flair: Some(":post-video: Video".to_string()),
                    article_url: None,
                })],
            ),
            (c, vec![Err(missing_flair)]),
            (d, vec![Err(rate_limited)]),
        ]);

        let report = resolve_all(
            &source,
            &fast_policy(3),
            NEWS_FLAIR,
            vec![entry(a, 0), entry(b, 1), entry(c, 2), entry(d, 3)],
            4,
        )
        .await;

        assert_eq!(report.mapping.len(), 1);
        assert_eq!(report.mapping.get(a), Some("https://example.com/a"));
        assert_eq!(report.qualifying(), 1);
        assert_eq!(report.not_qualifying(), 1);
        assert_eq!(report.unresolvable(), 2);

        let positions: Vec<usize> = report.outcomes.iter().map(|o| o.entry.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_resolve_all_retry_budgets_are_per_entry() {
        let a = "https://www.reddit.com/r/formula1/comments/a/x/";
        let b = "https://www.reddit.com/r/formula1/comments/b/x/";
        let source = ScriptedSource::new(vec![
            (a, vec![Err(rate_limited), Err(rate_limited), Ok(news("https://example.com/a"))]),
            (b, vec![Err(rate_limited), Err(rate_limited), Ok(news("https://example.com/b"))]),
        ]);

        // Three attempts each: a shared budget would starve one of them.
        let report = resolve_all(
            &source,
            &fast_policy(3),
            NEWS_FLAIR,
            vec![entry(a, 0), entry(b, 1)],
            2,
        )
        .await;

        assert_eq!(report.mapping.len(), 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_resolve_all_empty_feed() {
        let source = ScriptedSource::new(vec![]);
        let report = resolve_all(&source, &fast_policy(3), NEWS_FLAIR, Vec::new(), 4).await;
        assert!(report.mapping.is_empty());
        assert!(report.outcomes.is_empty());
    }
}
