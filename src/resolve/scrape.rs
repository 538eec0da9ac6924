use futures::StreamExt;
use scraper::{Html, Selector};
use std::sync::OnceLock;
use std::time::Duration;

use super::{Inspection, ResolveError, SubmissionSource};

const MAX_PAGE_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// Anchor pointing at the subreddit filtered by a flair, e.g.
/// `/r/formula1/?f=flair_name%3A%22%3Apost-news%3A%20News%22`.
const FLAIR_SELECTOR: &str = r#"a[href*="f=flair_name"]"#;

/// The post's outbound link: labelled, opens a new tab, no referrer.
const ARTICLE_SELECTOR: &str =
    r#"a[aria-label][target="_blank"][rel*="nofollow"][rel*="noopener"]"#;

fn flair_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse(FLAIR_SELECTOR).expect("flair selector is valid CSS"))
}

fn article_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR
        .get_or_init(|| Selector::parse(ARTICLE_SELECTOR).expect("article selector is valid CSS"))
}

/// Reads flair and outbound link from the rendered permalink page.
#[derive(Debug, Clone)]
pub struct PageScraper {
    client: reqwest::Client,
    timeout: Duration,
}

impl PageScraper {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn fetch_page(&self, permalink: &str) -> Result<String, ResolveError> {
        let response = tokio::time::timeout(self.timeout, self.client.get(permalink).send())
            .await
            .map_err(|_| ResolveError::Timeout)?
            .map_err(ResolveError::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                403 => ResolveError::Forbidden,
                429 => ResolveError::RateLimited,
                code => ResolveError::HttpStatus(code),
            });
        }

        let bytes = tokio::time::timeout(self.timeout, read_limited_bytes(response, MAX_PAGE_SIZE))
            .await
            .map_err(|_| ResolveError::Timeout)??;

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl SubmissionSource for PageScraper {
    async fn inspect(&self, permalink: &str) -> Result<Inspection, ResolveError> {
        let html = self.fetch_page(permalink).await?;
        inspect_page(&html)
    }

    fn is_transient(&self, error: &ResolveError) -> bool {
        match error {
            ResolveError::Timeout => true,
            ResolveError::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Extracts flair label and outbound link from a permalink page.
///
/// A page without a flair anchor is an error: either the layout changed or
/// the page is not a submission, and neither improves on a retry. A missing
/// outbound link is not an error here; only qualifying posts need one.
pub fn inspect_page(html: &str) -> Result<Inspection, ResolveError> {
    let document = Html::parse_document(html);

    let flair_href = document
        .select(flair_selector())
        .next()
        .and_then(|a| a.value().attr("href"))
        .ok_or(ResolveError::MissingFlair)?;

    let flair = flair_label(flair_href)?;

    let article_url = document
        .select(article_selector())
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty());

    Ok(Inspection {
        flair: Some(flair),
        article_url,
    })
}

/// Decodes the label out of a flair filter link.
///
/// The `f` query parameter reads `flair_name:"<label>"` once URL-decoded.
fn flair_label(href: &str) -> Result<String, ResolveError> {
    let (_, query) = href
        .split_once('?')
        .ok_or_else(|| ResolveError::MalformedFlair(href.to_string()))?;

    let filter = url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "f")
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| ResolveError::MalformedFlair(href.to_string()))?;

    let name = filter
        .strip_prefix("flair_name:")
        .ok_or_else(|| ResolveError::MalformedFlair(filter.clone()))?;

    let label = name
        .strip_prefix('"')
        .and_then(|n| n.strip_suffix('"'))
        .unwrap_or(name);

    Ok(label.to_string())
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ResolveError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ResolveError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ResolveError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ResolveError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
