use thiserror::Error;
use url::Url;

/// Errors that can occur while interpreting a URL taken from a feed or page.
#[derive(Error, Debug)]
pub enum UrlError {
    /// The URL string could not be parsed, even relative to its base.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host: {0}")]
    MissingHost(String),
}

/// Resolves an article link into an absolute, fetchable URL.
///
/// Hrefs scraped from a page may be relative, so they are joined onto the
/// permalink they were found on. Anything that does not end up as an
/// `http`/`https` URL with a host (`javascript:`, `mailto:`, ...) is rejected.
///
/// An href that is already absolute is returned as written (trimmed), not in
/// its normalized form: the feed must point at exactly the link the post
/// carries.
///
/// # Examples
///
/// ```
/// use flairfeed::util::article_url;
///
/// let base = "https://www.reddit.com/r/formula1/comments/abc/title/";
/// let url = article_url("https://example.com", base).unwrap();
/// assert_eq!(url, "https://example.com");
///
/// let url = article_url("/r/formula1/wiki", base).unwrap();
/// assert_eq!(url, "https://www.reddit.com/r/formula1/wiki");
///
/// assert!(article_url("javascript:alert(1)", base).is_err());
/// ```
pub fn article_url(href: &str, base: &str) -> Result<String, UrlError> {
    let href = href.trim();
    let (url, absolute) = match Url::parse(href) {
        Ok(url) => (url, true),
        Err(url::ParseError::RelativeUrlWithoutBase) => (Url::parse(base)?.join(href)?, false),
        Err(e) => return Err(e.into()),
    };

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_owned())),
    }

    if !matches!(url.host_str(), Some(host) if !host.is_empty()) {
        return Err(UrlError::MissingHost(url.to_string()));
    }

    Ok(if absolute { href.to_owned() } else { url.into() })
}

/// Canonical form of an entry link, used to match feed entries by permalink.
///
/// Absolute URLs are normalized (`HTTPS://WWW.Reddit.com/x` and
/// `https://www.reddit.com/x` share a key); anything else is only trimmed.
/// Applying it to its own output is a no-op.
///
/// ```
/// use flairfeed::util::permalink_key;
///
/// assert_eq!(
///     permalink_key(" HTTPS://WWW.Reddit.com/r/formula1/comments/abc/t/ "),
///     "https://www.reddit.com/r/formula1/comments/abc/t/"
/// );
/// assert_eq!(permalink_key("/relative/path"), "/relative/path");
/// ```
pub fn permalink_key(href: &str) -> String {
    let href = href.trim();
    match Url::parse(href) {
        Ok(url) => url.into(),
        Err(_) => href.to_owned(),
    }
}

/// Extracts the base-36 submission id from a Reddit permalink.
///
/// Permalinks look like `/r/<sub>/comments/<id>/<slug>/`; the id is the path
/// segment that follows `comments`. Returns `None` for anything else.
pub fn submission_id(permalink: &str) -> Option<String> {
    let url = Url::parse(permalink.trim()).ok()?;
    let mut segments = url.path_segments()?;
    segments.find(|s| *s == "comments")?;
    segments
        .next()
        .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|id| id.to_ascii_lowercase())
}
