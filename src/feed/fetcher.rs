use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while downloading the source feed.
///
/// Every variant is fatal for a run: without the feed there is nothing to
/// rewrite, so no retry happens at this layer.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with a 4xx/5xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Downloads the raw feed document.
///
/// Issues a single GET (redirects are followed by the client), rejects any
/// client or server error status, and returns the body bytes untouched so
/// the rewriter can later reproduce them verbatim.
///
/// # Errors
///
/// - [`FetchError::Timeout`] - no response headers, or no complete body, within `timeout`
/// - [`FetchError::Network`] - connection, TLS or body streaming failure
/// - [`FetchError::HttpStatus`] - 4xx or 5xx response
/// - [`FetchError::ResponseTooLarge`] - body over 10MB
/// - [`FetchError::IncompleteResponse`] - body shorter than `Content-Length`
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<Vec<u8>, FetchError> {
    let response = tokio::time::timeout(timeout, client.get(url).send())
        .await
        .map_err(|_| FetchError::Timeout(timeout))?
        .map_err(FetchError::Network)?;

    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        tracing::warn!(feed = %url, status = %status, "Feed request rejected");
        return Err(FetchError::HttpStatus(status.as_u16()));
    }

    // The body gets its own deadline: a server may send headers and then stall.
    let bytes = tokio::time::timeout(timeout, read_limited_bytes(response, MAX_FEED_SIZE))
        .await
        .map_err(|_| FetchError::Timeout(timeout))??;
    tracing::debug!(feed = %url, bytes = bytes.len(), "Feed downloaded");
    Ok(bytes)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    // EDGE-005: a dropped connection mid-body must not pass for a complete feed
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
