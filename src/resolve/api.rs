use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

use super::{Inspection, ResolveError, SubmissionSource};
use crate::util::submission_id;

pub const DEFAULT_AUTH_BASE: &str = "https://www.reddit.com";
pub const DEFAULT_API_BASE: &str = "https://oauth.reddit.com";

/// Application credentials for the client-credentials grant.
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Thing>,
}

#[derive(Debug, Deserialize)]
struct Thing {
    data: Submission,
}

#[derive(Debug, Deserialize)]
struct Submission {
    #[serde(default)]
    link_flair_text: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Looks submissions up through the Reddit API.
///
/// One application-only token is obtained in [`RedditApi::connect`] and
/// shared read-only by every lookup of the run.
#[derive(Debug, Clone)]
pub struct RedditApi {
    client: reqwest::Client,
    api_base: String,
    token: SecretString,
    timeout: Duration,
}

impl RedditApi {
    /// Authenticates against `{auth_base}/api/v1/access_token`.
    ///
    /// The client's configured user agent is sent with every request; Reddit
    /// rejects API calls without a descriptive one.
    pub async fn connect(
        client: reqwest::Client,
        credentials: &ApiCredentials,
        auth_base: &str,
        api_base: &str,
        timeout: Duration,
    ) -> Result<Self, ResolveError> {
        let token_url = format!("{}/api/v1/access_token", auth_base.trim_end_matches('/'));
        let request = client
            .post(&token_url)
            .basic_auth(
                &credentials.client_id,
                Some(credentials.client_secret.expose_secret()),
            )
            .form(&[("grant_type", "client_credentials")]);

        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| ResolveError::Timeout)?
            .map_err(ResolveError::Network)?;
        check_status(response.status())?;

        let token: TokenResponse = read_json(response, timeout).await?;
        tracing::debug!("Reddit API authentication configured");

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: SecretString::from(token.access_token),
            timeout,
        })
    }
}

impl SubmissionSource for RedditApi {
    async fn inspect(&self, permalink: &str) -> Result<Inspection, ResolveError> {
        let id = submission_id(permalink)
            .ok_or_else(|| ResolveError::InvalidPermalink(permalink.to_string()))?;
        let fullname = format!("t3_{id}");

        let request = self
            .client
            .get(format!("{}/api/info", self.api_base))
            .query(&[("id", fullname.as_str()), ("raw_json", "1")])
            .bearer_auth(self.token.expose_secret());

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| ResolveError::Timeout)?
            .map_err(ResolveError::Network)?;
        check_status(response.status())?;

        let listing: Listing = read_json(response, self.timeout).await?;

        let submission = listing
            .data
            .children
            .into_iter()
            .next()
            .ok_or(ResolveError::NotFound)?
            .data;

        Ok(Inspection {
            flair: submission.link_flair_text,
            article_url: submission.url.filter(|u| !u.trim().is_empty()),
        })
    }

    fn is_transient(&self, error: &ResolveError) -> bool {
        matches!(error, ResolveError::Forbidden | ResolveError::RateLimited)
    }
}

/// Reads and decodes a JSON body, giving up after `timeout`.
async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    timeout: Duration,
) -> Result<T, ResolveError> {
    let body = tokio::time::timeout(timeout, response.bytes())
        .await
        .map_err(|_| ResolveError::Timeout)?
        .map_err(ResolveError::Network)?;
    serde_json::from_slice(&body).map_err(|e| ResolveError::Decode(e.to_string()))
}

fn check_status(status: reqwest::StatusCode) -> Result<(), ResolveError> {
    if status.is_success() {
        return Ok(());
    }
    Err(match status.as_u16() {
        403 => ResolveError::Forbidden,
        429 => ResolveError::RateLimited,
        code => ResolveError::HttpStatus(code),
    })
}
