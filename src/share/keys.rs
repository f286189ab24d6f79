//! Fetching the public keys an account publishes.
//!
//! GitHub serves every account's SSH keys as plain text at
//! `https://github.com/<account>.keys`, one authorized-key line per key. The
//! list is fetched exactly once at startup; any failure is fatal and nothing is
//! retried.
//!
//! Entries are kept verbatim. Blank or malformed lines stay in the list and are
//! dealt with by the authenticator, which skips what it cannot parse.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, info};

use crate::share::error::{FetchError, ShareError};

/// Upper bound for the key list request
pub(crate) const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Ordered, immutable list of raw key lines as served by the endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyList {
    entries: Vec<String>,
}

impl KeyList {
    /// Split a response body into entries, one per `\n`-separated line.
    ///
    /// Lines are not trimmed, deduplicated or validated. A trailing newline
    /// yields a trailing empty entry.
    pub fn from_body(body: &str) -> Self {
        Self {
            entries: body.split('\n').map(str::to_string).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for KeyList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Build the HTTP client shared by the key fetch and the share hint.
pub fn build_http_client() -> Result<reqwest::Client, ShareError> {
    reqwest::Client::builder()
        .user_agent(concat!("sharessh/", env!("CARGO_PKG_VERSION")))
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| ShareError::Client(e.to_string()))
}

/// URL serving the key list of `account` below `base_url`.
pub(crate) fn keys_url(base_url: &str, account: &str) -> String {
    format!("{}/{}.keys", base_url.trim_end_matches('/'), account)
}

/// Map a response status to the fetch outcome.
///
/// 200 is the only success; 404 means the account does not exist and is kept
/// apart from every other status.
pub(crate) fn check_status(status: StatusCode, account: &str) -> Result<(), FetchError> {
    match status {
        StatusCode::OK => Ok(()),
        StatusCode::NOT_FOUND => Err(FetchError::AccountNotFound(account.to_string())),
        other => Err(FetchError::BadStatus(other.as_u16())),
    }
}

/// Fetch the key list published by `account`.
///
/// # Errors
///
/// * [`FetchError::Network`] - the request produced no response
/// * [`FetchError::AccountNotFound`] - the endpoint answered 404
/// * [`FetchError::BadStatus`] - any other non-200 status
/// * [`FetchError::BodyRead`] - the body could not be read
pub async fn fetch_keys(
    client: &reqwest::Client,
    base_url: &str,
    account: &str,
) -> Result<KeyList, FetchError> {
    let url = keys_url(base_url, account);
    debug!("Fetching public SSH keys for {} from {}", account, url);

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| FetchError::Network(e.to_string()))?;

    check_status(response.status(), account)?;

    let body = response
        .text()
        .await
        .map_err(|e| FetchError::BodyRead(e.to_string()))?;

    let keys = KeyList::from_body(&body);
    info!("Fetched {} key entries for @{}", keys.len(), account);
    Ok(keys)
}
