// HTTP plumbing shared by the cloud and gateway clients: one session per
// client, bearer auth and status classification.

use crate::error::{Error, Result};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::trace;

/// Parses the base URL of a service once, when its client is created
pub(crate) fn parse_base_url(base_url: &str, service: &'static str) -> Result<Url> {
    let url = Url::parse(base_url)
        .map_err(|e| Error::Config(format!("invalid {service} URL {base_url}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(Error::Config(format!("invalid {service} URL {base_url}")));
    }
    Ok(url)
}

/// Appends `segments` to the base path, percent-encoding each one so ids
/// cannot add or remove path levels
pub(crate) fn endpoint(base_url: &Url, segments: &[&str]) -> Url {
    let mut url = base_url.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Builds the persistent session a client reuses across refresh cycles
pub(crate) fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .gzip(true)
        .deflate(true)
        .build()
        .map_err(Error::Client)
}

/// Bearer token that can be replaced while clones of the client are in use
#[derive(Clone)]
pub(crate) struct BearerToken(Arc<RwLock<String>>);

impl BearerToken {
    pub(crate) fn new(token: impl Into<String>) -> Self {
        Self(Arc::new(RwLock::new(token.into())))
    }

    pub(crate) fn get(&self) -> String {
        match self.0.read() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn set(&self, token: impl Into<String>) {
        let token = token.into();
        match self.0.write() {
            Ok(mut current) => *current = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// Sends `request` and classifies the answer: 401 is [`Error::AuthInvalid`],
/// any other non-2xx is [`Error::Status`]
pub(crate) async fn send(
    request: RequestBuilder,
    url: &str,
    service: &'static str,
) -> Result<Response> {
    trace!("{service} request to {url}");
    let response = request.send().await.map_err(|source| Error::Transport {
        url: url.to_string(),
        source,
    })?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(Error::AuthInvalid(service));
    }
    if !status.is_success() {
        return Err(Error::Status {
            url: url.to_string(),
            status,
        });
    }
    Ok(response)
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response, url: &str) -> Result<T> {
    response.json().await.map_err(|source| Error::Decode {
        url: url.to_string(),
        source,
    })
}
