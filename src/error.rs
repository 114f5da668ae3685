use std::time::Duration;

use reqwest::StatusCode;

/// Errors raised while talking to the Ntuity cloud or the BEAAM gateway
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The remote side answered 401; retrying with the same credentials is pointless
    #[error("{0} rejected the credentials")]
    AuthInvalid(&'static str),

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl Error {
    /// True when the credentials need to be replaced before trying again
    pub fn is_auth_invalid(&self) -> bool {
        matches!(self, Error::AuthInvalid(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Bounds `future` by `after`, mapping an elapsed deadline into [`Error::Timeout`]
pub(crate) async fn with_timeout<T>(
    what: impl Into<String>,
    after: Duration,
    future: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(after, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            what: what.into(),
            after,
        }),
    }
}
