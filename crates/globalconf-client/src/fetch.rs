//! Downloading configuration directories from their locations.

use globalconf_directory::ConfigurationLocation;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Redirects followed before a download is abandoned.
const MAX_REDIRECTS: usize = 5;

const USER_AGENT: &str = concat!("globalconf-client/", env!("CARGO_PKG_VERSION"));

/// Transport-level failures. Every variant means "try the next location".
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out")]
    Timeout { url: Url },

    #[error("{url} responded with status {status}")]
    Status { url: Url, status: u16 },

    #[error("response from {url} exceeds {limit} bytes")]
    TooLarge { url: Url, limit: usize },
}

/// Retrieves the raw bytes of a configuration directory.
pub trait DocumentFetcher: Send + Sync {
    fn fetch(
        &self,
        location: &ConfigurationLocation,
    ) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

/// Limits applied to every download.
#[derive(Debug, Clone, Copy)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub max_bytes: usize,
}

/// HTTP(S) fetcher backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            max_bytes: settings.max_bytes,
        })
    }

    fn request_error(url: &Url, source: reqwest::Error) -> FetchError {
        if source.is_timeout() {
            FetchError::Timeout { url: url.clone() }
        } else {
            FetchError::Request {
                url: url.clone(),
                source,
            }
        }
    }
}

impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, location: &ConfigurationLocation) -> Result<Vec<u8>, FetchError> {
        let url = &location.url;
        let mut resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Self::request_error(url, e))?;

        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: url.clone(),
                status: resp.status().as_u16(),
            });
        }

        let too_large = || FetchError::TooLarge {
            url: url.clone(),
            limit: self.max_bytes,
        };
        if resp
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(too_large());
        }

        // Content-Length may be absent or wrong; enforce the limit while reading.
        let mut body = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| Self::request_error(url, e))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(url = %url, bytes = body.len(), "downloaded configuration directory");
        Ok(body)
    }
}
