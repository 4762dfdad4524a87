//! Bounded HTTP fetching for feed endpoints.
//!
//! The fetcher performs exactly one request per call. Retrying is left to the
//! caller, which can consult [`FetchError::retry_disposition`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "newswire/0.1 (news aggregator)";
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("feed body from {url} exceeds {limit} bytes")]
    BodyTooLarge { url: String, limit: usize },
    #[error("malformed feed at {url}: {message}")]
    Parse { url: String, message: String },
}

impl FetchError {
    /// The feed URL the failure is attributed to.
    pub fn url(&self) -> &str {
        match self {
            FetchError::Request { url, .. }
            | FetchError::HttpStatus { url, .. }
            | FetchError::BodyTooLarge { url, .. }
            | FetchError::Parse { url, .. } => url,
        }
    }

    pub fn retry_disposition(&self) -> RetryDisposition {
        match self {
            FetchError::Request { source, .. } => classify_reqwest_error(source),
            FetchError::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(RetryDisposition::NonRetryable),
            FetchError::BodyTooLarge { .. } | FetchError::Parse { .. } => {
                RetryDisposition::NonRetryable
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_host_concurrency: usize,
    pub max_body_bytes: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            global_concurrency: 16,
            per_host_concurrency: 2,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_host_limit: usize,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_host_limit: config.per_host_concurrency.max(1),
            per_host: Mutex::new(HashMap::new()),
            max_body_bytes: config.max_body_bytes,
        })
    }

    async fn per_host_semaphore(&self, url: &str) -> Arc<Semaphore> {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .unwrap_or_else(|| url.to_string());
        let mut map = self.per_host.lock().await;
        map.entry(host)
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
            .clone()
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        // Host permit first: a task queued behind a busy host must not hold a
        // global permit. Neither semaphore is ever closed.
        let per_host = self.per_host_semaphore(url).await;
        let _host = per_host.acquire().await.ok();
        let _global = self.global_limit.acquire().await.ok();

        self.send_once(url)
            .instrument(info_span!("http_fetch", url))
            .await
    }

    async fn send_once(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        if resp
            .content_length()
            .is_some_and(|len| len as usize > self.max_body_bytes)
        {
            return Err(FetchError::BodyTooLarge {
                url: url.to_string(),
                limit: self.max_body_bytes,
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?
            .to_vec();
        if body.len() > self.max_body_bytes {
            return Err(FetchError::BodyTooLarge {
                url: url.to_string(),
                limit: self.max_body_bytes,
            });
        }

        debug!(%status, final_url = %final_url, bytes = body.len(), "fetched feed body");
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn fetch_errors_carry_their_url() {
        let err = FetchError::HttpStatus {
            status: 502,
            url: "https://example.com/feed".to_string(),
        };
        assert_eq!(err.url(), "https://example.com/feed");
        assert_eq!(err.retry_disposition(), RetryDisposition::Retryable);
        assert_eq!(err.to_string(), "http status 502 for https://example.com/feed");

        let parse = FetchError::Parse {
            url: "https://example.com/bad".to_string(),
            message: "unexpected eof".to_string(),
        };
        assert_eq!(parse.retry_disposition(), RetryDisposition::NonRetryable);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_request_error() {
        let fetcher = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .unwrap();
        let err = fetcher
            .fetch_bytes("http://127.0.0.1:9/feed")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Request { .. }));
        assert_eq!(err.url(), "http://127.0.0.1:9/feed");
    }
}
