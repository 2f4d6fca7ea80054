//! Out-of-band download of linked gazette documents.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, COOKIE, HeaderValue};
use thiserror::Error;

pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 20 * 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("portal throttled the request (HTTP {0})")]
    Throttled(u16),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("document larger than {limit} bytes")]
    TooLarge { limit: usize },
    #[error("response is not a PDF")]
    NotPdf,
}

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>, FetchError>> + Send + 'a>>;

/// Downloads a document the browser linked to.
pub trait DocumentFetcher: Send + Sync {
    /// `cookies` is a ready-made `Cookie` header value from the browser session.
    fn fetch<'a>(&'a self, url: &'a str, cookies: Option<&'a str>) -> FetchFuture<'a>;
}

/// True when `bytes` starts with the PDF magic, allowing for leading junk
/// some servers emit before it.
pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(1024)];
    window.windows(5).any(|w| w == b"%PDF-")
}

/// [`DocumentFetcher`] over a shared `reqwest` client.
pub struct HttpDocumentFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpDocumentFetcher {
    pub fn new(user_agent: &str, timeout: Duration, max_bytes: usize) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;
        Ok(Self { client, max_bytes })
    }

    async fn download(&self, url: &str, cookies: Option<&str>) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client.get(url);
        if let Some(cookies) = cookies
            && let Ok(value) = HeaderValue::from_str(cookies)
        {
            request = request.header(COOKIE, value);
        }
        let mut response = request
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(FetchError::Throttled(status.as_u16()));
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.max_bytes) {
            return Err(FetchError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        if !looks_like_pdf(&body) {
            return Err(FetchError::NotPdf);
        }
        tracing::debug!(url, bytes = body.len(), "downloaded document");
        Ok(body)
    }
}

impl DocumentFetcher for HttpDocumentFetcher {
    fn fetch<'a>(&'a self, url: &'a str, cookies: Option<&'a str>) -> FetchFuture<'a> {
        Box::pin(self.download(url, cookies))
    }
}
