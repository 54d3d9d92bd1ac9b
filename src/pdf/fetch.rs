use crate::pool::WorkerPool;
use crate::retry::{Attempt, RetryPolicy};
use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, header::CONTENT_TYPE};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

static DRIVE_FILE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://drive\.google\.com/file/d/([a-zA-Z0-9_-]+)").expect("drive link pattern")
});

static CONFIRM_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"confirm=([^&"'\s<>]+)"#).expect("confirm token pattern"));

#[derive(Debug, Clone)]
pub struct SourceResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("connection timeout: {0}")]
    Timeout(String),
    #[error("connection error: {0}")]
    Connect(String),
    #[error("network error: {0}")]
    Other(String),
}

/// Anything that can serve a document by URL.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn get(&self, url: &str) -> Result<SourceResponse, SourceError>;
}

pub struct HttpSource {
    http: Client,
}

impl HttpSource {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

fn classify(err: reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout(err.to_string())
    } else if err.is_connect() {
        SourceError::Connect(err.to_string())
    } else {
        SourceError::Other(err.to_string())
    }
}

#[async_trait]
impl DocumentSource for HttpSource {
    async fn get(&self, url: &str) -> Result<SourceResponse, SourceError> {
        let response = self.http.get(url).send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(classify)?;
        Ok(SourceResponse {
            status,
            content_type,
            body,
        })
    }
}

#[derive(Debug, Error)]
enum FetchError {
    #[error("empty URL")]
    EmptyUrl,
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("Invalid PDF format: {0}")]
    InvalidPdf(String),
}

impl FetchError {
    fn into_attempt(self) -> Attempt<FetchError> {
        let retryable = match &self {
            FetchError::Source(_) => true,
            FetchError::Status(code) => matches!(code, 408 | 429) || *code >= 500,
            FetchError::EmptyUrl | FetchError::InvalidPdf(_) => false,
        };
        if retryable {
            Attempt::Transient(self)
        } else {
            Attempt::Permanent(self)
        }
    }
}

/// Outcome of downloading one input URL.
#[derive(Debug, Clone)]
pub enum FetchResult {
    Fetched { url: String, document: Bytes },
    Failed { url: String, error: String },
}

impl FetchResult {
    #[cfg(test)]
    pub fn url(&self) -> &str {
        match self {
            FetchResult::Fetched { url, .. } | FetchResult::Failed { url, .. } => url,
        }
    }

    pub fn is_fetched(&self) -> bool {
        matches!(self, FetchResult::Fetched { .. })
    }
}

/// Rewrites Google Drive viewer links into their direct-download form.
pub fn normalize_share_link(url: &str) -> String {
    match DRIVE_FILE_LINK.captures(url) {
        Some(caps) => format!("https://drive.google.com/uc?export=download&id={}", &caps[1]),
        None => url.to_string(),
    }
}

fn scan_warning_token(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    if !text.to_lowercase().contains("virus scan warning") {
        return None;
    }
    CONFIRM_TOKEN
        .captures(&text)
        .map(|caps| caps[1].to_string())
}

fn check_status(response: &SourceResponse) -> Result<(), FetchError> {
    if (200..300).contains(&response.status) {
        Ok(())
    } else {
        Err(FetchError::Status(response.status))
    }
}

fn validate_pdf(body: &[u8]) -> Result<(), FetchError> {
    lopdf::Document::load_mem(body)
        .map(|_| ())
        .map_err(|err| FetchError::InvalidPdf(err.to_string()))
}

#[derive(Clone)]
pub struct Fetcher {
    source: Arc<dyn DocumentSource>,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(source: Arc<dyn DocumentSource>, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    /// Downloads and validates one document. Never errors: failures come
    /// back as [`FetchResult::Failed`] with the last attempt's message.
    pub async fn fetch(&self, url: &str) -> FetchResult {
        // results keep the URL as submitted; requests use the trimmed form
        let requested = url.trim();
        if requested.is_empty() {
            return FetchResult::Failed {
                url: url.to_string(),
                error: FetchError::EmptyUrl.to_string(),
            };
        }

        let download_url = normalize_share_link(requested);
        if download_url != requested {
            info!(target = "labelhub.fetch", url, download_url = %download_url, "share_link_converted");
        }

        let outcome = self
            .policy
            .run("fetch", |_attempt| {
                let download_url = download_url.as_str();
                async move {
                    self.attempt(requested, download_url)
                        .await
                        .map_err(FetchError::into_attempt)
                }
            })
            .await;

        match outcome {
            Ok(document) => {
                info!(target = "labelhub.fetch", url, bytes = document.len(), "pdf_downloaded");
                FetchResult::Fetched {
                    url: url.to_string(),
                    document,
                }
            }
            Err(failure) => {
                warn!(target = "labelhub.fetch", url, attempts = failure.attempts, error = %failure.error, "pdf_download_failed");
                FetchResult::Failed {
                    url: url.to_string(),
                    error: failure.error.to_string(),
                }
            }
        }
    }

    async fn attempt(&self, url: &str, download_url: &str) -> Result<Bytes, FetchError> {
        let mut response = self.source.get(download_url).await?;
        check_status(&response)?;

        if download_url.contains("drive.google.com")
            && let Some(token) = scan_warning_token(&response.body)
        {
            let confirmed = format!("{download_url}&confirm={token}");
            info!(target = "labelhub.fetch", url, "scan_warning_bypass");
            response = self.source.get(&confirmed).await?;
            check_status(&response)?;
        }

        let content_type = response.content_type.as_deref().unwrap_or("");
        if !content_type.to_lowercase().contains("pdf") && !url.to_lowercase().ends_with(".pdf") {
            warn!(target = "labelhub.fetch", url, content_type, "response_may_not_be_pdf");
        }

        validate_pdf(&response.body)?;
        Ok(response.body)
    }

    /// Fetches every URL through `pool`; results follow the order of `urls`.
    pub async fn fetch_all(&self, urls: &[String], pool: &WorkerPool) -> Vec<FetchResult> {
        let fetcher = self.clone();
        let results = pool
            .map_ordered(urls.to_vec(), move |url| {
                let fetcher = fetcher.clone();
                async move { fetcher.fetch(&url).await }
            })
            .await;
        results
            .into_iter()
            .zip(urls)
            .map(|(result, url)| {
                result.unwrap_or_else(|error| FetchResult::Failed {
                    url: url.clone(),
                    error,
                })
            })
            .collect()
    }
}
