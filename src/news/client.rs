use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::types::{ArticleDto, NewsResponse};
use crate::storage::Category;

const MAX_RETRIES: u32 = 3;
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB

pub const DEFAULT_BASE_URL: &str = "https://newsapi.org/v2";

/// Errors that can occur while fetching from the news API.
///
/// Every variant is a "fetch failed" condition from the caller's point of
/// view; the `Display` text is what ends up in the user-visible message.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// HTTP response with non-2xx status code and no API error body
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Body was not a valid news API envelope
    #[error("Parse error: {0}")]
    Parse(String),
    /// The API answered with a non-"ok" status
    #[error("API error: {status}{}", .message.as_deref().map(|m| format!(" ({m})")).unwrap_or_default())]
    Api {
        status: String,
        code: Option<String>,
        message: Option<String>,
    },
    #[error("Invalid API base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("No API key configured (set NEWS_API_KEY or api_key in config.toml)")]
    MissingApiKey,
}

/// Connection settings for [`NewsApiClient`].
pub struct ClientOptions {
    pub base_url: String,
    pub api_key: SecretString,
    pub country: String,
    pub page_size: u32,
    pub timeout: Duration,
    /// First backoff delay; doubles on each retry.
    pub retry_base_delay: Duration,
}

impl ClientOptions {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            country: "us".to_string(),
            page_size: 20,
            timeout: Duration::from_secs(30),
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// Client for the NewsAPI `top-headlines` and `everything` endpoints.
///
/// Transient transport failures (429, 5xx) are retried with exponential
/// backoff. An API-level error status is returned as [`FetchError::Api`]
/// without retrying.
#[derive(Clone)]
pub struct NewsApiClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: SecretString,
    country: String,
    page_size: u32,
    timeout: Duration,
    retry_base_delay: Duration,
}

impl NewsApiClient {
    /// Build a client, validating the base URL.
    ///
    /// The API key travels in the query string, so plain HTTP is only
    /// accepted for localhost.
    pub fn new(http: reqwest::Client, options: ClientOptions) -> Result<Self, FetchError> {
        if options.api_key.expose_secret().trim().is_empty() {
            return Err(FetchError::MissingApiKey);
        }

        let base_url = Url::parse(options.base_url.trim_end_matches('/'))
            .map_err(|e| FetchError::InvalidBaseUrl(e.to_string()))?;
        match base_url.scheme() {
            "https" => {}
            "http" if matches!(base_url.host_str(), Some("localhost" | "127.0.0.1")) => {
                tracing::warn!(
                    base_url = %base_url,
                    "Using non-HTTPS news API base URL (localhost only)"
                );
            }
            scheme => {
                return Err(FetchError::InvalidBaseUrl(format!(
                    "{scheme}:// not allowed, HTTPS required"
                )))
            }
        }

        Ok(Self {
            http,
            base_url,
            api_key: options.api_key,
            country: options.country,
            page_size: options.page_size.clamp(1, 100),
            timeout: options.timeout,
            retry_base_delay: options.retry_base_delay,
        })
    }

    /// Fetch top headlines, optionally narrowed to one category.
    ///
    /// `Category::Search` is not a headline category and is sent as no
    /// category at all.
    pub async fn top_headlines(
        &self,
        category: Option<Category>,
    ) -> Result<Vec<ArticleDto>, FetchError> {
        let mut params = vec![
            ("country", self.country.clone()),
            ("page", "1".to_string()),
            ("pageSize", self.page_size.to_string()),
        ];
        if let Some(category) = category.filter(|c| *c != Category::Search) {
            params.push(("category", category.as_str().to_string()));
        }
        self.get("top-headlines", &params).await
    }

    /// Search all articles matching `query`, newest first.
    pub async fn search(&self, query: &str) -> Result<Vec<ArticleDto>, FetchError> {
        let params = [
            ("q", query.to_string()),
            ("language", "en".to_string()),
            ("sortBy", "publishedAt".to_string()),
            ("page", "1".to_string()),
            ("pageSize", self.page_size.to_string()),
        ];
        self.get("everything", &params).await
    }

    fn endpoint_url(&self, endpoint: &str, params: &[(&str, String)]) -> Url {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map(|mut segments| {
                segments.pop_if_empty().push(endpoint);
            })
            .ok();
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
            query.append_pair("apiKey", self.api_key.expose_secret());
        }
        url
    }

    async fn get(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<ArticleDto>, FetchError> {
        let url = self.endpoint_url(endpoint, params);
        let mut retry_count = 0;

        let bytes = loop {
            let response = tokio::time::timeout(self.timeout, self.http.get(url.clone()).send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(|e| FetchError::Network(e.without_url()))?;

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if retry_count >= MAX_RETRIES {
                    return Err(if status.is_server_error() {
                        FetchError::HttpStatus(status.as_u16())
                    } else {
                        FetchError::RateLimited(MAX_RETRIES)
                    });
                }

                let delay = self.retry_base_delay * 2u32.pow(retry_count);
                tracing::warn!(
                    endpoint = endpoint,
                    status = %status,
                    retry = retry_count + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Transient news API failure, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                // NewsAPI explains 4xx failures in a JSON body
                let body = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;
                return Err(match serde_json::from_slice::<NewsResponse>(&body) {
                    Ok(envelope) if !envelope.is_ok() => api_error(envelope),
                    _ => FetchError::HttpStatus(status.as_u16()),
                });
            }

            break read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;
        };

        let envelope: NewsResponse =
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;
        if !envelope.is_ok() {
            return Err(api_error(envelope));
        }

        tracing::debug!(
            endpoint = endpoint,
            articles = envelope.articles.len(),
            total = envelope.total_results.unwrap_or_default(),
            "Fetched news"
        );
        Ok(envelope.articles)
    }
}

fn api_error(envelope: NewsResponse) -> FetchError {
    FetchError::Api {
        status: envelope.status,
        code: envelope.code,
        message: envelope.message,
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FetchError::Network(e.without_url()))?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
