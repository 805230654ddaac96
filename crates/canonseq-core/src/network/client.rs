//! HTTP client shared by the external source clients.
//!
//! Wraps reqwest with a fixed timeout and user agent, maps HTTP status codes
//! onto [`CanonError`] variants, and retries transient failures.

use super::retry::{retry_async, RetryConfig};
use crate::config::{ApiSettings, NetworkConfig};
use crate::error::{CanonError, Result};
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// HTTP client with status mapping and retries.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    retry: RetryConfig,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(timeout: Duration, retry: RetryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| CanonError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;

        Ok(Self {
            client,
            retry,
            timeout,
        })
    }

    pub fn from_settings(settings: &ApiSettings) -> Result<Self> {
        Self::new(
            Duration::from_secs(settings.timeout_seconds),
            RetryConfig::new().with_max_attempts(settings.retry_attempts),
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// GET `url` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|e| CanonError::Json {
            message: format!("Unexpected response from {}: {}", extract_domain(url), e),
            source: Some(e),
        })
    }

    /// GET `url` and return the body as text.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let (result, stats) = retry_async(&self.retry, url, || self.get_once(url)).await;
        if stats.attempts > 1 {
            debug!("GET {} took {} attempts", url, stats.attempts);
        }
        result
    }

    async fn get_once(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                CanonError::Timeout(self.timeout)
            } else {
                CanonError::Network {
                    message: format!("GET {} failed: {}", url, e),
                    source: Some(e),
                }
            }
        })?;

        let response = check_response_status(response, url)?;
        response.text().await.map_err(|e| CanonError::Network {
            message: format!("Failed to read body from {}: {}", url, e),
            source: Some(e),
        })
    }
}

fn check_response_status(response: Response, url: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        return Err(CanonError::RateLimited {
            service: extract_domain(url),
            retry_after_secs: retry_after,
        });
    }

    if status == StatusCode::NOT_FOUND {
        return Err(CanonError::not_found(url));
    }

    Err(CanonError::Http {
        url: url.to_string(),
        status: status.as_u16(),
    })
}

/// Join `base` and `path` and append percent-encoded query parameters.
pub fn build_url(base: &str, path: &str, params: &[(&str, &str)]) -> String {
    let mut url = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    for (i, (key, value)) in params.iter().enumerate() {
        url.push(if i == 0 { '?' } else { '&' });
        url.push_str(&urlencoding::encode(key));
        url.push('=');
        url.push_str(&urlencoding::encode(value));
    }
    url
}

/// Extract domain from a URL.
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.host_str().unwrap_or("unknown").to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi"),
            "eutils.ncbi.nlm.nih.gov"
        );
        assert_eq!(extract_domain("invalid-url"), "unknown");
    }

    #[test]
    fn test_build_url_encodes_params() {
        let url = build_url(
            "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/",
            "/esearch.fcgi",
            &[("db", "gene"), ("term", "\"TP53\"[Gene Name]")],
        );
        assert_eq!(
            url,
            "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi?db=gene&term=%22TP53%22%5BGene%20Name%5D"
        );
    }

    #[test]
    fn test_build_url_without_params() {
        assert_eq!(
            build_url("https://rest.uniprot.org/uniprotkb", "P04637.json", &[]),
            "https://rest.uniprot.org/uniprotkb/P04637.json"
        );
    }

    #[tokio::test]
    async fn test_client_from_settings() {
        let client = HttpClient::from_settings(&ApiSettings::default()).unwrap();
        assert_eq!(client.timeout(), NetworkConfig::REQUEST_TIMEOUT);
    }
}
