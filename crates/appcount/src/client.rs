//! REST client for the AppCount HTTP API.
//!
//! Wraps the external endpoints (paged listing, single-record lookup,
//! writeback) using [`reqwest`]. Every failure is classified into a
//! typed [`liman_core::monitor::ApiErrorKind`] via [`AppCountError::kind`]
//! so the monitor and the engine never inspect error strings.

use std::time::Duration;

use async_trait::async_trait;
use liman_core::monitor::ApiErrorKind;
use liman_core::validation::ExternalLicenseRecord;
use serde::Deserialize;

use crate::api::{ExternalLicenseApi, LicensePage};

/// Default request timeout when the config carries none.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for the AppCount API.
#[derive(Debug, Clone)]
pub struct AppCountConfig {
    /// Base HTTP URL, e.g. `https://appcount.example.com`.
    pub base_url: String,
    /// Bearer token sent with every request.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Errors from the AppCount REST layer.
#[derive(Debug, thiserror::Error)]
pub enum AppCountError {
    /// The request exceeded the configured timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure (DNS, TCP, TLS).
    #[error("Network error: {0}")]
    Network(String),

    /// The API rejected our credentials (401/403).
    #[error("Authentication rejected ({status})")]
    Authentication { status: u16 },

    /// The API throttled us (429).
    #[error("Rate limited")]
    RateLimit,

    /// AppCount returned a 5xx.
    #[error("Server error ({status}): {body}")]
    Server { status: u16, body: String },

    /// AppCount returned an unexpected 4xx.
    #[error("Client error ({status}): {body}")]
    Client { status: u16, body: String },

    /// The response body did not match the expected shape.
    #[error("Malformed response: {0}")]
    Decode(String),
}

impl AppCountError {
    /// Classify this error for the monitor's per-kind counters.
    pub fn kind(&self) -> ApiErrorKind {
        match self {
            Self::Timeout(_) => ApiErrorKind::Timeout,
            Self::Network(_) => ApiErrorKind::Network,
            Self::Authentication { .. } => ApiErrorKind::Authentication,
            Self::RateLimit => ApiErrorKind::RateLimit,
            Self::Server { .. } => ApiErrorKind::ServerError,
            Self::Client { .. } => ApiErrorKind::ClientError,
            Self::Decode(_) => ApiErrorKind::Unknown,
        }
    }

    /// Whether a sync run must abort on this error.
    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }

    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else if err.is_connect() {
            Self::Network(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Wire shape of the paged listing endpoint.
#[derive(Debug, Deserialize)]
struct PageResponse {
    #[serde(default)]
    licenses: Vec<ExternalLicenseRecord>,
    #[serde(default)]
    total: Option<u64>,
}

/// HTTP client for the AppCount API.
pub struct AppCountClient {
    client: reqwest::Client,
    config: AppCountConfig,
}

impl AppCountClient {
    /// Build a client from connection settings. Errors if reqwest cannot
    /// construct the underlying client (bad TLS backend, etc.).
    pub fn new(config: AppCountConfig) -> Result<Self, AppCountError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppCountError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// The configured per-request timeout, used by the monitor's
    /// slow-request threshold.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    /// Map a non-2xx response to a typed error.
    async fn status_error(response: reqwest::Response) -> AppCountError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        match status {
            401 | 403 => AppCountError::Authentication { status },
            429 => AppCountError::RateLimit,
            500..=599 => AppCountError::Server { status, body },
            _ => AppCountError::Client { status, body },
        }
    }
}

#[async_trait]
impl ExternalLicenseApi for AppCountClient {
    async fn fetch_page(&self, offset: u32, limit: u32) -> Result<LicensePage, AppCountError> {
        let response = self
            .client
            .get(self.url("/api/licenses"))
            .bearer_auth(&self.config.api_key)
            .query(&[("offset", offset), ("limit", limit)])
            .send()
            .await
            .map_err(|e| AppCountError::from_reqwest(e, self.config.timeout))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let page: PageResponse = response
            .json()
            .await
            .map_err(|e| AppCountError::Decode(e.to_string()))?;

        let fetched = page.licenses.len() as u32;
        let has_more = match page.total {
            Some(total) => u64::from(offset) + u64::from(fetched) < total,
            None => fetched == limit,
        };

        tracing::debug!(offset, limit, fetched, has_more, "Fetched license page");

        Ok(LicensePage {
            records: page.licenses,
            has_more,
        })
    }

    async fn fetch_by_appid(
        &self,
        appid: &str,
    ) -> Result<Option<ExternalLicenseRecord>, AppCountError> {
        let response = self
            .client
            .get(self.url(&format!("/api/licenses/{appid}")))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| AppCountError::from_reqwest(e, self.config.timeout))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let record = response
            .json()
            .await
            .map_err(|e| AppCountError::Decode(e.to_string()))?;
        Ok(Some(record))
    }

    async fn push_update(
        &self,
        appid: &str,
        payload: &serde_json::Value,
    ) -> Result<(), AppCountError> {
        let response = self
            .client
            .put(self.url(&format!("/api/licenses/{appid}")))
            .bearer_auth(&self.config.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| AppCountError::from_reqwest(e, self.config.timeout))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        tracing::debug!(appid, "Pushed license update to AppCount");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- Error classification --

    #[test]
    fn error_kinds_map_to_monitor_vocabulary() {
        assert_eq!(
            AppCountError::Timeout(DEFAULT_TIMEOUT).kind(),
            ApiErrorKind::Timeout
        );
        assert_eq!(
            AppCountError::Network("refused".into()).kind(),
            ApiErrorKind::Network
        );
        assert_eq!(
            AppCountError::Authentication { status: 401 }.kind(),
            ApiErrorKind::Authentication
        );
        assert_eq!(AppCountError::RateLimit.kind(), ApiErrorKind::RateLimit);
        assert_eq!(
            AppCountError::Server {
                status: 502,
                body: String::new()
            }
            .kind(),
            ApiErrorKind::ServerError
        );
        assert_eq!(
            AppCountError::Decode("bad json".into()).kind(),
            ApiErrorKind::Unknown
        );
    }

    #[test]
    fn only_authentication_is_fatal() {
        assert!(AppCountError::Authentication { status: 403 }.is_fatal());
        assert!(!AppCountError::Timeout(DEFAULT_TIMEOUT).is_fatal());
        assert!(!AppCountError::RateLimit.is_fatal());
        assert!(!AppCountError::Server {
            status: 500,
            body: String::new()
        }
        .is_fatal());
    }

    // -- URL building --

    #[test]
    fn url_joins_without_double_slash() {
        let client = AppCountClient::new(AppCountConfig {
            base_url: "https://appcount.example.com/".to_string(),
            api_key: "k".to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
        .unwrap();
        assert_eq!(
            client.url("/api/licenses"),
            "https://appcount.example.com/api/licenses"
        );
    }
}
