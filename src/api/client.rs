//! JSON HTTP client for the call backend
//!
//! Wraps reqwest::Client with envelope unwrapping and typed status errors,
//! so callers can branch on 404/429 without string matching.

use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::WidgetConfig;
use crate::models::ApiEnvelope;

/// Errors surfaced by the backend API layer.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    /// 429 with the raw response body, which may carry a permission record.
    #[error("rate limited: {body}")]
    RateLimited { body: String },
    #[error("HTTP {status} for {url}: {body}")]
    Status { status: u16, url: String, body: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed response from {url}: {message}")]
    Malformed { url: String, message: String },
}

/// Backend API client. One per widget instance, shared by all services.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    from_number: String,
}

impl ApiClient {
    pub fn new(config: &WidgetConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            from_number: config.from_number.clone(),
        })
    }

    /// The business line calls are placed from.
    pub fn from_number(&self) -> &str {
        &self.from_number
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET a JSON endpoint, unwrapping the `{success, data, error}` envelope.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("API GET {}", url);

        let resp = self.http.get(&url).send().await?;
        let resp = check_response(resp, &url).await?;
        unwrap_envelope(resp, &url).await
    }

    /// POST a JSON body, unwrapping the envelope.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("API POST {}", url);

        let resp = self.http.post(&url).json(body).send().await?;
        let resp = check_response(resp, &url).await?;
        unwrap_envelope(resp, &url).await
    }

    /// POST where the caller does not need the response payload.
    pub async fn post_unit(&self, path: &str, body: &serde_json::Value) -> Result<(), ApiError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("API POST {}", url);

        let resp = self.http.post(&url).json(body).send().await?;
        check_response(resp, &url).await?;
        Ok(())
    }
}

/// URL-encode a path segment (phone numbers contain `+`).
pub fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

/// Map HTTP status codes to typed errors before any body parsing.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound);
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let body = resp.text().await.unwrap_or_default();
        return Err(ApiError::RateLimited { body });
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            body,
        });
    }

    Ok(resp)
}

async fn unwrap_envelope<T: DeserializeOwned>(
    resp: reqwest::Response,
    url: &str,
) -> Result<T, ApiError> {
    let envelope: ApiEnvelope<T> = resp.json().await.map_err(|e| ApiError::Malformed {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    envelope.data.ok_or_else(|| ApiError::Malformed {
        url: url.to_string(),
        message: envelope
            .error
            .unwrap_or_else(|| "missing data field".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_segment_escapes_plus() {
        assert_eq!(encode_segment("+12025550123"), "%2B12025550123");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = WidgetConfig {
            backend_url: "http://localhost:3000/".into(),
            ..Default::default()
        };
        let client = ApiClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "http://localhost:3000");
    }
}
