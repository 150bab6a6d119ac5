//! # Retrying JSON Client
//!
//! Thin `reqwest` wrapper used by the outbound collaborators (the narrative
//! service today). Transient failures are retried with exponential backoff by
//! `reqwest-retry`; a non-2xx answer is not an error but an `ApiResponse`
//! carrying the status and the raw body.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

const MAX_RETRIES: u32 = 3;

/// Failures that leave no usable response.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid base url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    /// Client construction, or a 2xx body that did not decode.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// Gave up after retries.
    #[error("request failed: {0}")]
    Request(#[from] reqwest_middleware::Error),
    #[error("body serialization failed: {0}")]
    Body(#[from] serde_json::Error),
}

/// A completed exchange.
#[derive(Debug)]
pub struct ApiResponse<T> {
    pub status: u16,
    /// Decoded body of a 2xx answer.
    pub data: Option<T>,
    /// Raw body of any other answer.
    pub error_body: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    bearer: Option<String>,
    default_headers: HeaderMap,
}

impl ApiClient {
    /// `base_url` must be absolute and should end with `/` so relative paths
    /// extend it instead of replacing its last segment.
    pub fn new(base_url: &str, bearer: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)?;
        let policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let inner = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(policy))
            .build();

        Ok(Self {
            inner,
            base_url,
            bearer,
            default_headers: HeaderMap::new(),
        })
    }

    /// Adds a header sent on every request. The value is marked sensitive so
    /// it never shows up in debug output.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, ApiError> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| ApiError::InvalidHeader(e.to_string()))?;
        let mut value = HeaderValue::from_str(value).map_err(|e| ApiError::InvalidHeader(e.to_string()))?;
        value.set_sensitive(true);
        self.default_headers.insert(name, value);
        Ok(self)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves `path` against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }

    /// Sends one request, with an optional JSON body, and decodes a 2xx body as `T`.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        headers: Option<HeaderMap>,
        body: Option<B>,
    ) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let url = self.endpoint(path)?;
        let mut req = self.inner.request(method, url).headers(self.default_headers.clone());

        if let Some(extra) = headers {
            req = req.headers(extra);
        }
        if let Some(token) = &self.bearer {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            req = req
                .header(CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(&body)?);
        }

        let response = req.send().await?;
        let status = response.status().as_u16();

        if response.status().is_success() {
            Ok(ApiResponse {
                status,
                data: Some(response.json::<T>().await?),
                error_body: None,
            })
        } else {
            tracing::debug!(status, "Non-success response");
            Ok(ApiResponse {
                status,
                data: None,
                error_body: response.text().await.ok(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_base_url_is_an_error_not_a_panic() {
        let result = ApiClient::new("not-absolute", None, Duration::from_secs(5));
        assert!(matches!(result, Err(ApiError::InvalidUrl(_))));
    }

    #[test]
    fn bad_header_names_are_rejected() {
        let client = ApiClient::new("https://example.org/v1/", None, Duration::from_secs(5)).unwrap();
        assert!(matches!(client.with_header("bad header", "x"), Err(ApiError::InvalidHeader(_))));
    }

    #[test]
    fn model_paths_extend_the_base() {
        let client = ApiClient::new("https://example.org/v1beta/", None, Duration::from_secs(5)).unwrap();
        let url = client.endpoint("models/gemini-2.0-flash:generateContent").unwrap();
        assert_eq!(url.as_str(), "https://example.org/v1beta/models/gemini-2.0-flash:generateContent");
    }

    #[test]
    fn only_2xx_counts_as_success() {
        let ok: ApiResponse<()> = ApiResponse { status: 204, data: None, error_body: None };
        let redirect: ApiResponse<()> = ApiResponse { status: 304, data: None, error_body: None };
        assert!(ok.is_success());
        assert!(!redirect.is_success());
    }
}
