//! Exchange HTTP Client - Rate-limited Signing REST Client
//!
//! Wraps reqwest with request signing, client-side pacing against the
//! exchange rate limit, and bounded retries for transient failures.
//! Maps wire-level failures onto the `ExchangeError` taxonomy; in
//! particular a 400 "Invalid ordStatus" on amendment becomes
//! `StaleOrder`, which the engine treats as a refetch-and-retry.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::auth::BitmexAuth;
use super::types::ApiErrorEnvelope;
use crate::ports::exchange::{ExchangeError, ExchangeResult};

/// Configuration for the REST client.
#[derive(Debug, Clone)]
pub struct RestClientConfig {
    /// Base URL including the API prefix, e.g.
    /// `https://testnet.bitmex.com/api/v1`.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Client-side request budget per minute.
    pub requests_per_minute: u32,
    /// Maximum retries on transient errors.
    pub max_retries: u32,
    /// Base delay between retries (exponential backoff).
    pub retry_base_delay: Duration,
}

impl Default for RestClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://testnet.bitmex.com/api/v1".to_string(),
            timeout: Duration::from_secs(7),
            requests_per_minute: 60,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(200),
        }
    }
}

/// Rate-limited, signing HTTP client for the exchange REST API.
pub struct RestClient {
    /// Underlying HTTP client.
    http: Client,
    /// Authentication manager.
    auth: Arc<BitmexAuth>,
    /// Client configuration.
    config: RestClientConfig,
    /// Path prefix included in the signature (from the base URL).
    sign_prefix: String,
    /// Request pacer.
    limiter: DefaultDirectRateLimiter,
}

impl RestClient {
    /// Create a new REST client.
    pub fn new(auth: Arc<BitmexAuth>, config: RestClientConfig) -> ExchangeResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|e| ExchangeError::Transport(format!("failed to build HTTP client: {e}")))?;

        let per_minute =
            NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let limiter = RateLimiter::direct(Quota::per_minute(per_minute));

        let sign_prefix = sign_prefix_of(&config.base_url);

        Ok(Self {
            http,
            auth,
            config,
            sign_prefix,
            limiter,
        })
    }

    /// GET `path` and deserialize the JSON response.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ExchangeResult<T> {
        self.request(Method::GET, path, None::<&()>).await
    }

    /// POST `body` to `path` and deserialize the JSON response.
    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ExchangeResult<T> {
        self.request(Method::POST, path, Some(body)).await
    }

    /// PUT `body` to `path` and deserialize the JSON response.
    pub async fn put<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ExchangeResult<T> {
        self.request(Method::PUT, path, Some(body)).await
    }

    /// DELETE with a JSON body, deserializing the response.
    pub async fn delete<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ExchangeResult<T> {
        self.request(Method::DELETE, path, Some(body)).await
    }

    /// Whether the API currently answers a cheap unauthenticated read.
    pub async fn ping(&self, path: &str) -> bool {
        self.get::<serde_json::Value>(path).await.is_ok()
    }

    /// Execute a request with signing, pacing, and bounded retries.
    async fn request<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> ExchangeResult<T> {
        let body_json = match body {
            Some(b) => serde_json::to_string(b)
                .map_err(|e| ExchangeError::Transport(format!("failed to encode body: {e}")))?,
            None => String::new(),
        };

        let mut last_error = ExchangeError::Transport("max retries exceeded".to_string());

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.config.retry_base_delay * 2u32.pow(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying request");
                sleep(delay).await;
            }

            self.limiter.until_ready().await;

            let url = format!("{}{}", self.config.base_url, path);
            let expires = BitmexAuth::expires();
            let sign_path = format!("{}{}", self.sign_prefix, path);
            let signature =
                self.auth
                    .sign(method.as_str(), &sign_path, expires, &body_json);

            let mut request = self
                .http
                .request(method.clone(), &url)
                .header("api-key", self.auth.api_key())
                .header("api-expires", expires.to_string())
                .header("api-signature", signature);
            if body.is_some() {
                request = request
                    .header("Content-Type", "application/json")
                    .body(body_json.clone());
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, attempt, "Request failed");
                    last_error = ExchangeError::Transport(e.to_string());
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<T>()
                    .await
                    .map_err(|e| ExchangeError::Transport(format!("malformed response: {e}")));
            }

            let text = response.text().await.unwrap_or_default();

            match status {
                StatusCode::TOO_MANY_REQUESTS => {
                    warn!("Rate limited by exchange, backing off");
                    sleep(Duration::from_secs(2)).await;
                    last_error = ExchangeError::RateLimited;
                    continue;
                }
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(ExchangeError::Auth(error_message(&text)));
                }
                status if status.is_server_error() => {
                    warn!(status = %status, "Server error, retrying");
                    last_error = ExchangeError::Transport(format!("server error {status}"));
                    continue;
                }
                _ => {
                    let message = error_message(&text);
                    // An amend target that filled or cancelled underneath
                    // us is reported as an ordStatus violation.
                    if message.contains("Invalid ordStatus") {
                        return Err(ExchangeError::StaleOrder(message));
                    }
                    return Err(ExchangeError::Rejected(message));
                }
            }
        }

        Err(last_error)
    }
}

/// Path component of the base URL, included in every signature.
fn sign_prefix_of(base_url: &str) -> String {
    let stripped = base_url
        .split_once("://")
        .map_or(base_url, |(_, rest)| rest);
    match stripped.find('/') {
        Some(idx) => stripped[idx..].trim_end_matches('/').to_string(),
        None => String::new(),
    }
}

/// Best-effort extraction of the error message from a response body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_prefix_extraction() {
        assert_eq!(sign_prefix_of("https://testnet.bitmex.com/api/v1"), "/api/v1");
        assert_eq!(sign_prefix_of("https://www.bitmex.com/api/v1/"), "/api/v1");
        assert_eq!(sign_prefix_of("https://example.com"), "");
    }

    #[test]
    fn test_error_message_parses_envelope() {
        let body = r#"{"error": {"message": "Invalid ordStatus", "name": "HTTPError"}}"#;
        assert_eq!(error_message(body), "Invalid ordStatus");
        assert_eq!(error_message("plain failure"), "plain failure");
    }
}
