//! HTTP client for the biometric REST API
//!
//! [`BiometricApi`] is the seam the enablement state machine talks to; the
//! reqwest-backed [`HttpBiometricApi`] is the production implementation.
//! Transient transport failures (timeouts, connection resets, 5xx) are
//! retried with exponential backoff. Protocol rejections never are: the
//! caller picks the recovery path from the returned error code.

use async_trait::async_trait;

#[cfg(feature = "client")]
use std::time::{Duration, Instant};

#[cfg(feature = "client")]
use backoff::{future::retry_notify, ExponentialBackoff};
#[cfg(feature = "client")]
use reqwest::{Client, Method, StatusCode};
#[cfg(feature = "client")]
use serde::{de::DeserializeOwned, Serialize};
#[cfg(feature = "client")]
use tracing::{debug, warn};

#[cfg(feature = "client")]
use crate::error::KeyprintError;
use crate::error::Result;
use crate::protocol::{
    AuthenticateRequest, AuthenticateResponse, ChallengeRequest, ChallengeResponse,
    RegisterRequest, RegisterResponse, RegistrationsResponse, SettingsRequest, SettingsResponse,
    StatusResponse,
};

/// Client-facing API surface of the biometric backend.
#[async_trait]
pub trait BiometricApi: Send + Sync {
    async fn request_challenge(&self, device_id: Option<&str>) -> Result<ChallengeResponse>;
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse>;
    async fn authenticate(&self, request: &AuthenticateRequest) -> Result<AuthenticateResponse>;
    async fn registrations(&self) -> Result<RegistrationsResponse>;
    async fn status(&self) -> Result<StatusResponse>;
    async fn update_settings(&self, request: &SettingsRequest) -> Result<SettingsResponse>;
    async fn remove_registration(&self, device_id: &str) -> Result<()>;
}

#[cfg(feature = "client")]
/// Configuration for [`HttpBiometricApi`].
#[derive(Clone)]
pub struct HttpApiConfig {
    /// Backend base URL including the API version prefix,
    /// e.g. `https://api.example.org/api/v1`
    pub base_url: String,
    /// Bearer token for the endpoints that require an authenticated user
    pub bearer_token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Maximum retry attempts for transient failures
    pub max_retries: u32,
}

#[cfg(feature = "client")]
impl HttpApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            bearer_token: None,
            timeout: Duration::from_secs(10),
            max_retries: 3,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

#[cfg(feature = "client")]
impl std::fmt::Debug for HttpApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApiConfig")
            .field("base_url", &self.base_url)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

#[cfg(feature = "client")]
/// Error body returned by the backend on rejections.
#[derive(serde::Deserialize)]
struct ApiErrorBody {
    error: String,
    #[serde(default)]
    code: Option<String>,
}

#[cfg(feature = "client")]
/// Reqwest-backed implementation of [`BiometricApi`].
pub struct HttpBiometricApi {
    client: Client,
    config: HttpApiConfig,
}

#[cfg(feature = "client")]
impl HttpBiometricApi {
    pub fn new(config: HttpApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(KeyprintError::HttpError)?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send_once<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &Method,
        path: &str,
        body: Option<&B>,
    ) -> std::result::Result<T, backoff::Error<KeyprintError>> {
        let start = Instant::now();
        let mut request = self.client.request(method.clone(), self.url(path));
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            warn!(error = %e, path = path, latency_ms = start.elapsed().as_millis() as u64, "Request failed");
            if e.is_timeout() || e.is_connect() {
                backoff::Error::transient(KeyprintError::HttpError(e))
            } else {
                backoff::Error::permanent(KeyprintError::HttpError(e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                // 204 carries no body; deserialize from an empty object
                return serde_json::from_value(serde_json::json!({})).map_err(|e| {
                    backoff::Error::permanent(KeyprintError::SerializationError(e.to_string()))
                });
            }
            return response.json::<T>().await.map_err(|e| {
                backoff::Error::permanent(KeyprintError::SerializationError(e.to_string()))
            });
        }

        let err = match response.json::<ApiErrorBody>().await {
            Ok(body) => KeyprintError::ApiRejected {
                code: body.code.unwrap_or_else(|| status.as_u16().to_string()),
                message: body.error,
            },
            Err(_) => KeyprintError::ApiRejected {
                code: status.as_u16().to_string(),
                message: format!("HTTP {status}"),
            },
        };

        if is_transient_status(status) {
            Err(backoff::Error::transient(err))
        } else {
            Err(backoff::Error::permanent(err))
        }
    }

    async fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            max_elapsed_time: Some(self.config.timeout * self.config.max_retries),
            ..Default::default()
        };

        retry_notify(
            backoff,
            || async { self.send_once(&method, path, body).await },
            |err: KeyprintError, duration: Duration| {
                warn!(
                    error = %err,
                    path = path,
                    retry_after_ms = duration.as_millis() as u64,
                    "Retry scheduled"
                );
            },
        )
        .await
    }
}

#[cfg(feature = "client")]
/// Whether an HTTP status warrants a retry.
fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

#[cfg(feature = "client")]
#[async_trait]
impl BiometricApi for HttpBiometricApi {
    async fn request_challenge(&self, device_id: Option<&str>) -> Result<ChallengeResponse> {
        let body = ChallengeRequest {
            device_id: device_id.map(str::to_string),
        };
        debug!(device_id = ?device_id, "Requesting challenge");
        self.send(Method::POST, "/biometric/challenge", Some(&body))
            .await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse> {
        self.send(Method::POST, "/biometric/register", Some(request))
            .await
    }

    async fn authenticate(&self, request: &AuthenticateRequest) -> Result<AuthenticateResponse> {
        self.send(Method::POST, "/biometric/authenticate", Some(request))
            .await
    }

    async fn registrations(&self) -> Result<RegistrationsResponse> {
        self.send::<(), _>(Method::GET, "/biometric/registrations", None)
            .await
    }

    async fn status(&self) -> Result<StatusResponse> {
        self.send::<(), _>(Method::GET, "/biometric/status", None)
            .await
    }

    async fn update_settings(&self, request: &SettingsRequest) -> Result<SettingsResponse> {
        self.send(Method::PUT, "/biometric/settings", Some(request))
            .await
    }

    async fn remove_registration(&self, device_id: &str) -> Result<()> {
        let path = format!("/biometric/registrations/{device_id}");
        let _: serde_json::Value = self.send::<(), _>(Method::DELETE, &path, None).await?;
        Ok(())
    }
}
