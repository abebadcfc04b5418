//! HTTP gateway: the single configured client for every backend call.
//!
//! The [`Gateway`] owns one `reqwest::Client` with a fixed base URL and
//! timeout, and runs each call through an explicit interceptor pipeline
//! composed at construction time by [`GatewayBuilder`]:
//!
//! ```text
//!  ApiRequest ─▶ RequestInterceptor* ─▶ reqwest ─▶ classify ─▶ ResponseInterceptor* ─▶ JSON
//! ```
//!
//! # Built-in interceptors
//!
//! | Interceptor | Stage | Effect |
//! |-------------|-------|--------|
//! | [`BearerAuth`] | request | Adds `Authorization: Bearer <token>` when a session is stored |
//! | [`SessionInvalidation`] | response | On 401, clears the session and publishes [`SessionEvent::Invalidated`](crate::session::SessionEvent::Invalidated) |
//! | [`ErrorLogging`] | response | Logs every failure with its classification |
//!
//! # Classification
//!
//! | Outcome | Result |
//! |---------|--------|
//! | 2xx | `Ok(body)` |
//! | 401 | [`HttpErrorKind::Unauthorized`] |
//! | 403 | [`HttpErrorKind::Forbidden`] |
//! | 5xx | [`HttpErrorKind::ServerError`] |
//! | other status | [`HttpErrorKind::ClientError`] |
//! | timeout | [`HttpErrorKind::Timeout`] |
//! | no response | [`HttpErrorKind::NetworkError`] |
//! | unbuildable request | [`HttpErrorKind::RequestError`] |
//!
//! The gateway never retries. Retry policy belongs to the caller.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::ApiConfig;
use crate::error::{HttpError, HttpErrorKind};
use crate::session::SessionStore;

/// An outgoing call as seen by request interceptors.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the base URL, starting with `/`.
    pub path: String,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: HeaderMap,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_params(mut self, params: &[(&str, String)]) -> Self {
        self.params = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        self
    }

    pub fn with_body(mut self, body: Option<Value>) -> Self {
        self.body = body;
        self
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

/// Transforms a request before it is sent.
pub trait RequestInterceptor: Send + Sync {
    fn name(&self) -> &str;

    fn on_request(&self, request: ApiRequest) -> Result<ApiRequest, HttpError>;
}

/// Observes or transforms the classified outcome of a call.
pub trait ResponseInterceptor: Send + Sync {
    fn name(&self) -> &str;

    fn on_response(
        &self,
        request: &ApiRequest,
        outcome: Result<ApiResponse, HttpError>,
    ) -> Result<ApiResponse, HttpError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in interceptors
// ═══════════════════════════════════════════════════════════════════════

/// Attaches the stored bearer token, if any.
pub struct BearerAuth {
    session: Arc<SessionStore>,
}

impl BearerAuth {
    pub fn new(session: Arc<SessionStore>) -> Self {
        Self { session }
    }
}

impl RequestInterceptor for BearerAuth {
    fn name(&self) -> &str {
        "bearer_auth"
    }

    fn on_request(&self, mut request: ApiRequest) -> Result<ApiRequest, HttpError> {
        if let Some(token) = self.session.token() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
                HttpError::new(
                    HttpErrorKind::RequestError,
                    format!("invalid token header: {}", e),
                )
            })?;
            request.headers.insert(AUTHORIZATION, value);
        }
        Ok(request)
    }
}

/// Clears the session once per 401 response.
pub struct SessionInvalidation {
    session: Arc<SessionStore>,
}

impl SessionInvalidation {
    pub fn new(session: Arc<SessionStore>) -> Self {
        Self { session }
    }
}

impl ResponseInterceptor for SessionInvalidation {
    fn name(&self) -> &str {
        "session_invalidation"
    }

    fn on_response(
        &self,
        _request: &ApiRequest,
        outcome: Result<ApiResponse, HttpError>,
    ) -> Result<ApiResponse, HttpError> {
        if let Err(ref e) = outcome {
            if e.is_unauthorized() {
                if let Err(clear_err) = self.session.invalidate() {
                    tracing::error!(error = %clear_err, "failed to clear session after 401");
                }
            }
        }
        outcome
    }
}

/// Logs failures with their classification.
pub struct ErrorLogging;

impl ResponseInterceptor for ErrorLogging {
    fn name(&self) -> &str {
        "error_logging"
    }

    fn on_response(
        &self,
        request: &ApiRequest,
        outcome: Result<ApiResponse, HttpError>,
    ) -> Result<ApiResponse, HttpError> {
        match &outcome {
            Ok(resp) => {
                tracing::debug!(method = %request.method, path = %request.path, status = resp.status, "ok");
            }
            Err(e) => {
                let summary = match e.kind {
                    HttpErrorKind::Unauthorized => "unauthorized: login required",
                    HttpErrorKind::Forbidden => "forbidden: insufficient permissions",
                    HttpErrorKind::ServerError => "internal server error",
                    HttpErrorKind::ClientError => "request rejected",
                    HttpErrorKind::NetworkError => "no response from server",
                    HttpErrorKind::RequestError => "request setup error",
                    HttpErrorKind::Timeout => "request timed out",
                    HttpErrorKind::Decode => "unexpected response body",
                };
                tracing::error!(
                    method = %request.method,
                    path = %request.path,
                    status = ?e.status,
                    kind = %e.kind,
                    message = %e.message,
                    "{}",
                    summary
                );
            }
        }
        outcome
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Gateway
// ═══════════════════════════════════════════════════════════════════════

pub struct Gateway {
    client: reqwest::Client,
    base_url: String,
    request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
}

/// Composes a [`Gateway`] and its interceptor pipeline.
///
/// Interceptors run in the order they were added.
pub struct GatewayBuilder {
    base_url: String,
    timeout: Duration,
    request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
}

impl GatewayBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            request_interceptors: Vec::new(),
            response_interceptors: Vec::new(),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn request_interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.request_interceptors.push(interceptor);
        self
    }

    pub fn response_interceptor(mut self, interceptor: Arc<dyn ResponseInterceptor>) -> Self {
        self.response_interceptors.push(interceptor);
        self
    }

    /// Install [`BearerAuth`] and [`SessionInvalidation`] for `session`.
    pub fn with_session(self, session: Arc<SessionStore>) -> Self {
        self.request_interceptor(Arc::new(BearerAuth::new(session.clone())))
            .response_interceptor(Arc::new(SessionInvalidation::new(session)))
    }

    pub fn with_logging(self) -> Self {
        self.response_interceptor(Arc::new(ErrorLogging))
    }

    pub fn build(self) -> Result<Gateway> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .default_headers(headers)
            .build()?;

        // Validate once up front; per-call URLs are built by concatenation.
        Url::parse(&self.base_url)?;

        Ok(Gateway {
            client,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            request_interceptors: self.request_interceptors,
            response_interceptors: self.response_interceptors,
        })
    }
}

impl Gateway {
    pub fn builder(base_url: impl Into<String>) -> GatewayBuilder {
        GatewayBuilder::new(base_url)
    }

    /// The standard pipeline: session auth, 401 handling, error logging.
    pub fn from_config(config: &ApiConfig, session: Arc<SessionStore>) -> Result<Self> {
        GatewayBuilder::new(config.base_url.clone())
            .timeout(config.timeout())
            .with_session(session)
            .with_logging()
            .build()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> Result<Url, HttpError> {
        let joined = if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        };
        Url::parse(&joined).map_err(|e| {
            HttpError::new(
                HttpErrorKind::RequestError,
                format!("invalid URL '{}': {}", joined, e),
            )
        })
    }

    /// Issue one call and return the parsed JSON body.
    ///
    /// An empty success body yields `Value::Null`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        params: &[(&str, String)],
    ) -> Result<Value, HttpError> {
        let request = ApiRequest::new(method, path)
            .with_params(params)
            .with_body(body);
        // A rejected request still goes through the response pipeline.
        let prepared = self
            .request_interceptors
            .iter()
            .try_fold(request.clone(), |req, i| i.on_request(req));
        let (request, outcome) = match prepared {
            Ok(prepared) => {
                let outcome = self.send(&prepared).await;
                (prepared, outcome)
            }
            Err(e) => (request, Err(e)),
        };
        let outcome = self
            .response_interceptors
            .iter()
            .fold(outcome, |acc, i| i.on_response(&request, acc));
        let response = outcome?;

        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&response.body).map_err(|e| {
            HttpError {
                kind: HttpErrorKind::Decode,
                status: Some(response.status),
                message: format!("invalid JSON from {}: {}", request.path, e),
            }
        })
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, HttpError> {
        let value = self.request(Method::GET, path, None, params).await?;
        decode(path, value)
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, HttpError> {
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| {
                HttpError::new(
                    HttpErrorKind::RequestError,
                    format!("failed to serialize request body: {}", e),
                )
            })?;
        let value = self.request(Method::POST, path, body, &[]).await?;
        decode(path, value)
    }

    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, HttpError> {
        let url = self.url_for(&request.path)?;

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        if (200..300).contains(&status) {
            Ok(ApiResponse { status, body })
        } else {
            Err(HttpError::from_response(status, &body))
        }
    }
}

fn decode<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, HttpError> {
    serde_json::from_value(value).map_err(|e| {
        HttpError::new(
            HttpErrorKind::Decode,
            format!("unexpected response shape from {}: {}", path, e),
        )
    })
}
