//! Authenticated HTTP client for the storefront API
//!
//! Wraps reqwest::Client with bearer token injection and one-shot recovery
//! from 401 responses through the refresh coordinator.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::notify::Notifier;
use crate::auth::error::SessionError;
use crate::auth::refresh::RefreshCoordinator;
use crate::auth::{is_public_auth_path, TokenStore};
use crate::models::ApiResponse;

/// Per-call options carried through the gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Suppress success/error notifications for this call.
    pub silent: bool,
    /// Set once the call has been resubmitted after a 401.
    pub retried: bool,
}

impl RequestContext {
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }
}

/// Gateway for every storefront API call.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    store: Arc<dyn TokenStore>,
    coordinator: Arc<RefreshCoordinator>,
    notifier: Arc<dyn Notifier>,
}

impl ApiClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        store: Arc<dyn TokenStore>,
        coordinator: Arc<RefreshCoordinator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store,
            coordinator,
            notifier,
        }
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        ctx: RequestContext,
    ) -> Result<ApiResponse<T>, SessionError> {
        self.send(Method::GET, path, None, ctx).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: Option<&B>,
        ctx: RequestContext,
    ) -> Result<ApiResponse<T>, SessionError> {
        let body = body.map(to_json).transpose()?;
        self.send(Method::POST, path, body, ctx).await
    }

    /// POST whose response is decoded as `R` rather than the envelope.
    pub async fn post_json<R: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        ctx: RequestContext,
    ) -> Result<R, SessionError> {
        let body = to_json(body)?;
        self.send_json(Method::POST, path, Some(body), ctx).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        ctx: RequestContext,
    ) -> Result<ApiResponse<T>, SessionError> {
        let body = to_json(body)?;
        self.send(Method::PUT, path, Some(body), ctx).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        ctx: RequestContext,
    ) -> Result<ApiResponse<T>, SessionError> {
        self.send(Method::DELETE, path, None, ctx).await
    }

    /// Issue a call and decode the standard envelope.
    pub async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        ctx: RequestContext,
    ) -> Result<ApiResponse<T>, SessionError> {
        let raw = self.dispatch(method, path, body.as_ref(), ctx).await?;
        if raw.trim().is_empty() {
            return Ok(ApiResponse::empty());
        }
        serde_json::from_str(&raw).map_err(|e| parse_error(path, e))
    }

    /// Issue a call and decode the body as `R`, for endpoints that may skip
    /// the envelope.
    pub async fn send_json<R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        ctx: RequestContext,
    ) -> Result<R, SessionError> {
        let raw = self.dispatch(method, path, body.as_ref(), ctx).await?;
        serde_json::from_str(&raw).map_err(|e| parse_error(path, e))
    }

    /// Run the call and report its outcome unless `ctx.silent` is set.
    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        ctx: RequestContext,
    ) -> Result<String, SessionError> {
        let outcome = self.execute(method, path, body, ctx).await;

        if !ctx.silent {
            match &outcome {
                Ok(raw) => {
                    if let Some(message) = envelope_message(raw) {
                        self.notifier.success(&message);
                    }
                }
                // Session teardown was already announced by the coordinator
                Err(e) if e.is_session_ended() => {}
                Err(e) => self.notifier.error(&e.user_message()),
            }
        }

        outcome
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        mut ctx: RequestContext,
    ) -> Result<String, SessionError> {
        let url = format!("{}{}", self.base_url, path);
        let mut token = self.store.access_token();

        loop {
            tracing::debug!("{} {}", method, url);

            let mut request = self.http.request(method.clone(), &url);
            if let Some(ref token) = token {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let resp = request.send().await.map_err(|e| SessionError::Request {
                status: None,
                message: format!("{} {} failed: {}", method, url, e),
            })?;

            if resp.status() == StatusCode::UNAUTHORIZED {
                if is_public_auth_path(path) {
                    tracing::debug!("401 from auth endpoint {}, not recovering", path);
                } else if ctx.retried {
                    tracing::warn!("401 for {} after token renewal, giving up", path);
                } else {
                    ctx.retried = true;
                    // Another caller may have renewed while this one was in flight
                    match self.store.access_token().filter(|t| !t.is_empty()) {
                        Some(current) if token.as_deref() != Some(current.as_str()) => {
                            tracing::debug!("401 for {}, retrying with renewed token", path);
                            token = Some(current);
                        }
                        _ => {
                            tracing::info!("401 for {}, renewing access token", path);
                            token = Some(self.coordinator.renew(!ctx.silent).await?);
                        }
                    }
                    continue;
                }
            }

            return check_response(resp, &url).await;
        }
    }
}

fn to_json<B: Serialize + ?Sized>(body: &B) -> Result<serde_json::Value, SessionError> {
    serde_json::to_value(body).map_err(|e| SessionError::Request {
        status: None,
        message: format!("Failed to encode request body: {}", e),
    })
}

fn parse_error(path: &str, e: serde_json::Error) -> SessionError {
    SessionError::Request {
        status: None,
        message: format!("Failed to parse response from {}: {}", path, e),
    }
}

/// Check HTTP status and return the body, or a `Request` error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<String, SessionError> {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();

    if !status.is_success() {
        tracing::debug!("HTTP {} for {}: {}", status.as_u16(), url, body);
        let message = envelope_message(&body).unwrap_or_else(|| body.trim().to_string());
        return Err(SessionError::from_status(status, message));
    }

    Ok(body)
}

/// Non-empty `message` field of a JSON body.
fn envelope_message(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("message")?
        .as_str()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from)
}
