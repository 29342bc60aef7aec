//! Single-flight access token renewal
//!
//! However many callers ask for a new token while a refresh is running, only
//! one `POST /v1/auth/refresh-token` goes out. Everybody queued behind it gets
//! the same outcome.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use super::error::{SessionError, SESSION_EXPIRED_MESSAGE};
use super::tokens::{TokenPair, TokenStore};
use super::REFRESH_PATH;
use crate::api::notify::Notifier;
use crate::models::{AuthPayload, RefreshRequest, SessionUser};

/// A queued caller and whether it wants a session teardown announced.
struct Waiter {
    tx: oneshot::Sender<Result<String, SessionError>>,
    announce: bool,
}

enum RefreshState {
    Idle,
    Refreshing { waiters: Vec<Waiter> },
}

enum Entry {
    Queued,
    Start(String),
    NoRefreshToken,
}

/// Owns the refresh state machine and the queue of pending callers.
pub struct RefreshCoordinator {
    http: reqwest::Client,
    base_url: String,
    store: Arc<dyn TokenStore>,
    notifier: Arc<dyn Notifier>,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        store: Arc<dyn TokenStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store,
            notifier,
            state: Mutex::new(RefreshState::Idle),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(|e| e.into_inner()),
            RefreshState::Refreshing { .. }
        )
    }

    /// Obtain a fresh access token.
    ///
    /// Starts a refresh when idle, otherwise joins the one in flight. On
    /// failure the session has already been cleared when this returns. The
    /// session-expired notice goes out only if some caller in the cycle passed
    /// `announce`.
    pub async fn renew(self: &Arc<Self>, announce: bool) -> Result<String, SessionError> {
        let (tx, rx) = oneshot::channel();
        let waiter = Waiter { tx, announce };

        // Check-and-transition happens under one guard, with no await inside.
        let entry = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if let RefreshState::Refreshing { waiters } = &mut *state {
                tracing::debug!("Refresh in flight, queueing caller ({} waiting)", waiters.len());
                waiters.push(waiter);
                Entry::Queued
            } else {
                match self.store.refresh_token().filter(|t| !t.is_empty()) {
                    Some(refresh_token) => {
                        *state = RefreshState::Refreshing {
                            waiters: vec![waiter],
                        };
                        Entry::Start(refresh_token)
                    }
                    None => Entry::NoRefreshToken,
                }
            }
        };

        match entry {
            Entry::Queued => {}
            Entry::Start(refresh_token) => {
                // Run the cycle in its own task so a caller dropping its future
                // cannot leave the state stuck in Refreshing.
                let this = Arc::clone(self);
                tokio::spawn(async move { this.run_cycle(refresh_token).await });
            }
            Entry::NoRefreshToken => {
                tracing::info!("No refresh token stored, ending session");
                self.end_session(announce);
                return Err(SessionError::NoRefreshToken);
            }
        }

        rx.await.unwrap_or_else(|_| {
            Err(SessionError::RefreshFailed(
                "refresh task ended without a result".into(),
            ))
        })
    }

    async fn run_cycle(&self, refresh_token: String) {
        tracing::info!("Refreshing access token...");

        let outcome = match self.request_refresh(&refresh_token).await {
            Ok((tokens, user)) => match self.store.save(&tokens, &user) {
                Ok(()) => {
                    tracing::info!("Access token refreshed");
                    Ok(tokens.access_token)
                }
                Err(e) => Err(SessionError::Storage(format!("{:#}", e))),
            },
            Err(e) => Err(e),
        };

        if let Err(ref e) = outcome {
            tracing::warn!("Token refresh failed, ending session: {}", e);
            self.clear_store();
        }

        let waiters = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Refreshing { waiters } => waiters,
                RefreshState::Idle => Vec::new(),
            }
        };

        if outcome.is_err() && waiters.iter().any(|w| w.announce) {
            self.notifier.error(SESSION_EXPIRED_MESSAGE);
        }

        tracing::debug!("Releasing {} queued caller(s)", waiters.len());
        for waiter in waiters {
            // Receiver gone means the caller stopped waiting; nothing to do.
            let _ = waiter.tx.send(outcome.clone());
        }
    }

    /// Call the refresh endpoint directly, outside the request gateway.
    async fn request_refresh(
        &self,
        refresh_token: &str,
    ) -> Result<(TokenPair, SessionUser), SessionError> {
        let url = format!("{}{}", self.base_url, REFRESH_PATH);
        tracing::debug!("POST {}", url);

        let resp = self
            .http
            .post(&url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| SessionError::RefreshFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SessionError::RefreshFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let auth = resp
            .json::<AuthPayload>()
            .await
            .map_err(|e| SessionError::RefreshFailed(format!("unexpected response: {}", e)))?
            .into_inner();

        let user = SessionUser::from(&auth);
        let tokens = TokenPair {
            // No rotation in the response means the old refresh token stays valid
            refresh_token: auth
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| refresh_token.to_string()),
            access_token: auth.access_token,
        };
        Ok((tokens, user))
    }

    fn clear_store(&self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!("Failed to clear session: {:#}", e);
        }
    }

    fn end_session(&self, announce: bool) {
        self.clear_store();
        if announce {
            self.notifier.error(SESSION_EXPIRED_MESSAGE);
        }
    }
}
