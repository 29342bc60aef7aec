//! Proactive token renewal
//!
//! One timer per session, fired `leeway` before the access token expires.
//! Each successful renewal schedules the next one, so a long-running client
//! never has to hit a 401 to notice its token went stale.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::jwt::decode_expiry;
use super::refresh::RefreshCoordinator;
use super::tokens::TokenStore;

/// Default lead time before expiry.
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(30);

/// Floor between two renewals driven by the same timer. Stops a server that
/// keeps issuing nearly-expired tokens from turning the loop into a spin.
const MIN_RENEWAL_INTERVAL: Duration = Duration::from_secs(5);

/// Time until the renewal for a token expiring at `exp_secs` should fire:
/// `max(exp*1000 - now - leeway, 0)`.
pub fn refresh_delay(exp_secs: i64, now_ms: i64, leeway: Duration) -> Duration {
    let remaining_ms = exp_secs.saturating_mul(1000).saturating_sub(now_ms);
    let fire_in_ms = remaining_ms.saturating_sub(leeway.as_millis() as i64);
    Duration::from_millis(fire_in_ms.max(0) as u64)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct SessionScheduler {
    coordinator: Arc<RefreshCoordinator>,
    store: Arc<dyn TokenStore>,
    leeway: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl SessionScheduler {
    pub fn new(
        coordinator: Arc<RefreshCoordinator>,
        store: Arc<dyn TokenStore>,
        leeway: Duration,
    ) -> Self {
        Self {
            coordinator,
            store,
            leeway,
            timer: Mutex::new(None),
        }
    }

    /// Arm the timer for `access_token`, replacing any pending one.
    ///
    /// Returns `false` when the token's expiry is unreadable; proactive renewal
    /// is then off and only 401 handling will renew.
    pub fn arm(&self, access_token: &str) -> bool {
        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = timer.take() {
            previous.abort();
        }

        let Some(exp) = decode_expiry(access_token) else {
            tracing::warn!("Access token expiry unknown, proactive renewal disabled");
            return false;
        };

        let delay = refresh_delay(exp, now_ms(), self.leeway);
        tracing::debug!("Token renewal scheduled in {}s", delay.as_secs());

        *timer = Some(tokio::spawn(renewal_loop(
            Arc::clone(&self.coordinator),
            Arc::clone(&self.store),
            self.leeway,
            access_token.to_string(),
            delay,
        )));
        true
    }

    /// Drop the pending timer, if any. An in-flight refresh is left to finish.
    pub fn cancel(&self) {
        if let Some(handle) = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
            tracing::debug!("Token renewal timer cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(false, |h| !h.is_finished())
    }
}

impl Drop for SessionScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Body of the armed timer. Sleeps, renews, and goes round again with the
/// new token until the session ends or the handle is aborted.
async fn renewal_loop(
    coordinator: Arc<RefreshCoordinator>,
    store: Arc<dyn TokenStore>,
    leeway: Duration,
    mut token: String,
    mut delay: Duration,
) {
    loop {
        tokio::time::sleep(delay).await;

        let Some(session) = store.load().filter(|s| !s.tokens.refresh_token.is_empty()) else {
            tracing::debug!("No session at renewal time, timer stopped");
            return;
        };

        // A reactive refresh may have rotated the token since we armed.
        if session.tokens.access_token != token {
            let Some(exp) = decode_expiry(&session.tokens.access_token) else {
                tracing::warn!("Stored access token expiry unknown, proactive renewal disabled");
                return;
            };
            token = session.tokens.access_token;
            delay = refresh_delay(exp, now_ms(), leeway);
            if !delay.is_zero() {
                tracing::debug!("Token already rotated, renewal moved to {}s", delay.as_secs());
                continue;
            }
        }

        tracing::info!("Renewing access token ahead of expiry");
        match coordinator.renew(true).await {
            Ok(new_token) => {
                let Some(exp) = decode_expiry(&new_token) else {
                    tracing::warn!("Renewed token expiry unknown, proactive renewal disabled");
                    return;
                };
                token = new_token;
                delay = refresh_delay(exp, now_ms(), leeway).max(MIN_RENEWAL_INTERVAL);
                tracing::debug!("Next token renewal in {}s", delay.as_secs());
            }
            Err(e) => {
                // No retry: the coordinator has already cleared the store.
                tracing::warn!("Proactive token renewal failed: {}", e);
                return;
            }
        }
    }
}
