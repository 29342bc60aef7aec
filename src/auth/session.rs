//! Session facade: the operations login/registration forms call

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use super::error::SessionError;
use super::otp::OtpCooldowns;
use super::refresh::RefreshCoordinator;
use super::scheduler::SessionScheduler;
use super::tokens::{StoredSession, TokenPair, TokenStore};
use super::{
    CHECK_EMAIL_PATH, CHECK_USERNAME_PATH, FORGOT_PASSWORD_PATH, LOGIN_PATH, PROFILE_PATH,
    REGISTER_PATH, RESET_PASSWORD_PATH, SEND_OTP_PATH,
};
use crate::api::{ApiClient, Notifier, RequestContext};
use crate::config::Config;
use crate::models::{
    AuthPayload, LoginRequest, RegisterRequest, ResetPasswordRequest, SendOtpRequest, SessionUser,
};

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// One signed-in (or signed-out) client session.
pub struct Session {
    api: ApiClient,
    store: Arc<dyn TokenStore>,
    scheduler: SessionScheduler,
    otp: OtpCooldowns,
}

impl Session {
    /// Wire the gateway, coordinator and scheduler from `config`.
    pub fn new(
        config: &Config,
        store: Arc<dyn TokenStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build HTTP client")?;
        let session = Self::with_client(
            http,
            &config.api_url,
            config.refresh_leeway(),
            store,
            notifier,
        );
        Ok(session.with_otp_cooldowns(OtpCooldowns::open_default()?))
    }

    pub fn with_client(
        http: reqwest::Client,
        api_url: &str,
        leeway: Duration,
        store: Arc<dyn TokenStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let coordinator = Arc::new(RefreshCoordinator::new(
            http.clone(),
            api_url,
            Arc::clone(&store),
            Arc::clone(&notifier),
        ));
        let scheduler =
            SessionScheduler::new(Arc::clone(&coordinator), Arc::clone(&store), leeway);
        let api = ApiClient::new(http, api_url, Arc::clone(&store), coordinator, notifier);

        Self {
            api,
            store,
            scheduler,
            otp: OtpCooldowns::in_memory(),
        }
    }

    /// Replace the in-process OTP cooldowns, e.g. with a file-backed set.
    pub fn with_otp_cooldowns(mut self, otp: OtpCooldowns) -> Self {
        self.otp = otp;
        self
    }

    pub fn scheduler(&self) -> &SessionScheduler {
        &self.scheduler
    }

    /// Pick up a session persisted by an earlier run and resume renewal.
    pub fn restore(&self) -> Option<SessionUser> {
        let session = self.store.load()?;
        if !self.scheduler.arm(&session.tokens.access_token) {
            tracing::debug!("Restored session relies on 401 recovery only");
        }
        tracing::info!("Restored session for {}", session.user.username);
        Some(session.user)
    }

    pub fn stored(&self) -> Option<StoredSession> {
        self.store.load()
    }

    pub fn current_user(&self) -> Option<SessionUser> {
        self.store.load().map(|s| s.user)
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.load().is_some()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<SessionUser, SessionError> {
        let auth = self
            .api
            .post_json::<AuthPayload, _>(
                LOGIN_PATH,
                &LoginRequest { email, password },
                RequestContext::default(),
            )
            .await?
            .into_inner();

        let Some(refresh_token) = auth.refresh_token.clone().filter(|t| !t.is_empty()) else {
            return Err(SessionError::Request {
                status: None,
                message: "Login response did not include a refresh token".into(),
            });
        };

        let user = SessionUser::from(&auth);
        let tokens = TokenPair {
            access_token: auth.access_token,
            refresh_token,
        };
        self.store
            .save(&tokens, &user)
            .map_err(|e| SessionError::Storage(format!("{:#}", e)))?;
        self.scheduler.arm(&tokens.access_token);

        tracing::info!("Logged in as {}", user.username);
        Ok(user)
    }

    pub fn logout(&self) -> Result<(), SessionError> {
        self.scheduler.cancel();
        self.store
            .clear()
            .map_err(|e| SessionError::Storage(format!("{:#}", e)))?;
        tracing::info!("Logged out");
        Ok(())
    }

    /// Create an account. Returns the server's confirmation message.
    pub async fn register(&self, request: &RegisterRequest) -> Result<Option<String>, SessionError> {
        let resp = self
            .api
            .post::<serde_json::Value, _>(REGISTER_PATH, Some(request), RequestContext::default())
            .await?;
        Ok(resp.message().map(String::from))
    }

    /// Remaining cooldown before another OTP may be sent to `email`.
    pub fn otp_cooldown_remaining(&self, email: &str) -> Duration {
        self.otp.remaining(email)
    }

    /// Send a registration OTP, at most once per cooldown window per address.
    pub async fn send_otp(&self, email: &str) -> Result<(), SessionError> {
        let remaining = self.otp_cooldown_remaining(email);
        if !remaining.is_zero() {
            return Err(SessionError::OtpCooldown {
                remaining_secs: remaining.as_secs_f64().ceil() as u64,
            });
        }

        self.api
            .post::<serde_json::Value, _>(
                SEND_OTP_PATH,
                Some(&SendOtpRequest { email }),
                RequestContext::default(),
            )
            .await?;

        if let Err(e) = self.otp.start(email) {
            tracing::warn!("Failed to record OTP cooldown: {:#}", e);
        }
        Ok(())
    }

    pub async fn forgot_password(&self, email: &str) -> Result<(), SessionError> {
        let path = format!("{}?email={}", FORGOT_PASSWORD_PATH, encode(email));
        self.api
            .post::<serde_json::Value, ()>(&path, None, RequestContext::default())
            .await?;
        Ok(())
    }

    pub async fn reset_password(&self, request: &ResetPasswordRequest) -> Result<(), SessionError> {
        self.api
            .post::<serde_json::Value, _>(RESET_PASSWORD_PATH, Some(request), RequestContext::default())
            .await?;
        Ok(())
    }

    /// Whether `username` is still free. Silent: forms call this per keystroke.
    pub async fn check_username(&self, username: &str) -> Result<bool, SessionError> {
        let path = format!("{}?username={}", CHECK_USERNAME_PATH, encode(username));
        let resp = self.api.get::<bool>(&path, RequestContext::silent()).await?;
        Ok(resp.data.unwrap_or(false))
    }

    pub async fn check_email(&self, email: &str) -> Result<bool, SessionError> {
        let path = format!("{}?email={}", CHECK_EMAIL_PATH, encode(email));
        let resp = self.api.get::<bool>(&path, RequestContext::silent()).await?;
        Ok(resp.data.unwrap_or(false))
    }

    /// Signed-in user's profile, fetched from the server.
    pub async fn profile(&self) -> Result<SessionUser, SessionError> {
        let resp = self
            .api
            .get::<SessionUser>(PROFILE_PATH, RequestContext::silent())
            .await?;
        resp.data.ok_or_else(|| SessionError::Request {
            status: None,
            message: "Profile response had no data".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::notify::{Notification, RecordingNotifier};
    use crate::auth::jwt::token_with_exp;
    use crate::auth::scheduler::DEFAULT_LEEWAY;
    use crate::auth::testing::{alice, auth_json, seeded_store};
    use crate::auth::{MemoryTokenStore, REFRESH_PATH};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session(server: &MockServer, store: Arc<dyn TokenStore>) -> (Session, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let session = Session::with_client(
            reqwest::Client::new(),
            &server.uri(),
            DEFAULT_LEEWAY,
            store,
            notifier.clone(),
        );
        (session, notifier)
    }

    fn hour_token() -> String {
        token_with_exp(chrono::Utc::now().timestamp() + 3600)
    }

    #[tokio::test]
    async fn test_login_populates_store_and_arms_scheduler() {
        let server = MockServer::start().await;
        let access = hour_token();
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .and(body_json(json!({ "email": "alice@example.com", "password": "s3cret" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(auth_json(&access, Some("r1"))))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::new());
        let (session, notifier) = session(&server, store.clone());

        let user = session.login("alice@example.com", "s3cret").await.unwrap();
        assert_eq!(user, alice());

        let stored = store.load().unwrap();
        assert_eq!(stored.tokens.access_token, access);
        assert_eq!(stored.tokens.refresh_token, "r1");
        assert_eq!(stored.user, alice());
        assert!(session.is_authenticated());
        assert!(session.scheduler().is_armed());
        assert_eq!(
            notifier.take(),
            vec![Notification::Success("Login successful".into())]
        );
    }

    #[tokio::test]
    async fn test_login_accepts_flat_response() {
        let server = MockServer::start().await;
        let access = hour_token();
        let flat = auth_json(&access, Some("r1"))["data"].clone();
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(flat))
            .mount(&server)
            .await;

        let (session, _) = session(&server, Arc::new(MemoryTokenStore::new()));
        assert_eq!(session.login("alice@example.com", "pw").await.unwrap().username, "alice");
    }

    #[tokio::test]
    async fn test_login_without_refresh_token_stores_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(auth_json(&hour_token(), None)))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::new());
        let (session, _) = session(&server, store.clone());

        assert!(session.login("alice@example.com", "pw").await.is_err());
        assert!(store.load().is_none());
        assert!(!session.scheduler().is_armed());
    }

    #[tokio::test]
    async fn test_failed_login_does_not_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({ "message": "Invalid credentials" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (session, notifier) = session(&server, seeded_store("a1", "r1"));

        let err = session.login("alice@example.com", "wrong").await.unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert_eq!(notifier.errors(), vec!["Invalid credentials".to_string()]);
    }

    #[tokio::test]
    async fn test_logout_clears_and_disarms() {
        let server = MockServer::start().await;
        let store = seeded_store(&hour_token(), "r1");
        let (session, _) = session(&server, store.clone());

        assert_eq!(session.restore(), Some(alice()));
        assert!(session.scheduler().is_armed());

        session.logout().unwrap();
        assert!(store.load().is_none());
        assert!(!session.scheduler().is_armed());
        assert!(session.current_user().is_none());
        assert!(session.restore().is_none());
    }

    #[tokio::test]
    async fn test_send_otp_enforces_cooldown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SEND_OTP_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "success": true, "message": "OTP sent" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (session, _) = session(&server, Arc::new(MemoryTokenStore::new()));

        session.send_otp("alice@example.com").await.unwrap();
        let err = session.send_otp("  Alice@Example.com ").await.unwrap_err();
        match err {
            SessionError::OtpCooldown { remaining_secs } => {
                assert!(remaining_secs > 0 && remaining_secs <= 60)
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(session.otp_cooldown_remaining("bob@example.com").is_zero());
    }

    #[tokio::test]
    async fn test_failed_otp_send_does_not_start_cooldown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SEND_OTP_PATH))
            .respond_with(ResponseTemplate::new(429))
            .expect(2)
            .mount(&server)
            .await;

        let (session, _) = session(&server, Arc::new(MemoryTokenStore::new()));
        assert!(session.send_otp("alice@example.com").await.is_err());
        assert!(session.send_otp("alice@example.com").await.is_err());
        assert!(session.otp_cooldown_remaining("alice@example.com").is_zero());
    }

    #[tokio::test]
    async fn test_forgot_password_encodes_email() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(FORGOT_PASSWORD_PATH))
            .and(query_param("email", "a+b@example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(1)
            .mount(&server)
            .await;

        let (session, _) = session(&server, Arc::new(MemoryTokenStore::new()));
        session.forgot_password("a+b@example.com").await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_password_and_register() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(RESET_PASSWORD_PATH))
            .and(body_json(json!({ "token": "t1", "newPassword": "n", "confirmPassword": "n" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(REGISTER_PATH))
            .and(body_json(json!({
                "username": "alice", "email": "alice@example.com", "password": "pw", "otp": "123456"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "success": true, "message": "Account created" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (session, _) = session(&server, Arc::new(MemoryTokenStore::new()));
        session
            .reset_password(&ResetPasswordRequest {
                token: "t1".into(),
                new_password: "n".into(),
                confirm_password: "n".into(),
            })
            .await
            .unwrap();

        let message = session
            .register(&RegisterRequest {
                username: "alice".into(),
                email: "alice@example.com".into(),
                password: "pw".into(),
                otp: "123456".into(),
            })
            .await
            .unwrap();
        assert_eq!(message.as_deref(), Some("Account created"));
    }

    #[tokio::test]
    async fn test_availability_checks_are_silent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CHECK_USERNAME_PATH))
            .and(query_param("username", "alice"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "success": true, "message": "Taken", "data": false })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(CHECK_EMAIL_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (session, notifier) = session(&server, Arc::new(MemoryTokenStore::new()));
        assert!(!session.check_username("alice").await.unwrap());
        assert!(session.check_email("alice@example.com").await.is_err());
        assert!(notifier.take().is_empty());
    }

    #[tokio::test]
    async fn test_profile_recovers_from_expired_token() {
        let server = MockServer::start().await;
        let fresh = hour_token();
        Mock::given(method("GET"))
            .and(path(PROFILE_PATH))
            .and(header("authorization", "Bearer a-old"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(PROFILE_PATH))
            .and(header("authorization", format!("Bearer {}", fresh).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": alice() })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(auth_json(&fresh, None)))
            .expect(1)
            .mount(&server)
            .await;

        let store = seeded_store("a-old", "r1");
        let (session, _) = session(&server, store.clone());

        assert_eq!(session.profile().await.unwrap(), alice());
        assert_eq!(store.access_token(), Some(fresh));
        assert_eq!(store.refresh_token().as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_otp_cooldown_survives_a_new_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SEND_OTP_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let otp_path = dir.path().join("otp.toml");

        let (first, _) = session(&server, Arc::new(MemoryTokenStore::new()));
        let first = first.with_otp_cooldowns(OtpCooldowns::open(&otp_path));
        first.send_otp("alice@example.com").await.unwrap();
        drop(first);

        let (second, _) = session(&server, Arc::new(MemoryTokenStore::new()));
        let second = second.with_otp_cooldowns(OtpCooldowns::open(&otp_path));
        assert!(!second.otp_cooldown_remaining("Alice@example.com").is_zero());
        assert!(matches!(
            second.send_otp("alice@example.com").await,
            Err(SessionError::OtpCooldown { .. })
        ));
    }
}
