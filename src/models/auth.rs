//! Storefront auth API payloads

use serde::{Deserialize, Serialize};

/// Standard envelope wrapping every storefront API response.
///
/// `data` is absent on endpoints that only report success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Envelope for an empty 2xx body.
    pub fn empty() -> Self {
        Self {
            success: true,
            message: None,
            data: None,
        }
    }

    /// Server message, if it carries any text.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref().filter(|m| !m.trim().is_empty())
    }
}

/// Login / refresh response.
///
/// `refresh_token` is optional: a refresh that does not rotate the refresh
/// token leaves it out, and the stored one stays valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user_id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthEnvelope {
    pub data: AuthResponse,
}

/// The auth endpoints answer either with the envelope or with the bare payload.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AuthPayload {
    Wrapped(AuthEnvelope),
    Flat(AuthResponse),
}

impl AuthPayload {
    pub fn into_inner(self) -> AuthResponse {
        match self {
            AuthPayload::Wrapped(envelope) => envelope.data,
            AuthPayload::Flat(auth) => auth,
        }
    }
}

/// Profile of the signed-in user, persisted next to the token pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub user_id: String,
    pub username: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl SessionUser {
    /// "First Last" when known, otherwise the username.
    pub fn display_name(&self) -> String {
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if full.is_empty() {
            self.username.clone()
        } else {
            full
        }
    }
}

impl From<&AuthResponse> for SessionUser {
    fn from(auth: &AuthResponse) -> Self {
        Self {
            user_id: auth.user_id.clone(),
            username: auth.username.clone(),
            email: auth.email.clone(),
            first_name: auth.first_name.clone(),
            last_name: auth.last_name.clone(),
            avatar: auth.avatar.clone(),
            roles: auth.roles.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub otp: String,
}

#[derive(Debug, Serialize)]
pub struct SendOtpRequest<'a> {
    pub email: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
    pub confirm_password: String,
}
