//! Session error types

use thiserror::Error;

/// Message shown when the session is torn down because it could not be renewed.
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";

/// Fallback shown when a failed request carries no server message.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

/// Errors surfaced by the session core.
///
/// `Clone` because one refresh outcome is delivered to every caller queued
/// behind it.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Access token could not be decoded (proactive renewal disabled)
    #[error("Malformed access token: {0}")]
    Decode(String),

    /// Refresh call failed; the session has been cleared
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// Renewal requested with no stored refresh token; the session has been cleared
    #[error("No refresh token available")]
    NoRefreshToken,

    /// Any other HTTP or transport failure
    #[error("{}", request_summary(.status, .message))]
    Request { status: Option<u16>, message: String },

    /// Token store I/O failure
    #[error("Session storage error: {0}")]
    Storage(String),

    /// OTP send rejected locally while the cooldown is running
    #[error("Please wait {remaining_secs}s before requesting another code")]
    OtpCooldown { remaining_secs: u64 },
}

fn request_summary(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("HTTP {}: {}", code, message),
        None => format!("Request failed: {}", message),
    }
}

impl SessionError {
    pub fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        Self::Request {
            status: Some(status.as_u16()),
            message,
        }
    }

    /// True for errors that ended the session (refresh failed or impossible).
    pub fn is_session_ended(&self) -> bool {
        matches!(self, Self::RefreshFailed(_) | Self::NoRefreshToken)
    }

    /// HTTP status, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => *status,
            _ => None,
        }
    }

    /// Text suitable for a user-facing notification.
    pub fn user_message(&self) -> String {
        match self {
            Self::RefreshFailed(_) | Self::NoRefreshToken => SESSION_EXPIRED_MESSAGE.to_string(),
            Self::Request { message, .. } if !message.trim().is_empty() => message.clone(),
            Self::Request { .. } => GENERIC_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}
