//! Authentication session for the storefront API
//!
//! Acquires an access/refresh token pair at login, persists it, renews it
//! ahead of expiry, and recovers from 401s with a single shared refresh.

pub mod commands;
pub mod error;
pub mod jwt;
pub mod otp;
pub mod refresh;
pub mod scheduler;
pub mod session;
pub mod tokens;

#[cfg(test)]
pub mod testing;

pub use error::SessionError;
pub use session::Session;
pub use tokens::{FileTokenStore, MemoryTokenStore, StoredSession, TokenPair, TokenStore};

pub const LOGIN_PATH: &str = "/v1/auth/login";
pub const REFRESH_PATH: &str = "/v1/auth/refresh-token";
pub const REGISTER_PATH: &str = "/v1/auth/register";
pub const SEND_OTP_PATH: &str = "/v1/auth/send-otp";
pub const FORGOT_PASSWORD_PATH: &str = "/v1/auth/forgot-password";
pub const RESET_PASSWORD_PATH: &str = "/v1/auth/reset-password";
pub const CHECK_USERNAME_PATH: &str = "/v1/auth/check-username";
pub const CHECK_EMAIL_PATH: &str = "/v1/auth/check-email";
pub const PROFILE_PATH: &str = "/v1/users/profile";

/// Login, refresh, registration and the other public auth endpoints.
/// A 401 from one of these is final; renewing a token cannot fix it.
pub fn is_public_auth_path(path: &str) -> bool {
    let path = path.split('?').next().unwrap_or(path);
    path.starts_with("/v1/auth/")
}
