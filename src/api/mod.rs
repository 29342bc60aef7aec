//! API gateway for the storefront backend

pub mod client;
mod me;
pub mod notify;

use anyhow::Result;

use crate::auth::Session;

pub use client::{ApiClient, RequestContext};
pub use notify::{ConsoleNotifier, Notifier};

/// Show current user info (verifies the session works end to end)
pub async fn whoami(session: &Session) -> Result<()> {
    me::whoami(session).await
}
