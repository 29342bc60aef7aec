//! CLI entry points for the auth flows

use std::time::Duration;

use anyhow::{bail, Result};

use super::jwt::decode_expiry;
use super::Session;
use crate::models::{RegisterRequest, ResetPasswordRequest};

/// Log in with e-mail and password
pub async fn login(session: &Session, email: &str, password: &str, force: bool) -> Result<()> {
    if !force {
        if let Some(user) = session.current_user() {
            println!(
                "Already logged in as {}. Use --force to log in again.",
                user.username
            );
            return Ok(());
        }
    }

    let user = session.login(email, password).await?;
    println!("Logged in as {} <{}>.", user.display_name(), user.email);
    Ok(())
}

/// Clear stored credentials
pub async fn logout(session: &Session) -> Result<()> {
    session.logout()?;
    println!("Logged out.");
    Ok(())
}

/// Display current auth status
pub async fn status(session: &Session) -> Result<()> {
    let Some(stored) = session.stored() else {
        println!("Session:      none");
        println!("\nRun 'storefront-cli login' to authenticate.");
        return Ok(());
    };

    println!("User:         {} <{}>", stored.user.username, stored.user.email);
    if !stored.user.roles.is_empty() {
        println!("Roles:        {}", stored.user.roles.join(", "));
    }

    match decode_expiry(&stored.tokens.access_token) {
        Some(exp) => {
            let now = chrono::Utc::now().timestamp();
            let when = chrono::DateTime::from_timestamp(exp, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| exp.to_string());
            if exp > now {
                println!("Access token: valid ({}s left, expires {})", exp - now, when);
            } else {
                println!("Access token: expired ({})", when);
            }
        }
        None => println!("Access token: present (expiry unknown)"),
    }
    println!("Refresh tok:  present");
    Ok(())
}

pub async fn register(session: &Session, request: RegisterRequest) -> Result<()> {
    let message = session.register(&request).await?;
    if message.is_none() {
        println!("Account created. You can now log in.");
    }
    Ok(())
}

pub async fn send_otp(session: &Session, email: &str) -> Result<()> {
    session.send_otp(email).await?;
    println!(
        "Verification code sent to {}. Next code available in {}s.",
        email,
        session.otp_cooldown_remaining(email).as_secs()
    );
    Ok(())
}

pub async fn forgot_password(session: &Session, email: &str) -> Result<()> {
    session.forgot_password(email).await?;
    println!("If an account exists for {}, a reset link is on its way.", email);
    Ok(())
}

pub async fn reset_password(session: &Session, request: ResetPasswordRequest) -> Result<()> {
    if request.new_password != request.confirm_password {
        bail!("Passwords do not match");
    }
    session.reset_password(&request).await?;
    println!("Password reset. You can now log in with your new password.");
    Ok(())
}

pub async fn check_username(session: &Session, username: &str) -> Result<()> {
    let available = session.check_username(username).await?;
    println!(
        "Username {}: {}",
        username,
        if available { "available" } else { "taken" }
    );
    Ok(())
}

pub async fn check_email(session: &Session, email: &str) -> Result<()> {
    let available = session.check_email(email).await?;
    println!(
        "E-mail {}: {}",
        email,
        if available { "available" } else { "already registered" }
    );
    Ok(())
}

/// Keep the stored session renewed until Ctrl-C or until it ends.
pub async fn watch(session: &Session) -> Result<()> {
    let Some(user) = session.restore() else {
        bail!("Not logged in. Run 'storefront-cli login' first.");
    };
    println!("Keeping session for {} alive. Press Ctrl-C to stop.", user.username);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                session.scheduler().cancel();
                println!("Stopped.");
                return Ok(());
            }
            _ = ticker.tick() => {
                if !session.is_authenticated() {
                    println!("Session ended.");
                    return Ok(());
                }
            }
        }
    }
}
