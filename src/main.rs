//! Storefront CLI - account and session client for the storefront API
//!
//! Logs in, keeps the access token renewed, and talks to protected endpoints.

mod api;
mod auth;
mod config;
mod models;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::ConsoleNotifier;
use crate::auth::{FileTokenStore, Session};
use crate::config::Config;
use crate::models::{RegisterRequest, ResetPasswordRequest};

#[derive(Parser)]
#[command(name = "storefront-cli")]
#[command(about = "Account and session client for the storefront API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override the API base URL
    #[arg(long, global = true)]
    api_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with e-mail and password
    Login {
        /// Account e-mail
        #[arg(short, long)]
        email: String,

        /// Account password
        #[arg(short, long)]
        password: String,

        /// Log in again even if a session is stored
        #[arg(short, long)]
        force: bool,
    },

    /// Log out and clear stored credentials
    Logout,

    /// Show current session status
    Status,

    /// Create an account (request a code with `send-otp` first)
    Register {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,

        /// Verification code received by e-mail
        #[arg(short, long)]
        otp: String,
    },

    /// E-mail a registration verification code
    SendOtp {
        email: String,
    },

    /// Check whether a username is free
    CheckUsername {
        username: String,
    },

    /// Check whether an e-mail is already registered
    CheckEmail {
        email: String,
    },

    /// Request a password reset link
    ForgotPassword {
        email: String,
    },

    /// Set a new password using a reset token
    ResetPassword {
        /// Token from the reset link
        #[arg(short, long)]
        token: String,

        #[arg(short, long)]
        new_password: String,

        #[arg(short, long)]
        confirm_password: String,
    },

    /// Show current user profile (verify auth works)
    Whoami,

    /// Keep the session renewed in the foreground until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = Config::load()?;
    if let Some(url) = cli.api_url {
        config.api_url = url;
    }
    tracing::debug!("API base URL: {}", config.api_url);

    let store = Arc::new(FileTokenStore::open_default()?);
    let session = Session::new(&config, store, Arc::new(ConsoleNotifier))?;

    match cli.command {
        Commands::Login {
            email,
            password,
            force,
        } => {
            tracing::info!("Logging in...");
            auth::commands::login(&session, &email, &password, force).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            auth::commands::logout(&session).await?;
        }
        Commands::Status => {
            auth::commands::status(&session).await?;
        }
        Commands::Register {
            username,
            email,
            password,
            otp,
        } => {
            auth::commands::register(
                &session,
                RegisterRequest {
                    username,
                    email,
                    password,
                    otp,
                },
            )
            .await?;
        }
        Commands::SendOtp { email } => {
            auth::commands::send_otp(&session, &email).await?;
        }
        Commands::CheckUsername { username } => {
            auth::commands::check_username(&session, &username).await?;
        }
        Commands::CheckEmail { email } => {
            auth::commands::check_email(&session, &email).await?;
        }
        Commands::ForgotPassword { email } => {
            auth::commands::forgot_password(&session, &email).await?;
        }
        Commands::ResetPassword {
            token,
            new_password,
            confirm_password,
        } => {
            auth::commands::reset_password(
                &session,
                ResetPasswordRequest {
                    token,
                    new_password,
                    confirm_password,
                },
            )
            .await?;
        }
        Commands::Whoami => {
            session.restore();
            api::whoami(&session).await?;
        }
        Commands::Watch => {
            auth::commands::watch(&session).await?;
        }
    }

    Ok(())
}
