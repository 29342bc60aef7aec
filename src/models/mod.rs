//! Data models for the storefront API

mod auth;

pub use auth::*;
