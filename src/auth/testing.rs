//! Shared fixtures for session tests

use std::sync::Arc;

use serde_json::{json, Value};

use super::tokens::{MemoryTokenStore, TokenPair, TokenStore};
use crate::models::SessionUser;

pub fn alice() -> SessionUser {
    SessionUser {
        user_id: "u-42".into(),
        username: "alice".into(),
        email: "alice@example.com".into(),
        first_name: Some("Alice".into()),
        last_name: Some("Liddell".into()),
        avatar: None,
        roles: vec!["USER".into()],
    }
}

/// Enveloped login/refresh response body.
pub fn auth_json(access_token: &str, refresh_token: Option<&str>) -> Value {
    let mut data = json!({
        "accessToken": access_token,
        "userId": "u-42",
        "username": "alice",
        "email": "alice@example.com",
        "firstName": "Alice",
        "lastName": "Liddell",
        "avatar": null,
        "roles": ["USER"],
    });
    if let Some(rt) = refresh_token {
        data["refreshToken"] = json!(rt);
    }
    json!({ "success": true, "message": "Login successful", "data": data })
}

pub fn seeded_store(access_token: &str, refresh_token: &str) -> Arc<MemoryTokenStore> {
    let store = Arc::new(MemoryTokenStore::new());
    store
        .save(
            &TokenPair {
                access_token: access_token.into(),
                refresh_token: refresh_token.into(),
            },
            &alice(),
        )
        .unwrap();
    store
}

/// Poll `check` for up to two seconds.
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    check()
}
