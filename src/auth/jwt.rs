//! Unverified JWT claim extraction
//!
//! The client never validates signatures; it only needs `exp` to decide when
//! to renew. Anything that does not look like a JWT yields "unknown expiry".

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use super::error::SessionError;

/// Claims the client cares about. Everything else is kept opaque.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub exp: Option<i64>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

/// Decode the payload segment of `token`.
pub fn decode_claims(token: &str) -> Result<Claims, SessionError> {
    let mut parts = token.trim().split('.');
    let (Some(_header), Some(payload), Some(_sig), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(SessionError::Decode("expected three dot-separated segments".into()));
    };

    // Accept standard alphabet and padding too; some issuers emit them.
    let normalized: String = payload
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect();

    let bytes = URL_SAFE_NO_PAD
        .decode(normalized.as_bytes())
        .map_err(|e| SessionError::Decode(format!("payload is not base64url: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| SessionError::Decode(format!("payload is not a JSON object: {}", e)))
}

/// Expiry (unix seconds) of `token`, or `None` when it cannot be determined.
pub fn decode_expiry(token: &str) -> Option<i64> {
    match decode_claims(token) {
        Ok(claims) => {
            if claims.exp.is_none() {
                tracing::debug!("Access token has no exp claim");
            }
            claims.exp
        }
        Err(e) => {
            tracing::debug!("Cannot read access token expiry: {}", e);
            None
        }
    }
}

/// Build an unsigned token with the given `exp`. Test helper.
#[cfg(test)]
pub fn token_with_exp(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({ "sub": "u-42", "exp": exp, "nonce": uuid::Uuid::new_v4().to_string() })
            .to_string(),
    );
    format!("{}.{}.sig", header, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_expiry() {
        let token = token_with_exp(1_900_000_000);
        assert_eq!(decode_expiry(&token), Some(1_900_000_000));
    }

    #[test]
    fn test_decode_keeps_other_claims() {
        let claims = decode_claims(&token_with_exp(5)).unwrap();
        assert_eq!(claims.other["sub"], "u-42");
    }

    #[test]
    fn test_decode_padded_payload() {
        let payload = base64::engine::general_purpose::STANDARD.encode(r#"{"exp":12}"#);
        let token = format!("h.{}.s", payload);
        assert_eq!(decode_expiry(&token), Some(12));
    }

    #[test]
    fn test_missing_exp_is_unknown() {
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"x"}"#);
        assert_eq!(decode_expiry(&format!("h.{}.s", payload)), None);
    }

    #[test]
    fn test_malformed_tokens_are_unknown() {
        assert_eq!(decode_expiry(""), None);
        assert_eq!(decode_expiry("not-a-jwt"), None);
        assert_eq!(decode_expiry("a.b"), None);
        assert_eq!(decode_expiry("a.b.c.d"), None);
        assert_eq!(decode_expiry("h.!!!.s"), None);

        let not_json = URL_SAFE_NO_PAD.encode("plain text");
        assert!(matches!(
            decode_claims(&format!("h.{}.s", not_json)),
            Err(SessionError::Decode(_))
        ));
    }
}
