//! # Admin Authentication
//!
//! The refresh route requires the configured admin key:
//!
//! ```text
//! Authorization: Bearer <admin-key>
//! ```
//!
//! With no admin key configured the route is disabled.

use axum::http::{HeaderMap, StatusCode, header};
use subtle::ConstantTimeEq;

/// Compare two keys in constant time over the longer of the two lengths.
fn keys_match(provided: &[u8], expected: &[u8]) -> bool {
    let max_len = provided.len().max(expected.len());
    let mut padded_provided = vec![0u8; max_len];
    let mut padded_expected = vec![0u8; max_len];
    padded_provided[..provided.len()].copy_from_slice(provided);
    padded_expected[..expected.len()].copy_from_slice(expected);

    let bytes_match: bool = padded_provided.ct_eq(&padded_expected).into();
    bytes_match && provided.len() == expected.len()
}

/// Check the `Authorization` header against the admin key.
pub fn require_admin(
    headers: &HeaderMap,
    admin_key: Option<&str>,
) -> Result<(), (StatusCode, &'static str)> {
    let Some(expected) = admin_key else {
        tracing::warn!(
            event = "auth_failure",
            reason = "admin_key_unset",
            "Admin route called with no admin key configured"
        );
        return Err((StatusCode::FORBIDDEN, "Forbidden"));
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v));

    match provided {
        Some(key) if keys_match(key.as_bytes(), expected.as_bytes()) => Ok(()),
        Some(_) => {
            tracing::warn!(
                event = "auth_failure",
                reason = "invalid_admin_key",
                "Authentication failed: invalid admin key"
            );
            Err((StatusCode::UNAUTHORIZED, "Unauthorized"))
        }
        None => {
            tracing::warn!(
                event = "auth_failure",
                reason = "missing_authorization_header",
                "Missing Authorization header"
            );
            Err((StatusCode::UNAUTHORIZED, "Unauthorized"))
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn bearer(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", key)) {
            headers.insert(header::AUTHORIZATION, value);
        }
        headers
    }

    #[test]
    fn accepts_matching_key() {
        assert!(require_admin(&bearer("s3cret"), Some("s3cret")).is_ok());
    }

    #[test]
    fn rejects_prefix_of_key() {
        let err = require_admin(&bearer("s3c"), Some("s3cret")).unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn missing_header_is_unauthorized() {
        let err = require_admin(&HeaderMap::new(), Some("s3cret")).unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn disabled_without_admin_key() {
        let err = require_admin(&bearer("anything"), None).unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);
    }
}
