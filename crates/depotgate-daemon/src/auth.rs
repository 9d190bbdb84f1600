//! API-key authentication for the HTTP surface.
//!
//! Accepts `Authorization: Bearer <key>` or `X-API-Key: <key>` and compares
//! in constant time. Fails closed: with no key configured and
//! `allow_insecure_dev` off, every request is refused with 503 rather than
//! silently running open.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::error;

use crate::state::{AppState, AuthSettings};

/// Middleware guarding the API and tool routes.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    match check(&state.auth, request.headers()) {
        Ok(()) => next.run(request).await,
        Err(response) => response,
    }
}

fn unauthorized(detail: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        Json(json!({ "error": "unauthorized", "detail": detail })),
    )
        .into_response()
}

/// Validates the presented credentials against the settings.
///
/// # Errors
///
/// Returns the HTTP response to send when the request is not authorized.
pub fn check(auth: &AuthSettings, headers: &HeaderMap) -> Result<(), Response> {
    if auth.allow_insecure_dev {
        return Ok(());
    }

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| {
            headers
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
        });
    let Some(presented) = presented else {
        return Err(unauthorized(
            "missing credentials; use Authorization: Bearer or X-API-Key",
        ));
    };

    let Some(expected) = auth.api_key.as_deref() else {
        error!("api_key not configured and allow_insecure_dev is off; refusing request");
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "misconfigured",
                "detail": "authentication not initialized",
            })),
        )
            .into_response());
    };

    if presented.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(())
    } else {
        Err(unauthorized("invalid api key"))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn settings(key: Option<&str>, insecure: bool) -> AuthSettings {
        AuthSettings {
            api_key: key.map(ToString::to_string),
            allow_insecure_dev: insecure,
        }
    }

    fn headers_with(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_and_x_api_key_are_both_accepted() {
        let auth = settings(Some("dp_secret"), false);
        assert!(check(&auth, &headers_with("authorization", "Bearer dp_secret")).is_ok());
        assert!(check(&auth, &headers_with("x-api-key", "dp_secret")).is_ok());
    }

    #[test]
    fn wrong_or_missing_key_is_unauthorized() {
        let auth = settings(Some("dp_secret"), false);
        assert!(check(&auth, &headers_with("authorization", "Bearer nope")).is_err());
        assert!(check(&auth, &HeaderMap::new()).is_err());
    }

    #[test]
    fn unconfigured_key_fails_closed() {
        let auth = settings(None, false);
        let err = check(&auth, &headers_with("x-api-key", "anything")).unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn insecure_dev_mode_skips_the_check() {
        let auth = settings(None, true);
        assert!(check(&auth, &HeaderMap::new()).is_ok());
    }
}
