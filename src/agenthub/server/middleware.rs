//! Session API key validation and CORS policy.
//!
//! REST requests authenticate with the `X-Session-API-Key` header; the
//! WebSocket endpoints take the key as a query parameter and close the
//! handshake with an application code instead (see `sockets.rs`). Key
//! comparison is constant time.
//!
//! CORS always admits localhost origins on any port, plus whatever origins
//! the configuration lists.

use crate::agenthub::error::ApiError;
use crate::agenthub::server::AppState;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Header carrying the session API key on REST requests.
pub const SESSION_API_KEY_HEADER: &str = "X-Session-API-Key";

/// Whether `candidate` matches any configured key, in constant time.
pub fn key_is_valid(configured: &[String], candidate: Option<&str>) -> bool {
    if configured.is_empty() {
        return true;
    }
    let Some(candidate) = candidate else {
        return false;
    };
    let mut valid = false;
    for key in configured {
        // ct_eq on differing lengths is false without short-circuiting.
        valid |= bool::from(key.as_bytes().ct_eq(candidate.as_bytes()));
    }
    valid
}

/// Reject requests without a valid session API key when keys are configured.
pub async fn validate_session_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let configured = &state.config.session_api_keys;
    let candidate = request
        .headers()
        .get(SESSION_API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    if !key_is_valid(configured, candidate) {
        return Err(ApiError::Auth(
            "missing or invalid session API key".to_string(),
        ));
    }
    Ok(next.run(request).await)
}

fn origin_is_localhost(origin: &HeaderValue) -> bool {
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    let host = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
        .unwrap_or(origin);
    let host = host.split(':').next().unwrap_or(host);
    host == "localhost" || host == "127.0.0.1"
}

/// CORS layer admitting localhost plus the configured origins.
pub fn cors_layer(allow_origins: Vec<String>) -> CorsLayer {
    CorsLayer::new()
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            if origin_is_localhost(origin) {
                return true;
            }
            allow_origins
                .iter()
                .any(|allowed| origin.as_bytes() == allowed.as_bytes())
        }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_list_accepts_anything() {
        assert!(key_is_valid(&[], None));
        assert!(key_is_valid(&[], Some("whatever")));
    }

    #[test]
    fn configured_keys_require_exact_match() {
        let keys = vec!["alpha".to_string(), "beta".to_string()];
        assert!(key_is_valid(&keys, Some("alpha")));
        assert!(key_is_valid(&keys, Some("beta")));
        assert!(!key_is_valid(&keys, Some("gamma")));
        assert!(!key_is_valid(&keys, Some("alph")));
        assert!(!key_is_valid(&keys, None));
    }

    #[test]
    fn localhost_origins_are_recognized() {
        assert!(origin_is_localhost(&HeaderValue::from_static(
            "http://localhost:3000"
        )));
        assert!(origin_is_localhost(&HeaderValue::from_static(
            "https://127.0.0.1"
        )));
        assert!(!origin_is_localhost(&HeaderValue::from_static(
            "https://app.example.com"
        )));
    }
}
