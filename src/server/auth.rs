//! Shared-secret authentication for the API.

use crate::config::AuthConfig;
use crate::server::{ApiError, AppContext};
use axum::{
    body::Body,
    extract::{Query, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    typed_header::TypedHeader,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use serde::Deserialize;
use webpforge_common::Error;

/// Token passed in the query string, for clients that cannot set headers
/// (browser WebSockets).
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Check a presented token against the configured secret.
fn check_auth(
    auth_config: &AuthConfig,
    bearer_token: Option<&str>,
    query_token: Option<&str>,
) -> Result<(), Error> {
    if !auth_config.enabled {
        return Ok(());
    }

    let rejected = || Error::Unauthorized("authentication required".to_string());
    let expected = auth_config.token.as_deref().ok_or_else(rejected)?;

    match bearer_token.or(query_token) {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => Ok(()),
        _ => Err(rejected()),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Middleware requiring the shared token on every protected route.
pub async fn api_auth_middleware(
    State(ctx): State<AppContext>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Query(query): Query<TokenQuery>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let bearer_token = bearer.map(|b| b.token().to_string());

    if let Err(e) = check_auth(
        &ctx.config.server.auth,
        bearer_token.as_deref(),
        query.token.as_deref(),
    ) {
        tracing::debug!(path = %request.uri().path(), "Rejected unauthenticated request");
        return Err(ApiError(e));
    }

    Ok(next.run(request).await)
}

/// Generate a random token suitable for `server.auth.token`.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn enabled(token: &str) -> AuthConfig {
        AuthConfig {
            enabled: true,
            token: Some(token.to_string()),
        }
    }

    #[test]
    fn disabled_auth_allows_everything() {
        let config = AuthConfig::default();
        assert!(check_auth(&config, None, None).is_ok());
    }

    #[test]
    fn bearer_token_must_match() {
        let config = enabled("secret");
        assert!(check_auth(&config, Some("secret"), None).is_ok());
        assert_matches!(
            check_auth(&config, Some("wrong"), None),
            Err(Error::Unauthorized(_))
        );
        assert_matches!(check_auth(&config, None, None), Err(Error::Unauthorized(_)));
    }

    #[test]
    fn query_token_is_accepted() {
        let config = enabled("secret");
        assert!(check_auth(&config, None, Some("secret")).is_ok());
        assert!(check_auth(&config, None, Some("secre")).is_err());
    }

    #[test]
    fn enabled_without_token_rejects() {
        let config = AuthConfig {
            enabled: true,
            token: None,
        };
        assert_matches!(check_auth(&config, Some(""), None), Err(Error::Unauthorized(_)));
    }

    #[test]
    fn generated_tokens_are_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
    }
}
