use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// Check the `Authorization: Bearer` header against the configured token.
pub fn authorize(headers: &HeaderMap, config: &ServerConfig) -> ServerResult<()> {
    let Some(expected) = config.auth_token.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(ServerError::Unauthorized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with_token(token: &str) -> ServerConfig {
        ServerConfig {
            auth_token: Some(token.into()),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn anonymous_when_no_token_configured() {
        assert!(authorize(&HeaderMap::new(), &ServerConfig::default()).is_ok());
    }

    #[test]
    fn bearer_token_must_match() {
        let config = with_token("s3cret");
        let mut headers = HeaderMap::new();
        assert!(authorize(&headers, &config).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer wrong"));
        assert!(authorize(&headers, &config).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert!(authorize(&headers, &config).is_ok());
    }
}
