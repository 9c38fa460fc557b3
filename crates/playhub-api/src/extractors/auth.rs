//! `AuthIdentity` extractor: verifies the bearer token and yields the caller.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use playhub_core::traits::identity::Identity;

use crate::error::ApiError;
use crate::state::AppState;

/// The verified caller of a fallback request.
#[derive(Debug, Clone)]
pub struct AuthIdentity(pub Identity);

impl std::ops::Deref for AuthIdentity {
    type Target = Identity;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Token from `Authorization: Bearer ...`, else from the `token` query
/// parameter (browser event sources cannot set headers).
pub fn bearer_token(parts: &Parts) -> Option<String> {
    let header = parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    header.or_else(|| {
        parts.uri.query().and_then(|query| {
            query
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == "token")
                .map(|(_, value)| value.to_string())
        })
    })
}

/// The raw bearer token, unverified. Used by handshake endpoints, which
/// rate limit before verifying.
#[derive(Debug, Clone, Default)]
pub struct BearerToken(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(BearerToken(bearer_token(parts)))
    }
}

impl FromRequestParts<AppState> for AuthIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts);
        let identity = state
            .orchestrator()
            .authenticate(token.as_deref())
            .await?;
        Ok(AuthIdentity(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(request: Request<()>) -> Parts {
        request.into_parts().0
    }

    #[test]
    fn test_header_wins_over_query() {
        let p = parts(
            Request::get("/fallback/sse?token=query")
                .header("authorization", "Bearer header")
                .body(())
                .unwrap(),
        );
        assert_eq!(bearer_token(&p).as_deref(), Some("header"));
    }

    #[test]
    fn test_query_token() {
        let p = parts(Request::get("/fallback/sse?x=1&token=abc").body(()).unwrap());
        assert_eq!(bearer_token(&p).as_deref(), Some("abc"));
        let p = parts(Request::get("/fallback/sse").body(()).unwrap());
        assert_eq!(bearer_token(&p), None);
    }
}
