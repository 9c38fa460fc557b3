//! JWT identity verification for socket and fallback handshakes.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use playhub_core::config::AuthConfig;
use playhub_core::result::AppResult;
use playhub_core::traits::identity::{Identity, IdentityVerifier};

/// Claims PlayHub reads from an access token. Tokens are issued elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Identity id.
    pub sub: String,
    /// Display name; falls back to the identity id.
    #[serde(default)]
    pub name: Option<String>,
    /// Expiry, seconds since the epoch.
    pub exp: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
}

/// Verifies HS256 tokens with a shared secret.
#[derive(Clone)]
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("validation", &self.validation)
            .finish()
    }
}

impl JwtVerifier {
    /// Creates a verifier from auth configuration.
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = config.leeway_seconds;
        if !config.issuer.is_empty() {
            validation.set_issuer(&[config.issuer.as_str()]);
        }
        Self {
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> AppResult<Option<Identity>> {
        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => {
                let claims = data.claims;
                let display_name = claims.name.unwrap_or_else(|| claims.sub.clone());
                Ok(Some(Identity::new(claims.sub, display_name)))
            }
            Err(e) => {
                debug!(error = %e, "Token rejected");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".into(),
            issuer: "playhub".into(),
            leeway_seconds: 0,
        }
    }

    fn token(secret: &str, iss: &str, exp_offset: i64) -> String {
        let claims = Claims {
            sub: "alice".into(),
            name: Some("Alice".into()),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as u64,
            iss: Some(iss.into()),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_verify_accepts_valid_token() {
        let verifier = JwtVerifier::new(&config());
        let identity = verifier
            .verify(&token("test-secret", "playhub", 600))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity, Identity::new("alice", "Alice"));
    }

    #[tokio::test]
    async fn test_verify_rejects_bad_tokens() {
        let verifier = JwtVerifier::new(&config());
        for bad in [
            token("other-secret", "playhub", 600),
            token("test-secret", "someone-else", 600),
            token("test-secret", "playhub", -600),
            "not-a-jwt".to_string(),
        ] {
            assert!(verifier.verify(&bad).await.unwrap().is_none());
        }
    }
}
