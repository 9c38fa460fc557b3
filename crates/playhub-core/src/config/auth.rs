//! Identity verification configuration.

use serde::{Deserialize, Serialize};

/// Settings for verifying client access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret used to verify HS256 access tokens.
    #[serde(default = "default_secret")]
    pub jwt_secret: String,
    /// Expected `iss` claim; not checked when empty.
    #[serde(default)]
    pub issuer: String,
    /// Allowed clock skew in seconds when checking `exp`.
    #[serde(default = "default_leeway")]
    pub leeway_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_secret(),
            issuer: String::new(),
            leeway_seconds: default_leeway(),
        }
    }
}

fn default_secret() -> String {
    "change-me-in-production".to_string()
}

fn default_leeway() -> u64 {
    30
}
