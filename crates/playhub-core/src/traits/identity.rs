//! Identity verification contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::result::AppResult;

/// A verified caller. Read-only and fully trusted once returned by a verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable identity id.
    pub id: String,
    /// Name shown to other participants.
    pub display_name: String,
}

impl Identity {
    /// Create an identity.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Turns a bearer token into an [`Identity`].
///
/// `Ok(None)` means the token was well-formed enough to check but did not
/// verify. Errors are reserved for the verifier itself being unusable.
#[async_trait]
pub trait IdentityVerifier: Send + Sync + std::fmt::Debug + 'static {
    /// Verify a token.
    async fn verify(&self, token: &str) -> AppResult<Option<Identity>>;
}
