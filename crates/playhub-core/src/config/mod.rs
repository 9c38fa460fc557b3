//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section, and every field carries a default so that an empty file
//! yields a working single-node setup.

pub mod app;
pub mod auth;
pub mod events;
pub mod fallback;
pub mod game;
pub mod logging;
pub mod rate_limit;
pub mod realtime;
pub mod store;

use serde::{Deserialize, Serialize};

pub use self::app::{NodeConfig, ServerConfig};
pub use self::auth::AuthConfig;
pub use self::events::EventsConfig;
pub use self::fallback::FallbackConfig;
pub use self::game::GameConfig;
pub use self::logging::LoggingConfig;
pub use self::rate_limit::{RateLimitConfig, RateLimitRule};
pub use self::realtime::RealtimeConfig;
pub use self::store::StoreConfig;

use crate::error::AppError;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Identity of this process within the cluster.
    #[serde(default)]
    pub node: NodeConfig,
    /// Shared state store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Identity verification settings.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Live socket engine settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// Rate limiter settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Event broker and event log settings.
    #[serde(default)]
    pub events: EventsConfig,
    /// Game coordinator settings.
    #[serde(default)]
    pub game: GameConfig,
    /// Fallback transport settings.
    #[serde(default)]
    pub fallback: FallbackConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges the default configuration with an environment-specific overlay
    /// and environment variables prefixed with `PLAYHUB__`.
    pub fn load(env: &str) -> Result<Self, AppError> {
        Self::load_from("config", env)
    }

    /// Load configuration from a specific directory.
    pub fn load_from(dir: &str, env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(&format!("{dir}/default")).required(false))
            .add_source(config::File::with_name(&format!("{dir}/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("PLAYHUB")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.store.provider, "memory");
        assert_eq!(config.events.transport, "memory");
        assert_eq!(config.events.snapshot_every, 10);
        assert_eq!(config.game.min_players, 2);
        assert_eq!(config.realtime.recovery_ttl_seconds, 3600);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"realtime": {"batch_max_size": 5}}"#).unwrap();
        assert_eq!(config.realtime.batch_max_size, 5);
        assert_eq!(config.realtime.batch_interval_ms, 25);
    }
}
