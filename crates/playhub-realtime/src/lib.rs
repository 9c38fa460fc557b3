//! # playhub-realtime
//!
//! Real-time engine for PlayHub. Provides:
//!
//! - Connection registry with session recovery, mirrored into the shared store
//! - Sliding-window rate limiting with blacklist and whitelist
//! - Socket orchestration: admission, dispatch into the game coordinator,
//!   typed channels and chat history
//! - Outbound batching and cross-node fan-out over Redis pub/sub
//! - Server-push and long-poll fallback transports
//! - Health and metrics surfaces

pub mod batching;
pub mod channel;
pub mod connection;
pub mod fallback;
pub mod fanout;
pub mod health;
pub mod history;
pub mod message;
pub mod metrics;
pub mod orchestrator;
pub mod rate_limit;
pub mod server;

pub use connection::{ConnectionRegistry, JwtVerifier};
pub use fallback::FallbackService;
pub use fanout::ClusterFanout;
pub use health::{HealthReport, HealthStatus};
pub use orchestrator::{Accepted, ConnectionOrchestrator};
pub use rate_limit::{RateLimitAction, RateLimiter};
pub use server::RealtimeEngine;
