//! # playhub-store
//!
//! Shared state store implementations for PlayHub. Supports two modes:
//!
//! - **memory**: a single-process keyspace with TTLs on the tokio clock,
//!   used for single-node deployments and tests
//! - **redis**: Redis-backed store using the [redis](https://crates.io/crates/redis) crate
//!
//! The provider is selected at runtime based on configuration.

pub mod keys;
pub mod memory;
pub mod provider;
#[cfg(feature = "redis-backend")]
pub mod redis;

pub use memory::MemoryStore;
pub use provider::StoreManager;
