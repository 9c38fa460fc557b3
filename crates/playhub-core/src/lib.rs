//! # playhub-core
//!
//! Core crate for the PlayHub realtime platform. Contains the configuration
//! schema, typed identifiers, the domain event model, game value types, the
//! shared state store and identity verification traits, and the unified
//! error system.
//!
//! This crate has **no** internal dependencies on other PlayHub crates.

pub mod config;
pub mod error;
pub mod events;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
