//! Custom Axum extractors.

pub mod auth;
pub mod client;

pub use auth::{AuthIdentity, BearerToken};
pub use client::ClientAddr;
