//! Core traits defined in `playhub-core` and implemented by other crates.

pub mod identity;
pub mod store;

pub use identity::{Identity, IdentityVerifier};
pub use store::{StateStore, StoreOp, StoreReply};
