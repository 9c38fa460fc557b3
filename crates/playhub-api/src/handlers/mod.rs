//! Route handlers.

pub mod fallback;
pub mod games;
pub mod health;
pub mod history;
pub mod metrics;
pub mod ws;
