//! Channel naming and local subscription bookkeeping.

pub mod registry;
pub mod types;

pub use registry::ChannelRegistry;
pub use types::Channel;
