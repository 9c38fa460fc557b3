//! Connection registry, socket handles and handshake authentication.

pub mod authenticator;
pub mod handle;
pub mod registry;

pub use authenticator::JwtVerifier;
pub use handle::ConnectionHandle;
pub use registry::{
    ConnectionLifecycleEvent, ConnectionMetadata, ConnectionRecord, ConnectionRegistry,
    ConnectionStatus, RegistryStats, SessionRecoveryRecord, TrafficDirection, TransportKind,
};
