//! # playhub-events
//!
//! Event sourcing plumbing for PlayHub:
//!
//! - [`EventLog`]: per-aggregate append-only log with a version
//!   compare-and-set, a global per-aggregate-type stream, and snapshots
//! - [`EventBroker`]: durable publish, local handler dispatch, and
//!   cross-node fan-out through an [`EventTransport`]
//! - transports: in-process broadcast and Redis Streams consumer groups

pub mod broker;
pub mod handler;
pub mod log;
pub mod transport;

pub use broker::{BrokerHealth, BrokerStats, EventBroker};
pub use handler::{EventHandler, handler_fn};
pub use log::{EventLog, Snapshot};
pub use transport::{EventTransport, TransportEnvelope};
