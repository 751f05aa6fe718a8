//! Tracking of accepted, live connections.

mod registry;
mod stats;
mod types;

pub use registry::{ConnectionRegistry, RegistrationGuard, RegistryError};
pub use stats::{ConnectionInfo, ConnectionStats};
pub use types::{ConnectionClosed, ConnectionHandle};
