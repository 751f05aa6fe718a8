//! Upgrade path: request model, handshake, controller and application loop.

mod connection;
mod controller;
mod message;
mod negotiator;
mod request;
mod session;

pub use controller::{AcceptedConnection, RawUpgrade, UpgradeController, UpgradeOutcome};
pub use message::{ClientMessage, ServerMessage, UpgradeError};
pub use negotiator::{
    validate_handshake, NegotiationError, TungsteniteNegotiator, UpgradeNegotiator, WebSocket,
};
pub use request::UpgradeRequest;
pub use session::run_session;
