//! Messaging between units.
//!
//! Envelopes are routed by destination identifier, so a hot-swapped unit keeps
//! receiving messages addressed to it without senders rebinding anything.

mod bus;
mod drain;
mod envelope;

pub use bus::{DeliveryError, HandlerError, MessageBus, MessageHandler};
pub use drain::{DrainError, FlightGuard, FlightTracker};
pub use envelope::{kinds, MessageEnvelope, Payload, SYSTEM_SOURCE};
