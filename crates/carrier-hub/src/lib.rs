//! Carrier hub: live session registry, offline queue tiers, message routing
//! and the supervised payment flow.

pub mod connection;
pub mod error;
pub mod hub;
pub mod payment;
pub mod queue;
pub mod registry;
pub mod router;

pub use hub::{Activation, Delivery, Hub, HubConfig, HubStats};
pub use router::RouteOutcome;
