//! Process-wide event fan-out to subscriber connections.
//!
//! Any component publishes through [`EventHub::broadcast`]; every open
//! duplex connection registered at that moment receives the event.
//! Delivery is at-most-once and best-effort: dead or saturated
//! connections are unregistered, never waited on.

mod hub;

pub use hub::{EventHub, EventSender};
