//! Wire protocol types for filedock client notifications.
//!
//! Every message pushed to a subscriber is an [`events::EventEnvelope`]:
//! a schema version plus one variant of the closed [`events::Event`] union,
//! serialized as a tagged `{type, data}` record.

pub mod constants;
pub mod events;
pub mod types;

pub use constants::PROTOCOL_VERSION;
pub use events::{Event, EventEnvelope};
