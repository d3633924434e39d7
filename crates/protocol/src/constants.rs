use std::time::Duration;

/// Event wire-format schema version.
///
/// Carried in every [`EventEnvelope`](crate::events::EventEnvelope) so
/// subscribers can reject envelopes from an incompatible server. Bump on
/// any breaking change to an event payload.
pub const PROTOCOL_VERSION: u32 = 1;

/// Timeout for a single remote storage request.
///
/// Applied to every gateway call so an unreachable storage host cannot
/// stall the poller or starve the batch worker pool.
pub const GATEWAY_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum WebSocket message size in bytes (50 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// How often the server pings idle subscriber connections.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Per-connection event buffer capacity.
///
/// A directory upload emits one progress event per batch plus completion
/// events; the poller can add a burst of `directory_changed` on top. A
/// subscriber that falls further behind than this is dropped rather than
/// back-pressuring broadcast.
pub const WS_SEND_BUFFER_SIZE: usize = 256;

/// Default chunk size for chunked uploads: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
