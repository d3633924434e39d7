use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use filedock_protocol::events::{Event, EventEnvelope};

/// Channel feeding one subscriber connection's write pump.
pub type EventSender = mpsc::Sender<EventEnvelope>;

/// Registry of open duplex connections.
///
/// The hub is the sole owner of each registry entry: a connection is
/// represented only by the sender half of its event channel, and removal
/// here is what "closing" means to the rest of the process.
pub struct EventHub {
    connections: RwLock<HashMap<Uuid, EventSender>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a connection and returns its id.
    pub fn register(&self, sender: EventSender) -> Uuid {
        let id = Uuid::new_v4();
        self.connections.write().unwrap().insert(id, sender);
        debug!(connection = %id, "subscriber registered");
        id
    }

    /// Removes a connection. Returns `false` if it was already gone.
    pub fn unregister(&self, id: Uuid) -> bool {
        let removed = self.connections.write().unwrap().remove(&id).is_some();
        if removed {
            debug!(connection = %id, "subscriber unregistered");
        }
        removed
    }

    /// Number of currently registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().unwrap().len()
    }

    /// Delivers `event` to every connection registered right now.
    ///
    /// Connections whose channel is closed or full are dropped from the
    /// registry; one dead recipient never aborts delivery to the rest.
    /// Returns the number of successful deliveries.
    pub fn broadcast(&self, event: &Event) -> usize {
        let snapshot: Vec<(Uuid, EventSender)> = {
            let conns = self.connections.read().unwrap();
            conns.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        };
        if snapshot.is_empty() {
            return 0;
        }

        let envelope = EventEnvelope::from(event.clone());
        let mut delivered = 0usize;
        let mut dead = Vec::new();

        for (id, tx) in snapshot {
            match tx.try_send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(id);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // A subscriber this far behind is not coming back.
                    warn!(connection = %id, "subscriber buffer full, dropping connection");
                    dead.push(id);
                }
            }
        }

        for id in dead {
            self.unregister(id);
        }

        debug!(event = event.kind(), delivered, "broadcast");
        delivered
    }
}
