//! Typed event bus payloads. The source system uses a loose map of
//! event name to untyped payload; here each variant carries exactly the
//! fields its consumers need.

use crate::types::VectorId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    VectorAdded {
        partition_id: String,
        id: VectorId,
    },
    VectorDeleted {
        partition_id: String,
        id: VectorId,
    },
    VectorsBulkAdded {
        partition_id: String,
        count: usize,
    },
    PartitionCreated {
        partition_id: String,
    },
    PartitionLoaded {
        partition_id: String,
    },
    PartitionUnloaded {
        partition_id: String,
    },
    PartitionActivated {
        partition_id: String,
    },
    PartitionError {
        partition_id: String,
        message: String,
    },
    IndexProgress {
        partition_id: String,
        percent: u8,
    },
    IndexComplete {
        partition_id: String,
    },
    IndexError {
        partition_id: String,
        message: String,
    },
    SaveComplete {
        duration_ms: u64,
    },
    LoadComplete {
        duration_ms: u64,
    },
    SearchComplete {
        duration_ms: u64,
        result_count: usize,
    },
    SearchError {
        message: String,
    },
    Warn {
        message: String,
    },
}

impl Event {
    /// Events that must invalidate the coordinator's result cache.
    pub fn invalidates_cache(&self) -> bool {
        matches!(
            self,
            Event::VectorAdded { .. }
                | Event::VectorDeleted { .. }
                | Event::VectorsBulkAdded { .. }
                | Event::PartitionCreated { .. }
                | Event::PartitionLoaded { .. }
                | Event::PartitionUnloaded { .. }
        )
    }
}

/// The typed event bus. A thin wrapper over a broadcast channel: every
/// component that wants to observe lifecycle/search/save events subscribes
/// its own receiver, and producers (the partition manager, the coordinator)
/// hold a clone of the sender, trading a loose event-name-to-payload map for
/// one enum carrying exactly the fields each variant needs.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Broadcast an event. Silently dropped if nobody is subscribed; a full
    /// database does not need a listener for every event it emits.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_invalidating_events_match_spec_set() {
        assert!(Event::VectorAdded {
            partition_id: "p".into(),
            id: VectorId::Int(1)
        }
        .invalidates_cache());
        assert!(!Event::SearchComplete {
            duration_ms: 1,
            result_count: 1
        }
        .invalidates_cache());
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(Event::PartitionCreated {
            partition_id: "p1".into(),
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::PartitionCreated { partition_id } if partition_id == "p1"));
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.emit(Event::Warn {
            message: "no one is listening".into(),
        });
    }
}
