//! Event types for the Image Gopher event system
//!
//! Catalog changes are broadcast on an [`EventBus`] and streamed to the web
//! portal over SSE.

use crate::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Catalog event types
///
/// Serialized with a `type` tag for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum GopherEvent {
    /// A scan report was applied
    ReportIngested {
        scanner_id: String,
        session_id: String,
        created: usize,
        updated: usize,
        content_changed: usize,
        errors: usize,
        timestamp: DateTime<Utc>,
    },

    /// First sighting of a fingerprint
    ImageCreated {
        fingerprint: Fingerprint,
        path: String,
        scanner_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A known path changed content
    ContentChanged {
        path: String,
        scanner_id: String,
        previous: Fingerprint,
        current: Fingerprint,
        timestamp: DateTime<Utc>,
    },

    /// A record transitioned to `missing`
    ImageMissing {
        fingerprint: Fingerprint,
        timestamp: DateTime<Utc>,
    },

    /// Explicit merge committed
    ImagesMerged {
        from: Fingerprint,
        into: Fingerprint,
        timestamp: DateTime<Utc>,
    },

    /// Tag attached to an image
    TagAttached {
        fingerprint: Fingerprint,
        tag: String,
        timestamp: DateTime<Utc>,
    },

    /// Tag detached from an image
    TagDetached {
        fingerprint: Fingerprint,
        tag: String,
        timestamp: DateTime<Utc>,
    },
}

impl GopherEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            GopherEvent::ReportIngested { .. } => "ReportIngested",
            GopherEvent::ImageCreated { .. } => "ImageCreated",
            GopherEvent::ContentChanged { .. } => "ContentChanged",
            GopherEvent::ImageMissing { .. } => "ImageMissing",
            GopherEvent::ImagesMerged { .. } => "ImagesMerged",
            GopherEvent::TagAttached { .. } => "TagAttached",
            GopherEvent::TagDetached { .. } => "TagDetached",
        }
    }
}

/// Broadcast bus for [`GopherEvent`]s
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GopherEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<GopherEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: GopherEvent,
    ) -> Result<usize, broadcast::error::SendError<GopherEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: GopherEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let fp = Fingerprint::of_bytes(b"img");
        bus.emit(GopherEvent::ImageMissing {
            fingerprint: fp,
            timestamp: Utc::now(),
        })
        .unwrap();

        match rx.recv().await.unwrap() {
            GopherEvent::ImageMissing { fingerprint, .. } => assert_eq!(fingerprint, fp),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus
            .emit(GopherEvent::ImageMissing {
                fingerprint: Fingerprint::of_bytes(b"x"),
                timestamp: Utc::now(),
            })
            .is_err());
        // Lossy emit never fails
        bus.emit_lossy(GopherEvent::ImageMissing {
            fingerprint: Fingerprint::of_bytes(b"x"),
            timestamp: Utc::now(),
        });
        assert_eq!(bus.capacity(), 4);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = GopherEvent::TagAttached {
            fingerprint: Fingerprint::of_bytes(b"x"),
            tag: "location:paris".to_string(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "TagAttached");
        assert_eq!(value["tag"], "location:paris");
        assert_eq!(event.event_type(), "TagAttached");
    }
}
