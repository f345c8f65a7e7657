use crate::types::{FailureKind, LimitCategory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notifications published on the buffer's broadcast channel.
///
/// Every event carries the session it belongs to so a consumer can drop
/// stragglers from a previous image folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BufferEvent {
    /// A new ordered item list was loaded.
    SessionStarted { session: Uuid, total: usize },

    /// An item was accepted and is waiting for a worker slot.
    ItemQueued { session: Uuid, index: usize },

    /// An item's remote call started.
    ItemStarted { session: Uuid, index: usize },

    /// An item's result is available through `get_result`.
    ItemCompleted { session: Uuid, index: usize },

    /// An item settled with a failure.
    ItemFailed {
        session: Uuid,
        index: usize,
        failure: FailureKind,
    },

    /// A queued item was withdrawn before reaching the remote service.
    ItemCancelled { session: Uuid, index: usize },

    /// Dispatch stopped because of a rate limit.
    Paused {
        session: Uuid,
        category: LimitCategory,
        wait_secs: u64,
        auto_resume: bool,
        until: DateTime<Utc>,
    },

    /// Dispatch continues after a pause.
    Resumed { session: Uuid, manual: bool },
}

impl BufferEvent {
    /// Stable event name, e.g. for forwarding to a frontend event bus.
    pub fn name(&self) -> &'static str {
        match self {
            BufferEvent::SessionStarted { .. } => "lookahead:session_started",
            BufferEvent::ItemQueued { .. } => "lookahead:item_queued",
            BufferEvent::ItemStarted { .. } => "lookahead:item_started",
            BufferEvent::ItemCompleted { .. } => "lookahead:item_completed",
            BufferEvent::ItemFailed { .. } => "lookahead:item_failed",
            BufferEvent::ItemCancelled { .. } => "lookahead:item_cancelled",
            BufferEvent::Paused { .. } => "lookahead:paused",
            BufferEvent::Resumed { .. } => "lookahead:resumed",
        }
    }

    pub fn session(&self) -> Uuid {
        match self {
            BufferEvent::SessionStarted { session, .. }
            | BufferEvent::ItemQueued { session, .. }
            | BufferEvent::ItemStarted { session, .. }
            | BufferEvent::ItemCompleted { session, .. }
            | BufferEvent::ItemFailed { session, .. }
            | BufferEvent::ItemCancelled { session, .. }
            | BufferEvent::Paused { session, .. }
            | BufferEvent::Resumed { session, .. } => *session,
        }
    }

    /// Item index for per-item events.
    pub fn index(&self) -> Option<usize> {
        match self {
            BufferEvent::ItemQueued { index, .. }
            | BufferEvent::ItemStarted { index, .. }
            | BufferEvent::ItemCompleted { index, .. }
            | BufferEvent::ItemFailed { index, .. }
            | BufferEvent::ItemCancelled { index, .. } => Some(*index),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag_and_camel_case() {
        let event = BufferEvent::Paused {
            session: Uuid::nil(),
            category: LimitCategory::Concurrent,
            wait_secs: 2,
            auto_resume: true,
            until: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "paused");
        assert_eq!(json["waitSecs"], 2);
        assert_eq!(json["autoResume"], true);
        assert_eq!(event.name(), "lookahead:paused");
        assert_eq!(event.index(), None);
    }

    #[test]
    fn item_events_expose_index() {
        let event = BufferEvent::ItemCompleted {
            session: Uuid::nil(),
            index: 7,
        };
        assert_eq!(event.index(), Some(7));
        assert_eq!(event.session(), Uuid::nil());
    }
}
