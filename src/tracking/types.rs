use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::types::RecordCoordinate;
use crate::routing::RoutingGroup;

/// A chat message addressed by channel and message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageCoordinate {
    pub chat_id: u64,
    pub message_id: u64,
}

impl MessageCoordinate {
    pub fn new(chat_id: u64, message_id: u64) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }

    /// Storage key suffix: "{chat_id}:{message_id}".
    pub fn key(&self) -> String {
        format!("{}:{}", self.chat_id, self.message_id)
    }
}

impl fmt::Display for MessageCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chat_id, self.message_id)
    }
}

/// Links a bot announcement to the ledger record it announced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEntry {
    pub message: MessageCoordinate,
    pub record: RecordCoordinate,
    pub created_at: DateTime<Utc>,
    pub group: RoutingGroup,
    /// Only this user may attach notes to the record.
    pub submitter_id: u64,
}

impl TrackingEntry {
    pub fn new(message: MessageCoordinate, record: RecordCoordinate, group: RoutingGroup, submitter_id: u64) -> Self {
        Self {
            message,
            record,
            created_at: Utc::now(),
            group,
            submitter_id,
        }
    }

    /// True once `created_at` falls before `now - retention`.
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.created_at < now - retention
    }
}
