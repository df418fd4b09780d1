//! Post-commit events
//!
//! Facts produced by a committed core operation. The core never fires side
//! effects itself; the caller hands these to the task distributor once the
//! database transaction has committed.

use serde::{Deserialize, Serialize};

/// Event emitted after a successful mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PostCommitEvent {
    /// A user row was committed and needs its email verified
    UserCreated { username: String },
}

impl PostCommitEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            PostCommitEvent::UserCreated { .. } => "UserCreated",
        }
    }
}
