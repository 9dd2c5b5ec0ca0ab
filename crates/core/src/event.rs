//! Lifecycle events delivered to the notification boundary.

use serde::{Deserialize, Serialize};

/// Canonical job lifecycle events that can trigger notifications.
///
/// SUCCESS follows COMPLETED; FAILURE follows any recorded failure,
/// whether the job landed in RETRYING or DEAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobEvent {
    Success,
    Failure,
}

impl JobEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEvent::Success => "SUCCESS",
            JobEvent::Failure => "FAILURE",
        }
    }
}

impl core::fmt::Display for JobEvent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
