//! Lifecycle status of a relayed event.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-attempt state of a stored event.
///
/// Transitions are `None | Failed -> InProgress -> Succeeded | Failed`.
/// The numeric codes are the persisted representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    None,
    InProgress,
    Succeeded,
    Failed,
}

impl EventStatus {
    pub const fn code(self) -> i16 {
        match self {
            Self::None => 0,
            Self::InProgress => 1,
            Self::Succeeded => 2,
            Self::Failed => 3,
        }
    }

    pub const fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::InProgress),
            2 => Some(Self::Succeeded),
            3 => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal for one attempt. A `Failed` row may still be claimed again.
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
