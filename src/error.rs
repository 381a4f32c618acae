//! Error taxonomy for the replicated queue core.
//!
//! `spec.md` §7 closes the error space: every executive handler computes
//! exactly one of these kinds and nothing else. Keeping it as a
//! `thiserror` enum (rather than `anyhow::Error`) inside the state machine
//! means a reviewer can see, from the type alone, that no handler smuggles
//! an ad-hoc error string into a wire response.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One error kind per §7 of the specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum QueueError {
    #[error("queue, group, reply or pending receive does not exist")]
    NotExist,
    #[error("handle does not refer to a live entity")]
    BadHandle,
    #[error("entity already exists")]
    Exist,
    #[error("queue is open elsewhere")]
    Busy,
    #[error("priority area does not have room for the message")]
    QueueFull,
    #[error("attribute or message exceeds a hard limit")]
    TooBig,
    #[error("a global cardinality limit would be exceeded")]
    NoResources,
    #[error("operation is not permitted in the entity's current state")]
    BadOperation,
    #[error("invalid flag combination")]
    BadFlags,
    #[error("allocation failed")]
    NoMemory,
    #[error("operation was cancelled")]
    Interrupt,
    #[error("operation timed out")]
    Timeout,
    #[error("transport is applying back-pressure, retry")]
    TryAgain,
    #[error("reply exceeds the caller's declared reply buffer")]
    NoSpace,
    #[error("a callback required for this operation was not registered")]
    Init,
}

impl QueueError {
    /// Stable numeric code carried in the wire response header.
    ///
    /// Kept separate from the `Display` string so log messages can change
    /// without breaking wire compatibility.
    pub fn wire_code(self) -> u32 {
        match self {
            QueueError::NotExist => 1,
            QueueError::BadHandle => 2,
            QueueError::Exist => 3,
            QueueError::Busy => 4,
            QueueError::QueueFull => 5,
            QueueError::TooBig => 6,
            QueueError::NoResources => 7,
            QueueError::BadOperation => 8,
            QueueError::BadFlags => 9,
            QueueError::NoMemory => 10,
            QueueError::Interrupt => 11,
            QueueError::Timeout => 12,
            QueueError::TryAgain => 13,
            QueueError::NoSpace => 14,
            QueueError::Init => 15,
        }
    }

    pub fn from_wire_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => QueueError::NotExist,
            2 => QueueError::BadHandle,
            3 => QueueError::Exist,
            4 => QueueError::Busy,
            5 => QueueError::QueueFull,
            6 => QueueError::TooBig,
            7 => QueueError::NoResources,
            8 => QueueError::BadOperation,
            9 => QueueError::BadFlags,
            10 => QueueError::NoMemory,
            11 => QueueError::Interrupt,
            12 => QueueError::Timeout,
            13 => QueueError::TryAgain,
            14 => QueueError::NoSpace,
            15 => QueueError::Init,
            _ => return None,
        })
    }
}

/// Result alias used throughout the replicated core.
pub type QueueResult<T> = Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    /// Every wire code round-trips through `from_wire_code`.
    #[test]
    fn wire_codes_round_trip() {
        let all = [
            QueueError::NotExist,
            QueueError::BadHandle,
            QueueError::Exist,
            QueueError::Busy,
            QueueError::QueueFull,
            QueueError::TooBig,
            QueueError::NoResources,
            QueueError::BadOperation,
            QueueError::BadFlags,
            QueueError::NoMemory,
            QueueError::Interrupt,
            QueueError::Timeout,
            QueueError::TryAgain,
            QueueError::NoSpace,
            QueueError::Init,
        ];
        for kind in all {
            assert_eq!(QueueError::from_wire_code(kind.wire_code()), Some(kind));
        }
    }
}
