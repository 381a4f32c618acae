//! Hard cardinality and size limits for the message-queue service.
//!
//! These mirror the values exposed to clients via the `LimitGet` call and
//! are enforced by the executive dispatcher (`executive.rs`) at the point
//! a replicated operation is applied, never by the client request
//! translator (see §4.1/§4.2 of SPEC_FULL.md).

/// Maximum size, in bytes, of a single priority area within a queue.
pub const MAX_PRIORITY_AREA_SIZE: u64 = 128_000;

/// Maximum total size, in bytes, across all priority areas of one queue.
pub const MAX_QUEUE_SIZE: u64 = 512_000;

/// Maximum number of live queues in the cluster at once.
pub const MAX_QUEUES: usize = 32;

/// Maximum number of live queue groups in the cluster at once.
pub const MAX_GROUPS: usize = 16;

/// Maximum number of member queues in a single queue group.
pub const MAX_QUEUES_PER_GROUP: usize = 16;

/// Maximum size, in bytes, of a single message payload.
pub const MAX_MESSAGE_SIZE: u64 = 32;

/// Maximum size, in bytes, of a send-receive reply payload.
pub const MAX_REPLY_SIZE: u64 = 32;

/// Number of priority levels (0 = highest, 3 = lowest).
pub const PRIORITY_LEVELS: usize = 4;

/// Fixed size, in bytes, of the per-queue metadata structure a client
/// would need to size a local mirror of, reported verbatim by
/// `MetadataSizeGet` (see DESIGN.md, Open Question decision 3).
pub const METADATA_SIZE: u64 = 128;

/// A limit identifier as exposed through the `LimitGet` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitId {
    MaxPriorityAreaSize,
    MaxQueueSize,
    MaxQueues,
    MaxGroups,
    MaxQueuesPerGroup,
    MaxMessageSize,
    MaxReplySize,
}

impl LimitId {
    /// Map the `LimitGet` request's wire id to a `LimitId`. Node-local
    /// (not a replicated operation, see DESIGN.md), so this lives next to
    /// `value` rather than in `wire::records`.
    pub fn from_wire_id(id: u32) -> Option<Self> {
        Some(match id {
            0 => LimitId::MaxPriorityAreaSize,
            1 => LimitId::MaxQueueSize,
            2 => LimitId::MaxQueues,
            3 => LimitId::MaxGroups,
            4 => LimitId::MaxQueuesPerGroup,
            5 => LimitId::MaxMessageSize,
            6 => LimitId::MaxReplySize,
            _ => return None,
        })
    }

    /// Resolve the numeric value for this limit.
    ///
    /// Returns `None` for limit ids this service does not define; the
    /// executive responds `TryAgain` in that case rather than fabricating
    /// a value (see SPEC_FULL.md, Open Question decision 3).
    pub fn value(self) -> u64 {
        match self {
            LimitId::MaxPriorityAreaSize => MAX_PRIORITY_AREA_SIZE,
            LimitId::MaxQueueSize => MAX_QUEUE_SIZE,
            LimitId::MaxQueues => MAX_QUEUES as u64,
            LimitId::MaxGroups => MAX_GROUPS as u64,
            LimitId::MaxQueuesPerGroup => MAX_QUEUES_PER_GROUP as u64,
            LimitId::MaxMessageSize => MAX_MESSAGE_SIZE,
            LimitId::MaxReplySize => MAX_REPLY_SIZE,
        }
    }
}
