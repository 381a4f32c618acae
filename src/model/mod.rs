//! Replicated data model: queues, groups, reply correlation and the
//! per-connection bookkeeping records of spec.md §3.

pub mod group;
pub mod queue;
pub mod reply;
pub mod track;

pub use group::{Group, GroupPolicy};
pub use queue::{
    CreationAttrs, MessageEntry, OpenFlags, PendingReceive, PriorityArea, Queue, Thresholds,
};
pub use reply::ReplyEntry;
pub use track::{CleanupEntry, TrackEntry, TrackFlags};
