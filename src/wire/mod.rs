//! Marshalling layer: fixed-layout wire records, `Name`/`Message` value
//! types, and the ids threaded through the rest of the crate.
//!
//! See SPEC_FULL.md §3.1 for the codec split between the cross-node
//! broadcast path (explicit fixed-endian `WireRecord`s, this module) and
//! the local client/node IPC path (`bincode`, see `ipc.rs`).

pub mod cursor;
pub mod message;
pub mod name;
pub mod records;

pub use cursor::{WireReader, WireRecord, WireWriter};
pub use message::{Message, Priority};
pub use name::Name;

use serde::{Deserialize, Serialize};

/// Identifies a node in the cluster. Assigned by the deployment, not by
/// this crate; `GroupTransport::my_node_id` returns the local one.
pub type NodeId = u32;

/// Opaque per-connection handle assigned by the IPC layer.
pub type ConnectionHandle = u64;

/// Process-global monotonic counter value. Queue ids and group ids are
/// both drawn from counters like this one, but kept as distinct newtypes
/// below so they can't be swapped by accident.
pub type Counter = u32;

/// Stable id of a `Queue`, survives across opens/closes of the same name
/// (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueId(pub u32);

/// Stable id of a `Group`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u32);

/// Cluster-unique send-receive correlation id: high 32 bits the
/// originating node id, low 32 bits a per-node monotonic counter
/// (spec.md §3, §8 invariant 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SenderId(pub u64);

impl SenderId {
    pub fn new(origin_node: NodeId, counter: u32) -> Self {
        Self(((origin_node as u64) << 32) | counter as u64)
    }

    pub fn origin_node(self) -> NodeId {
        (self.0 >> 32) as u32
    }

    pub fn counter(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }
}

/// IPC origin of a request: `(node_id, connection_handle)` as described in
/// spec.md §1/§6, carried on every replicated record so the originator
/// (and only the originator) emits an IPC response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub node_id: NodeId,
    pub connection: ConnectionHandle,
}

impl Source {
    pub fn new(node_id: NodeId, connection: ConnectionHandle) -> Self {
        Self { node_id, connection }
    }
}

/// Opaque identifier for a specific membership configuration, supplied by
/// the transport. Sync records bearing any other ring id are ignored
/// (spec.md §4.3, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RingId(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_id_packs_node_and_counter() {
        let id = SenderId::new(7, 42);
        assert_eq!(id.origin_node(), 7);
        assert_eq!(id.counter(), 42);
    }

    #[test]
    fn sender_id_counter_wrap_keeps_origin_node() {
        let id = SenderId::new(3, u32::MAX);
        assert_eq!(id.origin_node(), 3);
        assert_eq!(id.counter(), u32::MAX);
        let next = SenderId::new(3, id.counter().wrapping_add(1));
        assert_eq!(next.counter(), 0);
        assert_eq!(next.origin_node(), 3);
    }
}
