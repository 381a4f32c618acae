//! `ServiceState`: the single process-wide arena of replicated entities
//! (spec.md §9 "global mutable state" design note).
//!
//! Every queue/group/reply lives in exactly one of three maps here, cross
//! referenced by stable ids rather than raw references, per §9's
//! "cyclic ownership" note. `executive::Executive` is the only code that
//! mutates this struct, and only from inside delivery (spec.md §5).

use crate::ipc::ConnectionId;
use crate::model::{CleanupEntry, Group, Queue, ReplyEntry, TrackEntry};
use crate::wire::{GroupId, Name, QueueId, SenderId};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ServiceState {
    pub queues: HashMap<QueueId, Queue>,
    pub queue_ids_by_name: HashMap<Name, QueueId>,
    pub groups: HashMap<GroupId, Group>,
    pub group_ids_by_name: HashMap<Name, GroupId>,
    pub replies: HashMap<SenderId, ReplyEntry>,
    pub tracks: Vec<TrackEntry>,
    pub cleanup: HashMap<ConnectionId, CleanupEntry>,
    /// Current cluster membership, kept sorted ascending by
    /// `sync_engine::SyncEngine` on every membership change. Only the
    /// lowest-id member arms retention timers (spec.md §4.4), which this
    /// lets the executive check without a separate "am I the leader"
    /// protocol.
    pub membership: Vec<crate::wire::NodeId>,
    next_queue_id: u32,
    next_group_id: u32,
}

impl ServiceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_queue_id(&mut self) -> QueueId {
        let id = QueueId(self.next_queue_id);
        self.next_queue_id += 1;
        id
    }

    pub fn allocate_group_id(&mut self) -> GroupId {
        let id = GroupId(self.next_group_id);
        self.next_group_id += 1;
        id
    }

    /// Raise the queue-id allocator floor so a future `allocate_queue_id`
    /// never reissues an id already in use. `sync_engine::SyncEngine`
    /// calls this for every queue it rebuilds from a shadow sync, since
    /// those ids were minted on whichever node originally ran
    /// `QueueOpen` and may be far ahead of this node's own counter.
    pub fn observe_queue_id(&mut self, id: QueueId) {
        self.next_queue_id = self.next_queue_id.max(id.0 + 1);
    }

    /// See `observe_queue_id`.
    pub fn observe_group_id(&mut self, id: GroupId) {
        self.next_group_id = self.next_group_id.max(id.0 + 1);
    }

    pub fn find_queue_id(&self, name: &Name) -> Option<QueueId> {
        self.queue_ids_by_name.get(name).copied()
    }

    pub fn find_group_id(&self, name: &Name) -> Option<GroupId> {
        self.group_ids_by_name.get(name).copied()
    }

    pub fn insert_queue(&mut self, queue: Queue) -> QueueId {
        let id = queue.queue_id;
        self.queue_ids_by_name.insert(queue.name.clone(), id);
        self.queues.insert(id, queue);
        id
    }

    /// Remove a queue and all name/lookup bookkeeping for it, per the
    /// "use-after-free while unlinking" caution of spec.md §9: callers
    /// must have already captured anything they still need (e.g. a
    /// round-robin cursor successor) before calling this.
    pub fn remove_queue(&mut self, queue_id: QueueId) -> Option<Queue> {
        let queue = self.queues.remove(&queue_id)?;
        self.queue_ids_by_name.remove(&queue.name);
        Some(queue)
    }

    pub fn insert_group(&mut self, group: Group) -> GroupId {
        let id = group.group_id;
        self.group_ids_by_name.insert(group.name.clone(), id);
        self.groups.insert(id, group);
        id
    }

    pub fn remove_group(&mut self, group_id: GroupId) -> Option<Group> {
        let group = self.groups.remove(&group_id)?;
        self.group_ids_by_name.remove(&group.name);
        Some(group)
    }

    /// True if `node_id` is the lowest-id member of the current
    /// membership (spec.md §4.4's single-arming rule for retention
    /// timers). Returns `false` on an empty membership list rather than
    /// panicking, which only happens before the first membership event
    /// has been applied.
    pub fn is_lowest_id(&self, node_id: crate::wire::NodeId) -> bool {
        self.membership.first() == Some(&node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::queue::CreationAttrs;
    use std::time::Duration;

    fn attrs() -> CreationAttrs {
        CreationAttrs {
            persistent: false,
            retention_time: Duration::from_secs(5),
            sizes: [100, 100, 100, 100],
        }
    }

    #[test]
    fn queue_ids_allocate_monotonically() {
        let mut state = ServiceState::new();
        assert_eq!(state.allocate_queue_id(), QueueId(0));
        assert_eq!(state.allocate_queue_id(), QueueId(1));
    }

    #[test]
    fn insert_and_remove_queue_updates_name_lookup() {
        let mut state = ServiceState::new();
        let id = state.allocate_queue_id();
        let queue = Queue::new("q1".into(), id, attrs());
        state.insert_queue(queue);
        assert_eq!(state.find_queue_id(&"q1".into()), Some(id));

        state.remove_queue(id);
        assert_eq!(state.find_queue_id(&"q1".into()), None);
    }
}
