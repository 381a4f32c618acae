//! Membership synchronization (spec.md §4.3): on every membership change,
//! the lowest-id member of the *new* membership streams a full shadow
//! copy of replicated state over the same broadcast channel as ordinary
//! executive records, and every node — including the streamer, since
//! `GroupTransport::mcast` delivers to all members "including this node"
//! — accumulates that shadow copy and atomically swaps it into
//! `ServiceState` once streaming completes.
//!
//! Rebuilding from a clean shadow on every membership change (rather than
//! diffing against what a node already has) trades some redundant work
//! for never having to reconcile two copies that might have diverged
//! while a node was partitioned.

use crate::model::group::Group;
use crate::model::queue::{PendingReceive, Queue};
use crate::model::reply::ReplyEntry;
use crate::state::ServiceState;
use crate::transport::MembershipChange;
use crate::wire::records::{
    SyncCompleteRecord, SyncGroupMemberRecord, SyncGroupRecord, SyncPendingReceiveRecord,
    SyncQueueMessageRecord, SyncQueueRecord, SyncQueueRefcountRecord, SyncRecord, SyncReplyRecord,
};
use crate::wire::{GroupId, Name, NodeId, QueueId, RingId, Source};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No sync round in progress; `ServiceState` reflects the last
    /// completed round (or the initial empty state).
    NotStarted,
    /// `begin` has run for the current `RingId`; waiting for the first
    /// shadow record.
    Started,
    /// At least one `SyncQueueRecord`/`SyncQueueRefcountRecord`/
    /// `SyncQueueMessageRecord`/`SyncPendingReceiveRecord` has been
    /// accumulated for this round.
    Queue,
    /// At least one group record has been accumulated.
    Group,
    /// At least one reply record has been accumulated; this phase also
    /// covers `SyncCompleteRecord`, which ends the round.
    Reply,
}

struct ShadowQueue {
    name: Name,
    creation_attrs: crate::model::queue::CreationAttrs,
    open_flags: crate::model::queue::OpenFlags,
    unlink_flag: bool,
    close_time: Option<i64>,
    refcounts: HashMap<NodeId, u32>,
    messages: Vec<SyncQueueMessageRecord>,
    pending: Vec<Source>,
}

struct ShadowGroup {
    name: Name,
    policy: crate::model::group::GroupPolicy,
    members: Vec<QueueId>,
}

/// Accumulates one membership change's worth of shadow state and swaps
/// it into `ServiceState` at `activate`.
pub struct SyncEngine {
    my_node_id: NodeId,
    phase: SyncPhase,
    current_ring: Option<RingId>,
    queues: HashMap<QueueId, ShadowQueue>,
    groups: HashMap<GroupId, ShadowGroup>,
    replies: Vec<SyncReplyRecord>,
}

impl SyncEngine {
    pub fn new(my_node_id: NodeId) -> Self {
        Self {
            my_node_id,
            phase: SyncPhase::NotStarted,
            current_ring: None,
            queues: HashMap::new(),
            groups: HashMap::new(),
            replies: Vec::new(),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Reset accumulation for a new membership change and report whether
    /// this node must stream the shadow copy (spec.md §4.4: "only the
    /// lowest-id node in the current membership" does). The caller is
    /// responsible for building and broadcasting the stream when this
    /// returns `true`; every node, streamer included, still calls
    /// `on_record` for everything delivered afterward.
    pub fn begin(&mut self, change: &MembershipChange) -> bool {
        self.current_ring = Some(change.ring_id);
        self.phase = SyncPhase::Started;
        self.queues.clear();
        self.groups.clear();
        self.replies.clear();
        change.members.first() == Some(&self.my_node_id)
    }

    /// Accumulate one delivered sync record. Returns `true` once a
    /// `SyncCompleteRecord` for the current ring has been seen, which is
    /// the caller's signal to call `activate`.
    pub fn on_record(&mut self, record: SyncRecord) -> bool {
        let ring_id = match &record {
            SyncRecord::Queue(r) => r.ring_id,
            SyncRecord::QueueRefcount(r) => r.ring_id,
            SyncRecord::QueueMessage(r) => r.ring_id,
            SyncRecord::Group(r) => r.ring_id,
            SyncRecord::GroupMember(r) => r.ring_id,
            SyncRecord::Reply(r) => r.ring_id,
            SyncRecord::PendingReceive(r) => r.ring_id,
            SyncRecord::Complete(r) => r.ring_id,
        };
        if Some(ring_id) != self.current_ring {
            // Stale record from a superseded ring; the GLOSSARY calls for
            // silently ignoring these.
            return false;
        }

        match record {
            SyncRecord::Queue(r) => {
                self.phase = SyncPhase::Queue;
                self.queues.insert(
                    r.queue_id,
                    ShadowQueue {
                        name: r.name,
                        creation_attrs: r.creation_attrs,
                        open_flags: r.open_flags,
                        unlink_flag: r.unlink_flag,
                        close_time: r.close_time,
                        refcounts: HashMap::new(),
                        messages: Vec::new(),
                        pending: Vec::new(),
                    },
                );
            }
            SyncRecord::QueueRefcount(r) => {
                self.phase = SyncPhase::Queue;
                if let Some(shadow) = self.queues.get_mut(&r.queue_id) {
                    shadow.refcounts = r.refcounts.into_iter().collect();
                }
            }
            SyncRecord::QueueMessage(r) => {
                self.phase = SyncPhase::Queue;
                if let Some(shadow) = self.queues.get_mut(&r.queue_id) {
                    shadow.messages.push(r);
                }
            }
            SyncRecord::Group(r) => {
                self.phase = SyncPhase::Group;
                self.groups.insert(
                    r.group_id,
                    ShadowGroup {
                        name: r.name,
                        policy: r.policy,
                        members: Vec::new(),
                    },
                );
            }
            SyncRecord::GroupMember(SyncGroupMemberRecord { group_id, queue_id, .. }) => {
                self.phase = SyncPhase::Group;
                if let Some(shadow) = self.groups.get_mut(&group_id) {
                    shadow.members.push(queue_id);
                }
            }
            SyncRecord::PendingReceive(r) => {
                self.phase = SyncPhase::Queue;
                if let Some(shadow) = self.queues.get_mut(&r.queue_id) {
                    shadow.pending.push(r.source);
                }
            }
            SyncRecord::Reply(r) => {
                self.phase = SyncPhase::Reply;
                self.replies.push(r);
            }
            SyncRecord::Complete(_) => return true,
        }
        false
    }

    /// Swap the accumulated shadow copy into `state` and set
    /// `state.membership` to `members`. Refcount entries and pending
    /// receives whose owning node has left membership are dropped rather
    /// than carried forward (spec.md §4.3 "refcount reconciliation" and
    /// "local pending-receive … records … cancelled at activate time");
    /// replies get the same treatment two blocks below, for the same
    /// reason: there is no connection left to ever deliver to.
    pub fn activate(&mut self, state: &mut ServiceState, members: &[NodeId]) {
        let mut queues = HashMap::with_capacity(self.queues.len());
        let mut queue_ids_by_name = HashMap::with_capacity(self.queues.len());
        for (queue_id, shadow) in self.queues.drain() {
            let mut queue = Queue::new(shadow.name.clone(), queue_id, shadow.creation_attrs);
            queue.open_flags = shadow.open_flags;
            queue.unlink_flag = shadow.unlink_flag;
            queue.close_time = shadow.close_time;
            queue.refcount_set = shadow
                .refcounts
                .into_iter()
                .filter(|(node_id, _)| members.contains(node_id))
                .collect();
            // Messages accumulate in broadcast-delivery order, which
            // `build_stream` emitted as `queue.message_list()` (already
            // sequence-sorted); re-enqueuing in that order reproduces the
            // original relative order without needing the original
            // sequence numbers to survive the round trip.
            for m in shadow.messages {
                queue.enqueue(m.send_time, m.sender_id, m.message);
            }
            queue.pending_list = shadow
                .pending
                .into_iter()
                .filter(|source| members.contains(&source.node_id))
                .map(|source| PendingReceive { source, timer_handle: None })
                .collect();
            state.observe_queue_id(queue_id);
            queue_ids_by_name.insert(queue.name.clone(), queue_id);
            queues.insert(queue_id, queue);
        }

        let mut groups = HashMap::with_capacity(self.groups.len());
        let mut group_ids_by_name = HashMap::with_capacity(self.groups.len());
        for (group_id, shadow) in self.groups.drain() {
            let mut group = Group::new(shadow.name.clone(), group_id, shadow.policy);
            for queue_id in &shadow.members {
                group.insert(*queue_id);
                if let Some(queue) = queues.get_mut(queue_id) {
                    queue.group = Some(group_id);
                }
            }
            state.observe_group_id(group_id);
            group_ids_by_name.insert(group.name.clone(), group_id);
            groups.insert(group_id, group);
        }

        let mut replies = HashMap::with_capacity(self.replies.len());
        for r in self.replies.drain(..) {
            if !members.contains(&r.source.node_id) {
                continue;
            }
            replies.insert(r.sender_id, ReplyEntry::new(r.sender_id, r.source, r.reply_size_limit));
        }

        state.queues = queues;
        state.queue_ids_by_name = queue_ids_by_name;
        state.groups = groups;
        state.group_ids_by_name = group_ids_by_name;
        state.replies = replies;
        state.membership = {
            let mut m = members.to_vec();
            m.sort_unstable();
            m
        };
        self.phase = SyncPhase::NotStarted;
    }

    /// Build the full shadow stream for `state`, in the order a follower
    /// must see it to reconstruct state correctly: all queue records
    /// (definition, refcounts, messages, pending receives) before any
    /// group record, all group records before any reply record,
    /// terminated by a `SyncCompleteRecord`. Only the node chosen by
    /// `begin` calls this.
    pub fn build_stream(state: &ServiceState, ring_id: RingId) -> Vec<SyncRecord> {
        let mut records = Vec::new();
        for (queue_id, queue) in &state.queues {
            records.push(SyncRecord::Queue(SyncQueueRecord {
                ring_id,
                queue_id: *queue_id,
                name: queue.name.clone(),
                creation_attrs: queue.creation_attrs,
                open_flags: queue.open_flags,
                unlink_flag: queue.unlink_flag,
                close_time: queue.close_time,
            }));
            records.push(SyncRecord::QueueRefcount(SyncQueueRefcountRecord {
                ring_id,
                queue_id: *queue_id,
                refcounts: queue.refcount_set.iter().map(|(n, c)| (*n, *c)).collect(),
            }));
            for entry in queue.message_list() {
                records.push(SyncRecord::QueueMessage(SyncQueueMessageRecord {
                    ring_id,
                    queue_id: *queue_id,
                    send_time: entry.send_time,
                    sender_id: entry.sender_id,
                    message: entry.message.clone(),
                }));
            }
            for pending in &queue.pending_list {
                records.push(SyncRecord::PendingReceive(SyncPendingReceiveRecord {
                    ring_id,
                    queue_id: *queue_id,
                    source: pending.source,
                }));
            }
        }
        for (group_id, group) in &state.groups {
            records.push(SyncRecord::Group(SyncGroupRecord {
                ring_id,
                group_id: *group_id,
                name: group.name.clone(),
                policy: group.policy,
            }));
            for queue_id in &group.queue_head {
                records.push(SyncRecord::GroupMember(SyncGroupMemberRecord {
                    ring_id,
                    group_id: *group_id,
                    queue_id: *queue_id,
                }));
            }
        }
        for entry in state.replies.values() {
            records.push(SyncRecord::Reply(SyncReplyRecord {
                ring_id,
                sender_id: entry.sender_id,
                source: entry.source,
                reply_size_limit: entry.reply_size_limit,
            }));
        }
        records.push(SyncRecord::Complete(SyncCompleteRecord { ring_id }));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::group::GroupPolicy;
    use crate::model::queue::CreationAttrs;
    use crate::transport::MembershipKind;
    use crate::wire::{Message, Priority, Source};
    use std::time::Duration;

    fn change(members: Vec<NodeId>, ring: u64) -> MembershipChange {
        MembershipChange {
            kind: MembershipKind::Regular,
            members,
            left: Vec::new(),
            joined: Vec::new(),
            ring_id: RingId(ring),
        }
    }

    fn attrs() -> CreationAttrs {
        CreationAttrs {
            persistent: false,
            retention_time: Duration::from_secs(5),
            sizes: [100, 100, 100, 100],
        }
    }

    #[test]
    fn begin_reports_streaming_duty_only_to_the_lowest_id_member() {
        let mut leader = SyncEngine::new(1);
        assert!(leader.begin(&change(vec![1, 2, 3], 1)));
        let mut follower = SyncEngine::new(2);
        assert!(!follower.begin(&change(vec![1, 2, 3], 1)));
    }

    #[test]
    fn full_round_trip_rebuilds_queue_group_and_reply_state() {
        let mut source = ServiceState::new();
        let queue_id = source.allocate_queue_id();
        let mut queue = Queue::new("q1".into(), queue_id, attrs());
        queue.open(1);
        queue.enqueue(
            10,
            None,
            Message::new(1, 1, Priority::new(0).unwrap(), b"hi".to_vec()).unwrap(),
        );
        source.insert_queue(queue);

        let group_id = source.allocate_group_id();
        let mut group = Group::new("g1".into(), group_id, GroupPolicy::RoundRobin);
        group.insert(queue_id);
        source.insert_group(group);

        source.replies.insert(
            crate::wire::SenderId::new(1, 1),
            ReplyEntry::new(crate::wire::SenderId::new(1, 1), Source::new(1, 9), 0),
        );

        let ring = RingId(5);
        let stream = SyncEngine::build_stream(&source, ring);

        let mut engine = SyncEngine::new(2);
        assert!(!engine.begin(&change(vec![1, 2], 5)));
        let mut completed = false;
        for record in stream {
            if engine.on_record(record) {
                completed = true;
            }
        }
        assert!(completed);

        let mut dest = ServiceState::new();
        engine.activate(&mut dest, &[1, 2]);

        assert_eq!(dest.queues.len(), 1);
        let rebuilt = dest.queues.get(&queue_id).unwrap();
        assert_eq!(rebuilt.total_messages(), 1);
        assert_eq!(rebuilt.refcount(), 1);
        assert_eq!(dest.groups.get(&group_id).unwrap().queue_head, vec![queue_id]);
        assert_eq!(dest.replies.len(), 1);
        assert_eq!(dest.membership, vec![1, 2]);
    }

    #[test]
    fn reply_waiting_on_a_departed_node_is_dropped() {
        let mut source = ServiceState::new();
        source.replies.insert(
            crate::wire::SenderId::new(9, 1),
            ReplyEntry::new(crate::wire::SenderId::new(9, 1), Source::new(9, 1), 0),
        );
        let ring = RingId(1);
        let stream = SyncEngine::build_stream(&source, ring);

        let mut engine = SyncEngine::new(1);
        engine.begin(&change(vec![1], 1));
        for record in stream {
            engine.on_record(record);
        }

        let mut dest = ServiceState::new();
        engine.activate(&mut dest, &[1]);
        assert!(dest.replies.is_empty());
    }

    #[test]
    fn refcount_from_a_departed_node_is_dropped_not_carried_over() {
        let mut source = ServiceState::new();
        let queue_id = source.allocate_queue_id();
        let mut queue = Queue::new("q1".into(), queue_id, attrs());
        queue.open(1);
        queue.open(9);
        source.insert_queue(queue);

        let ring = RingId(3);
        let stream = SyncEngine::build_stream(&source, ring);

        let mut engine = SyncEngine::new(1);
        engine.begin(&change(vec![1], 3));
        for record in stream {
            engine.on_record(record);
        }

        let mut dest = ServiceState::new();
        engine.activate(&mut dest, &[1]);

        let rebuilt = dest.queues.get(&queue_id).unwrap();
        assert_eq!(rebuilt.refcount(), 1);
        assert!(rebuilt.refcount_set.contains_key(&1));
        assert!(!rebuilt.refcount_set.contains_key(&9));
    }

    #[test]
    fn pending_receive_from_a_departed_node_is_dropped_not_carried_over() {
        let mut source = ServiceState::new();
        let queue_id = source.allocate_queue_id();
        let mut queue = Queue::new("q1".into(), queue_id, attrs());
        queue.open(1);
        queue.pending_list.push_back(PendingReceive {
            source: Source::new(1, 1),
            timer_handle: None,
        });
        queue.pending_list.push_back(PendingReceive {
            source: Source::new(9, 1),
            timer_handle: None,
        });
        source.insert_queue(queue);

        let ring = RingId(4);
        let stream = SyncEngine::build_stream(&source, ring);

        let mut engine = SyncEngine::new(1);
        engine.begin(&change(vec![1], 4));
        for record in stream {
            engine.on_record(record);
        }

        let mut dest = ServiceState::new();
        engine.activate(&mut dest, &[1]);

        let rebuilt = dest.queues.get(&queue_id).unwrap();
        assert_eq!(rebuilt.pending_list.len(), 1);
        assert_eq!(rebuilt.pending_list[0].source.node_id, 1);
    }

    #[test]
    fn stale_ring_records_are_ignored() {
        let mut engine = SyncEngine::new(1);
        engine.begin(&change(vec![1], 2));
        let stale = SyncRecord::Complete(SyncCompleteRecord { ring_id: RingId(1) });
        assert!(!engine.on_record(stale));
        assert_eq!(engine.phase(), SyncPhase::Started);
    }
}
