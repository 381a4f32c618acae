//! `Queue`: the central replicated entity (spec.md §3).

use crate::limits::{MAX_QUEUE_SIZE, PRIORITY_LEVELS};
use crate::timer::TimerHandle;
use crate::wire::{GroupId, Message, Name, NodeId, Priority, QueueId, SenderId, Source};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Flags a queue can be opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpenFlags {
    /// Create the queue if it does not already exist.
    pub create: bool,
    /// Deliver a `MessageReceivedCallback` dispatch to the opener whenever
    /// a message lands while the queue is empty-to-nonempty.
    pub receive_callback: bool,
    /// Drain any queued messages at open time.
    pub empty: bool,
}

/// Attributes supplied on creation; stored verbatim so a later `QueueOpen`
/// with `CREATE` set can be checked for equality (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationAttrs {
    pub persistent: bool,
    pub retention_time: Duration,
    pub sizes: [u64; PRIORITY_LEVELS],
}

impl CreationAttrs {
    pub fn total_size(&self) -> u64 {
        self.sizes.iter().sum()
    }
}

/// Per-priority hi/lo capacity thresholds (`QueueCapacityThresholdsSet/Get`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Thresholds {
    pub capacity_reached: u64,
    pub capacity_available: u64,
}

/// One message stored in a queue, cross-linked by the priority area it
/// lives in (spec.md §3: "cross-linked so it can be walked per-queue or
/// per-priority-area"). We represent that cross-link implicitly: the
/// priority area owns the ordered storage, and the whole-queue view is a
/// merge-by-arrival-order computed on demand (`Queue::message_list`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEntry {
    pub send_time: i64,
    pub sender_id: Option<SenderId>,
    pub message: Message,
    /// Monotonic arrival sequence, used to reconstruct whole-queue
    /// insertion order across priority areas for `Queue::message_list`.
    pub sequence: u64,
}

/// A client blocked in `MessageGet` because the queue was empty.
#[derive(Debug, Clone)]
pub struct PendingReceive {
    pub source: Source,
    pub timer_handle: Option<TimerHandle>,
}

/// One of the four priority sub-buffers within a queue.
#[derive(Debug, Clone)]
pub struct PriorityArea {
    pub queue_size: u64,
    pub queue_used: u64,
    pub messages: VecDeque<MessageEntry>,
    pub thresholds: Thresholds,
}

impl PriorityArea {
    fn new(queue_size: u64) -> Self {
        Self {
            queue_size,
            queue_used: 0,
            messages: VecDeque::new(),
            thresholds: Thresholds::default(),
        }
    }

    pub fn n_messages(&self) -> usize {
        self.messages.len()
    }

    pub fn has_room(&self, size: u64) -> bool {
        self.queue_size.saturating_sub(self.queue_used) >= size
    }
}

#[derive(Debug, Clone)]
pub struct Queue {
    pub name: Name,
    pub queue_id: QueueId,
    pub creation_attrs: CreationAttrs,
    pub open_flags: OpenFlags,
    pub unlink_flag: bool,
    /// Wall time (nanoseconds since epoch) at which refcount last reached
    /// zero; `None` while the queue has at least one open reference.
    pub close_time: Option<i64>,
    pub refcount_set: HashMap<NodeId, u32>,
    pub priority: [PriorityArea; PRIORITY_LEVELS],
    pub pending_list: VecDeque<PendingReceive>,
    pub group: Option<GroupId>,
    pub source: Option<Source>,
    pub retention_timer: Option<TimerHandle>,
    next_sequence: u64,
}

impl Queue {
    pub fn new(name: Name, queue_id: QueueId, creation_attrs: CreationAttrs) -> Self {
        let priority = creation_attrs
            .sizes
            .map(PriorityArea::new);
        Self {
            name,
            queue_id,
            creation_attrs,
            open_flags: OpenFlags::default(),
            unlink_flag: false,
            close_time: None,
            refcount_set: HashMap::new(),
            priority,
            pending_list: VecDeque::new(),
            group: None,
            source: None,
            retention_timer: None,
            next_sequence: 0,
        }
    }

    /// Total live open-reference count, the sum of `refcount_set`
    /// (spec.md §3 invariant, §8 invariant 3).
    pub fn refcount(&self) -> u32 {
        self.refcount_set.values().sum()
    }

    pub fn open(&mut self, node: NodeId) {
        *self.refcount_set.entry(node).or_insert(0) += 1;
    }

    /// Decrement the refcount for `node`; returns `true` if the total
    /// refcount reached zero as a result.
    pub fn close(&mut self, node: NodeId) -> bool {
        if let Some(count) = self.refcount_set.get_mut(&node) {
            if *count > 0 {
                *count -= 1;
            }
            if *count == 0 {
                self.refcount_set.remove(&node);
            }
        }
        self.refcount() == 0
    }

    pub fn total_size(&self) -> u64 {
        self.priority.iter().map(|p| p.queue_size).sum()
    }

    pub fn total_used(&self) -> u64 {
        self.priority.iter().map(|p| p.queue_used).sum()
    }

    pub fn total_messages(&self) -> usize {
        self.priority.iter().map(|p| p.n_messages()).sum()
    }

    /// Whole-queue message view in insertion order, per spec.md §3's
    /// "message_list and per-priority message_list contain the same
    /// entries in the same relative order".
    pub fn message_list(&self) -> Vec<&MessageEntry> {
        let mut all: Vec<&MessageEntry> = self.priority.iter().flat_map(|p| p.messages.iter()).collect();
        all.sort_by_key(|m| m.sequence);
        all
    }

    pub fn has_room(&self, priority: Priority, size: u64) -> bool {
        self.priority[priority.as_index()].has_room(size)
    }

    /// Append a message to its priority area. Caller is responsible for
    /// having already checked `has_room` and for preferring a waiting
    /// pending receiver (spec.md §4.1 `MessageSend`).
    pub fn enqueue(&mut self, send_time: i64, sender_id: Option<SenderId>, message: Message) {
        let idx = message.priority.as_index();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let size = message.size();
        let area = &mut self.priority[idx];
        area.messages.push_back(MessageEntry {
            send_time,
            sender_id,
            message,
            sequence,
        });
        area.queue_used += size;
    }

    /// Remove and return the highest-priority, oldest message in that
    /// area (spec.md §4.1 `MessageGet`).
    pub fn dequeue_highest(&mut self) -> Option<MessageEntry> {
        for area in self.priority.iter_mut() {
            if let Some(entry) = area.messages.pop_front() {
                area.queue_used = area.queue_used.saturating_sub(entry.message.size());
                return Some(entry);
            }
        }
        None
    }

    /// Drain all queued messages (the `EMPTY` open flag).
    pub fn drain_all(&mut self) {
        for area in self.priority.iter_mut() {
            area.messages.clear();
            area.queue_used = 0;
        }
    }

    pub fn is_empty_of_messages(&self) -> bool {
        self.priority.iter().all(|p| p.messages.is_empty())
    }

    /// §8 invariant 2: `Σ queue_used == Σ message sizes` and
    /// `Σ n_messages == |message_list|`.
    #[cfg(test)]
    pub fn check_usage_invariant(&self) -> bool {
        let used_matches = self.priority.iter().all(|area| {
            let sum: u64 = area.messages.iter().map(|m| m.message.size()).sum();
            sum == area.queue_used
        });
        let count_matches = self.total_messages() == self.message_list().len();
        used_matches && count_matches
    }

    pub fn assert_total_size_limit(sizes: &[u64; PRIORITY_LEVELS]) -> bool {
        sizes.iter().sum::<u64>() <= MAX_QUEUE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Message as WireMessage;

    fn attrs(sizes: [u64; 4]) -> CreationAttrs {
        CreationAttrs {
            persistent: false,
            retention_time: Duration::from_secs(5),
            sizes,
        }
    }

    fn msg(priority: u8, len: usize) -> WireMessage {
        WireMessage::new(1, 1, Priority::new(priority).unwrap(), vec![0u8; len]).unwrap()
    }

    #[test]
    fn refcount_tracks_per_node_opens() {
        let mut q = Queue::new("q".into(), QueueId(1), attrs([100, 100, 100, 100]));
        q.open(1);
        q.open(1);
        q.open(2);
        assert_eq!(q.refcount(), 3);
        assert!(!q.close(1));
        assert_eq!(q.refcount(), 2);
        assert!(!q.close(1));
        assert!(!q.close(2));
        assert_eq!(q.refcount(), 0);
    }

    #[test]
    fn receive_order_is_priority_then_fifo() {
        let mut q = Queue::new("q".into(), QueueId(1), attrs([100, 100, 100, 100]));
        q.enqueue(0, None, msg(2, 1));
        q.enqueue(0, None, msg(0, 1));
        q.enqueue(0, None, msg(0, 1));
        q.enqueue(0, None, msg(1, 1));

        let first = q.dequeue_highest().unwrap();
        assert_eq!(first.message.priority.get(), 0);
        let second = q.dequeue_highest().unwrap();
        assert_eq!(second.message.priority.get(), 0);
        let third = q.dequeue_highest().unwrap();
        assert_eq!(third.message.priority.get(), 1);
        let fourth = q.dequeue_highest().unwrap();
        assert_eq!(fourth.message.priority.get(), 2);
        assert!(q.dequeue_highest().is_none());
        assert!(q.check_usage_invariant());
    }

    #[test]
    fn empty_flag_drains_messages() {
        let mut q = Queue::new("q".into(), QueueId(1), attrs([100, 100, 100, 100]));
        q.enqueue(0, None, msg(0, 1));
        q.drain_all();
        assert!(q.is_empty_of_messages());
        assert_eq!(q.total_used(), 0);
    }

    #[test]
    fn boundary_capacity_check() {
        let mut q = Queue::new("q".into(), QueueId(1), attrs([10, 10, 10, 10]));
        assert!(q.has_room(Priority::new(0).unwrap(), 10));
        q.enqueue(0, None, msg(0, 10));
        assert!(!q.has_room(Priority::new(0).unwrap(), 1));
    }
}
