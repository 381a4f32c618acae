//! `Group`: a named collection of queues with a dispatch policy
//! (spec.md §3). Only round-robin is exercised per spec.md §3's note that
//! broadcast/local policy variants are declared but unused.

use crate::wire::{GroupId, Name, QueueId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupPolicy {
    RoundRobin,
}

#[derive(Debug, Clone)]
pub struct Group {
    pub name: Name,
    pub group_id: GroupId,
    pub policy: GroupPolicy,
    /// Ordered list of member queues, `member_count == queue_head.len()`.
    pub queue_head: Vec<QueueId>,
    /// Rotating cursor: the queue a send to this group will target next.
    pub next_queue: Option<QueueId>,
}

impl Group {
    pub fn new(name: Name, group_id: GroupId, policy: GroupPolicy) -> Self {
        Self {
            name,
            group_id,
            policy,
            queue_head: Vec::new(),
            next_queue: None,
        }
    }

    pub fn member_count(&self) -> usize {
        self.queue_head.len()
    }

    pub fn contains(&self, queue_id: QueueId) -> bool {
        self.queue_head.contains(&queue_id)
    }

    pub fn insert(&mut self, queue_id: QueueId) {
        self.queue_head.push(queue_id);
        if self.next_queue.is_none() {
            self.next_queue = Some(queue_id);
        }
    }

    /// Remove `queue_id`, advancing the round-robin cursor first if it
    /// pointed at the removed member (spec.md §4.1 "round-robin cursor
    /// discipline").
    pub fn remove(&mut self, queue_id: QueueId) {
        if self.next_queue == Some(queue_id) {
            self.advance_cursor_past(queue_id);
        }
        self.queue_head.retain(|&q| q != queue_id);
        if self.queue_head.is_empty() {
            self.next_queue = None;
        }
    }

    fn advance_cursor_past(&mut self, queue_id: QueueId) {
        if let Some(pos) = self.queue_head.iter().position(|&q| q == queue_id) {
            let next_pos = (pos + 1) % self.queue_head.len();
            // If the removed member is the only one, there is nothing to
            // advance to; `remove` clears `next_queue` afterward.
            if self.queue_head.len() > 1 {
                self.next_queue = Some(self.queue_head[next_pos]);
            }
        }
    }

    /// Resolve the queue a send targets, then advance the cursor to the
    /// next member (spec.md §4.1 `MessageSend` to a group).
    pub fn resolve_and_advance(&mut self) -> Option<QueueId> {
        let target = self.next_queue?;
        let pos = self.queue_head.iter().position(|&q| q == target)?;
        let next_pos = (pos + 1) % self.queue_head.len();
        self.next_queue = Some(self.queue_head[next_pos]);
        Some(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> Group {
        Group::new("g".into(), GroupId(1), GroupPolicy::RoundRobin)
    }

    #[test]
    fn round_robin_cycles_through_members() {
        let mut g = group();
        g.insert(QueueId(1));
        g.insert(QueueId(2));

        assert_eq!(g.resolve_and_advance(), Some(QueueId(1)));
        assert_eq!(g.resolve_and_advance(), Some(QueueId(2)));
        assert_eq!(g.resolve_and_advance(), Some(QueueId(1)));
    }

    #[test]
    fn insert_then_remove_is_a_no_op_on_member_count() {
        let mut g = group();
        g.insert(QueueId(1));
        g.remove(QueueId(1));
        assert_eq!(g.member_count(), 0);
        assert_eq!(g.next_queue, None);
    }

    #[test]
    fn removing_cursor_target_advances_first() {
        let mut g = group();
        g.insert(QueueId(1));
        g.insert(QueueId(2));
        g.insert(QueueId(3));
        // cursor currently at 1
        g.remove(QueueId(1));
        assert_eq!(g.next_queue, Some(QueueId(2)));
        assert_eq!(g.member_count(), 2);
    }

    #[test]
    fn removing_last_member_clears_cursor() {
        let mut g = group();
        g.insert(QueueId(1));
        g.remove(QueueId(1));
        assert!(g.next_queue.is_none());
    }
}
