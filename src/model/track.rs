//! `TrackEntry` (per-client group membership subscription) and
//! `CleanupEntry` (per-IPC-connection open-queue bookkeeping), spec.md §3.

use crate::wire::{Name, QueueId, Source};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackFlags {
    Current,
    Changes,
    ChangesOnly,
}

#[derive(Debug, Clone)]
pub struct TrackEntry {
    pub group_name: Name,
    pub source: Source,
    pub track_flags: TrackFlags,
}

/// Per-IPC-connection record of every queue it has opened, used to emit
/// implicit `QueueClose` on disconnect (spec.md §3, §5 "An IPC disconnect
/// triggers...").
#[derive(Debug, Clone, Default)]
pub struct CleanupEntry {
    pub opened_queues: Vec<(QueueId, Name)>,
}

impl CleanupEntry {
    pub fn record_open(&mut self, queue_id: QueueId, name: Name) {
        self.opened_queues.push((queue_id, name));
    }

    pub fn record_close(&mut self, queue_id: QueueId) {
        self.opened_queues.retain(|(id, _)| *id != queue_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_entry_tracks_opens_and_closes() {
        let mut entry = CleanupEntry::default();
        entry.record_open(QueueId(1), "q1".into());
        entry.record_open(QueueId(2), "q2".into());
        assert_eq!(entry.opened_queues.len(), 2);
        entry.record_close(QueueId(1));
        assert_eq!(entry.opened_queues.len(), 1);
        assert_eq!(entry.opened_queues[0].0, QueueId(2));
    }
}
