//! `ReplyEntry`: an open send-receive correlation (spec.md §3).

use crate::timer::TimerHandle;
use crate::wire::{SenderId, Source};

#[derive(Debug, Clone)]
pub struct ReplyEntry {
    pub sender_id: SenderId,
    pub source: Source,
    /// 0 means "no limit" (spec.md §4.1 `MessageReply` precondition).
    pub reply_size_limit: u64,
    pub timer_handle: Option<TimerHandle>,
}

impl ReplyEntry {
    pub fn new(sender_id: SenderId, source: Source, reply_size_limit: u64) -> Self {
        Self {
            sender_id,
            source,
            reply_size_limit,
            timer_handle: None,
        }
    }

    pub fn accepts(&self, reply_size: u64) -> bool {
        self.reply_size_limit == 0 || self.reply_size_limit >= reply_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limit_accepts_any_size() {
        let entry = ReplyEntry::new(SenderId::new(1, 1), Source::new(1, 1), 0);
        assert!(entry.accepts(1_000_000));
    }

    #[test]
    fn oversized_reply_is_rejected() {
        let entry = ReplyEntry::new(SenderId::new(1, 1), Source::new(1, 1), 10);
        assert!(entry.accepts(10));
        assert!(!entry.accepts(11));
    }
}
