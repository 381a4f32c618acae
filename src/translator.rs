//! Client request translator (spec.md §4.2): the only code that turns an
//! `ipc::IpcRequest` into the `wire::records::ExecutiveRecord` bytes
//! `node::Node` hands to `GroupTransport::mcast`. No validation here
//! needs cluster-wide agreement (that happens in `executive::Executive`
//! after delivery); this only rejects what a single node can judge on
//! its own and stamps the two fields that must be decided once, locally,
//! before broadcast: the `sender_id` for a send-receive and the
//! `close_time_ns` for a queue close (spec.md §9).
//!
//! Four requests never reach here at all — `QueueGroupTrack`,
//! `QueueGroupTrackStop`, `MetadataSizeGet`, `LimitGet` — because they
//! have no broadcast counterpart; `node::Node` answers them directly
//! from local state (see DESIGN.md).

use crate::error::QueueError;
use crate::ipc::{ConnectionId, IpcRequest};
use crate::limits::MAX_REPLY_SIZE;
use crate::timer::TimerFacility;
use crate::wire::cursor::WireRecord;
use crate::wire::records::*;
use crate::wire::{Name, NodeId, SenderId, Source};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

fn destination(dest_is_group: bool, name: Name) -> Destination {
    if dest_is_group {
        Destination::Group(name)
    } else {
        Destination::Queue(name)
    }
}

pub struct Translator {
    my_node_id: NodeId,
    timers: Arc<dyn TimerFacility>,
    /// Low 32 bits of every `SenderId` this node allocates (spec.md §3,
    /// §8 invariant 6). Wraps rather than panics on overflow: a node that
    /// lives long enough to exhaust 2^32 send-receives reuses ids, which
    /// is no worse than the cluster-unique high bits colliding with a
    /// restarted peer sharing the same node id (documented Open Question
    /// decision).
    next_sender_counter: AtomicU32,
}

impl Translator {
    pub fn new(my_node_id: NodeId, timers: Arc<dyn TimerFacility>) -> Self {
        Self {
            my_node_id,
            timers,
            next_sender_counter: AtomicU32::new(0),
        }
    }

    fn allocate_sender_id(&self) -> SenderId {
        let counter = self.next_sender_counter.fetch_add(1, Ordering::Relaxed);
        SenderId::new(self.my_node_id, counter)
    }

    /// Pack `request` into its wire record and return the bytes to
    /// broadcast. `conn` supplies the `Source` stamped onto the record so
    /// only the originating node ever emits the matching IPC response.
    ///
    /// # Panics
    /// Panics if called with one of the four local-only request kinds;
    /// `node::Node` is responsible for intercepting those first.
    pub fn encode(&self, conn: ConnectionId, request: IpcRequest) -> Result<Vec<u8>, QueueError> {
        let source = Source::new(conn.node_id, conn.connection);
        let bytes = match request {
            IpcRequest::QueueOpen { name, create_attrs, flags, timeout_ms } => QueueOpenRecord {
                source,
                name,
                create_attrs,
                flags,
                timeout_ms,
            }
            .to_wire(),
            IpcRequest::QueueOpenAsync { name, create_attrs, flags, timeout_ms, invocation } => {
                QueueOpenAsyncRecord {
                    source,
                    name,
                    create_attrs,
                    flags,
                    timeout_ms,
                    invocation,
                }
                .to_wire()
            }
            IpcRequest::QueueClose { name, queue_id } => QueueCloseRecord {
                source,
                name,
                queue_id,
                close_time_ns: self.timers.time_now_ns(),
            }
            .to_wire(),
            IpcRequest::QueueStatusGet { name } => QueueStatusGetRecord { source, name }.to_wire(),
            IpcRequest::QueueRetentionTimeSet { name, queue_id, retention_time_ms } => {
                QueueRetentionTimeSetRecord {
                    source,
                    name,
                    queue_id,
                    retention_time_ms,
                }
                .to_wire()
            }
            IpcRequest::QueueUnlink { name } => QueueUnlinkRecord { source, name }.to_wire(),
            IpcRequest::QueueGroupCreate { name, policy } => {
                QueueGroupCreateRecord { source, name, policy }.to_wire()
            }
            IpcRequest::QueueGroupInsert { group_name, queue_name } => {
                QueueGroupInsertRecord { source, group_name, queue_name }.to_wire()
            }
            IpcRequest::QueueGroupRemove { group_name, queue_name } => {
                QueueGroupRemoveRecord { source, group_name, queue_name }.to_wire()
            }
            IpcRequest::QueueGroupDelete { group_name } => {
                QueueGroupDeleteRecord { source, group_name }.to_wire()
            }
            IpcRequest::QueueGroupNotificationFree { group_name } => {
                QueueGroupNotificationFreeRecord { source, group_name }.to_wire()
            }
            IpcRequest::MessageSend { dest_is_group, dest_name, timeout_ms, message } => {
                MessageSendRecord {
                    source,
                    dest: destination(dest_is_group, dest_name),
                    timeout_ms,
                    message,
                }
                .to_wire()
            }
            IpcRequest::MessageSendAsync {
                dest_is_group,
                dest_name,
                timeout_ms,
                message,
                invocation,
                ack_on_delivery,
            } => MessageSendAsyncRecord {
                source,
                dest: destination(dest_is_group, dest_name),
                timeout_ms,
                message,
                invocation,
                ack_on_delivery,
            }
            .to_wire(),
            IpcRequest::MessageGet { name, queue_id, timeout_ms } => {
                MessageGetRecord { source, name, queue_id, timeout_ms }.to_wire()
            }
            IpcRequest::MessageCancel { name, queue_id } => {
                MessageCancelRecord { source, name, queue_id }.to_wire()
            }
            IpcRequest::MessageSendReceive {
                dest_is_group,
                dest_name,
                timeout_ms,
                reply_size_limit,
                message,
            } => {
                if reply_size_limit != 0 && reply_size_limit > MAX_REPLY_SIZE {
                    return Err(QueueError::TooBig);
                }
                MessageSendReceiveRecord {
                    source,
                    dest: destination(dest_is_group, dest_name),
                    timeout_ms,
                    reply_size_limit,
                    message,
                    sender_id: self.allocate_sender_id(),
                }
                .to_wire()
            }
            IpcRequest::MessageReply { reply_message, sender_id, timeout_ms } => MessageReplyRecord {
                source,
                reply_message,
                sender_id,
                timeout_ms,
            }
            .to_wire(),
            IpcRequest::MessageReplyAsync { reply_message, sender_id, timeout_ms, invocation } => {
                MessageReplyAsyncRecord {
                    source,
                    reply_message,
                    sender_id,
                    timeout_ms,
                    invocation,
                }
                .to_wire()
            }
            IpcRequest::QueueCapacityThresholdsSet { name, queue_id, thresholds } => {
                QueueCapacityThresholdsSetRecord { source, name, queue_id, thresholds }.to_wire()
            }
            IpcRequest::QueueCapacityThresholdsGet { name, queue_id } => {
                QueueCapacityThresholdsGetRecord { source, name, queue_id }.to_wire()
            }
            IpcRequest::QueueGroupTrack { .. }
            | IpcRequest::QueueGroupTrackStop { .. }
            | IpcRequest::MetadataSizeGet
            | IpcRequest::LimitGet { .. } => {
                unreachable!("local-only request reached the translator; node::Node must intercept it first")
            }
        };
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::queue::OpenFlags;
    use crate::timer::TokioTimerFacility;
    use crate::wire::{Message, Priority};
    use tokio::sync::mpsc;

    fn conn() -> ConnectionId {
        ConnectionId { node_id: 1, connection: 9 }
    }

    fn translator() -> Translator {
        let (tx, _rx) = mpsc::channel(8);
        Translator::new(1, Arc::new(TokioTimerFacility::new(tx)))
    }

    #[test]
    fn oversized_reply_limit_is_rejected_before_broadcast() {
        let t = translator();
        let msg = Message::new(1, 1, Priority::new(0).unwrap(), b"hi".to_vec()).unwrap();
        let err = t
            .encode(
                conn(),
                IpcRequest::MessageSendReceive {
                    dest_is_group: false,
                    dest_name: "q".into(),
                    timeout_ms: 0,
                    reply_size_limit: MAX_REPLY_SIZE + 1,
                    message: msg,
                },
            )
            .unwrap_err();
        assert_eq!(err, QueueError::TooBig);
    }

    #[test]
    fn send_receive_allocates_distinct_sender_ids() {
        let t = translator();
        let msg = Message::new(1, 1, Priority::new(0).unwrap(), b"hi".to_vec()).unwrap();
        let request = |m: crate::wire::Message| IpcRequest::MessageSendReceive {
            dest_is_group: false,
            dest_name: "q".into(),
            timeout_ms: 0,
            reply_size_limit: 0,
            message: m,
        };
        let first = t.encode(conn(), request(msg.clone())).unwrap();
        let second = t.encode(conn(), request(msg)).unwrap();
        let first = MessageSendReceiveRecord::from_wire(&first).unwrap();
        let second = MessageSendReceiveRecord::from_wire(&second).unwrap();
        assert_ne!(first.sender_id, second.sender_id);
        assert_eq!(first.sender_id.origin_node(), 1);
    }

    #[test]
    fn queue_close_stamps_a_close_time() {
        let t = translator();
        let bytes = t
            .encode(conn(), IpcRequest::QueueClose { name: "q".into(), queue_id: crate::wire::QueueId(1) })
            .unwrap();
        let record = QueueCloseRecord::from_wire(&bytes).unwrap();
        assert!(record.close_time_ns > 0);
    }

    #[test]
    fn queue_open_round_trips_through_encode() {
        let t = translator();
        let bytes = t
            .encode(
                conn(),
                IpcRequest::QueueOpen {
                    name: "q".into(),
                    create_attrs: None,
                    flags: OpenFlags::default(),
                    timeout_ms: 0,
                },
            )
            .unwrap();
        assert!(QueueOpenRecord::from_wire(&bytes).is_ok());
    }
}
