//! Client IPC contract (spec.md §6) and an in-process reference channel.
//!
//! The real client IPC transport (a local socket, typically) is an
//! explicit external collaborator (spec.md §1); `local::LocalIpcChannel`
//! is the one concrete instance this crate ships, built on `tokio::sync`
//! channels the same way the teacher's own transports frame request/
//! response traffic.

use crate::error::QueueError;
use crate::model::queue::{CreationAttrs, OpenFlags, Thresholds};
use crate::model::{GroupPolicy, TrackFlags};
use crate::wire::{ConnectionHandle, GroupId, Message, Name, NodeId, QueueId, SenderId};
use serde::{Deserialize, Serialize};

/// One variant per request code of spec.md §6's twenty-five-entry
/// library surface. Field shapes mirror the corresponding wire record in
/// `wire::records`; this is the client-facing (same-host, `bincode`)
/// encoding, not the cross-node one (see SPEC_FULL.md §3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IpcRequest {
    QueueOpen {
        name: Name,
        create_attrs: Option<CreationAttrs>,
        flags: OpenFlags,
        timeout_ms: u64,
    },
    QueueOpenAsync {
        name: Name,
        create_attrs: Option<CreationAttrs>,
        flags: OpenFlags,
        timeout_ms: u64,
        invocation: u64,
    },
    QueueClose {
        name: Name,
        queue_id: QueueId,
    },
    QueueStatusGet {
        name: Name,
    },
    QueueRetentionTimeSet {
        name: Name,
        queue_id: QueueId,
        retention_time_ms: u64,
    },
    QueueUnlink {
        name: Name,
    },
    QueueGroupCreate {
        name: Name,
        policy: GroupPolicy,
    },
    QueueGroupInsert {
        group_name: Name,
        queue_name: Name,
    },
    QueueGroupRemove {
        group_name: Name,
        queue_name: Name,
    },
    QueueGroupDelete {
        group_name: Name,
    },
    QueueGroupTrack {
        group_name: Name,
        track_flags: TrackFlags,
    },
    QueueGroupTrackStop {
        group_name: Name,
    },
    QueueGroupNotificationFree {
        group_name: Name,
    },
    MessageSend {
        dest_is_group: bool,
        dest_name: Name,
        timeout_ms: u64,
        message: Message,
    },
    MessageSendAsync {
        dest_is_group: bool,
        dest_name: Name,
        timeout_ms: u64,
        message: Message,
        invocation: u64,
        ack_on_delivery: bool,
    },
    MessageGet {
        name: Name,
        queue_id: QueueId,
        timeout_ms: u64,
    },
    MessageCancel {
        name: Name,
        queue_id: QueueId,
    },
    MessageSendReceive {
        dest_is_group: bool,
        dest_name: Name,
        timeout_ms: u64,
        reply_size_limit: u64,
        message: Message,
    },
    MessageReply {
        reply_message: Message,
        sender_id: SenderId,
        timeout_ms: u64,
    },
    MessageReplyAsync {
        reply_message: Message,
        sender_id: SenderId,
        timeout_ms: u64,
        invocation: u64,
    },
    QueueCapacityThresholdsSet {
        name: Name,
        queue_id: QueueId,
        thresholds: [Thresholds; 4],
    },
    QueueCapacityThresholdsGet {
        name: Name,
        queue_id: QueueId,
    },
    MetadataSizeGet,
    LimitGet {
        limit_id: u32,
    },
}

/// One variant per response code (spec.md §6). `Error` carries the
/// single closed error kind of §7.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IpcResponse {
    Ok,
    Error(QueueError),
    QueueOpened {
        queue_id: QueueId,
    },
    QueueStatus {
        persistent: bool,
        retention_time_ms: u64,
        close_time: Option<i64>,
        priority_usage: [(u64, u64); 4],
    },
    MessageReceived {
        message: Message,
        sender_id: Option<SenderId>,
    },
    MessageReplyReceived {
        message: Message,
    },
    CapacityThresholds {
        thresholds: [Thresholds; 4],
    },
    MetadataSize {
        size: u64,
    },
    LimitValue {
        value: u64,
    },
}

/// One variant per asynchronous callback kind (spec.md §6: "four
/// generate asynchronous callbacks").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IpcDispatch {
    QueueOpenCallback {
        invocation: u64,
        queue_id: QueueId,
    },
    QueueGroupTrackCallback {
        group_name: Name,
        group_id: GroupId,
        member_count: usize,
    },
    MessageDeliveredCallback {
        invocation: u64,
    },
    MessageReceivedCallback {
        queue_id: QueueId,
    },
}

/// Per-connection private data area plus the originating node (spec.md
/// §6 "per-connection private data area").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub node_id: NodeId,
    pub connection: ConnectionHandle,
}

/// `response_send`/`dispatch_send`/`source_is_local` contract of
/// spec.md §6.
#[async_trait::async_trait]
pub trait IpcChannel: Send + Sync {
    async fn response_send(&self, conn: ConnectionId, response: IpcResponse);
    async fn dispatch_send(&self, conn: ConnectionId, dispatch: IpcDispatch);
    fn source_is_local(&self, conn: ConnectionId) -> bool;
}

pub mod local {
    //! `tokio::sync::mpsc`-backed `IpcChannel`, used by `client::Client`
    //! to talk to a `node::Node` without a real socket.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Debug)]
    pub enum ClientEvent {
        Response(IpcResponse),
        Dispatch(IpcDispatch),
    }

    /// In-process IPC fabric for one node: owns one outbound channel per
    /// live connection.
    pub struct LocalIpcChannel {
        node_id: NodeId,
        senders: Mutex<HashMap<ConnectionHandle, mpsc::Sender<ClientEvent>>>,
    }

    impl LocalIpcChannel {
        pub fn new(node_id: NodeId) -> Self {
            Self {
                node_id,
                senders: Mutex::new(HashMap::new()),
            }
        }

        /// Register a new connection, returning the receiving half the
        /// client keeps.
        pub fn register(&self, connection: ConnectionHandle) -> mpsc::Receiver<ClientEvent> {
            let (tx, rx) = mpsc::channel(64);
            self.senders.lock().unwrap().insert(connection, tx);
            rx
        }

        pub fn unregister(&self, connection: ConnectionHandle) {
            self.senders.lock().unwrap().remove(&connection);
        }
    }

    #[async_trait::async_trait]
    impl IpcChannel for LocalIpcChannel {
        async fn response_send(&self, conn: ConnectionId, response: IpcResponse) {
            let sender = self.senders.lock().unwrap().get(&conn.connection).cloned();
            if let Some(sender) = sender {
                let _ = sender.send(ClientEvent::Response(response)).await;
            }
        }

        async fn dispatch_send(&self, conn: ConnectionId, dispatch: IpcDispatch) {
            let sender = self.senders.lock().unwrap().get(&conn.connection).cloned();
            if let Some(sender) = sender {
                let _ = sender.send(ClientEvent::Dispatch(dispatch)).await;
            }
        }

        fn source_is_local(&self, conn: ConnectionId) -> bool {
            conn.node_id == self.node_id
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn response_is_delivered_to_the_registered_connection() {
            let channel = LocalIpcChannel::new(1);
            let mut rx = channel.register(42);
            let conn = ConnectionId {
                node_id: 1,
                connection: 42,
            };
            channel.response_send(conn, IpcResponse::Ok).await;
            match rx.recv().await {
                Some(ClientEvent::Response(IpcResponse::Ok)) => {}
                other => panic!("expected Ok response, got {other:?}"),
            }
        }

        #[test]
        fn source_is_local_checks_node_id() {
            let channel = LocalIpcChannel::new(1);
            assert!(channel.source_is_local(ConnectionId {
                node_id: 1,
                connection: 0
            }));
            assert!(!channel.source_is_local(ConnectionId {
                node_id: 2,
                connection: 0
            }));
        }
    }
}
