//! In-process client handle for a `node::Node` (spec.md §6).
//!
//! A real deployment's client talks to `node::Node` over a socket; this
//! crate's reference client instead holds the `mpsc::Sender<InboundEvent>`
//! `Node::new` hands back and a registered `ipc::local::LocalIpcChannel`
//! connection, so the whole stack is exercisable in one process (see the
//! integration tests under `tests/`). Dropping a `Client` sends a
//! `Disconnect` on that same channel so the node can emit the implicit
//! `QueueClose`s spec.md §3/§5 require.

use crate::error::{QueueError, QueueResult};
use crate::ipc::local::{ClientEvent, LocalIpcChannel};
use crate::ipc::{ConnectionId, IpcDispatch, IpcRequest, IpcResponse};
use crate::model::queue::{CreationAttrs, OpenFlags, Thresholds};
use crate::model::{GroupPolicy, TrackFlags};
use crate::node::{InboundEvent, InboundRequest};
use crate::wire::{GroupId, Message, Name, QueueId, SenderId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// One connected client of a single node.
///
/// Responses and dispatches share one wire in the real protocol and one
/// channel here (`ClientEvent`); a background pump task immediately
/// splits them onto their own channels so `call` (awaiting a response)
/// never races `next_dispatch` (awaiting a callback) for the same event.
pub struct Client {
    conn: ConnectionId,
    inbound: mpsc::Sender<InboundEvent>,
    responses: Mutex<mpsc::Receiver<IpcResponse>>,
    dispatches: Mutex<mpsc::Receiver<IpcDispatch>>,
    invocations: AtomicU64,
    channel: Arc<LocalIpcChannel>,
}

impl Client {
    /// Register a new connection on `channel` and wire it to `inbound`.
    pub fn connect(
        channel: Arc<LocalIpcChannel>,
        inbound: mpsc::Sender<InboundEvent>,
        node_id: crate::wire::NodeId,
        connection: crate::wire::ConnectionHandle,
    ) -> Self {
        let events = channel.register(connection);
        let (response_tx, response_rx) = mpsc::channel(64);
        let (dispatch_tx, dispatch_rx) = mpsc::channel(64);
        tokio::spawn(pump(events, response_tx, dispatch_tx));
        Self {
            conn: ConnectionId { node_id, connection },
            inbound,
            responses: Mutex::new(response_rx),
            dispatches: Mutex::new(dispatch_rx),
            invocations: AtomicU64::new(0),
            channel,
        }
    }

    /// Await the next asynchronous callback for this connection
    /// (`QueueOpenCallback`, `QueueGroupTrackCallback`,
    /// `MessageDeliveredCallback`, `MessageReceivedCallback` — spec.md §6).
    pub async fn next_dispatch(&self) -> Option<IpcDispatch> {
        let mut rx = self.dispatches.lock().await;
        rx.recv().await
    }

    fn next_invocation(&self) -> u64 {
        self.invocations.fetch_add(1, Ordering::Relaxed)
    }

    async fn call(&self, request: IpcRequest) -> QueueResult<IpcResponse> {
        self.inbound
            .send(InboundEvent::Request(InboundRequest { conn: self.conn, request }))
            .await
            .map_err(|_| QueueError::TryAgain)?;
        let mut rx = self.responses.lock().await;
        match rx.recv().await {
            Some(response) => Ok(response),
            None => Err(QueueError::TryAgain),
        }
    }

    pub async fn queue_open(
        &self,
        name: Name,
        create_attrs: Option<CreationAttrs>,
        flags: OpenFlags,
        timeout_ms: u64,
    ) -> QueueResult<QueueId> {
        match self
            .call(IpcRequest::QueueOpen { name, create_attrs, flags, timeout_ms })
            .await?
        {
            IpcResponse::QueueOpened { queue_id } => Ok(queue_id),
            IpcResponse::Error(err) => Err(err),
            _ => Err(QueueError::BadOperation),
        }
    }

    /// Fire-and-forget open: the `QueueOpenCallback` dispatch carries the
    /// resulting id, delivered through `next_dispatch`.
    pub async fn queue_open_async(
        &self,
        name: Name,
        create_attrs: Option<CreationAttrs>,
        flags: OpenFlags,
        timeout_ms: u64,
    ) -> QueueResult<u64> {
        let invocation = self.next_invocation();
        match self
            .call(IpcRequest::QueueOpenAsync {
                name,
                create_attrs,
                flags,
                timeout_ms,
                invocation,
            })
            .await?
        {
            IpcResponse::Ok => Ok(invocation),
            IpcResponse::Error(err) => Err(err),
            _ => Err(QueueError::BadOperation),
        }
    }

    pub async fn queue_close(&self, name: Name, queue_id: QueueId) -> QueueResult<()> {
        self.expect_ok(IpcRequest::QueueClose { name, queue_id }).await
    }

    pub async fn queue_status_get(&self, name: Name) -> QueueResult<IpcResponse> {
        match self.call(IpcRequest::QueueStatusGet { name }).await? {
            response @ IpcResponse::QueueStatus { .. } => Ok(response),
            IpcResponse::Error(err) => Err(err),
            _ => Err(QueueError::BadOperation),
        }
    }

    pub async fn queue_retention_time_set(
        &self,
        name: Name,
        queue_id: QueueId,
        retention_time_ms: u64,
    ) -> QueueResult<()> {
        self.expect_ok(IpcRequest::QueueRetentionTimeSet {
            name,
            queue_id,
            retention_time_ms,
        })
        .await
    }

    pub async fn queue_unlink(&self, name: Name) -> QueueResult<()> {
        self.expect_ok(IpcRequest::QueueUnlink { name }).await
    }

    pub async fn queue_group_create(&self, name: Name, policy: GroupPolicy) -> QueueResult<()> {
        self.expect_ok(IpcRequest::QueueGroupCreate { name, policy }).await
    }

    pub async fn queue_group_insert(&self, group_name: Name, queue_name: Name) -> QueueResult<()> {
        self.expect_ok(IpcRequest::QueueGroupInsert { group_name, queue_name }).await
    }

    pub async fn queue_group_remove(&self, group_name: Name, queue_name: Name) -> QueueResult<()> {
        self.expect_ok(IpcRequest::QueueGroupRemove { group_name, queue_name }).await
    }

    pub async fn queue_group_delete(&self, group_name: Name) -> QueueResult<()> {
        self.expect_ok(IpcRequest::QueueGroupDelete { group_name }).await
    }

    pub async fn queue_group_track(&self, group_name: Name, track_flags: TrackFlags) -> QueueResult<()> {
        self.expect_ok(IpcRequest::QueueGroupTrack { group_name, track_flags }).await
    }

    pub async fn queue_group_track_stop(&self, group_name: Name) -> QueueResult<()> {
        self.expect_ok(IpcRequest::QueueGroupTrackStop { group_name }).await
    }

    /// No-op on the wire (see DESIGN.md); kept so callers written against
    /// the full twenty-five-entry surface compile unchanged.
    pub async fn queue_group_notification_free(&self, group_name: Name) -> QueueResult<()> {
        self.expect_ok(IpcRequest::QueueGroupNotificationFree { group_name }).await
    }

    pub async fn message_send(
        &self,
        dest_is_group: bool,
        dest_name: Name,
        timeout_ms: u64,
        message: Message,
    ) -> QueueResult<()> {
        self.expect_ok(IpcRequest::MessageSend {
            dest_is_group,
            dest_name,
            timeout_ms,
            message,
        })
        .await
    }

    pub async fn message_send_async(
        &self,
        dest_is_group: bool,
        dest_name: Name,
        timeout_ms: u64,
        message: Message,
        ack_on_delivery: bool,
    ) -> QueueResult<u64> {
        let invocation = self.next_invocation();
        match self
            .call(IpcRequest::MessageSendAsync {
                dest_is_group,
                dest_name,
                timeout_ms,
                message,
                invocation,
                ack_on_delivery,
            })
            .await?
        {
            IpcResponse::Ok => Ok(invocation),
            IpcResponse::Error(err) => Err(err),
            _ => Err(QueueError::BadOperation),
        }
    }

    pub async fn message_get(
        &self,
        name: Name,
        queue_id: QueueId,
        timeout_ms: u64,
    ) -> QueueResult<(Message, Option<SenderId>)> {
        match self.call(IpcRequest::MessageGet { name, queue_id, timeout_ms }).await? {
            IpcResponse::MessageReceived { message, sender_id } => Ok((message, sender_id)),
            IpcResponse::Error(err) => Err(err),
            _ => Err(QueueError::BadOperation),
        }
    }

    pub async fn message_cancel(&self, name: Name, queue_id: QueueId) -> QueueResult<()> {
        self.expect_ok(IpcRequest::MessageCancel { name, queue_id }).await
    }

    pub async fn message_send_receive(
        &self,
        dest_is_group: bool,
        dest_name: Name,
        timeout_ms: u64,
        reply_size_limit: u64,
        message: Message,
    ) -> QueueResult<Message> {
        match self
            .call(IpcRequest::MessageSendReceive {
                dest_is_group,
                dest_name,
                timeout_ms,
                reply_size_limit,
                message,
            })
            .await?
        {
            IpcResponse::MessageReplyReceived { message } => Ok(message),
            IpcResponse::Error(err) => Err(err),
            _ => Err(QueueError::BadOperation),
        }
    }

    pub async fn message_reply(
        &self,
        reply_message: Message,
        sender_id: SenderId,
        timeout_ms: u64,
    ) -> QueueResult<()> {
        self.expect_ok(IpcRequest::MessageReply {
            reply_message,
            sender_id,
            timeout_ms,
        })
        .await
    }

    pub async fn message_reply_async(
        &self,
        reply_message: Message,
        sender_id: SenderId,
        timeout_ms: u64,
    ) -> QueueResult<u64> {
        let invocation = self.next_invocation();
        match self
            .call(IpcRequest::MessageReplyAsync {
                reply_message,
                sender_id,
                timeout_ms,
                invocation,
            })
            .await?
        {
            IpcResponse::Ok => Ok(invocation),
            IpcResponse::Error(err) => Err(err),
            _ => Err(QueueError::BadOperation),
        }
    }

    pub async fn queue_capacity_thresholds_set(
        &self,
        name: Name,
        queue_id: QueueId,
        thresholds: [Thresholds; 4],
    ) -> QueueResult<()> {
        self.expect_ok(IpcRequest::QueueCapacityThresholdsSet {
            name,
            queue_id,
            thresholds,
        })
        .await
    }

    pub async fn queue_capacity_thresholds_get(
        &self,
        name: Name,
        queue_id: QueueId,
    ) -> QueueResult<[Thresholds; 4]> {
        match self
            .call(IpcRequest::QueueCapacityThresholdsGet { name, queue_id })
            .await?
        {
            IpcResponse::CapacityThresholds { thresholds } => Ok(thresholds),
            IpcResponse::Error(err) => Err(err),
            _ => Err(QueueError::BadOperation),
        }
    }

    pub async fn metadata_size_get(&self) -> QueueResult<u64> {
        match self.call(IpcRequest::MetadataSizeGet).await? {
            IpcResponse::MetadataSize { size } => Ok(size),
            IpcResponse::Error(err) => Err(err),
            _ => Err(QueueError::BadOperation),
        }
    }

    pub async fn limit_get(&self, limit_id: u32) -> QueueResult<u64> {
        match self.call(IpcRequest::LimitGet { limit_id }).await? {
            IpcResponse::LimitValue { value } => Ok(value),
            IpcResponse::Error(err) => Err(err),
            _ => Err(QueueError::BadOperation),
        }
    }

    pub fn group_id_of(&self, response: &IpcDispatch) -> Option<GroupId> {
        match response {
            IpcDispatch::QueueGroupTrackCallback { group_id, .. } => Some(*group_id),
            _ => None,
        }
    }

    async fn expect_ok(&self, request: IpcRequest) -> QueueResult<()> {
        match self.call(request).await? {
            IpcResponse::Ok => Ok(()),
            IpcResponse::Error(err) => Err(err),
            _ => Err(QueueError::BadOperation),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.channel.unregister(self.conn.connection);
        // drop() is sync, so this can only try_send, not await; a full
        // channel means the node is already backed up and drops it, same
        // as a failed mcast elsewhere in this crate.
        let _ = self.inbound.try_send(InboundEvent::Disconnect(self.conn));
    }
}

async fn pump(
    mut events: mpsc::Receiver<ClientEvent>,
    responses: mpsc::Sender<IpcResponse>,
    dispatches: mpsc::Sender<IpcDispatch>,
) {
    while let Some(event) = events.recv().await {
        let delivered = match event {
            ClientEvent::Response(response) => responses.send(response).await.is_ok(),
            ClientEvent::Dispatch(dispatch) => dispatches.send(dispatch).await.is_ok(),
        };
        if !delivered {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::queue::OpenFlags;
    use crate::node::Node;
    use crate::transport::loopback::{LoopbackCluster, LoopbackTransport};
    use std::time::Duration;

    #[tokio::test]
    async fn queue_open_and_status_round_trip_through_a_loopback_node() {
        let cluster = LoopbackCluster::new();
        let transport = LoopbackTransport::join(cluster, 1);
        let channel = Arc::new(LocalIpcChannel::new(1));
        let (node, inbound, _timers) = Node::new(Box::new(transport), channel.clone());
        tokio::spawn(node.run());

        let client = Client::connect(channel, inbound, 1, 1);
        let queue_id = client
            .queue_open(
                "orders".into(),
                Some(CreationAttrs {
                    persistent: false,
                    retention_time: Duration::from_secs(30),
                    sizes: [1024; 4],
                }),
                OpenFlags::default(),
                1000,
            )
            .await
            .expect("queue_open should succeed");

        let status = client
            .queue_status_get("orders".into())
            .await
            .expect("queue_status_get should succeed");
        match status {
            IpcResponse::QueueStatus { persistent, .. } => assert!(!persistent),
            other => panic!("unexpected response: {other:?}"),
        }

        client
            .queue_close("orders".into(), queue_id)
            .await
            .expect("queue_close should succeed");
    }
}
