//! The node event loop (spec.md §5): a single-threaded `tokio::select!`
//! over transport delivery/membership, inbound client requests, and
//! timer expiry. Nothing here needs a lock — the executive, the sync
//! engine, and `ServiceState` are all owned exclusively by the one task
//! running `Node::run`.

use crate::error::QueueError;
use crate::executive::{Effect, Executive};
use crate::ipc::{ConnectionId, IpcChannel, IpcDispatch, IpcRequest, IpcResponse};
use crate::limits::{LimitId, METADATA_SIZE};
use crate::model::track::{TrackEntry, TrackFlags};
use crate::state::ServiceState;
use crate::sync_engine::SyncEngine;
use crate::timer::{TimerContext, TimerEvent, TimerFacility, TokioTimerFacility};
use crate::transport::{GroupTransport, MembershipChange, TransportEvent};
use crate::translator::Translator;
use crate::wire::cursor::{WireReader, WireRecord};
use crate::wire::records::{
    decode_executive_record, decode_sync_record, ExecutiveRecord, MessageGetTimeoutRecord,
    QueueTimeoutRecord, SendReceiveTimeoutRecord, SyncRecord,
};
use crate::wire::{Name, NodeId, Source};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One request handed to a `Node` by a local `client::Client`, already
/// stamped with the connection it arrived on.
#[derive(Debug)]
pub struct InboundRequest {
    pub conn: ConnectionId,
    pub request: IpcRequest,
}

/// Everything a `client::Client` can post to its `Node` over the inbound
/// channel: a request to dispatch, or notice that the connection is gone.
/// `Disconnect` exists because `Client::drop` is synchronous and cannot
/// call `queue_close` itself — it instead hands the node enough to emit
/// the implicit `QueueClose`s spec.md §3/§5 require for every queue the
/// connection still had open.
#[derive(Debug)]
pub enum InboundEvent {
    Request(InboundRequest),
    Disconnect(ConnectionId),
}

fn encode_sync_record(record: SyncRecord) -> Vec<u8> {
    match record {
        SyncRecord::Queue(r) => r.to_wire(),
        SyncRecord::QueueRefcount(r) => r.to_wire(),
        SyncRecord::QueueMessage(r) => r.to_wire(),
        SyncRecord::Group(r) => r.to_wire(),
        SyncRecord::GroupMember(r) => r.to_wire(),
        SyncRecord::Reply(r) => r.to_wire(),
        SyncRecord::PendingReceive(r) => r.to_wire(),
        SyncRecord::Complete(r) => r.to_wire(),
    }
}

pub struct Node {
    my_node_id: NodeId,
    executive: Executive,
    state: ServiceState,
    sync: SyncEngine,
    /// Membership captured by the most recent `handle_membership` call;
    /// `activate` needs this rather than the incoming `TransportEvent`
    /// since it only learns a round is complete later, from a
    /// `SyncCompleteRecord`.
    pending_members: Vec<NodeId>,
    translator: Translator,
    transport: Box<dyn GroupTransport>,
    timers: Arc<dyn TimerFacility>,
    timer_events: mpsc::Receiver<TimerEvent>,
    ipc: Arc<dyn IpcChannel>,
    inbound: mpsc::Receiver<InboundEvent>,
}

impl Node {
    /// Build a node around `transport` and `ipc`. Returns the sender a
    /// `client::Client` posts requests through and the shared timer
    /// facility, so a client constructed against the same process can
    /// report accurate `time_now_ns` reads without owning its own clock.
    pub fn new(
        transport: Box<dyn GroupTransport>,
        ipc: Arc<dyn IpcChannel>,
    ) -> (Self, mpsc::Sender<InboundEvent>, Arc<dyn TimerFacility>) {
        let my_node_id = transport.my_node_id();
        let (timer_tx, timer_events) = mpsc::channel(256);
        let timers: Arc<dyn TimerFacility> = Arc::new(TokioTimerFacility::new(timer_tx));
        let (inbound_tx, inbound) = mpsc::channel(256);
        let node = Self {
            my_node_id,
            executive: Executive::new(my_node_id),
            state: ServiceState::new(),
            sync: SyncEngine::new(my_node_id),
            pending_members: Vec::new(),
            translator: Translator::new(my_node_id, timers.clone()),
            transport,
            timers: timers.clone(),
            timer_events,
            ipc,
            inbound,
        };
        (node, inbound_tx, timers)
    }

    pub fn my_node_id(&self) -> NodeId {
        self.my_node_id
    }

    /// Drive the node until the transport closes.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.transport.next_event() => {
                    match event {
                        Some(event) => self.handle_transport_event(event).await,
                        None => {
                            tracing::info!(node_id = self.my_node_id, "transport closed, stopping node");
                            break;
                        }
                    }
                }
                timer_event = self.timer_events.recv() => {
                    match timer_event {
                        Some(event) => self.handle_timer_event(event).await,
                        None => break,
                    }
                }
                inbound = self.inbound.recv() => {
                    match inbound {
                        Some(InboundEvent::Request(inbound)) => self.handle_inbound(inbound).await,
                        Some(InboundEvent::Disconnect(conn)) => self.handle_disconnect(conn).await,
                        None => break,
                    }
                }
            }
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Delivery { payload, .. } => self.handle_delivery(payload).await,
            TransportEvent::Membership(change) => self.handle_membership(change).await,
        }
    }

    async fn handle_delivery(&mut self, payload: Vec<u8>) {
        let id = match WireReader::new(&payload).get_u32() {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(%err, "dropped delivery with no readable record id");
                return;
            }
        };
        if id < 100 {
            match decode_executive_record(&payload) {
                Ok(record) => {
                    let effects = self.executive.apply(&mut self.state, record);
                    self.carry_out(effects).await;
                }
                Err(err) => tracing::warn!(%err, "dropped undecodable executive record"),
            }
        } else {
            match decode_sync_record(&payload) {
                Ok(record) => self.handle_sync_record(record).await,
                Err(err) => tracing::warn!(%err, "dropped undecodable sync record"),
            }
        }
    }

    async fn handle_sync_record(&mut self, record: SyncRecord) {
        if self.sync.on_record(record) {
            let members = self.pending_members.clone();
            self.sync.activate(&mut self.state, &members);
            tracing::info!(node_id = self.my_node_id, members = ?members, "sync round activated");
            self.arm_retention_timers_for_non_persistent_closed_queues().await;
        }
    }

    /// Re-arm retention timers lost by the resync: `sync_engine::SyncEngine`
    /// does not replicate `Queue::retention_timer` (a local `TimerHandle`
    /// has no meaning on another node), so whichever node is now lowest-id
    /// must re-arm one for every non-persistent queue already sitting at
    /// refcount zero (spec.md §4.4).
    async fn arm_retention_timers_for_non_persistent_closed_queues(&mut self) {
        if !self.state.is_lowest_id(self.my_node_id) {
            return;
        }
        let mut to_arm = Vec::new();
        for (queue_id, queue) in &self.state.queues {
            if queue.refcount() == 0
                && !queue.creation_attrs.persistent
                && queue.retention_timer.is_none()
            {
                to_arm.push((*queue_id, queue.creation_attrs.retention_time));
            }
        }
        for (queue_id, retention) in to_arm {
            let handle = self
                .timers
                .add_duration(retention, TimerContext::QueueRetention { queue_id })
                .await;
            if let Some(queue) = self.state.queues.get_mut(&queue_id) {
                queue.retention_timer = Some(handle);
            }
        }
    }

    async fn handle_membership(&mut self, change: MembershipChange) {
        tracing::info!(node_id = self.my_node_id, ring_id = change.ring_id.0, members = ?change.members, "membership changed");
        self.pending_members = change.members.clone();
        let should_stream = self.sync.begin(&change);
        if !should_stream {
            return;
        }
        let records = SyncEngine::build_stream(&self.state, change.ring_id);
        for record in records {
            let bytes = encode_sync_record(record);
            if !self.transport.mcast(bytes).await {
                tracing::warn!(
                    node_id = self.my_node_id,
                    "sync stream back-pressured mid-round; followers will stall until the next membership change"
                );
                break;
            }
        }
    }

    async fn handle_inbound(&mut self, inbound: InboundRequest) {
        let InboundRequest { conn, request } = inbound;
        match request {
            IpcRequest::QueueGroupTrack { group_name, track_flags } => {
                self.handle_track(conn, group_name, track_flags).await
            }
            IpcRequest::QueueGroupTrackStop { group_name } => {
                self.handle_track_stop(conn, group_name).await
            }
            IpcRequest::MetadataSizeGet => {
                self.ipc
                    .response_send(conn, IpcResponse::MetadataSize { size: METADATA_SIZE })
                    .await;
            }
            IpcRequest::LimitGet { limit_id } => {
                let response = match LimitId::from_wire_id(limit_id) {
                    Some(id) => IpcResponse::LimitValue { value: id.value() },
                    None => IpcResponse::Error(QueueError::TryAgain),
                };
                self.ipc.response_send(conn, response).await;
            }
            other => self.broadcast_request(conn, other).await,
        }
    }

    async fn broadcast_request(&mut self, conn: ConnectionId, request: IpcRequest) {
        match self.translator.encode(conn, request) {
            Ok(bytes) => {
                if !self.transport.mcast(bytes).await {
                    self.ipc
                        .response_send(conn, IpcResponse::Error(QueueError::TryAgain))
                        .await;
                }
            }
            Err(err) => {
                self.ipc.response_send(conn, IpcResponse::Error(err)).await;
            }
        }
    }

    /// An IPC connection went away without an explicit `QueueClose`
    /// (spec.md §3/§5): close every queue it still had open, same as if
    /// the client had called `queue_close` on each in turn. No response
    /// is expected back, so this reuses `broadcast_request` purely for
    /// its encode-and-multicast behavior.
    async fn handle_disconnect(&mut self, conn: ConnectionId) {
        let Some(entry) = self.state.cleanup.remove(&conn) else {
            return;
        };
        for (queue_id, name) in entry.opened_queues {
            self.broadcast_request(conn, IpcRequest::QueueClose { name, queue_id }).await;
        }
    }

    /// `QueueGroupTrack`/`QueueGroupTrackStop` never leave this node:
    /// `executive::notify_trackers` only ever dispatches to trackers whose
    /// `source` is local, so replicating the subscription itself would be
    /// pure overhead (see DESIGN.md).
    async fn handle_track(&mut self, conn: ConnectionId, group_name: Name, track_flags: TrackFlags) {
        let source = Source::new(conn.node_id, conn.connection);
        let Some(group_id) = self.state.find_group_id(&group_name) else {
            self.ipc
                .response_send(conn, IpcResponse::Error(QueueError::NotExist))
                .await;
            return;
        };
        self.state.tracks.push(TrackEntry {
            group_name: group_name.clone(),
            source,
            track_flags,
        });
        self.ipc.response_send(conn, IpcResponse::Ok).await;
        // `ChangesOnly` subscribers want no initial snapshot, only future
        // changes (spec.md §4.1 `QueueGroupTrack`).
        if track_flags != TrackFlags::ChangesOnly {
            let member_count = self.state.groups.get(&group_id).map(|g| g.member_count()).unwrap_or(0);
            self.ipc
                .dispatch_send(
                    conn,
                    IpcDispatch::QueueGroupTrackCallback {
                        group_name,
                        group_id,
                        member_count,
                    },
                )
                .await;
        }
    }

    async fn handle_track_stop(&mut self, conn: ConnectionId, group_name: Name) {
        let source = Source::new(conn.node_id, conn.connection);
        self.state
            .tracks
            .retain(|t| !(t.source == source && t.group_name == group_name));
        self.ipc.response_send(conn, IpcResponse::Ok).await;
    }

    async fn carry_out(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Respond(conn, response) => self.ipc.response_send(conn, response).await,
                Effect::Dispatch(conn, dispatch) => self.ipc.dispatch_send(conn, dispatch).await,
                Effect::ArmRetentionTimer { queue_id, delay } => {
                    let handle = self
                        .timers
                        .add_duration(delay, TimerContext::QueueRetention { queue_id })
                        .await;
                    if let Some(queue) = self.state.queues.get_mut(&queue_id) {
                        queue.retention_timer = Some(handle);
                    }
                }
                Effect::ArmGetTimeout { queue_id, source, delay } => {
                    let handle = self
                        .timers
                        .add_duration(delay, TimerContext::MessageGetTimeout { queue_id, source })
                        .await;
                    if let Some(queue) = self.state.queues.get_mut(&queue_id) {
                        if let Some(pending) = queue.pending_list.iter_mut().rev().find(|p| p.source == source) {
                            pending.timer_handle = Some(handle);
                        }
                    }
                }
                Effect::ArmSendReceiveTimeout { sender_id, source, delay } => {
                    let handle = self
                        .timers
                        .add_duration(delay, TimerContext::SendReceiveTimeout { sender_id, source })
                        .await;
                    if let Some(entry) = self.state.replies.get_mut(&sender_id) {
                        entry.timer_handle = Some(handle);
                    }
                }
                Effect::CancelTimer(handle) => self.timers.delete(handle).await,
            }
        }
    }

    async fn handle_timer_event(&mut self, event: TimerEvent) {
        let record = match event.context {
            TimerContext::QueueRetention { queue_id } => {
                if !self.state.is_lowest_id(self.my_node_id) {
                    return;
                }
                ExecutiveRecord::QueueTimeout(QueueTimeoutRecord { queue_id })
            }
            TimerContext::MessageGetTimeout { queue_id, source } => {
                ExecutiveRecord::MessageGetTimeout(MessageGetTimeoutRecord { source, queue_id })
            }
            TimerContext::SendReceiveTimeout { sender_id, source } => {
                ExecutiveRecord::SendReceiveTimeout(SendReceiveTimeoutRecord { source, sender_id })
            }
        };
        let bytes = match &record {
            ExecutiveRecord::QueueTimeout(r) => r.to_wire(),
            ExecutiveRecord::MessageGetTimeout(r) => r.to_wire(),
            ExecutiveRecord::SendReceiveTimeout(r) => r.to_wire(),
            _ => unreachable!("timer events only ever produce timeout records"),
        };
        if !self.transport.mcast(bytes).await {
            tracing::warn!(node_id = self.my_node_id, "dropped a timer-expiry broadcast under back-pressure");
        }
    }
}
