//! The executive dispatcher (spec.md §4.1): the single writer to
//! replicated state. `Executive::apply` receives one already-decoded
//! `ExecutiveRecord` per delivery and returns the `Effect`s the node
//! event loop must carry out (an IPC response, a dispatch callback, or a
//! timer to arm/cancel). It never performs I/O itself, which is what
//! makes every row of spec.md §4.1 unit-testable without a running
//! transport or IPC stack.

use crate::error::QueueError;
use crate::ipc::{ConnectionId, IpcDispatch, IpcResponse};
use crate::limits::{MAX_GROUPS, MAX_PRIORITY_AREA_SIZE, MAX_QUEUES, MAX_QUEUES_PER_GROUP, MAX_QUEUE_SIZE};
use crate::model::group::Group;
use crate::model::queue::{PendingReceive, Queue};
use crate::model::reply::ReplyEntry;
use crate::model::track::TrackFlags;
use crate::state::ServiceState;
use crate::timer::TimerHandle;
use crate::wire::records::*;
use crate::wire::{GroupId, NodeId, QueueId, SenderId, Source};
use std::time::Duration;

impl From<Source> for ConnectionId {
    fn from(source: Source) -> Self {
        ConnectionId {
            node_id: source.node_id,
            connection: source.connection,
        }
    }
}

/// A side effect the executive wants carried out. Carrying no I/O of its
/// own keeps `apply` pure and synchronous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Respond(ConnectionId, IpcResponse),
    Dispatch(ConnectionId, IpcDispatch),
    ArmRetentionTimer { queue_id: QueueId, delay: Duration },
    ArmGetTimeout { queue_id: QueueId, source: Source, delay: Duration },
    ArmSendReceiveTimeout { sender_id: SenderId, source: Source, delay: Duration },
    CancelTimer(TimerHandle),
}

fn status_response(queue: &Queue) -> IpcResponse {
    let mut priority_usage = [(0u64, 0u64); 4];
    for (i, area) in queue.priority.iter().enumerate() {
        priority_usage[i] = (area.queue_used, area.queue_size);
    }
    IpcResponse::QueueStatus {
        persistent: queue.creation_attrs.persistent,
        retention_time_ms: queue.creation_attrs.retention_time.as_millis() as u64,
        close_time: queue.close_time,
        priority_usage,
    }
}

pub struct Executive {
    pub my_node_id: NodeId,
}

impl Executive {
    pub fn new(my_node_id: NodeId) -> Self {
        Self { my_node_id }
    }

    fn is_local(&self, source: Source) -> bool {
        source.node_id == self.my_node_id
    }

    fn respond_if_local(&self, source: Source, response: IpcResponse, effects: &mut Vec<Effect>) {
        if self.is_local(source) {
            effects.push(Effect::Respond(source.into(), response));
        }
    }

    pub fn apply(&self, state: &mut ServiceState, record: ExecutiveRecord) -> Vec<Effect> {
        match record {
            ExecutiveRecord::QueueOpen(r) => self.queue_open(state, r, None),
            ExecutiveRecord::QueueOpenAsync(r) => {
                let invocation = r.invocation;
                let base = QueueOpenRecord {
                    source: r.source,
                    name: r.name,
                    create_attrs: r.create_attrs,
                    flags: r.flags,
                    timeout_ms: r.timeout_ms,
                };
                self.queue_open(state, base, Some(invocation))
            }
            ExecutiveRecord::QueueClose(r) => self.queue_close(state, r),
            ExecutiveRecord::QueueStatusGet(r) => self.queue_status_get(state, r),
            ExecutiveRecord::QueueRetentionTimeSet(r) => self.queue_retention_time_set(state, r),
            ExecutiveRecord::QueueUnlink(r) => self.queue_unlink(state, r),
            ExecutiveRecord::QueueGroupCreate(r) => self.queue_group_create(state, r),
            ExecutiveRecord::QueueGroupInsert(r) => self.queue_group_insert(state, r),
            ExecutiveRecord::QueueGroupRemove(r) => self.queue_group_remove(state, r),
            ExecutiveRecord::QueueGroupDelete(r) => self.queue_group_delete(state, r),
            ExecutiveRecord::QueueGroupNotificationFree(r) => {
                // Open question decision: kept for wire compatibility,
                // handler intentionally does nothing but ack. Do not add
                // semantics here.
                let mut effects = Vec::new();
                self.respond_if_local(r.source, IpcResponse::Ok, &mut effects);
                effects
            }
            ExecutiveRecord::MessageSend(r) => self.message_send(state, r.source, r.dest, r.message, None),
            ExecutiveRecord::MessageSendAsync(r) => {
                let mut effects =
                    self.message_send(state, r.source, r.dest, r.message, None);
                if r.ack_on_delivery && self.is_local(r.source) {
                    effects.push(Effect::Dispatch(
                        r.source.into(),
                        IpcDispatch::MessageDeliveredCallback {
                            invocation: r.invocation,
                        },
                    ));
                }
                effects
            }
            ExecutiveRecord::MessageGet(r) => self.message_get(state, r),
            ExecutiveRecord::MessageCancel(r) => self.message_cancel(state, r),
            ExecutiveRecord::MessageSendReceive(r) => self.message_send_receive(state, r),
            ExecutiveRecord::MessageReply(r) => self.message_reply(state, r),
            ExecutiveRecord::MessageReplyAsync(r) => self.message_reply_async(state, r),
            ExecutiveRecord::QueueCapacityThresholdsSet(r) => {
                self.thresholds_set(state, r)
            }
            ExecutiveRecord::QueueCapacityThresholdsGet(r) => {
                self.thresholds_get(state, r)
            }
            ExecutiveRecord::QueueTimeout(r) => self.queue_timeout(state, r),
            ExecutiveRecord::MessageGetTimeout(r) => self.message_get_timeout(state, r),
            ExecutiveRecord::SendReceiveTimeout(r) => self.send_receive_timeout(state, r),
        }
    }

    fn queue_open(
        &self,
        state: &mut ServiceState,
        r: QueueOpenRecord,
        invocation: Option<u64>,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        let existing = state.find_queue_id(&r.name);

        let queue_id = match existing {
            None => {
                if !r.flags.create {
                    self.respond_if_local(r.source, IpcResponse::Error(QueueError::NotExist), &mut effects);
                    return effects;
                }
                let Some(attrs) = r.create_attrs else {
                    self.respond_if_local(r.source, IpcResponse::Error(QueueError::BadFlags), &mut effects);
                    return effects;
                };
                if attrs.total_size() > MAX_QUEUE_SIZE || attrs.sizes.iter().any(|s| *s > MAX_PRIORITY_AREA_SIZE) {
                    self.respond_if_local(r.source, IpcResponse::Error(QueueError::TooBig), &mut effects);
                    return effects;
                }
                if state.queues.len() >= MAX_QUEUES {
                    self.respond_if_local(r.source, IpcResponse::Error(QueueError::NoResources), &mut effects);
                    return effects;
                }
                let id = state.allocate_queue_id();
                let queue = Queue::new(r.name.clone(), id, attrs);
                state.insert_queue(queue);
                id
            }
            Some(id) => {
                let queue = state.queues.get(&id).expect("queue id index is consistent");
                if queue.refcount() != 0 {
                    self.respond_if_local(r.source, IpcResponse::Error(QueueError::Busy), &mut effects);
                    return effects;
                }
                if r.flags.create {
                    match r.create_attrs {
                        Some(attrs) if attrs == queue.creation_attrs => {}
                        _ => {
                            self.respond_if_local(r.source, IpcResponse::Error(QueueError::Exist), &mut effects);
                            return effects;
                        }
                    }
                }
                id
            }
        };

        let queue = state.queues.get_mut(&queue_id).expect("just inserted or looked up");
        if let Some(handle) = queue.retention_timer.take() {
            effects.push(Effect::CancelTimer(handle));
        }
        if r.flags.empty {
            queue.drain_all();
        }
        queue.open_flags = r.flags;
        queue.open(r.source.node_id);
        queue.source = Some(r.source);

        state
            .cleanup
            .entry(r.source.into())
            .or_default()
            .record_open(queue_id, r.name);

        self.respond_if_local(
            r.source,
            IpcResponse::QueueOpened { queue_id },
            &mut effects,
        );
        if let Some(invocation) = invocation {
            if self.is_local(r.source) {
                effects.push(Effect::Dispatch(
                    r.source.into(),
                    IpcDispatch::QueueOpenCallback { invocation, queue_id },
                ));
            }
        }
        effects
    }

    fn queue_close(&self, state: &mut ServiceState, r: QueueCloseRecord) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(queue) = state.queues.get_mut(&r.queue_id) else {
            self.respond_if_local(r.source, IpcResponse::Error(QueueError::NotExist), &mut effects);
            return effects;
        };
        let hit_zero = queue.close(r.source.node_id);
        if queue.source == Some(r.source) {
            queue.source = None;
        }
        if hit_zero {
            queue.close_time = Some(r.close_time_ns);
            if queue.unlink_flag && queue.creation_attrs.persistent {
                let destroyed = state.remove_queue(r.queue_id).expect("just confirmed present");
                drop(destroyed);
            } else if !queue.creation_attrs.persistent && state.is_lowest_id(self.my_node_id) {
                let retention = queue.creation_attrs.retention_time;
                effects.push(Effect::ArmRetentionTimer {
                    queue_id: r.queue_id,
                    delay: retention,
                });
            }
        }
        let conn: ConnectionId = r.source.into();
        if let Some(entry) = state.cleanup.get_mut(&conn) {
            entry.record_close(r.queue_id);
            if entry.opened_queues.is_empty() {
                state.cleanup.remove(&conn);
            }
        }
        self.respond_if_local(r.source, IpcResponse::Ok, &mut effects);
        effects
    }

    fn queue_status_get(&self, state: &mut ServiceState, r: QueueStatusGetRecord) -> Vec<Effect> {
        let mut effects = Vec::new();
        match state.find_queue_id(&r.name).and_then(|id| state.queues.get(&id)) {
            Some(queue) => self.respond_if_local(r.source, status_response(queue), &mut effects),
            None => self.respond_if_local(r.source, IpcResponse::Error(QueueError::NotExist), &mut effects),
        }
        effects
    }

    fn queue_retention_time_set(
        &self,
        state: &mut ServiceState,
        r: QueueRetentionTimeSetRecord,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        match state.queues.get_mut(&r.queue_id) {
            None => self.respond_if_local(r.source, IpcResponse::Error(QueueError::NotExist), &mut effects),
            Some(queue) if queue.unlink_flag || queue.creation_attrs.persistent => {
                self.respond_if_local(r.source, IpcResponse::Error(QueueError::BadOperation), &mut effects)
            }
            Some(queue) => {
                queue.creation_attrs.retention_time = Duration::from_millis(r.retention_time_ms);
                self.respond_if_local(r.source, IpcResponse::Ok, &mut effects);
            }
        }
        effects
    }

    fn queue_unlink(&self, state: &mut ServiceState, r: QueueUnlinkRecord) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(queue_id) = state.find_queue_id(&r.name) else {
            self.respond_if_local(r.source, IpcResponse::Error(QueueError::NotExist), &mut effects);
            return effects;
        };
        let queue = state.queues.get_mut(&queue_id).expect("name index is consistent");
        queue.unlink_flag = true;
        if queue.refcount() == 0 {
            if let Some(handle) = queue.retention_timer.take() {
                effects.push(Effect::CancelTimer(handle));
            }
            state.remove_queue(queue_id);
        }
        self.respond_if_local(r.source, IpcResponse::Ok, &mut effects);
        effects
    }

    fn queue_group_create(&self, state: &mut ServiceState, r: QueueGroupCreateRecord) -> Vec<Effect> {
        let mut effects = Vec::new();
        if state.find_group_id(&r.name).is_some() {
            self.respond_if_local(r.source, IpcResponse::Error(QueueError::Exist), &mut effects);
            return effects;
        }
        if state.groups.len() >= MAX_GROUPS {
            self.respond_if_local(r.source, IpcResponse::Error(QueueError::NoResources), &mut effects);
            return effects;
        }
        let id = state.allocate_group_id();
        state.insert_group(Group::new(r.name, id, r.policy));
        self.respond_if_local(r.source, IpcResponse::Ok, &mut effects);
        effects
    }

    fn notify_trackers(&self, state: &ServiceState, group_id: GroupId, group_name: &crate::wire::Name, effects: &mut Vec<Effect>) {
        let member_count = state.groups.get(&group_id).map(|g| g.member_count()).unwrap_or(0);
        for track in &state.tracks {
            if &track.group_name != group_name {
                continue;
            }
            // `Current` is a one-time snapshot delivered when tracking
            // starts (client::Client), not on every subsequent change.
            if matches!(track.track_flags, TrackFlags::Changes | TrackFlags::ChangesOnly)
                && self.is_local(track.source)
            {
                effects.push(Effect::Dispatch(
                    track.source.into(),
                    IpcDispatch::QueueGroupTrackCallback {
                        group_name: group_name.clone(),
                        group_id,
                        member_count,
                    },
                ));
            }
        }
    }

    fn queue_group_insert(&self, state: &mut ServiceState, r: QueueGroupInsertRecord) -> Vec<Effect> {
        let mut effects = Vec::new();
        let (Some(group_id), Some(queue_id)) = (
            state.find_group_id(&r.group_name),
            state.find_queue_id(&r.queue_name),
        ) else {
            self.respond_if_local(r.source, IpcResponse::Error(QueueError::NotExist), &mut effects);
            return effects;
        };
        let already_member = state.queues.get(&queue_id).map(|q| q.group.is_some()).unwrap_or(true);
        let group_full = state
            .groups
            .get(&group_id)
            .map(|g| g.member_count() >= MAX_QUEUES_PER_GROUP)
            .unwrap_or(true);
        if already_member || group_full {
            let err = if already_member { QueueError::Exist } else { QueueError::NoResources };
            self.respond_if_local(r.source, IpcResponse::Error(err), &mut effects);
            return effects;
        }
        state.groups.get_mut(&group_id).expect("checked above").insert(queue_id);
        state.queues.get_mut(&queue_id).expect("checked above").group = Some(group_id);
        self.notify_trackers(state, group_id, &r.group_name, &mut effects);
        self.respond_if_local(r.source, IpcResponse::Ok, &mut effects);
        effects
    }

    fn queue_group_remove(&self, state: &mut ServiceState, r: QueueGroupRemoveRecord) -> Vec<Effect> {
        let mut effects = Vec::new();
        let (Some(group_id), Some(queue_id)) = (
            state.find_group_id(&r.group_name),
            state.find_queue_id(&r.queue_name),
        ) else {
            self.respond_if_local(r.source, IpcResponse::Error(QueueError::NotExist), &mut effects);
            return effects;
        };
        let is_member = state
            .groups
            .get(&group_id)
            .map(|g| g.contains(queue_id))
            .unwrap_or(false);
        if !is_member {
            self.respond_if_local(r.source, IpcResponse::Error(QueueError::NotExist), &mut effects);
            return effects;
        }
        state.groups.get_mut(&group_id).expect("checked above").remove(queue_id);
        if let Some(queue) = state.queues.get_mut(&queue_id) {
            queue.group = None;
        }
        self.notify_trackers(state, group_id, &r.group_name, &mut effects);
        self.respond_if_local(r.source, IpcResponse::Ok, &mut effects);
        effects
    }

    fn queue_group_delete(&self, state: &mut ServiceState, r: QueueGroupDeleteRecord) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(group_id) = state.find_group_id(&r.group_name) else {
            self.respond_if_local(r.source, IpcResponse::Error(QueueError::NotExist), &mut effects);
            return effects;
        };
        if let Some(group) = state.remove_group(group_id) {
            for queue_id in group.queue_head {
                if let Some(queue) = state.queues.get_mut(&queue_id) {
                    queue.group = None;
                }
            }
        }
        self.respond_if_local(r.source, IpcResponse::Ok, &mut effects);
        effects
    }

    /// Shared by `MessageSend`/`MessageSendAsync`/`MessageSendReceive`.
    /// `sender_id` is `Some` only for the send-receive path.
    fn message_send(
        &self,
        state: &mut ServiceState,
        source: Source,
        dest: Destination,
        message: crate::wire::Message,
        sender_id: Option<SenderId>,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        let queue_id = match self.resolve_send_target(state, &dest) {
            Ok(id) => id,
            Err(e) => {
                self.respond_if_local(source, IpcResponse::Error(e), &mut effects);
                return effects;
            }
        };
        let Some(queue) = state.queues.get_mut(&queue_id) else {
            self.respond_if_local(source, IpcResponse::Error(QueueError::NotExist), &mut effects);
            return effects;
        };
        if !queue.has_room(message.priority, message.size()) {
            self.respond_if_local(source, IpcResponse::Error(QueueError::QueueFull), &mut effects);
            return effects;
        }

        if let Destination::Group(name) = &dest {
            if let Some(group_id) = state.find_group_id(name) {
                state.groups.get_mut(&group_id).expect("resolved above").resolve_and_advance();
            }
        }

        let queue = state.queues.get_mut(&queue_id).expect("checked above");
        if let Some(pending) = queue.pending_list.pop_front() {
            if let Some(handle) = pending.timer_handle {
                effects.push(Effect::CancelTimer(handle));
            }
            self.respond_if_local(
                pending.source,
                IpcResponse::MessageReceived {
                    message,
                    sender_id,
                },
                &mut effects,
            );
        } else {
            let send_time = 0;
            queue.enqueue(send_time, sender_id, message);
            if queue.open_flags.receive_callback {
                if let Some(opener) = queue.source {
                    if self.is_local(opener) {
                        effects.push(Effect::Dispatch(
                            opener.into(),
                            IpcDispatch::MessageReceivedCallback { queue_id },
                        ));
                    }
                }
            }
        }
        self.respond_if_local(source, IpcResponse::Ok, &mut effects);
        effects
    }

    /// Peek (without advancing) the queue a send to `dest` would land
    /// on. The round-robin cursor only advances once the capacity check
    /// in `message_send` has actually succeeded (spec.md §4.1 "round-
    /// robin cursor discipline": advance on successful send).
    fn resolve_send_target(
        &self,
        state: &ServiceState,
        dest: &Destination,
    ) -> Result<QueueId, QueueError> {
        match dest {
            Destination::Queue(name) => state.find_queue_id(name).ok_or(QueueError::NotExist),
            Destination::Group(name) => {
                let group_id = state.find_group_id(name).ok_or(QueueError::NotExist)?;
                state
                    .groups
                    .get(&group_id)
                    .and_then(|g| g.next_queue)
                    .ok_or(QueueError::NotExist)
            }
        }
    }

    fn message_get(&self, state: &mut ServiceState, r: MessageGetRecord) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(queue) = state.queues.get_mut(&r.queue_id) else {
            self.respond_if_local(r.source, IpcResponse::Error(QueueError::NotExist), &mut effects);
            return effects;
        };
        if let Some(entry) = queue.dequeue_highest() {
            self.respond_if_local(
                r.source,
                IpcResponse::MessageReceived {
                    message: entry.message,
                    sender_id: entry.sender_id,
                },
                &mut effects,
            );
        } else {
            queue.pending_list.push_back(PendingReceive {
                source: r.source,
                timer_handle: None,
            });
            if r.timeout_ms > 0 && self.is_local(r.source) {
                effects.push(Effect::ArmGetTimeout {
                    queue_id: r.queue_id,
                    source: r.source,
                    delay: Duration::from_millis(r.timeout_ms),
                });
            }
        }
        effects
    }

    fn message_cancel(&self, state: &mut ServiceState, r: MessageCancelRecord) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(queue) = state.queues.get_mut(&r.queue_id) else {
            self.respond_if_local(r.source, IpcResponse::Error(QueueError::NotExist), &mut effects);
            return effects;
        };
        if queue.pending_list.is_empty() {
            self.respond_if_local(r.source, IpcResponse::Error(QueueError::NotExist), &mut effects);
            return effects;
        }
        let mut remaining = std::collections::VecDeque::new();
        while let Some(pending) = queue.pending_list.pop_front() {
            if pending.source == r.source {
                if let Some(handle) = pending.timer_handle {
                    effects.push(Effect::CancelTimer(handle));
                }
                self.respond_if_local(pending.source, IpcResponse::Error(QueueError::Interrupt), &mut effects);
            } else {
                remaining.push_back(pending);
            }
        }
        queue.pending_list = remaining;
        self.respond_if_local(r.source, IpcResponse::Ok, &mut effects);
        effects
    }

    fn message_send_receive(&self, state: &mut ServiceState, r: MessageSendReceiveRecord) -> Vec<Effect> {
        let queue_id = match self.resolve_send_target(state, &r.dest) {
            Ok(id) => id,
            Err(e) => {
                let mut effects = Vec::new();
                self.respond_if_local(r.source, IpcResponse::Error(e), &mut effects);
                return effects;
            }
        };
        let room = state
            .queues
            .get(&queue_id)
            .map(|q| q.has_room(r.message.priority, r.message.size()))
            .unwrap_or(false);
        if !room {
            let mut effects = Vec::new();
            self.respond_if_local(r.source, IpcResponse::Error(QueueError::QueueFull), &mut effects);
            return effects;
        }

        state.replies.insert(
            r.sender_id,
            ReplyEntry::new(r.sender_id, r.source, r.reply_size_limit),
        );

        let mut effects = self.message_send(state, r.source, r.dest, r.message, Some(r.sender_id));
        if r.timeout_ms > 0 && self.is_local(r.source) {
            effects.push(Effect::ArmSendReceiveTimeout {
                sender_id: r.sender_id,
                source: r.source,
                delay: Duration::from_millis(r.timeout_ms),
            });
        }
        effects
    }

    fn message_reply(&self, state: &mut ServiceState, r: MessageReplyRecord) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(entry) = state.replies.get(&r.sender_id) else {
            self.respond_if_local(r.source, IpcResponse::Error(QueueError::NotExist), &mut effects);
            return effects;
        };
        if !entry.accepts(r.reply_message.size()) {
            self.respond_if_local(r.source, IpcResponse::Error(QueueError::NoSpace), &mut effects);
            return effects;
        }
        let waiting_source = entry.source;
        let timer_handle = entry.timer_handle;
        if r.sender_id.origin_node() == self.my_node_id {
            if let Some(handle) = timer_handle {
                effects.push(Effect::CancelTimer(handle));
            }
            self.respond_if_local(
                waiting_source,
                IpcResponse::MessageReplyReceived {
                    message: r.reply_message,
                },
                &mut effects,
            );
        }
        state.replies.remove(&r.sender_id);
        self.respond_if_local(r.source, IpcResponse::Ok, &mut effects);
        effects
    }

    fn message_reply_async(&self, state: &mut ServiceState, r: MessageReplyAsyncRecord) -> Vec<Effect> {
        let base = MessageReplyRecord {
            source: r.source,
            reply_message: r.reply_message,
            sender_id: r.sender_id,
            timeout_ms: r.timeout_ms,
        };
        let mut effects = self.message_reply(state, base);
        if self.is_local(r.source) {
            effects.push(Effect::Dispatch(
                r.source.into(),
                IpcDispatch::MessageDeliveredCallback {
                    invocation: r.invocation,
                },
            ));
        }
        effects
    }

    fn thresholds_set(&self, state: &mut ServiceState, r: QueueCapacityThresholdsSetRecord) -> Vec<Effect> {
        let mut effects = Vec::new();
        match state.queues.get_mut(&r.queue_id) {
            None => self.respond_if_local(r.source, IpcResponse::Error(QueueError::NotExist), &mut effects),
            Some(queue) => {
                for (area, thresholds) in queue.priority.iter_mut().zip(r.thresholds) {
                    area.thresholds = thresholds;
                }
                self.respond_if_local(r.source, IpcResponse::Ok, &mut effects);
            }
        }
        effects
    }

    fn thresholds_get(&self, state: &mut ServiceState, r: QueueCapacityThresholdsGetRecord) -> Vec<Effect> {
        let mut effects = Vec::new();
        match state.queues.get(&r.queue_id) {
            None => self.respond_if_local(r.source, IpcResponse::Error(QueueError::NotExist), &mut effects),
            Some(queue) => {
                let mut thresholds = [Default::default(); 4];
                for (i, area) in queue.priority.iter().enumerate() {
                    thresholds[i] = area.thresholds;
                }
                self.respond_if_local(r.source, IpcResponse::CapacityThresholds { thresholds }, &mut effects);
            }
        }
        effects
    }

    fn queue_timeout(&self, state: &mut ServiceState, r: QueueTimeoutRecord) -> Vec<Effect> {
        state.remove_queue(r.queue_id);
        Vec::new()
    }

    fn message_get_timeout(&self, state: &mut ServiceState, r: MessageGetTimeoutRecord) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(queue) = state.queues.get_mut(&r.queue_id) {
            let before = queue.pending_list.len();
            queue.pending_list.retain(|p| p.source != r.source);
            if queue.pending_list.len() != before {
                self.respond_if_local(r.source, IpcResponse::Error(QueueError::Timeout), &mut effects);
            }
        }
        effects
    }

    fn send_receive_timeout(&self, state: &mut ServiceState, r: SendReceiveTimeoutRecord) -> Vec<Effect> {
        let mut effects = Vec::new();
        if state.replies.remove(&r.sender_id).is_some() {
            self.respond_if_local(r.source, IpcResponse::Error(QueueError::Timeout), &mut effects);
        }
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::queue::CreationAttrs;
    use crate::model::queue::OpenFlags;
    use crate::wire::{Message, Priority};
    use std::time::Duration as StdDuration;

    fn source(node: NodeId, conn: u64) -> Source {
        Source::new(node, conn)
    }

    fn attrs() -> crate::model::queue::CreationAttrs {
        CreationAttrs {
            persistent: false,
            retention_time: StdDuration::from_secs(5),
            sizes: [100, 100, 100, 100],
        }
    }

    fn open_record(name: &str, src: Source) -> QueueOpenRecord {
        QueueOpenRecord {
            source: src,
            name: name.into(),
            create_attrs: Some(attrs()),
            flags: OpenFlags {
                create: true,
                receive_callback: false,
                empty: false,
            },
            timeout_ms: 0,
        }
    }

    #[test]
    fn queue_open_create_then_reopen_with_same_attrs_succeeds() {
        let exec = Executive::new(1);
        let mut state = ServiceState::new();
        let effects = exec.apply(&mut state, ExecutiveRecord::QueueOpen(open_record("q1", source(1, 1))));
        assert!(matches!(
            effects[0],
            Effect::Respond(_, IpcResponse::QueueOpened { queue_id: QueueId(0) })
        ));

        // Close then reopen: refcount returns to zero first.
        exec.apply(
            &mut state,
            ExecutiveRecord::QueueClose(QueueCloseRecord {
                source: source(1, 1),
                name: "q1".into(),
                queue_id: QueueId(0),
                close_time_ns: 1_000,
            }),
        );
        let effects = exec.apply(&mut state, ExecutiveRecord::QueueOpen(open_record("q1", source(1, 2))));
        assert!(matches!(
            effects[0],
            Effect::Respond(_, IpcResponse::QueueOpened { queue_id: QueueId(0) })
        ));
    }

    #[test]
    fn queue_open_while_still_referenced_is_busy() {
        let exec = Executive::new(1);
        let mut state = ServiceState::new();
        exec.apply(&mut state, ExecutiveRecord::QueueOpen(open_record("q1", source(1, 1))));
        let effects = exec.apply(&mut state, ExecutiveRecord::QueueOpen(open_record("q1", source(1, 2))));
        assert!(matches!(
            effects[0],
            Effect::Respond(_, IpcResponse::Error(QueueError::Busy))
        ));
    }

    #[test]
    fn queue_close_shrinks_the_connections_cleanup_entry() {
        let exec = Executive::new(1);
        let mut state = ServiceState::new();
        let src = source(1, 1);
        exec.apply(&mut state, ExecutiveRecord::QueueOpen(open_record("q1", src)));
        assert_eq!(state.cleanup.get(&src.into()).unwrap().opened_queues.len(), 1);

        exec.apply(
            &mut state,
            ExecutiveRecord::QueueClose(QueueCloseRecord {
                source: src,
                name: "q1".into(),
                queue_id: QueueId(0),
                close_time_ns: 1_000,
            }),
        );
        assert!(
            state.cleanup.get(&src.into()).is_none(),
            "the cleanup entry should be dropped once its last opened queue is closed"
        );
    }

    #[test]
    fn thirty_third_queue_is_no_resources() {
        let exec = Executive::new(1);
        let mut state = ServiceState::new();
        for i in 0..32 {
            let name = format!("q{i}");
            exec.apply(&mut state, ExecutiveRecord::QueueOpen(open_record(&name, source(1, i as u64))));
        }
        let effects = exec.apply(&mut state, ExecutiveRecord::QueueOpen(open_record("q32", source(1, 99))));
        assert!(matches!(
            effects[0],
            Effect::Respond(_, IpcResponse::Error(QueueError::NoResources))
        ));
    }

    #[test]
    fn send_to_empty_queue_then_get_delivers_in_fifo_priority_order() {
        let exec = Executive::new(1);
        let mut state = ServiceState::new();
        exec.apply(&mut state, ExecutiveRecord::QueueOpen(open_record("q1", source(1, 1))));

        let msg = Message::new(1, 1, Priority::new(0).unwrap(), b"hello".to_vec()).unwrap();
        let effects = exec.apply(
            &mut state,
            ExecutiveRecord::MessageSend(MessageSendRecord {
                source: source(1, 1),
                dest: Destination::Queue("q1".into()),
                timeout_ms: 0,
                message: msg.clone(),
            }),
        );
        assert!(matches!(effects[0], Effect::Respond(_, IpcResponse::Ok)));

        let effects = exec.apply(
            &mut state,
            ExecutiveRecord::MessageGet(MessageGetRecord {
                source: source(1, 1),
                name: "q1".into(),
                queue_id: QueueId(0),
                timeout_ms: 0,
            }),
        );
        match &effects[0] {
            Effect::Respond(_, IpcResponse::MessageReceived { message, .. }) => {
                assert_eq!(message, &msg);
            }
            other => panic!("expected MessageReceived, got {other:?}"),
        }
    }

    #[test]
    fn get_on_empty_queue_parks_a_pending_receive() {
        let exec = Executive::new(1);
        let mut state = ServiceState::new();
        exec.apply(&mut state, ExecutiveRecord::QueueOpen(open_record("q1", source(1, 1))));
        let effects = exec.apply(
            &mut state,
            ExecutiveRecord::MessageGet(MessageGetRecord {
                source: source(1, 1),
                name: "q1".into(),
                queue_id: QueueId(0),
                timeout_ms: 0,
            }),
        );
        assert!(effects.is_empty());
        assert_eq!(state.queues[&QueueId(0)].pending_list.len(), 1);
    }

    #[test]
    fn send_to_group_round_robins_across_members() {
        let exec = Executive::new(1);
        let mut state = ServiceState::new();
        exec.apply(&mut state, ExecutiveRecord::QueueOpen(open_record("q1", source(1, 1))));
        exec.apply(&mut state, ExecutiveRecord::QueueOpen(open_record("q2", source(1, 2))));
        exec.apply(
            &mut state,
            ExecutiveRecord::QueueGroupCreate(QueueGroupCreateRecord {
                source: source(1, 3),
                name: "g".into(),
                policy: crate::model::GroupPolicy::RoundRobin,
            }),
        );
        exec.apply(
            &mut state,
            ExecutiveRecord::QueueGroupInsert(QueueGroupInsertRecord {
                source: source(1, 3),
                group_name: "g".into(),
                queue_name: "q1".into(),
            }),
        );
        exec.apply(
            &mut state,
            ExecutiveRecord::QueueGroupInsert(QueueGroupInsertRecord {
                source: source(1, 3),
                group_name: "g".into(),
                queue_name: "q2".into(),
            }),
        );

        let mut targets = Vec::new();
        for _ in 0..3 {
            let msg = Message::new(1, 1, Priority::new(0).unwrap(), b"x".to_vec()).unwrap();
            exec.apply(
                &mut state,
                ExecutiveRecord::MessageSend(MessageSendRecord {
                    source: source(1, 1),
                    dest: Destination::Group("g".into()),
                    timeout_ms: 0,
                    message: msg,
                }),
            );
        }
        for name in ["q1", "q2", "q1"] {
            let queue_id = state.find_queue_id(&name.into()).unwrap();
            targets.push(state.queues[&queue_id].total_messages() > 0);
        }
        assert_eq!(state.queues[&state.find_queue_id(&"q1".into()).unwrap()].total_messages(), 2);
        assert_eq!(state.queues[&state.find_queue_id(&"q2".into()).unwrap()].total_messages(), 1);
    }

    #[test]
    fn send_receive_round_trip_delivers_reply_and_clears_entry() {
        let exec = Executive::new(1);
        let mut state = ServiceState::new();
        exec.apply(&mut state, ExecutiveRecord::QueueOpen(open_record("q1", source(1, 1))));

        let ping = Message::new(1, 1, Priority::new(0).unwrap(), b"ping".to_vec()).unwrap();
        let sender_id = SenderId::new(1, 1);
        exec.apply(
            &mut state,
            ExecutiveRecord::MessageSendReceive(MessageSendReceiveRecord {
                source: source(1, 1),
                dest: Destination::Queue("q1".into()),
                timeout_ms: 2000,
                reply_size_limit: 10,
                message: ping,
                sender_id,
            }),
        );
        assert!(state.replies.contains_key(&sender_id));

        exec.apply(
            &mut state,
            ExecutiveRecord::MessageGet(MessageGetRecord {
                source: source(2, 5),
                name: "q1".into(),
                queue_id: QueueId(0),
                timeout_ms: 0,
            }),
        );

        let pong = Message::new(1, 1, Priority::new(0).unwrap(), b"pong".to_vec()).unwrap();
        let effects = exec.apply(
            &mut state,
            ExecutiveRecord::MessageReply(MessageReplyRecord {
                source: source(2, 5),
                reply_message: pong.clone(),
                sender_id,
                timeout_ms: 0,
            }),
        );
        assert!(!state.replies.contains_key(&sender_id));
        let delivered = effects.iter().any(|e| {
            matches!(e, Effect::Respond(_, IpcResponse::MessageReplyReceived { message }) if message == &pong)
        });
        assert!(delivered, "caller should receive the reply");
    }

    #[test]
    fn reply_larger_than_limit_is_no_space_and_entry_survives() {
        let exec = Executive::new(1);
        let mut state = ServiceState::new();
        exec.apply(&mut state, ExecutiveRecord::QueueOpen(open_record("q1", source(1, 1))));
        let ping = Message::new(1, 1, Priority::new(0).unwrap(), b"ping".to_vec()).unwrap();
        let sender_id = SenderId::new(1, 1);
        exec.apply(
            &mut state,
            ExecutiveRecord::MessageSendReceive(MessageSendReceiveRecord {
                source: source(1, 1),
                dest: Destination::Queue("q1".into()),
                timeout_ms: 2000,
                reply_size_limit: 2,
                message: ping,
                sender_id,
            }),
        );
        let too_big = Message::new(1, 1, Priority::new(0).unwrap(), b"toolong".to_vec()).unwrap();
        let effects = exec.apply(
            &mut state,
            ExecutiveRecord::MessageReply(MessageReplyRecord {
                source: source(1, 9),
                reply_message: too_big,
                sender_id,
                timeout_ms: 0,
            }),
        );
        assert!(matches!(
            effects[0],
            Effect::Respond(_, IpcResponse::Error(QueueError::NoSpace))
        ));
        assert!(state.replies.contains_key(&sender_id));
    }

    #[test]
    fn message_full_queue_rejects_and_does_not_advance_group_cursor() {
        let exec = Executive::new(1);
        let mut state = ServiceState::new();
        let mut small = open_record("q1", source(1, 1));
        small.create_attrs = Some(CreationAttrs {
            persistent: false,
            retention_time: StdDuration::from_secs(5),
            sizes: [1, 1, 1, 1],
        });
        exec.apply(&mut state, ExecutiveRecord::QueueOpen(small));
        let big = Message::new(1, 1, Priority::new(0).unwrap(), vec![0u8; 32]).unwrap();
        let effects = exec.apply(
            &mut state,
            ExecutiveRecord::MessageSend(MessageSendRecord {
                source: source(1, 1),
                dest: Destination::Queue("q1".into()),
                timeout_ms: 0,
                message: big,
            }),
        );
        assert!(matches!(
            effects[0],
            Effect::Respond(_, IpcResponse::Error(QueueError::QueueFull))
        ));
    }
}
