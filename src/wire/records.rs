//! Fixed-layout broadcast records: the executive operations of spec.md
//! §4.1 and the synchronization records of §4.3, each a `WireRecord`.
//!
//! Every record starts with its `RECORD_ID` (via `WireRecord::to_wire`),
//! which is all `decode_executive_record`/`decode_sync_record` need to
//! route a delivered payload to the right decoder without first
//! understanding its body.

use super::cursor::{WireReader, WireWriter, WireRecord};
use super::message::Message;
use super::name::Name;
use super::{GroupId, NodeId, QueueId, RingId, SenderId, Source};
use crate::model::group::GroupPolicy;
use crate::model::queue::{CreationAttrs, OpenFlags, Thresholds};
use anyhow::{anyhow, Result};
use std::time::Duration;

fn encode_source(source: &Source, w: &mut WireWriter) {
    w.put_u32(source.node_id);
    w.put_u64(source.connection);
}

fn decode_source(r: &mut WireReader<'_>) -> Result<Source> {
    let node_id = r.get_u32()?;
    let connection = r.get_u64()?;
    Ok(Source::new(node_id, connection))
}

fn encode_open_flags(flags: &OpenFlags, w: &mut WireWriter) {
    let mut bits = 0u8;
    if flags.create {
        bits |= 0b001;
    }
    if flags.receive_callback {
        bits |= 0b010;
    }
    if flags.empty {
        bits |= 0b100;
    }
    w.put_u8(bits);
}

fn decode_open_flags(r: &mut WireReader<'_>) -> Result<OpenFlags> {
    let bits = r.get_u8()?;
    Ok(OpenFlags {
        create: bits & 0b001 != 0,
        receive_callback: bits & 0b010 != 0,
        empty: bits & 0b100 != 0,
    })
}

fn encode_creation_attrs(attrs: &CreationAttrs, w: &mut WireWriter) {
    w.put_u8(attrs.persistent as u8);
    w.put_u64(attrs.retention_time.as_millis() as u64);
    for size in attrs.sizes {
        w.put_u64(size);
    }
}

fn decode_creation_attrs(r: &mut WireReader<'_>) -> Result<CreationAttrs> {
    let persistent = r.get_u8()? != 0;
    let retention_time = Duration::from_millis(r.get_u64()?);
    let mut sizes = [0u64; 4];
    for size in sizes.iter_mut() {
        *size = r.get_u64()?;
    }
    Ok(CreationAttrs {
        persistent,
        retention_time,
        sizes,
    })
}

fn encode_opt_creation_attrs(attrs: &Option<CreationAttrs>, w: &mut WireWriter) {
    match attrs {
        Some(attrs) => {
            w.put_u8(1);
            encode_creation_attrs(attrs, w);
        }
        None => w.put_u8(0),
    }
}

fn decode_opt_creation_attrs(r: &mut WireReader<'_>) -> Result<Option<CreationAttrs>> {
    Ok(if r.get_u8()? == 1 {
        Some(decode_creation_attrs(r)?)
    } else {
        None
    })
}

fn encode_thresholds(t: &Thresholds, w: &mut WireWriter) {
    w.put_u64(t.capacity_reached);
    w.put_u64(t.capacity_available);
}

fn decode_thresholds(r: &mut WireReader<'_>) -> Result<Thresholds> {
    Ok(Thresholds {
        capacity_reached: r.get_u64()?,
        capacity_available: r.get_u64()?,
    })
}

fn encode_policy(policy: GroupPolicy, w: &mut WireWriter) {
    let bits = match policy {
        GroupPolicy::RoundRobin => 0u8,
    };
    w.put_u8(bits);
}

fn decode_policy(r: &mut WireReader<'_>) -> Result<GroupPolicy> {
    match r.get_u8()? {
        0 => Ok(GroupPolicy::RoundRobin),
        other => Err(anyhow!("unknown group policy tag {other}")),
    }
}

fn encode_opt_sender_id(id: &Option<SenderId>, w: &mut WireWriter) {
    match id {
        Some(id) => {
            w.put_u8(1);
            w.put_u64(id.0);
        }
        None => w.put_u8(0),
    }
}

fn decode_opt_sender_id(r: &mut WireReader<'_>) -> Result<Option<SenderId>> {
    Ok(if r.get_u8()? == 1 {
        Some(SenderId(r.get_u64()?))
    } else {
        None
    })
}

/// Resolution target of a send: either a specific queue or a queue group
/// (spec.md §4.1 `MessageSend`: "if `dest` names a group: resolve to
/// `next_queue`; else resolve to queue").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Queue(Name),
    Group(Name),
}

impl Destination {
    fn encode(&self, w: &mut WireWriter) {
        match self {
            Destination::Queue(name) => {
                w.put_u8(0);
                name.encode(w);
            }
            Destination::Group(name) => {
                w.put_u8(1);
                name.encode(w);
            }
        }
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        match r.get_u8()? {
            0 => Ok(Destination::Queue(Name::decode(r)?)),
            1 => Ok(Destination::Group(Name::decode(r)?)),
            other => Err(anyhow!("unknown destination tag {other}")),
        }
    }
}

macro_rules! wire_record {
    ($name:ident, $id:expr) => {
        impl WireRecord for $name {
            const RECORD_ID: u32 = $id;

            fn encode(&self, w: &mut WireWriter) {
                self.encode_body(w)
            }

            fn decode(r: &mut WireReader<'_>) -> Result<Self> {
                Self::decode_body(r)
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOpenRecord {
    pub source: Source,
    pub name: Name,
    pub create_attrs: Option<CreationAttrs>,
    pub flags: OpenFlags,
    pub timeout_ms: u64,
}

impl QueueOpenRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.name.encode(w);
        encode_opt_creation_attrs(&self.create_attrs, w);
        encode_open_flags(&self.flags, w);
        w.put_u64(self.timeout_ms);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            name: Name::decode(r)?,
            create_attrs: decode_opt_creation_attrs(r)?,
            flags: decode_open_flags(r)?,
            timeout_ms: r.get_u64()?,
        })
    }
}
wire_record!(QueueOpenRecord, 1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOpenAsyncRecord {
    pub source: Source,
    pub name: Name,
    pub create_attrs: Option<CreationAttrs>,
    pub flags: OpenFlags,
    pub timeout_ms: u64,
    pub invocation: u64,
}

impl QueueOpenAsyncRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.name.encode(w);
        encode_opt_creation_attrs(&self.create_attrs, w);
        encode_open_flags(&self.flags, w);
        w.put_u64(self.timeout_ms);
        w.put_u64(self.invocation);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            name: Name::decode(r)?,
            create_attrs: decode_opt_creation_attrs(r)?,
            flags: decode_open_flags(r)?,
            timeout_ms: r.get_u64()?,
            invocation: r.get_u64()?,
        })
    }
}
wire_record!(QueueOpenAsyncRecord, 2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueCloseRecord {
    pub source: Source,
    pub name: Name,
    pub queue_id: QueueId,
    /// Wall time (nanoseconds since epoch) the closing node observed,
    /// stamped once by `translator::Translator` before broadcast so every
    /// node records the same `close_time` (spec.md §9: replicated state
    /// must not depend on a per-node clock read).
    pub close_time_ns: i64,
}

impl QueueCloseRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.name.encode(w);
        w.put_u32(self.queue_id.0);
        w.put_i64(self.close_time_ns);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            name: Name::decode(r)?,
            queue_id: QueueId(r.get_u32()?),
            close_time_ns: r.get_i64()?,
        })
    }
}
wire_record!(QueueCloseRecord, 3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatusGetRecord {
    pub source: Source,
    pub name: Name,
}

impl QueueStatusGetRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.name.encode(w);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            name: Name::decode(r)?,
        })
    }
}
wire_record!(QueueStatusGetRecord, 4);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRetentionTimeSetRecord {
    pub source: Source,
    pub name: Name,
    pub queue_id: QueueId,
    pub retention_time_ms: u64,
}

impl QueueRetentionTimeSetRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.name.encode(w);
        w.put_u32(self.queue_id.0);
        w.put_u64(self.retention_time_ms);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            name: Name::decode(r)?,
            queue_id: QueueId(r.get_u32()?),
            retention_time_ms: r.get_u64()?,
        })
    }
}
wire_record!(QueueRetentionTimeSetRecord, 5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueUnlinkRecord {
    pub source: Source,
    pub name: Name,
}

impl QueueUnlinkRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.name.encode(w);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            name: Name::decode(r)?,
        })
    }
}
wire_record!(QueueUnlinkRecord, 6);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueGroupCreateRecord {
    pub source: Source,
    pub name: Name,
    pub policy: GroupPolicy,
}

impl QueueGroupCreateRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.name.encode(w);
        encode_policy(self.policy, w);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            name: Name::decode(r)?,
            policy: decode_policy(r)?,
        })
    }
}
wire_record!(QueueGroupCreateRecord, 7);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueGroupInsertRecord {
    pub source: Source,
    pub group_name: Name,
    pub queue_name: Name,
}

impl QueueGroupInsertRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.group_name.encode(w);
        self.queue_name.encode(w);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            group_name: Name::decode(r)?,
            queue_name: Name::decode(r)?,
        })
    }
}
wire_record!(QueueGroupInsertRecord, 8);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueGroupRemoveRecord {
    pub source: Source,
    pub group_name: Name,
    pub queue_name: Name,
}

impl QueueGroupRemoveRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.group_name.encode(w);
        self.queue_name.encode(w);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            group_name: Name::decode(r)?,
            queue_name: Name::decode(r)?,
        })
    }
}
wire_record!(QueueGroupRemoveRecord, 9);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueGroupDeleteRecord {
    pub source: Source,
    pub group_name: Name,
}

impl QueueGroupDeleteRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.group_name.encode(w);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            group_name: Name::decode(r)?,
        })
    }
}
wire_record!(QueueGroupDeleteRecord, 10);

/// Kept for wire-compatibility symmetry with the service this one
/// generalizes; its executive handler is a documented no-op (see
/// DESIGN.md) rather than left unimplemented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueGroupNotificationFreeRecord {
    pub source: Source,
    pub group_name: Name,
}

impl QueueGroupNotificationFreeRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.group_name.encode(w);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            group_name: Name::decode(r)?,
        })
    }
}
wire_record!(QueueGroupNotificationFreeRecord, 11);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSendRecord {
    pub source: Source,
    pub dest: Destination,
    pub timeout_ms: u64,
    pub message: Message,
}

impl MessageSendRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.dest.encode(w);
        w.put_u64(self.timeout_ms);
        self.message.encode(w);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            dest: Destination::decode(r)?,
            timeout_ms: r.get_u64()?,
            message: Message::decode(r)?,
        })
    }
}
wire_record!(MessageSendRecord, 12);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSendAsyncRecord {
    pub source: Source,
    pub dest: Destination,
    pub timeout_ms: u64,
    pub message: Message,
    pub invocation: u64,
    pub ack_on_delivery: bool,
}

impl MessageSendAsyncRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.dest.encode(w);
        w.put_u64(self.timeout_ms);
        self.message.encode(w);
        w.put_u64(self.invocation);
        w.put_u8(self.ack_on_delivery as u8);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            dest: Destination::decode(r)?,
            timeout_ms: r.get_u64()?,
            message: Message::decode(r)?,
            invocation: r.get_u64()?,
            ack_on_delivery: r.get_u8()? != 0,
        })
    }
}
wire_record!(MessageSendAsyncRecord, 13);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageGetRecord {
    pub source: Source,
    pub name: Name,
    pub queue_id: QueueId,
    pub timeout_ms: u64,
}

impl MessageGetRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.name.encode(w);
        w.put_u32(self.queue_id.0);
        w.put_u64(self.timeout_ms);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            name: Name::decode(r)?,
            queue_id: QueueId(r.get_u32()?),
            timeout_ms: r.get_u64()?,
        })
    }
}
wire_record!(MessageGetRecord, 14);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageCancelRecord {
    pub source: Source,
    pub name: Name,
    pub queue_id: QueueId,
}

impl MessageCancelRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.name.encode(w);
        w.put_u32(self.queue_id.0);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            name: Name::decode(r)?,
            queue_id: QueueId(r.get_u32()?),
        })
    }
}
wire_record!(MessageCancelRecord, 15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSendReceiveRecord {
    pub source: Source,
    pub dest: Destination,
    pub timeout_ms: u64,
    pub reply_size_limit: u64,
    pub message: Message,
    /// Allocated by `translator::Translator` before broadcast (spec.md
    /// §4.2), never by the executive dispatcher.
    pub sender_id: SenderId,
}

impl MessageSendReceiveRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.dest.encode(w);
        w.put_u64(self.timeout_ms);
        w.put_u64(self.reply_size_limit);
        self.message.encode(w);
        w.put_u64(self.sender_id.0);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            dest: Destination::decode(r)?,
            timeout_ms: r.get_u64()?,
            reply_size_limit: r.get_u64()?,
            message: Message::decode(r)?,
            sender_id: SenderId(r.get_u64()?),
        })
    }
}
wire_record!(MessageSendReceiveRecord, 16);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReplyRecord {
    pub source: Source,
    pub reply_message: Message,
    pub sender_id: SenderId,
    pub timeout_ms: u64,
}

impl MessageReplyRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.reply_message.encode(w);
        w.put_u64(self.sender_id.0);
        w.put_u64(self.timeout_ms);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            reply_message: Message::decode(r)?,
            sender_id: SenderId(r.get_u64()?),
            timeout_ms: r.get_u64()?,
        })
    }
}
wire_record!(MessageReplyRecord, 17);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReplyAsyncRecord {
    pub source: Source,
    pub reply_message: Message,
    pub sender_id: SenderId,
    pub timeout_ms: u64,
    pub invocation: u64,
}

impl MessageReplyAsyncRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.reply_message.encode(w);
        w.put_u64(self.sender_id.0);
        w.put_u64(self.timeout_ms);
        w.put_u64(self.invocation);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            reply_message: Message::decode(r)?,
            sender_id: SenderId(r.get_u64()?),
            timeout_ms: r.get_u64()?,
            invocation: r.get_u64()?,
        })
    }
}
wire_record!(MessageReplyAsyncRecord, 18);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueCapacityThresholdsSetRecord {
    pub source: Source,
    pub name: Name,
    pub queue_id: QueueId,
    pub thresholds: [Thresholds; 4],
}

impl QueueCapacityThresholdsSetRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.name.encode(w);
        w.put_u32(self.queue_id.0);
        for t in &self.thresholds {
            encode_thresholds(t, w);
        }
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        let source = decode_source(r)?;
        let name = Name::decode(r)?;
        let queue_id = QueueId(r.get_u32()?);
        let mut thresholds = [Thresholds::default(); 4];
        for t in thresholds.iter_mut() {
            *t = decode_thresholds(r)?;
        }
        Ok(Self {
            source,
            name,
            queue_id,
            thresholds,
        })
    }
}
wire_record!(QueueCapacityThresholdsSetRecord, 19);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueCapacityThresholdsGetRecord {
    pub source: Source,
    pub name: Name,
    pub queue_id: QueueId,
}

impl QueueCapacityThresholdsGetRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        self.name.encode(w);
        w.put_u32(self.queue_id.0);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            name: Name::decode(r)?,
            queue_id: QueueId(r.get_u32()?),
        })
    }
}
wire_record!(QueueCapacityThresholdsGetRecord, 20);

/// Retention-timer expiry, broadcast by the lowest-id node (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueTimeoutRecord {
    pub queue_id: QueueId,
}

impl QueueTimeoutRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        w.put_u32(self.queue_id.0);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            queue_id: QueueId(r.get_u32()?),
        })
    }
}
wire_record!(QueueTimeoutRecord, 21);

/// `MessageGet` timeout, broadcast by the originator (spec.md §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageGetTimeoutRecord {
    pub source: Source,
    pub queue_id: QueueId,
}

impl MessageGetTimeoutRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        w.put_u32(self.queue_id.0);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            queue_id: QueueId(r.get_u32()?),
        })
    }
}
wire_record!(MessageGetTimeoutRecord, 22);

/// `MessageSendReceive` timeout, broadcast by the originator (spec.md §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceiveTimeoutRecord {
    pub source: Source,
    pub sender_id: SenderId,
}

impl SendReceiveTimeoutRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        encode_source(&self.source, w);
        w.put_u64(self.sender_id.0);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            source: decode_source(r)?,
            sender_id: SenderId(r.get_u64()?),
        })
    }
}
wire_record!(SendReceiveTimeoutRecord, 23);

/// Every broadcastable executive operation, used to route a delivered
/// payload without the caller needing to know its concrete type up
/// front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutiveRecord {
    QueueOpen(QueueOpenRecord),
    QueueOpenAsync(QueueOpenAsyncRecord),
    QueueClose(QueueCloseRecord),
    QueueStatusGet(QueueStatusGetRecord),
    QueueRetentionTimeSet(QueueRetentionTimeSetRecord),
    QueueUnlink(QueueUnlinkRecord),
    QueueGroupCreate(QueueGroupCreateRecord),
    QueueGroupInsert(QueueGroupInsertRecord),
    QueueGroupRemove(QueueGroupRemoveRecord),
    QueueGroupDelete(QueueGroupDeleteRecord),
    QueueGroupNotificationFree(QueueGroupNotificationFreeRecord),
    MessageSend(MessageSendRecord),
    MessageSendAsync(MessageSendAsyncRecord),
    MessageGet(MessageGetRecord),
    MessageCancel(MessageCancelRecord),
    MessageSendReceive(MessageSendReceiveRecord),
    MessageReply(MessageReplyRecord),
    MessageReplyAsync(MessageReplyAsyncRecord),
    QueueCapacityThresholdsSet(QueueCapacityThresholdsSetRecord),
    QueueCapacityThresholdsGet(QueueCapacityThresholdsGetRecord),
    QueueTimeout(QueueTimeoutRecord),
    MessageGetTimeout(MessageGetTimeoutRecord),
    SendReceiveTimeout(SendReceiveTimeoutRecord),
}

/// Peek the record id header without consuming the caller's buffer, then
/// decode into the matching variant.
pub fn decode_executive_record(bytes: &[u8]) -> Result<ExecutiveRecord> {
    let id = WireReader::new(bytes).get_u32()?;
    Ok(match id {
        QueueOpenRecord::RECORD_ID => ExecutiveRecord::QueueOpen(QueueOpenRecord::from_wire(bytes)?),
        QueueOpenAsyncRecord::RECORD_ID => {
            ExecutiveRecord::QueueOpenAsync(QueueOpenAsyncRecord::from_wire(bytes)?)
        }
        QueueCloseRecord::RECORD_ID => ExecutiveRecord::QueueClose(QueueCloseRecord::from_wire(bytes)?),
        QueueStatusGetRecord::RECORD_ID => {
            ExecutiveRecord::QueueStatusGet(QueueStatusGetRecord::from_wire(bytes)?)
        }
        QueueRetentionTimeSetRecord::RECORD_ID => {
            ExecutiveRecord::QueueRetentionTimeSet(QueueRetentionTimeSetRecord::from_wire(bytes)?)
        }
        QueueUnlinkRecord::RECORD_ID => ExecutiveRecord::QueueUnlink(QueueUnlinkRecord::from_wire(bytes)?),
        QueueGroupCreateRecord::RECORD_ID => {
            ExecutiveRecord::QueueGroupCreate(QueueGroupCreateRecord::from_wire(bytes)?)
        }
        QueueGroupInsertRecord::RECORD_ID => {
            ExecutiveRecord::QueueGroupInsert(QueueGroupInsertRecord::from_wire(bytes)?)
        }
        QueueGroupRemoveRecord::RECORD_ID => {
            ExecutiveRecord::QueueGroupRemove(QueueGroupRemoveRecord::from_wire(bytes)?)
        }
        QueueGroupDeleteRecord::RECORD_ID => {
            ExecutiveRecord::QueueGroupDelete(QueueGroupDeleteRecord::from_wire(bytes)?)
        }
        QueueGroupNotificationFreeRecord::RECORD_ID => {
            ExecutiveRecord::QueueGroupNotificationFree(QueueGroupNotificationFreeRecord::from_wire(bytes)?)
        }
        MessageSendRecord::RECORD_ID => ExecutiveRecord::MessageSend(MessageSendRecord::from_wire(bytes)?),
        MessageSendAsyncRecord::RECORD_ID => {
            ExecutiveRecord::MessageSendAsync(MessageSendAsyncRecord::from_wire(bytes)?)
        }
        MessageGetRecord::RECORD_ID => ExecutiveRecord::MessageGet(MessageGetRecord::from_wire(bytes)?),
        MessageCancelRecord::RECORD_ID => {
            ExecutiveRecord::MessageCancel(MessageCancelRecord::from_wire(bytes)?)
        }
        MessageSendReceiveRecord::RECORD_ID => {
            ExecutiveRecord::MessageSendReceive(MessageSendReceiveRecord::from_wire(bytes)?)
        }
        MessageReplyRecord::RECORD_ID => ExecutiveRecord::MessageReply(MessageReplyRecord::from_wire(bytes)?),
        MessageReplyAsyncRecord::RECORD_ID => {
            ExecutiveRecord::MessageReplyAsync(MessageReplyAsyncRecord::from_wire(bytes)?)
        }
        QueueCapacityThresholdsSetRecord::RECORD_ID => ExecutiveRecord::QueueCapacityThresholdsSet(
            QueueCapacityThresholdsSetRecord::from_wire(bytes)?,
        ),
        QueueCapacityThresholdsGetRecord::RECORD_ID => ExecutiveRecord::QueueCapacityThresholdsGet(
            QueueCapacityThresholdsGetRecord::from_wire(bytes)?,
        ),
        QueueTimeoutRecord::RECORD_ID => ExecutiveRecord::QueueTimeout(QueueTimeoutRecord::from_wire(bytes)?),
        MessageGetTimeoutRecord::RECORD_ID => {
            ExecutiveRecord::MessageGetTimeout(MessageGetTimeoutRecord::from_wire(bytes)?)
        }
        SendReceiveTimeoutRecord::RECORD_ID => {
            ExecutiveRecord::SendReceiveTimeout(SendReceiveTimeoutRecord::from_wire(bytes)?)
        }
        other => return Err(anyhow!("unknown executive record id {other}")),
    })
}

// --- Synchronization engine records (spec.md §4.3) ---------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncQueueRecord {
    pub ring_id: RingId,
    pub queue_id: QueueId,
    pub name: Name,
    pub creation_attrs: CreationAttrs,
    pub open_flags: OpenFlags,
    pub unlink_flag: bool,
    pub close_time: Option<i64>,
}

impl SyncQueueRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        w.put_u64(self.ring_id.0);
        w.put_u32(self.queue_id.0);
        self.name.encode(w);
        encode_creation_attrs(&self.creation_attrs, w);
        encode_open_flags(&self.open_flags, w);
        w.put_u8(self.unlink_flag as u8);
        match self.close_time {
            Some(t) => {
                w.put_u8(1);
                w.put_i64(t);
            }
            None => w.put_u8(0),
        }
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        let ring_id = RingId(r.get_u64()?);
        let queue_id = QueueId(r.get_u32()?);
        let name = Name::decode(r)?;
        let creation_attrs = decode_creation_attrs(r)?;
        let open_flags = decode_open_flags(r)?;
        let unlink_flag = r.get_u8()? != 0;
        let close_time = if r.get_u8()? == 1 {
            Some(r.get_i64()?)
        } else {
            None
        };
        Ok(Self {
            ring_id,
            queue_id,
            name,
            creation_attrs,
            open_flags,
            unlink_flag,
            close_time,
        })
    }
}
wire_record!(SyncQueueRecord, 100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncQueueRefcountRecord {
    pub ring_id: RingId,
    pub queue_id: QueueId,
    pub refcounts: Vec<(NodeId, u32)>,
}

impl SyncQueueRefcountRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        w.put_u64(self.ring_id.0);
        w.put_u32(self.queue_id.0);
        w.put_u32(self.refcounts.len() as u32);
        for (node_id, count) in &self.refcounts {
            w.put_u32(*node_id);
            w.put_u32(*count);
        }
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        let ring_id = RingId(r.get_u64()?);
        let queue_id = QueueId(r.get_u32()?);
        let n = r.get_u32()? as usize;
        let mut refcounts = Vec::with_capacity(n);
        for _ in 0..n {
            let node_id = r.get_u32()?;
            let count = r.get_u32()?;
            refcounts.push((node_id, count));
        }
        Ok(Self {
            ring_id,
            queue_id,
            refcounts,
        })
    }
}
wire_record!(SyncQueueRefcountRecord, 101);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncQueueMessageRecord {
    pub ring_id: RingId,
    pub queue_id: QueueId,
    pub send_time: i64,
    pub sender_id: Option<SenderId>,
    pub message: Message,
}

impl SyncQueueMessageRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        w.put_u64(self.ring_id.0);
        w.put_u32(self.queue_id.0);
        w.put_i64(self.send_time);
        encode_opt_sender_id(&self.sender_id, w);
        self.message.encode(w);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            ring_id: RingId(r.get_u64()?),
            queue_id: QueueId(r.get_u32()?),
            send_time: r.get_i64()?,
            sender_id: decode_opt_sender_id(r)?,
            message: Message::decode(r)?,
        })
    }
}
wire_record!(SyncQueueMessageRecord, 102);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncGroupRecord {
    pub ring_id: RingId,
    pub group_id: GroupId,
    pub name: Name,
    pub policy: GroupPolicy,
}

impl SyncGroupRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        w.put_u64(self.ring_id.0);
        w.put_u32(self.group_id.0);
        self.name.encode(w);
        encode_policy(self.policy, w);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            ring_id: RingId(r.get_u64()?),
            group_id: GroupId(r.get_u32()?),
            name: Name::decode(r)?,
            policy: decode_policy(r)?,
        })
    }
}
wire_record!(SyncGroupRecord, 103);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncGroupMemberRecord {
    pub ring_id: RingId,
    pub group_id: GroupId,
    pub queue_id: QueueId,
}

impl SyncGroupMemberRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        w.put_u64(self.ring_id.0);
        w.put_u32(self.group_id.0);
        w.put_u32(self.queue_id.0);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            ring_id: RingId(r.get_u64()?),
            group_id: GroupId(r.get_u32()?),
            queue_id: QueueId(r.get_u32()?),
        })
    }
}
wire_record!(SyncGroupMemberRecord, 104);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReplyRecord {
    pub ring_id: RingId,
    pub sender_id: SenderId,
    pub source: Source,
    pub reply_size_limit: u64,
}

impl SyncReplyRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        w.put_u64(self.ring_id.0);
        w.put_u64(self.sender_id.0);
        encode_source(&self.source, w);
        w.put_u64(self.reply_size_limit);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            ring_id: RingId(r.get_u64()?),
            sender_id: SenderId(r.get_u64()?),
            source: decode_source(r)?,
            reply_size_limit: r.get_u64()?,
        })
    }
}
wire_record!(SyncReplyRecord, 105);

/// One outstanding `MessageGet` with no message available yet, streamed so
/// a follower's rebuilt `Queue::pending_list` matches spec.md §4.3's
/// carry-over rule instead of silently dropping every blocked receiver on
/// every membership change (§3 `PendingReceive`, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPendingReceiveRecord {
    pub ring_id: RingId,
    pub queue_id: QueueId,
    pub source: Source,
}

impl SyncPendingReceiveRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        w.put_u64(self.ring_id.0);
        w.put_u32(self.queue_id.0);
        encode_source(&self.source, w);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            ring_id: RingId(r.get_u64()?),
            queue_id: QueueId(r.get_u32()?),
            source: decode_source(r)?,
        })
    }
}
wire_record!(SyncPendingReceiveRecord, 107);

/// Marks the end of one node's sync stream for a given ring (see
/// `sync_engine::SyncEngine`). Not part of the original service's wire
/// protocol; §4.3 describes completion as "`sync_process` reports
/// completion" without specifying how a follower detects that over an
/// async transport, so this implementation adds one explicit terminal
/// record rather than inferring completion from silence (recorded as an
/// Open Question decision in DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCompleteRecord {
    pub ring_id: RingId,
}

impl SyncCompleteRecord {
    fn encode_body(&self, w: &mut WireWriter) {
        w.put_u64(self.ring_id.0);
    }

    fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            ring_id: RingId(r.get_u64()?),
        })
    }
}
wire_record!(SyncCompleteRecord, 106);

/// Every broadcastable synchronization record (spec.md §4.3), analogous
/// to `ExecutiveRecord` for the sync phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRecord {
    Queue(SyncQueueRecord),
    QueueRefcount(SyncQueueRefcountRecord),
    QueueMessage(SyncQueueMessageRecord),
    Group(SyncGroupRecord),
    GroupMember(SyncGroupMemberRecord),
    Reply(SyncReplyRecord),
    PendingReceive(SyncPendingReceiveRecord),
    Complete(SyncCompleteRecord),
}

pub fn decode_sync_record(bytes: &[u8]) -> Result<SyncRecord> {
    let id = WireReader::new(bytes).get_u32()?;
    Ok(match id {
        SyncQueueRecord::RECORD_ID => SyncRecord::Queue(SyncQueueRecord::from_wire(bytes)?),
        SyncQueueRefcountRecord::RECORD_ID => {
            SyncRecord::QueueRefcount(SyncQueueRefcountRecord::from_wire(bytes)?)
        }
        SyncQueueMessageRecord::RECORD_ID => {
            SyncRecord::QueueMessage(SyncQueueMessageRecord::from_wire(bytes)?)
        }
        SyncGroupRecord::RECORD_ID => SyncRecord::Group(SyncGroupRecord::from_wire(bytes)?),
        SyncGroupMemberRecord::RECORD_ID => {
            SyncRecord::GroupMember(SyncGroupMemberRecord::from_wire(bytes)?)
        }
        SyncReplyRecord::RECORD_ID => SyncRecord::Reply(SyncReplyRecord::from_wire(bytes)?),
        SyncPendingReceiveRecord::RECORD_ID => {
            SyncRecord::PendingReceive(SyncPendingReceiveRecord::from_wire(bytes)?)
        }
        SyncCompleteRecord::RECORD_ID => SyncRecord::Complete(SyncCompleteRecord::from_wire(bytes)?),
        other => return Err(anyhow!("unknown sync record id {other}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Priority;

    fn source() -> Source {
        Source::new(1, 7)
    }

    #[test]
    fn queue_open_round_trips_with_and_without_attrs() {
        let with_attrs = QueueOpenRecord {
            source: source(),
            name: "q1".into(),
            create_attrs: Some(CreationAttrs {
                persistent: false,
                retention_time: Duration::from_secs(5),
                sizes: [100, 100, 100, 100],
            }),
            flags: OpenFlags {
                create: true,
                receive_callback: false,
                empty: false,
            },
            timeout_ms: 1000,
        };
        let bytes = with_attrs.to_wire();
        assert_eq!(QueueOpenRecord::from_wire(&bytes).unwrap(), with_attrs);

        let without_attrs = QueueOpenRecord {
            create_attrs: None,
            ..with_attrs
        };
        let bytes = without_attrs.to_wire();
        assert_eq!(QueueOpenRecord::from_wire(&bytes).unwrap(), without_attrs);
    }

    #[test]
    fn message_send_round_trips_group_and_queue_destinations() {
        let msg = Message::new(1, 1, Priority::new(0).unwrap(), b"hi".to_vec()).unwrap();
        let to_group = MessageSendRecord {
            source: source(),
            dest: Destination::Group("g".into()),
            timeout_ms: 500,
            message: msg.clone(),
        };
        let bytes = to_group.to_wire();
        assert_eq!(MessageSendRecord::from_wire(&bytes).unwrap(), to_group);

        let to_queue = MessageSendRecord {
            dest: Destination::Queue("q".into()),
            ..to_group
        };
        let bytes = to_queue.to_wire();
        assert_eq!(MessageSendRecord::from_wire(&bytes).unwrap(), to_queue);
    }

    #[test]
    fn decode_executive_record_routes_by_id() {
        let record = QueueCloseRecord {
            source: source(),
            name: "q".into(),
            queue_id: QueueId(3),
            close_time_ns: 123,
        };
        let bytes = record.to_wire();
        match decode_executive_record(&bytes).unwrap() {
            ExecutiveRecord::QueueClose(decoded) => assert_eq!(decoded, record),
            other => panic!("expected QueueClose, got {other:?}"),
        }
    }

    #[test]
    fn decode_sync_record_routes_by_id() {
        let record = SyncGroupMemberRecord {
            ring_id: RingId(9),
            group_id: GroupId(1),
            queue_id: QueueId(2),
        };
        let bytes = record.to_wire();
        match decode_sync_record(&bytes).unwrap() {
            SyncRecord::GroupMember(decoded) => assert_eq!(decoded, record),
            other => panic!("expected GroupMember, got {other:?}"),
        }
    }

    #[test]
    fn unknown_record_id_is_an_error() {
        let mut w = WireWriter::new();
        w.put_u32(9999);
        let bytes = w.into_vec();
        assert!(decode_executive_record(&bytes).is_err());
    }
}
