//! `Message`: `{ type, version, priority, size, data }` (spec.md §3).

use super::cursor::{WireReader, WireWriter};
use crate::limits::MAX_MESSAGE_SIZE;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Message priority, 0 (highest) through 3 (lowest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority(u8);

impl Priority {
    pub fn new(value: u8) -> Result<Self> {
        if value > 3 {
            return Err(anyhow!("priority {} out of range 0..=3", value));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn as_index(self) -> usize {
        self.0 as usize
    }

    /// Iterate priorities from highest (0) to lowest (3), the order a
    /// receive drains them in (spec.md §4.1 "message ordering guarantee").
    pub fn all() -> impl Iterator<Item = Priority> {
        (0..crate::limits::PRIORITY_LEVELS as u8).map(|p| Priority(p))
    }
}

/// Payload message carried by queues and sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub msg_type: u32,
    pub version: u32,
    pub priority: Priority,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(msg_type: u32, version: u32, priority: Priority, data: Vec<u8>) -> Result<Self> {
        if data.len() as u64 > MAX_MESSAGE_SIZE {
            return Err(anyhow!(
                "message of {} bytes exceeds the {}-byte limit",
                data.len(),
                MAX_MESSAGE_SIZE
            ));
        }
        Ok(Self {
            msg_type,
            version,
            priority,
            data,
        })
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn encode(&self, w: &mut WireWriter) {
        w.put_u32(self.msg_type);
        w.put_u32(self.version);
        w.put_u8(self.priority.get());
        w.put_u64(self.data.len() as u64);
        w.put_bytes(&self.data);
    }

    pub fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let msg_type = r.get_u32()?;
        let version = r.get_u32()?;
        let priority = Priority::new(r.get_u8()?)?;
        let size = r.get_u64()? as usize;
        if size as u64 > MAX_MESSAGE_SIZE {
            return Err(anyhow!("decoded message size {} exceeds limit", size));
        }
        let data = r.get_bytes(size)?.to_vec();
        Ok(Self {
            msg_type,
            version,
            priority,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversized_payload() {
        let data = vec![0u8; MAX_MESSAGE_SIZE as usize + 1];
        assert!(Message::new(1, 1, Priority::new(0).unwrap(), data).is_err());
    }

    #[test]
    fn priority_out_of_range_is_rejected() {
        assert!(Priority::new(4).is_err());
    }

    #[test]
    fn wire_round_trip() {
        let msg = Message::new(7, 1, Priority::new(2).unwrap(), b"hello".to_vec()).unwrap();
        let mut w = WireWriter::new();
        msg.encode(&mut w);
        let bytes = w.into_vec();
        let mut r = WireReader::new(&bytes);
        let decoded = Message::decode(&mut r).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn priority_all_is_highest_first() {
        let order: Vec<u8> = Priority::all().map(|p| p.get()).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }
}
