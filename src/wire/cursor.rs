//! Minimal fixed-endian byte cursor for wire record encoding.
//!
//! This plays the same role `read_message`/`write_message` play in the
//! teacher's `ipc/unix_domain_socket.rs`: a small, explicit, hand-rolled
//! framing helper rather than a derive macro, so every field's byte layout
//! is visible at the call site.

use anyhow::{anyhow, Result};

/// Append-only little-endian byte writer.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Sequential little-endian byte reader over a borrowed slice.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(anyhow!(
                "wire record truncated: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.buf.len()
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(i64::from_le_bytes(arr))
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// A type with a fixed, declarative wire layout keyed by a stable record
/// id. Implementors centralize their own encode/decode so no call site
/// needs ad-hoc byte twiddling (see SPEC_FULL.md §3.1, §9).
pub trait WireRecord: Sized {
    /// Stable identifier carried in the record header, used by
    /// `executive.rs`/`sync_engine.rs` to route delivered bytes without
    /// first fully decoding them.
    const RECORD_ID: u32;

    fn encode(&self, w: &mut WireWriter);
    fn decode(r: &mut WireReader<'_>) -> Result<Self>;

    fn to_wire(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_u32(Self::RECORD_ID);
        self.encode(&mut w);
        w.into_vec()
    }

    fn from_wire(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let id = r.get_u32()?;
        if id != Self::RECORD_ID {
            return Err(anyhow!(
                "wire record id mismatch: expected {}, got {}",
                Self::RECORD_ID,
                id
            ));
        }
        Self::decode(&mut r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitive_fields() {
        let mut w = WireWriter::new();
        w.put_u8(7);
        w.put_u16(300);
        w.put_u32(70_000);
        w.put_u64(5_000_000_000);
        w.put_i64(-42);
        w.put_bytes(b"hi");
        let bytes = w.into_vec();

        let mut r = WireReader::new(&bytes);
        assert_eq!(r.get_u8().unwrap(), 7);
        assert_eq!(r.get_u16().unwrap(), 300);
        assert_eq!(r.get_u32().unwrap(), 70_000);
        assert_eq!(r.get_u64().unwrap(), 5_000_000_000);
        assert_eq!(r.get_i64().unwrap(), -42);
        assert_eq!(r.get_bytes(2).unwrap(), b"hi");
    }

    #[test]
    fn truncated_buffer_is_an_error() {
        let mut r = WireReader::new(&[1, 2]);
        assert!(r.get_u32().is_err());
    }
}
