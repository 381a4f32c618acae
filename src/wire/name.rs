//! `Name`: a length-prefixed byte vector, max 256 bytes, compared by
//! length then content (spec.md §3).

use super::cursor::{WireReader, WireWriter};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Maximum length, in bytes, of a `Name`'s content.
pub const MAX_NAME_LENGTH: usize = 256;

#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Name {
    bytes: Vec<u8>,
}

impl Name {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() > MAX_NAME_LENGTH {
            return Err(anyhow!(
                "name of {} bytes exceeds the {}-byte limit",
                bytes.len(),
                MAX_NAME_LENGTH
            ));
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn encode(&self, w: &mut WireWriter) {
        w.put_u16(self.bytes.len() as u16);
        w.put_bytes(&self.bytes);
    }

    pub fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let len = r.get_u16()? as usize;
        if len > MAX_NAME_LENGTH {
            return Err(anyhow!("decoded name length {} exceeds limit", len));
        }
        let bytes = r.get_bytes(len)?.to_vec();
        Ok(Self { bytes })
    }
}

/// Compared by length then content, per spec.md §3.
impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes
            .len()
            .cmp(&other.bytes.len())
            .then_with(|| self.bytes.cmp(&other.bytes))
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.len() == other.bytes.len() && self.bytes == other.bytes
    }
}

impl std::hash::Hash for Name {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.bytes) {
            Ok(s) => write!(f, "{}", s),
            Err(_) => write!(f, "{:?}", self.bytes),
        }
    }
}

impl From<&str> for Name {
    /// Convenience conversion for tests and CLI use; panics if the
    /// string exceeds the 256-byte limit, mirroring how the teacher's
    /// `TransportConfig` builds fixed strings from literals.
    fn from(s: &str) -> Self {
        Name::new(s.as_bytes().to_vec()).expect("name literal exceeds 256 bytes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_length_then_content() {
        let short: Name = "ab".into();
        let long: Name = "aaa".into();
        assert!(short < long);

        let a: Name = "abc".into();
        let b: Name = "abd".into();
        assert!(a < b);
    }

    #[test]
    fn rejects_oversized_names() {
        let bytes = vec![0u8; MAX_NAME_LENGTH + 1];
        assert!(Name::new(bytes).is_err());
    }

    #[test]
    fn wire_round_trip() {
        let name: Name = "q1".into();
        let mut w = WireWriter::new();
        name.encode(&mut w);
        let bytes = w.into_vec();
        let mut r = WireReader::new(&bytes);
        let decoded = Name::decode(&mut r).unwrap();
        assert_eq!(name, decoded);
    }
}
