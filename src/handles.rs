//! Per-session table of open file and directory handles.
//!
//! Handles are allocated from a monotonic 32-bit counter; on the wire they
//! travel as the hex rendering of the counter's four big-endian bytes, which
//! keeps them opaque, fixed-width, and valid UTF-8 for the protocol framing.

use std::collections::HashMap;

use crate::namespace::Entry;

#[derive(Debug)]
pub struct ReadState {
    pub virtual_path: String,
    pub key: String,
    pub size: u64,
    pub read_at_eof: bool,
}

#[derive(Debug)]
pub struct WriteState {
    pub virtual_path: String,
    pub key: String,
    pub buffer: Vec<u8>,
}

#[derive(Debug)]
pub struct DirState {
    pub virtual_path: String,
    pub entries: Vec<Entry>,
    pub emitted: bool,
}

#[derive(Debug)]
pub enum HandleState {
    Read(ReadState),
    Write(WriteState),
    Dir(DirState),
}

#[derive(Default)]
pub struct HandleTable {
    next: u32,
    open: HashMap<u32, HandleState>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, state: HandleState) -> String {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        self.open.insert(id, state);
        encode(id)
    }

    pub fn get_mut(&mut self, handle: &str) -> Option<&mut HandleState> {
        let id = decode(handle)?;
        self.open.get_mut(&id)
    }

    pub fn remove(&mut self, handle: &str) -> Option<HandleState> {
        let id = decode(handle)?;
        self.open.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

fn encode(id: u32) -> String {
    let bytes = id.to_be_bytes();
    format!(
        "{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3]
    )
}

fn decode(handle: &str) -> Option<u32> {
    if handle.len() != 8 {
        return None;
    }
    u32::from_str_radix(handle, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique_and_fixed_width() {
        let mut table = HandleTable::new();
        let a = table.insert(HandleState::Write(WriteState {
            virtual_path: "/a".into(),
            key: "users/u/a".into(),
            buffer: Vec::new(),
        }));
        let b = table.insert(HandleState::Dir(DirState {
            virtual_path: "/".into(),
            entries: Vec::new(),
            emitted: false,
        }));
        assert_ne!(a, b);
        assert_eq!(a.len(), 8);
        assert_eq!(b.len(), 8);
    }

    #[test]
    fn lookup_and_remove_round_trip() {
        let mut table = HandleTable::new();
        let h = table.insert(HandleState::Read(ReadState {
            virtual_path: "/x".into(),
            key: "users/u/x".into(),
            size: 4,
            read_at_eof: false,
        }));
        assert!(matches!(table.get_mut(&h), Some(HandleState::Read(_))));
        assert!(table.remove(&h).is_some());
        assert!(table.get_mut(&h).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn malformed_handles_miss() {
        let mut table = HandleTable::new();
        assert!(table.get_mut("zz").is_none());
        assert!(table.get_mut("not-a-handle").is_none());
        assert!(table.remove("00000042").is_none());
    }
}
