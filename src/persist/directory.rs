//! Pointer directory: one generation's persist-id → byte-offset mapping.
//!
//! Payload format is a sequence of groups. Each group opens with a 4-byte
//! info word (low 20 bits: base persist id, high 12 bits: entry count)
//! followed by `count` little-endian u32 offsets, one per consecutive id.

use crate::consts::RecordType;
use crate::error::{Error, Result};
use crate::record::Record;
use std::collections::BTreeMap;
use std::collections::HashMap;

/// Incremental (or, after normalization, complete) persist-id → offset map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistDirectory {
    entries: BTreeMap<u32, u32>,
}

impl PersistDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a directory from a pointer-directory record (full or
    /// incremental block).
    pub fn from_record(record: &Record) -> Result<Self> {
        match record.record_type() {
            RecordType::PersistPtrFullBlock | RecordType::PersistPtrIncrementalBlock => {}
            other => {
                return Err(Error::corrupt(format!(
                    "expected a pointer directory, got {other:?}"
                )));
            }
        }
        let payload = record
            .payload()
            .ok_or_else(|| Error::corrupt("pointer directory must be an atom"))?;
        Ok(Self::parse_payload(payload))
    }

    /// Parse the raw group payload. A trailing short group ends the walk;
    /// everything read up to that point is kept.
    pub fn parse_payload(payload: &[u8]) -> Self {
        let mut entries = BTreeMap::new();
        let mut chunks = payload.chunks_exact(4);

        'groups: while let Some(info_bytes) = chunks.next() {
            let info = u32::from_le_bytes(info_bytes.try_into().unwrap());
            let base_id = info & 0x000F_FFFF;
            let count = (info >> 20) & 0x0FFF;
            for i in 0..count {
                match chunks.next() {
                    Some(offset_bytes) => {
                        let offset = u32::from_le_bytes(offset_bytes.try_into().unwrap());
                        entries.insert(base_id + i, offset);
                    }
                    None => break 'groups,
                }
            }
        }

        Self { entries }
    }

    /// Serialize to the group payload, emitting maximal contiguous runs.
    pub fn build_payload(&self) -> Vec<u8> {
        let ids: Vec<u32> = self.entries.keys().copied().collect();
        let mut payload = Vec::with_capacity(self.entries.len() * 8);

        let mut i = 0;
        while i < ids.len() {
            let base = ids[i];
            let mut j = i + 1;
            while j < ids.len() && ids[j] == ids[j - 1] + 1 && (j - i) < 0x0FFF {
                j += 1;
            }
            let count = (j - i) as u32;
            let info = ((count & 0x0FFF) << 20) | (base & 0x000F_FFFF);
            payload.extend_from_slice(&info.to_le_bytes());
            for id in &ids[i..j] {
                payload.extend_from_slice(&self.entries[id].to_le_bytes());
            }
            i = j;
        }

        payload
    }

    /// Wrap the payload in an incremental-block record.
    pub fn to_record(&self) -> Record {
        Record::atom(
            RecordType::PersistPtrIncrementalBlock as u16,
            0,
            0,
            self.build_payload(),
        )
    }

    /// Wrap the payload in a full-block record. Emitted when the directory
    /// carries a complete mapping, as after history normalization.
    pub fn to_full_record(&self) -> Record {
        Record::atom(
            RecordType::PersistPtrFullBlock as u16,
            0,
            0,
            self.build_payload(),
        )
    }

    /// Rewrite every offset through an old → new map. Offsets the map does
    /// not know (stale entries of superseded generations) stay untouched.
    pub fn patch_offsets(&mut self, old_to_new: &HashMap<u32, u32>) {
        for offset in self.entries.values_mut() {
            if let Some(new) = old_to_new.get(offset) {
                *offset = *new;
            }
        }
    }

    /// Byte offset recorded for `persist_id`.
    #[inline]
    pub fn get(&self, persist_id: u32) -> Option<u32> {
        self.entries.get(&persist_id).copied()
    }

    /// Insert or replace one mapping.
    #[inline]
    pub fn insert(&mut self, persist_id: u32, offset: u32) {
        self.entries.insert(persist_id, offset);
    }

    /// Remove one mapping.
    #[inline]
    pub fn remove(&mut self, persist_id: u32) -> Option<u32> {
        self.entries.remove(&persist_id)
    }

    /// Iterate (persist_id, offset) pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.entries.iter().map(|(&id, &off)| (id, off))
    }

    /// The smallest offset any entry points at.
    pub fn min_offset(&self) -> Option<u32> {
        self.entries.values().copied().min()
    }

    /// Number of mappings.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the directory holds no mappings.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Extend<(u32, u32)> for PersistDirectory {
    fn extend<T: IntoIterator<Item = (u32, u32)>>(&mut self, iter: T) {
        self.entries.extend(iter);
    }
}
