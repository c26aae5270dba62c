//! Generation record ("user edit atom"): one incremental save's bookkeeping.
//!
//! Generations form a backward-linked list through `prev_edit_offset`
//! (0 marks the oldest). Each one names its pointer directory, the highest
//! persist id allocated so far, and — in encrypted documents — the persist
//! id of the encryption descriptor.

use crate::consts::{RecordType, USER_EDIT_PAYLOAD, USER_EDIT_PAYLOAD_ENCRYPTED};
use crate::error::{Error, Result};
use crate::record::Record;
use std::collections::HashMap;

/// Sentinel serialized for "no encryption session".
const NO_ENCRYPT_SESSION: u32 = u32::MAX;

/// Opaque format version stamp emitted by 97-2003 era writers.
const PPT_VERSION: u32 = 0x0000_03F4;

/// One edit generation's bookkeeping record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEditAtom {
    /// lastViewedSlideID (carried, not interpreted)
    pub last_viewed_slide_id: u32,
    /// Format version stamp (carried, not interpreted)
    pub version: u32,
    /// Offset of the previous generation record; 0 for the oldest
    pub prev_edit_offset: u32,
    /// Offset of this generation's pointer directory
    pub persist_dir_offset: u32,
    /// Persist id of the document root record
    pub doc_persist_ref: u32,
    /// Highest persist id allocated by this generation
    pub max_persist_written: u32,
    /// lastView (carried, not interpreted)
    pub last_view_type: u16,
    /// Persist id of the encryption descriptor, if the document is encrypted
    pub encrypt_session_ref: Option<u32>,
}

impl UserEditAtom {
    /// A minimal first-generation atom.
    pub fn new(persist_dir_offset: u32, doc_persist_ref: u32, max_persist_written: u32) -> Self {
        Self {
            last_viewed_slide_id: 0,
            version: PPT_VERSION,
            prev_edit_offset: 0,
            persist_dir_offset,
            doc_persist_ref,
            max_persist_written,
            last_view_type: 1,
            encrypt_session_ref: None,
        }
    }

    /// Parse a generation record. Accepts the 28-byte payload and the
    /// 32-byte form with a trailing encryption-session reference.
    pub fn from_record(record: &Record) -> Result<Self> {
        if record.record_type() != RecordType::UserEditAtom {
            return Err(Error::corrupt(format!(
                "expected a generation record, got {:?}",
                record.record_type()
            )));
        }
        let payload = record
            .payload()
            .ok_or_else(|| Error::corrupt("generation record must be an atom"))?;
        Self::from_payload(payload)
    }

    /// Parse the payload bytes of a generation record.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() != USER_EDIT_PAYLOAD && payload.len() != USER_EDIT_PAYLOAD_ENCRYPTED {
            return Err(Error::corrupt(format!(
                "generation payload must be {USER_EDIT_PAYLOAD} or {USER_EDIT_PAYLOAD_ENCRYPTED} bytes, got {}",
                payload.len()
            )));
        }
        let u32_at = |i: usize| {
            u32::from_le_bytes([payload[i], payload[i + 1], payload[i + 2], payload[i + 3]])
        };
        let encrypt_session_ref = if payload.len() == USER_EDIT_PAYLOAD_ENCRYPTED {
            match u32_at(28) {
                NO_ENCRYPT_SESSION => None,
                id => Some(id),
            }
        } else {
            None
        };
        Ok(Self {
            last_viewed_slide_id: u32_at(0),
            version: u32_at(4),
            prev_edit_offset: u32_at(8),
            persist_dir_offset: u32_at(12),
            doc_persist_ref: u32_at(16),
            max_persist_written: u32_at(20),
            last_view_type: u16::from_le_bytes([payload[24], payload[25]]),
            encrypt_session_ref,
        })
    }

    /// Serialize back to a record. The encryption-session field is only
    /// emitted when a session exists, matching what mixed readers expect.
    pub fn to_record(&self) -> Record {
        let cap = if self.encrypt_session_ref.is_some() {
            USER_EDIT_PAYLOAD_ENCRYPTED
        } else {
            USER_EDIT_PAYLOAD
        };
        let mut data = Vec::with_capacity(cap);
        data.extend_from_slice(&self.last_viewed_slide_id.to_le_bytes());
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(&self.prev_edit_offset.to_le_bytes());
        data.extend_from_slice(&self.persist_dir_offset.to_le_bytes());
        data.extend_from_slice(&self.doc_persist_ref.to_le_bytes());
        data.extend_from_slice(&self.max_persist_written.to_le_bytes());
        data.extend_from_slice(&self.last_view_type.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        if let Some(id) = self.encrypt_session_ref {
            data.extend_from_slice(&id.to_le_bytes());
        }
        Record::atom(RecordType::UserEditAtom as u16, 0, 0, data)
    }

    /// Rewrite the two offset-valued fields through an old → new map.
    /// A previous-link of 0 is the oldest-generation sentinel, never an
    /// offset, and is left alone.
    pub fn patch_offsets(&mut self, old_to_new: &HashMap<u32, u32>) {
        if self.prev_edit_offset != 0
            && let Some(new) = old_to_new.get(&self.prev_edit_offset)
        {
            self.prev_edit_offset = *new;
        }
        if let Some(new) = old_to_new.get(&self.persist_dir_offset) {
            self.persist_dir_offset = *new;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_plain() {
        let atom = UserEditAtom::new(1000, 1, 7);
        let rec = atom.to_record();
        assert_eq!(rec.payload().unwrap().len(), USER_EDIT_PAYLOAD);
        assert_eq!(UserEditAtom::from_record(&rec).unwrap(), atom);
    }

    #[test]
    fn test_round_trip_with_session_ref() {
        let mut atom = UserEditAtom::new(64, 1, 9);
        atom.encrypt_session_ref = Some(9);
        let rec = atom.to_record();
        assert_eq!(rec.payload().unwrap().len(), USER_EDIT_PAYLOAD_ENCRYPTED);
        assert_eq!(UserEditAtom::from_record(&rec).unwrap(), atom);
    }

    #[test]
    fn test_minus_one_session_ref_reads_as_none() {
        let mut atom = UserEditAtom::new(64, 1, 9);
        atom.encrypt_session_ref = Some(3);
        let rec = atom.to_record();
        let mut payload = rec.payload().unwrap().to_vec();
        payload[28..32].copy_from_slice(&u32::MAX.to_le_bytes());
        let parsed = UserEditAtom::from_payload(&payload).unwrap();
        assert_eq!(parsed.encrypt_session_ref, None);
    }

    #[test]
    fn test_bad_payload_length() {
        assert!(UserEditAtom::from_payload(&[0u8; 27]).is_err());
        assert!(UserEditAtom::from_payload(&[0u8; 33]).is_err());
    }

    #[test]
    fn test_patch_offsets_spares_zero_prev_link() {
        let mut atom = UserEditAtom::new(100, 1, 2);
        let mut map = HashMap::new();
        map.insert(0u32, 555u32);
        map.insert(100u32, 140u32);

        atom.patch_offsets(&map);
        assert_eq!(atom.prev_edit_offset, 0);
        assert_eq!(atom.persist_dir_offset, 140);
    }
}
