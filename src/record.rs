//! Record codec for the primary document stream.
//!
//! Every record starts with an 8-byte little-endian header: a packed
//! version/instance word (low 4 bits version, high 12 bits instance), a
//! 2-byte type id, and a 4-byte payload length. Containers hold child
//! records, atoms hold raw bytes. Container classification is driven by the
//! static registry in [`crate::consts`]; ids the registry does not know are
//! kept as opaque atoms so their bytes survive a round trip verbatim.

use crate::consts::{MAX_RECORD_LENGTH, RECORD_HEADER_SIZE, RecordType, is_container_type};
use crate::error::{Error, Result};

/// Parsed form of the 8-byte record header (length is derived on encode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Record version (4 bits)
    pub version: u8,
    /// Record instance (12 bits)
    pub instance: u16,
    /// Raw record type id
    pub type_id: u16,
}

impl RecordHeader {
    /// Create a header, masking version and instance to their field widths.
    pub fn new(version: u8, instance: u16, type_id: u16) -> Self {
        Self { version: version & 0x0F, instance: instance & 0x0FFF, type_id }
    }

    /// Read a header and its declared payload length at `offset`.
    pub fn read(data: &[u8], offset: usize) -> Result<(Self, u32)> {
        let end = offset
            .checked_add(RECORD_HEADER_SIZE)
            .ok_or_else(|| Error::corrupt("record offset overflow"))?;
        if end > data.len() {
            return Err(Error::corrupt(format!(
                "not enough data for record header at offset {offset}"
            )));
        }
        let ver_inst = u16::from_le_bytes([data[offset], data[offset + 1]]);
        let type_id = u16::from_le_bytes([data[offset + 2], data[offset + 3]]);
        let length = u32::from_le_bytes([
            data[offset + 4],
            data[offset + 5],
            data[offset + 6],
            data[offset + 7],
        ]);
        let header = Self {
            version: (ver_inst & 0x000F) as u8,
            instance: (ver_inst >> 4) & 0x0FFF,
            type_id,
        };
        Ok((header, length))
    }

    /// Append the 8-byte header with the given payload length.
    pub fn write(&self, length: u32, sink: &mut Vec<u8>) {
        let ver_inst = (self.version as u16 & 0x0F) | ((self.instance & 0x0FFF) << 4);
        sink.extend_from_slice(&ver_inst.to_le_bytes());
        sink.extend_from_slice(&self.type_id.to_le_bytes());
        sink.extend_from_slice(&length.to_le_bytes());
    }
}

/// Record payload: raw bytes for atoms, ordered children for containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBody {
    /// Atom payload, kept verbatim
    Atom(Vec<u8>),
    /// Ordered child records
    Container(Vec<Record>),
}

/// One record of the document stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record header
    pub header: RecordHeader,
    /// Atom payload or child records
    pub body: RecordBody,
}

impl Record {
    /// Create an atom record.
    pub fn atom(type_id: u16, version: u8, instance: u16, payload: Vec<u8>) -> Self {
        Self {
            header: RecordHeader::new(version, instance, type_id),
            body: RecordBody::Atom(payload),
        }
    }

    /// Create a container record. Containers carry version 0xF on disk.
    pub fn container(type_id: u16, instance: u16, children: Vec<Record>) -> Self {
        Self {
            header: RecordHeader::new(0x0F, instance, type_id),
            body: RecordBody::Container(children),
        }
    }

    /// The registry classification of this record's type id.
    #[inline]
    pub fn record_type(&self) -> RecordType {
        RecordType::from(self.header.type_id)
    }

    /// Decode one record at `offset`, returning it and the offset of the
    /// next record. Fails with `CorruptStream` if the declared length runs
    /// past the buffer or exceeds the sanity ceiling.
    pub fn decode(data: &[u8], offset: usize) -> Result<(Self, usize)> {
        let (header, length) = RecordHeader::read(data, offset)?;
        if length > MAX_RECORD_LENGTH {
            return Err(Error::corrupt(format!(
                "record type {} at offset {offset} declares implausible length {length}",
                header.type_id
            )));
        }
        let payload_start = offset + RECORD_HEADER_SIZE;
        let payload_end = payload_start + length as usize;
        if payload_end > data.len() {
            return Err(Error::corrupt(format!(
                "record type {} at offset {offset} overruns the stream ({} > {})",
                header.type_id,
                payload_end,
                data.len()
            )));
        }
        let payload = &data[payload_start..payload_end];

        let body = if is_container_type(header.type_id) {
            RecordBody::Container(Self::decode_children(payload)?)
        } else {
            RecordBody::Atom(payload.to_vec())
        };

        Ok((Self { header, body }, payload_end))
    }

    /// Decode the children of a container payload. The payload must consist
    /// of whole records with no slack.
    fn decode_children(payload: &[u8]) -> Result<Vec<Record>> {
        let mut children = Vec::new();
        let mut offset = 0;
        while offset < payload.len() {
            let (child, next) = Self::decode(payload, offset)?;
            children.push(child);
            offset = next;
        }
        Ok(children)
    }

    /// Encode this record, header first, into `sink`. Exact left inverse of
    /// [`Record::decode`]: container lengths are recomputed from the
    /// children, never trusted from a previous parse.
    pub fn encode(&self, sink: &mut Vec<u8>) {
        self.header.write(self.payload_len(), sink);
        match &self.body {
            RecordBody::Atom(payload) => sink.extend_from_slice(payload),
            RecordBody::Container(children) => {
                for child in children {
                    child.encode(sink);
                }
            }
        }
    }

    /// Encode into a fresh buffer.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode(&mut out);
        out
    }

    /// Serialized payload length (children included, headers excluded).
    pub fn payload_len(&self) -> u32 {
        match &self.body {
            RecordBody::Atom(payload) => payload.len() as u32,
            RecordBody::Container(children) => {
                children.iter().map(|c| c.encoded_len() as u32).sum()
            }
        }
    }

    /// Serialized size of the whole record, header included.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload_len() as usize
    }

    /// Atom payload bytes, if this record is an atom.
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.body {
            RecordBody::Atom(payload) => Some(payload),
            RecordBody::Container(_) => None,
        }
    }

    /// Child records, if this record is a container.
    pub fn children(&self) -> Option<&[Record]> {
        match &self.body {
            RecordBody::Container(children) => Some(children),
            RecordBody::Atom(_) => None,
        }
    }

    /// Find the first child of the given type.
    pub fn find_child(&self, record_type: RecordType) -> Option<&Record> {
        self.children()?.iter().find(|c| c.record_type() == record_type)
    }

    /// Find all children of the given type.
    pub fn find_children(&self, record_type: RecordType) -> Vec<&Record> {
        match self.children() {
            Some(children) => {
                children.iter().filter(|c| c.record_type() == record_type).collect()
            }
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_atom_round_trip() {
        let atom = Record::atom(RecordType::SlideAtom as u16, 1, 0, vec![1, 2, 3, 4]);
        let bytes = atom.encode_to_vec();
        assert_eq!(bytes.len(), 12);

        let (decoded, next) = Record::decode(&bytes, 0).unwrap();
        assert_eq!(next, bytes.len());
        assert_eq!(decoded, atom);
    }

    #[test]
    fn test_container_round_trip() {
        let slide = Record::container(
            RecordType::Slide as u16,
            0,
            vec![
                Record::atom(RecordType::SlideAtom as u16, 2, 0, vec![0u8; 24]),
                Record::atom(RecordType::ColorSchemeAtom as u16, 0, 1, vec![9, 9]),
            ],
        );
        let bytes = slide.encode_to_vec();
        // 8 header + (8 + 24) + (8 + 2)
        assert_eq!(bytes.len(), 50);

        let (decoded, _) = Record::decode(&bytes, 0).unwrap();
        assert_eq!(decoded, slide);
        assert_eq!(decoded.children().unwrap().len(), 2);
        assert!(decoded.find_child(RecordType::SlideAtom).is_some());
        assert!(decoded.find_child(RecordType::TextBytesAtom).is_none());
    }

    #[test]
    fn test_unknown_type_is_opaque_atom() {
        // 0xBEEF is not in the registry; the payload must come back verbatim
        // even though it happens to look like a record header itself.
        let payload = Record::atom(RecordType::SlideAtom as u16, 0, 0, vec![7]).encode_to_vec();
        let unknown = Record::atom(0xBEEF, 0, 0, payload.clone());
        let bytes = unknown.encode_to_vec();

        let (decoded, _) = Record::decode(&bytes, 0).unwrap();
        assert_eq!(decoded.record_type(), RecordType::Unknown);
        assert_eq!(decoded.payload(), Some(payload.as_slice()));
    }

    #[test]
    fn test_length_overrun_is_corrupt() {
        let mut bytes = Record::atom(1007, 0, 0, vec![1, 2, 3]).encode_to_vec();
        // Claim 100 bytes of payload while only 3 follow.
        bytes[4..8].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(Record::decode(&bytes, 0), Err(Error::CorruptStream(_))));
    }

    #[test]
    fn test_implausible_length_is_corrupt() {
        let mut bytes = vec![0u8; 16];
        bytes[4..8].copy_from_slice(&(MAX_RECORD_LENGTH + 1).to_le_bytes());
        assert!(matches!(Record::decode(&bytes, 0), Err(Error::CorruptStream(_))));
    }

    #[test]
    fn test_short_header_is_corrupt() {
        assert!(Record::decode(&[0u8; 5], 0).is_err());
        assert!(Record::decode(&[0u8; 16], 12).is_err());
    }

    #[test]
    fn test_version_instance_packing() {
        let rec = Record::atom(4001, 0x0F, 0x0ABC, vec![]);
        let bytes = rec.encode_to_vec();
        let (header, len) = RecordHeader::read(&bytes, 0).unwrap();
        assert_eq!(len, 0);
        assert_eq!(header.version, 0x0F);
        assert_eq!(header.instance, 0x0ABC);
        assert_eq!(header.type_id, 4001);
    }

    fn arb_record() -> impl Strategy<Value = Record> {
        let atom = (any::<u8>(), any::<u16>(), prop::collection::vec(any::<u8>(), 0..64))
            .prop_map(|(version, instance, payload)| {
                // An atom type id that is not in the container registry.
                Record::atom(RecordType::SlideAtom as u16, version, instance, payload)
            });
        atom.prop_recursive(3, 16, 4, |inner| {
            (any::<u16>(), prop::collection::vec(inner, 0..4)).prop_map(|(instance, children)| {
                Record::container(RecordType::Slide as u16, instance, children)
            })
        })
    }

    proptest! {
        #[test]
        fn prop_decode_is_left_inverse_of_encode(rec in arb_record()) {
            let bytes = rec.encode_to_vec();
            let (decoded, next) = Record::decode(&bytes, 0).unwrap();
            prop_assert_eq!(next, bytes.len());
            prop_assert_eq!(decoded.encode_to_vec(), bytes);
            prop_assert_eq!(decoded, rec);
        }
    }
}
