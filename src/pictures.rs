//! Auxiliary picture store: a flat concatenation of 8-byte-headed entries
//! with no directory. Entries are discovered by linear scan; a header whose
//! declared size runs past the stream ends enumeration early, keeping the
//! complete entries already read — partial picture data must not block
//! access to the rest of the document.

use crate::consts::{MAX_RECORD_LENGTH, RECORD_HEADER_SIZE};
use crate::crypto::{EncryptionSession, picture};
use crate::error::{Error, Result};
use crate::record::RecordHeader;

/// One picture entry: blip header plus raw image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureEntry {
    /// Entry header (type id and instance identify the blip kind)
    pub header: RecordHeader,
    /// Entry payload: UIDs, structural fields and image bytes, verbatim
    pub data: Vec<u8>,
}

impl PictureEntry {
    /// Serialized size, header included.
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.data.len()
    }
}

/// The parsed picture store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PictureStore {
    /// Entries in stream order
    pub entries: Vec<PictureEntry>,
}

impl PictureStore {
    /// Strict plaintext parse: truncation is an error.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::parse_inner(data, None, true)
    }

    /// Best-effort load, decrypting entries when a session is active.
    /// Truncation stops enumeration with a warning instead of failing.
    pub fn load(data: &[u8], session: Option<&EncryptionSession>) -> Result<Self> {
        Self::parse_inner(data, session, false)
    }

    fn parse_inner(
        data: &[u8],
        session: Option<&EncryptionSession>,
        strict: bool,
    ) -> Result<Self> {
        let mut entries = Vec::new();
        let mut offset = 0usize;

        while offset < data.len() {
            if offset + RECORD_HEADER_SIZE > data.len() {
                if strict {
                    return Err(Error::TruncatedAuxiliaryStream {
                        read: data.len() - offset,
                        expected: RECORD_HEADER_SIZE,
                    });
                }
                log::warn!(
                    "picture store ends inside an entry header; kept {} entries",
                    entries.len()
                );
                break;
            }

            // With encryption active the header itself is ciphertext: peek
            // through a fresh block-0 cipher to learn the entry size.
            let (header, length) = match session {
                Some(session) => {
                    let mut head = data[offset..offset + RECORD_HEADER_SIZE].to_vec();
                    use rc4::StreamCipher;
                    session.cipher_for_block(0).apply_keystream(&mut head);
                    RecordHeader::read(&head, 0)?
                }
                None => RecordHeader::read(data, offset)?,
            };

            if length > MAX_RECORD_LENGTH {
                if strict {
                    return Err(Error::corrupt(format!(
                        "picture entry at offset {offset} declares implausible length {length}"
                    )));
                }
                log::warn!(
                    "picture entry at offset {offset} declares implausible length {length}; kept {} entries",
                    entries.len()
                );
                break;
            }
            let end = offset + RECORD_HEADER_SIZE + length as usize;
            if end > data.len() {
                if strict {
                    return Err(Error::TruncatedAuxiliaryStream {
                        read: data.len() - offset,
                        expected: RECORD_HEADER_SIZE + length as usize,
                    });
                }
                log::warn!(
                    "picture store truncated at offset {offset} ({} of {} bytes); kept {} entries",
                    data.len() - offset,
                    RECORD_HEADER_SIZE + length as usize,
                    entries.len()
                );
                break;
            }

            let mut entry_bytes = data[offset..end].to_vec();
            if let Some(session) = session
                && let Err(err) = picture::decrypt_entry(session, &mut entry_bytes)
            {
                if strict {
                    return Err(err);
                }
                log::warn!(
                    "picture entry at offset {offset} failed to decrypt ({err}); kept {} entries",
                    entries.len()
                );
                break;
            }
            let (header, _) = if session.is_some() {
                RecordHeader::read(&entry_bytes, 0)?
            } else {
                (header, length)
            };
            entries.push(PictureEntry {
                header,
                data: entry_bytes[RECORD_HEADER_SIZE..].to_vec(),
            });
            offset = end;
        }

        Ok(Self { entries })
    }

    /// Serialize the store, routing each entry through the block cipher
    /// gate (block 0) when a session is active.
    pub fn encode(&self, session: Option<&EncryptionSession>) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.entries.iter().map(PictureEntry::encoded_len).sum());
        for entry in &self.entries {
            let start = out.len();
            entry.header.write(entry.data.len() as u32, &mut out);
            out.extend_from_slice(&entry.data);
            if let Some(session) = session {
                picture::encrypt_entry(session, &mut out[start..])?;
            }
        }
        Ok(out)
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::tests_support::fixed_session;

    fn png_entry(image: &[u8]) -> PictureEntry {
        let mut data = vec![0x42u8; 16]; // UID
        data.push(0xFF); // tag
        data.extend_from_slice(image);
        PictureEntry { header: RecordHeader::new(0, 0x6E0, 0xF01E), data }
    }

    #[test]
    fn test_plain_round_trip() {
        let store = PictureStore {
            entries: vec![png_entry(&[1, 2, 3]), png_entry(&[4, 5, 6, 7])],
        };
        let bytes = store.encode(None).unwrap();
        assert_eq!(PictureStore::parse(&bytes).unwrap(), store);
    }

    #[test]
    fn test_truncated_store_keeps_complete_entries() {
        let store = PictureStore {
            entries: vec![png_entry(&[1, 2, 3]), png_entry(&[4, 5, 6, 7])],
        };
        let mut bytes = store.encode(None).unwrap();
        bytes.truncate(bytes.len() - 2);

        // Strict parsing reports the truncation.
        assert!(matches!(
            PictureStore::parse(&bytes),
            Err(Error::TruncatedAuxiliaryStream { .. })
        ));

        // Best-effort load keeps the first, complete entry.
        let loaded = PictureStore::load(&bytes, None).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.entries[0], store.entries[0]);
    }

    #[test]
    fn test_implausible_length_keeps_complete_entries() {
        let store = PictureStore { entries: vec![png_entry(&[1, 2, 3])] };
        let mut bytes = store.encode(None).unwrap();
        // A garbage length field above the sanity ceiling, past the first
        // complete entry.
        RecordHeader::new(0, 0x6E0, 0xF01E).write(MAX_RECORD_LENGTH + 1, &mut bytes);

        assert!(matches!(
            PictureStore::parse(&bytes),
            Err(Error::CorruptStream(_))
        ));

        // Best-effort load recovers locally: the error never escapes.
        let loaded = PictureStore::load(&bytes, None).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.entries[0], store.entries[0]);
    }

    #[test]
    fn test_undecryptable_entry_keeps_complete_entries() {
        use rc4::StreamCipher;

        let session = fixed_session("pw");
        let store = PictureStore { entries: vec![png_entry(&[1, 2, 3])] };
        let mut bytes = store.encode(Some(&session)).unwrap();

        // A second entry whose header promises a PNG blip but whose body
        // ends inside the UID: the structural walk rejects it.
        let mut bad = Vec::new();
        RecordHeader::new(0, 0x6E0, 0xF01E).write(4, &mut bad);
        bad.extend_from_slice(&[0u8; 4]);
        session.cipher_for_block(0).apply_keystream(&mut bad);
        bytes.extend_from_slice(&bad);

        let loaded = PictureStore::load(&bytes, Some(&session)).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.entries[0], store.entries[0]);
    }

    #[test]
    fn test_encrypted_round_trip() {
        let session = fixed_session("pw");
        let store = PictureStore {
            entries: vec![png_entry(&[9u8; 32]), png_entry(&[7u8; 8])],
        };

        let bytes = store.encode(Some(&session)).unwrap();
        assert_ne!(bytes, store.encode(None).unwrap());

        let loaded = PictureStore::load(&bytes, Some(&session)).unwrap();
        assert_eq!(loaded, store);
    }

    #[test]
    fn test_empty_store() {
        assert!(PictureStore::parse(&[]).unwrap().is_empty());
    }
}
