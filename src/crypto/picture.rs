//! Structure-aware encryption of picture-store entries.
//!
//! A picture entry is decrypted at block 0 in a fixed field order: the
//! 8-byte entry header first (its type and instance decide the rest of the
//! walk), then one 16-byte UID, an optional second UID for the double-UID
//! instance variants, then a 34-byte metafile header or a single tag byte
//! depending on the blip kind, and finally the image payload in one run.
//! One keystream spans the whole entry, so walking the fields in any other
//! order desynchronizes every following byte. The instance and type tables
//! below are fixed contracts of the format, not derived values.

use crate::consts::RECORD_HEADER_SIZE;
use crate::crypto::EncryptionSession;
use crate::error::{Error, Result};
use crate::record::RecordHeader;
use phf::{Set, phf_set};
use rc4::StreamCipher;

/// Instance variants that carry two 16-byte UIDs instead of one.
static DOUBLE_UID_INSTANCES: Set<u16> = phf_set! {
    0x217u16, // WMF
    0x3D5u16, // EMF
    0x543u16, // PICT
    0x46Bu16, // JPEG
    0x6E1u16, // PNG
    0x6E3u16, // CMYK JPEG
    0x7A9u16, // DIB
};

/// Metafile blip type ids: a 34-byte compression header follows the UIDs.
static METAFILE_TYPES: Set<u16> = phf_set! {
    0xF01Au16, // EMF
    0xF01Bu16, // WMF
    0xF01Cu16, // PICT
};

/// Bitmap blip type ids: a single tag byte follows the UIDs.
static BITMAP_TYPES: Set<u16> = phf_set! {
    0xF01Du16, // JPEG
    0xF01Eu16, // PNG
    0xF01Fu16, // DIB
    0xF029u16, // TIFF
    0xF02Au16, // CMYK JPEG
};

const UID_SIZE: usize = 16;
const METAFILE_HEADER_SIZE: usize = 34;

/// Decrypt one whole picture entry (header included) in place.
pub fn decrypt_entry(session: &EncryptionSession, entry: &mut [u8]) -> Result<()> {
    apply_walk(session, entry, true)
}

/// Encrypt one whole plaintext picture entry (header included) in place.
pub fn encrypt_entry(session: &EncryptionSession, entry: &mut [u8]) -> Result<()> {
    apply_walk(session, entry, false)
}

/// Shared field walk. For decryption the header must pass through the
/// cipher before it can be parsed; for encryption it is read first and
/// enciphered after.
fn apply_walk(session: &EncryptionSession, entry: &mut [u8], decrypting: bool) -> Result<()> {
    if entry.len() < RECORD_HEADER_SIZE {
        return Err(Error::corrupt("picture entry shorter than its header"));
    }
    let mut cipher = session.cipher_for_block(0);

    let header = if decrypting {
        cipher.apply_keystream(&mut entry[..RECORD_HEADER_SIZE]);
        RecordHeader::read(entry, 0)?.0
    } else {
        let header = RecordHeader::read(entry, 0)?.0;
        cipher.apply_keystream(&mut entry[..RECORD_HEADER_SIZE]);
        header
    };

    let mut pos = RECORD_HEADER_SIZE;
    for size in structural_fields(&header) {
        let end = pos + size;
        if end > entry.len() {
            return Err(Error::corrupt(format!(
                "picture entry structural field at {pos} overruns the entry"
            )));
        }
        cipher.apply_keystream(&mut entry[pos..end]);
        pos = end;
    }

    cipher.apply_keystream(&mut entry[pos..]);
    Ok(())
}

/// Sizes of the structural fields between entry header and image payload,
/// in walk order. Entries of types outside the blip tables have no known
/// structure; their payload is treated as one run.
fn structural_fields(header: &RecordHeader) -> Vec<usize> {
    let is_metafile = METAFILE_TYPES.contains(&header.type_id);
    let is_bitmap = BITMAP_TYPES.contains(&header.type_id);
    if !is_metafile && !is_bitmap {
        return Vec::new();
    }

    let mut fields = vec![UID_SIZE];
    if DOUBLE_UID_INSTANCES.contains(&header.instance) {
        fields.push(UID_SIZE);
    }
    if is_metafile {
        fields.push(METAFILE_HEADER_SIZE);
    } else {
        fields.push(1); // bitmap tag byte
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::tests_support::fixed_session;
    use crate::record::Record;

    fn png_entry(payload: &[u8]) -> Vec<u8> {
        // Single-UID PNG blip: UID + tag byte + image bytes.
        let mut body = vec![0x11u8; UID_SIZE];
        body.push(0xFF);
        body.extend_from_slice(payload);
        Record::atom(0xF01E, 0, 0x6E0, body).encode_to_vec()
    }

    fn emf_entry(payload: &[u8]) -> Vec<u8> {
        // Double-UID EMF blip: two UIDs + 34-byte metafile header + bytes.
        let mut body = vec![0x22u8; UID_SIZE * 2];
        body.extend_from_slice(&[0x33u8; METAFILE_HEADER_SIZE]);
        body.extend_from_slice(payload);
        Record::atom(0xF01A, 0, 0x3D5, body).encode_to_vec()
    }

    #[test]
    fn test_png_entry_round_trip() {
        let session = fixed_session("pw");
        let plain = png_entry(&[0x89, 0x50, 0x4E, 0x47, 1, 2, 3]);

        let mut buf = plain.clone();
        encrypt_entry(&session, &mut buf).unwrap();
        assert_ne!(buf, plain);

        decrypt_entry(&session, &mut buf).unwrap();
        assert_eq!(buf, plain);
    }

    #[test]
    fn test_double_uid_metafile_round_trip() {
        let session = fixed_session("pw");
        let plain = emf_entry(&[9u8; 100]);

        let mut buf = plain.clone();
        encrypt_entry(&session, &mut buf).unwrap();
        decrypt_entry(&session, &mut buf).unwrap();
        assert_eq!(buf, plain);
    }

    #[test]
    fn test_structural_field_tables() {
        let png = RecordHeader::new(0, 0x6E0, 0xF01E);
        assert_eq!(structural_fields(&png), vec![UID_SIZE, 1]);

        let png2 = RecordHeader::new(0, 0x6E1, 0xF01E);
        assert_eq!(structural_fields(&png2), vec![UID_SIZE, UID_SIZE, 1]);

        let emf = RecordHeader::new(0, 0x3D5, 0xF01A);
        assert_eq!(structural_fields(&emf), vec![UID_SIZE, UID_SIZE, METAFILE_HEADER_SIZE]);

        // Unknown kinds have no structure to walk.
        let other = RecordHeader::new(0, 0, 0xF007);
        assert!(structural_fields(&other).is_empty());
    }

    #[test]
    fn test_truncated_structural_field_is_corrupt() {
        let session = fixed_session("pw");
        // Claims to be a PNG blip but ends inside the UID.
        let mut entry = Record::atom(0xF01E, 0, 0x6E0, vec![0u8; 4]).encode_to_vec();
        assert!(encrypt_entry(&session, &mut entry).is_err());
    }
}
