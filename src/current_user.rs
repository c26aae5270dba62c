//! Current-user stream: the out-of-band pointer to the newest edit
//! generation, plus the encryption / legacy-revision markers a reader must
//! check before touching the primary stream.

use crate::consts::{
    CURRENT_USER_STREAM, HEADER_TOKEN_ENCRYPTED, HEADER_TOKEN_PLAIN, MIN_DOC_FILE_VERSION,
    RecordType,
};
use crate::error::{Error, Result};
use zerocopy::FromBytes;
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy_derive::{FromBytes as DeriveFromBytes, Immutable, KnownLayout};

/// Fixed fields after the 8-byte record header.
#[derive(Debug, Clone, DeriveFromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct CurrentUserFixed {
    /// Size of the fixed portion, always 20
    details_size: U32,
    /// Header token: plaintext or encrypted marker
    header_token: U32,
    /// Offset of the newest generation record in the document stream
    current_edit_offset: U32,
    /// Username length in characters
    username_len: U16,
    /// docFileVersion, 0x03F4 for the 97-2003 revision
    doc_file_version: U16,
    /// Major version, 3 for the 97-2003 revision
    major_version: u8,
    /// Minor version
    minor_version: u8,
    /// Reserved padding
    _reserved: U16,
}

const FIXED_SIZE: usize = 20;
const DETAILS_SIZE: u32 = 20;

/// Parsed current-user stream.
#[derive(Debug, Clone)]
pub struct CurrentUserAtom {
    /// Encryption marker token
    pub header_token: u32,
    /// Offset of the newest generation record
    pub current_edit_offset: u32,
    /// docFileVersion field
    pub doc_file_version: u16,
    /// Major version byte
    pub major_version: u8,
    /// Minor version byte
    pub minor_version: u8,
    /// Release version (8..=10 for 97-2003 era writers)
    pub release_version: u32,
    /// Last editing user
    pub username: String,
}

impl CurrentUserAtom {
    /// A fresh atom pointing at `current_edit_offset`, unencrypted.
    pub fn new(current_edit_offset: u32) -> Self {
        Self {
            header_token: HEADER_TOKEN_PLAIN,
            current_edit_offset,
            doc_file_version: MIN_DOC_FILE_VERSION,
            major_version: 3,
            minor_version: 0,
            release_version: 8,
            username: String::new(),
        }
    }

    /// Parse the `Current User` stream.
    ///
    /// Rejects unknown header tokens as `CorruptStream` and pre-97 version
    /// markers as `UnsupportedLegacyFormat` before any record is read.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 8 + FIXED_SIZE {
            return Err(Error::corrupt(format!("{CURRENT_USER_STREAM} stream too short")));
        }
        let type_id = u16::from_le_bytes([data[2], data[3]]);
        if RecordType::from(type_id) != RecordType::CurrentUserAtom {
            return Err(Error::corrupt(format!(
                "{CURRENT_USER_STREAM} stream does not start with a current-user atom (type {type_id})"
            )));
        }

        let fixed = CurrentUserFixed::read_from_bytes(&data[8..8 + FIXED_SIZE])
            .map_err(|_| Error::corrupt("malformed current-user fixed fields"))?;
        if fixed.details_size.get() != DETAILS_SIZE {
            return Err(Error::corrupt(format!(
                "unexpected current-user details size {}",
                fixed.details_size.get()
            )));
        }

        let header_token = fixed.header_token.get();
        if header_token != HEADER_TOKEN_PLAIN && header_token != HEADER_TOKEN_ENCRYPTED {
            return Err(Error::corrupt(format!(
                "unknown current-user header token 0x{header_token:08X}"
            )));
        }

        let doc_file_version = fixed.doc_file_version.get();
        if doc_file_version < MIN_DOC_FILE_VERSION {
            return Err(Error::UnsupportedLegacyFormat(format!(
                "docFileVersion 0x{doc_file_version:04X} predates the 97-2003 revision"
            )));
        }

        let name_len = fixed.username_len.get() as usize;
        let ansi_start = 8 + FIXED_SIZE;
        let release_start = ansi_start + name_len;
        if release_start + 4 > data.len() {
            return Err(Error::corrupt("current-user stream truncated in username"));
        }
        let release_version = u32::from_le_bytes([
            data[release_start],
            data[release_start + 1],
            data[release_start + 2],
            data[release_start + 3],
        ]);
        if !(8..=10).contains(&release_version) {
            return Err(Error::UnsupportedLegacyFormat(format!(
                "release version {release_version} is outside the 97-2003 range"
            )));
        }

        // Prefer the UTF-16LE username when the stream carries one; older
        // writers only emit the ANSI form.
        let unicode_start = release_start + 4;
        let unicode_end = unicode_start + name_len * 2;
        let username = if name_len > 0 && unicode_end <= data.len() {
            let (text, _, _) =
                encoding_rs::UTF_16LE.decode(&data[unicode_start..unicode_end]);
            text.into_owned()
        } else if name_len > 0 {
            let (text, _, _) =
                encoding_rs::WINDOWS_1252.decode(&data[ansi_start..release_start]);
            text.into_owned()
        } else {
            String::new()
        };

        Ok(Self {
            header_token,
            current_edit_offset: fixed.current_edit_offset.get(),
            doc_file_version,
            major_version: fixed.major_version,
            minor_version: fixed.minor_version,
            release_version,
            username,
        })
    }

    /// Whether the document stream is encrypted.
    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.header_token == HEADER_TOKEN_ENCRYPTED
    }

    /// Set the encryption marker token.
    pub fn set_encrypted(&mut self, encrypted: bool) {
        self.header_token = if encrypted { HEADER_TOKEN_ENCRYPTED } else { HEADER_TOKEN_PLAIN };
    }

    /// Serialize the stream: record header, fixed fields, ANSI username,
    /// release version, UTF-16LE username.
    pub fn build(&self) -> Vec<u8> {
        // lenUserName counts UTF-16 code units; the ANSI spelling carries
        // one byte per unit so both name trailers agree with the length
        // field even for names outside the BMP.
        let units: Vec<u16> = self.username.encode_utf16().collect();
        let ansi: Vec<u8> = units
            .iter()
            .map(|&u| if u < 0x80 { u as u8 } else { b'?' })
            .collect();
        let name_len = units.len();

        let mut s = Vec::with_capacity(8 + FIXED_SIZE + name_len * 3 + 4);
        // Record header: version/instance 0, type 4086.
        s.extend_from_slice(&0u16.to_le_bytes());
        s.extend_from_slice(&(RecordType::CurrentUserAtom as u16).to_le_bytes());
        s.extend_from_slice(&(DETAILS_SIZE + 4 + name_len as u32).to_le_bytes());
        // Fixed fields.
        s.extend_from_slice(&DETAILS_SIZE.to_le_bytes());
        s.extend_from_slice(&self.header_token.to_le_bytes());
        s.extend_from_slice(&self.current_edit_offset.to_le_bytes());
        s.extend_from_slice(&(name_len as u16).to_le_bytes());
        s.extend_from_slice(&self.doc_file_version.to_le_bytes());
        s.push(self.major_version);
        s.push(self.minor_version);
        s.extend_from_slice(&[0u8; 2]);
        // ANSI username, release version, UTF-16LE username.
        s.extend_from_slice(&ansi);
        s.extend_from_slice(&self.release_version.to_le_bytes());
        for unit in &units {
            s.extend_from_slice(&unit.to_le_bytes());
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_plain() {
        let mut atom = CurrentUserAtom::new(0x1234);
        atom.username = "pitaya".to_string();
        let bytes = atom.build();
        let parsed = CurrentUserAtom::parse(&bytes).unwrap();
        assert_eq!(parsed.current_edit_offset, 0x1234);
        assert_eq!(parsed.username, "pitaya");
        assert!(!parsed.is_encrypted());
    }

    #[test]
    fn test_non_bmp_username_round_trip() {
        // "🦀" is two UTF-16 code units; the length field must cover both
        // or the Unicode trailer gets truncated on the way back in.
        let mut atom = CurrentUserAtom::new(64);
        atom.username = "团队🦀".to_string();
        let parsed = CurrentUserAtom::parse(&atom.build()).unwrap();
        assert_eq!(parsed.username, "团队🦀");
    }

    #[test]
    fn test_encrypted_token_round_trip() {
        let mut atom = CurrentUserAtom::new(64);
        atom.set_encrypted(true);
        let parsed = CurrentUserAtom::parse(&atom.build()).unwrap();
        assert!(parsed.is_encrypted());
    }

    #[test]
    fn test_unknown_token_is_corrupt() {
        let mut atom = CurrentUserAtom::new(0);
        atom.header_token = 0xDEAD_BEEF;
        let result = CurrentUserAtom::parse(&atom.build());
        assert!(matches!(result, Err(Error::CorruptStream(_))));
    }

    #[test]
    fn test_pre97_version_fails_fast() {
        let mut atom = CurrentUserAtom::new(0);
        atom.doc_file_version = 0x03F3;
        let result = CurrentUserAtom::parse(&atom.build());
        assert!(matches!(result, Err(Error::UnsupportedLegacyFormat(_))));

        let mut atom = CurrentUserAtom::new(0);
        atom.release_version = 2;
        let result = CurrentUserAtom::parse(&atom.build());
        assert!(matches!(result, Err(Error::UnsupportedLegacyFormat(_))));
    }

    #[test]
    fn test_too_short_is_corrupt() {
        assert!(CurrentUserAtom::parse(&[0u8; 12]).is_err());
    }
}
