//! Binary constants and the static record-type registry.
//!
//! Reference: [MS-PPT] PowerPoint 97-2003 Binary File Format (.ppt)

use phf::{Set, phf_set};

/// Name of the primary record stream inside the compound container.
pub const DOCUMENT_STREAM: &str = "PowerPoint Document";

/// Name of the out-of-band current-pointer stream.
pub const CURRENT_USER_STREAM: &str = "Current User";

/// Name of the auxiliary picture store stream.
pub const PICTURES_STREAM: &str = "Pictures";

/// Size of a record header: verAndInstance (2) + type (2) + length (4).
pub const RECORD_HEADER_SIZE: usize = 8;

/// Generation-record payload without an encryption-session reference.
pub const USER_EDIT_PAYLOAD: usize = 28;

/// Generation-record payload with the trailing encryption-session reference.
pub const USER_EDIT_PAYLOAD_ENCRYPTED: usize = 32;

/// Serialized size of a generation record, header included. The chain-repair
/// heuristic probes this many bytes before the smallest known record offset.
pub const USER_EDIT_RECORD_SIZE: u32 = (RECORD_HEADER_SIZE + USER_EDIT_PAYLOAD) as u32;

/// Ceiling on a declared record length. A corrupted length field must not
/// translate into a multi-gigabyte allocation.
pub const MAX_RECORD_LENGTH: u32 = 0x1000_0000;

/// Current-user header token of an unencrypted document.
pub const HEADER_TOKEN_PLAIN: u32 = 0xE391_C05F;

/// Current-user header token of an encrypted document.
pub const HEADER_TOKEN_ENCRYPTED: u32 = 0xF3D1_C4DF;

/// Lowest docFileVersion of the 97-2003 revision; older files fail fast.
pub const MIN_DOC_FILE_VERSION: u16 = 0x03F4;

/// PPT record types interpreted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RecordType {
    /// Unknown record type (kept as an opaque atom)
    Unknown = 0,
    /// Document container
    Document = 1000,
    /// Document atom
    DocumentAtom = 1001,
    /// End document atom
    EndDocument = 1002,
    /// Slide container
    Slide = 1006,
    /// Slide atom
    SlideAtom = 1007,
    /// Notes container
    Notes = 1008,
    /// Notes atom
    NotesAtom = 1009,
    /// Environment container
    Environment = 1010,
    /// Slide persist atom
    SlidePersistAtom = 1011,
    /// Main master container
    MainMaster = 1016,
    /// Slide show slide info atom
    SSSlideInfoAtom = 1017,
    /// VBA info container
    VBAInfo = 1023,
    /// External object list container
    ExObjList = 1033,
    /// External object list atom
    ExObjListAtom = 1034,
    /// Drawing group record (Escher payload)
    PPDrawingGroup = 1035,
    /// Drawing record (Escher payload)
    PPDrawing = 1036,
    /// List container
    List = 2000,
    /// Font collection container
    FontCollection = 2005,
    /// Font entity atom
    FontEntityAtom = 2006,
    /// Sound collection container
    SoundCollection = 2020,
    /// Sound container
    Sound = 2022,
    /// Color scheme atom
    ColorSchemeAtom = 2032,
    /// Text header atom
    TextHeaderAtom = 3999,
    /// Text characters atom
    TextCharsAtom = 4000,
    /// Style text prop atom
    StyleTextPropAtom = 4001,
    /// Text bytes atom
    TextBytesAtom = 4008,
    /// CString atom
    CString = 4026,
    /// Headers footers container
    HeadersFooters = 4057,
    /// Headers footers atom
    HeadersFootersAtom = 4058,
    /// Slide list with text container
    SlideListWithText = 4080,
    /// User edit atom (one edit generation's bookkeeping)
    UserEditAtom = 4085,
    /// Current user atom (lives in its own stream)
    CurrentUserAtom = 4086,
    /// External OLE object storage atom
    ExOleObjStg = 4113,
    /// Persist pointer directory, full block
    PersistPtrFullBlock = 6001,
    /// Persist pointer directory, incremental block
    PersistPtrIncrementalBlock = 6002,
    /// Encryption descriptor atom
    DocumentEncryptionAtom = 12052,
}

impl From<u16> for RecordType {
    fn from(value: u16) -> Self {
        match value {
            1000 => RecordType::Document,
            1001 => RecordType::DocumentAtom,
            1002 => RecordType::EndDocument,
            1006 => RecordType::Slide,
            1007 => RecordType::SlideAtom,
            1008 => RecordType::Notes,
            1009 => RecordType::NotesAtom,
            1010 => RecordType::Environment,
            1011 => RecordType::SlidePersistAtom,
            1016 => RecordType::MainMaster,
            1017 => RecordType::SSSlideInfoAtom,
            1023 => RecordType::VBAInfo,
            1033 => RecordType::ExObjList,
            1034 => RecordType::ExObjListAtom,
            1035 => RecordType::PPDrawingGroup,
            1036 => RecordType::PPDrawing,
            2000 => RecordType::List,
            2005 => RecordType::FontCollection,
            2006 => RecordType::FontEntityAtom,
            2020 => RecordType::SoundCollection,
            2022 => RecordType::Sound,
            2032 => RecordType::ColorSchemeAtom,
            3999 => RecordType::TextHeaderAtom,
            4000 => RecordType::TextCharsAtom,
            4001 => RecordType::StyleTextPropAtom,
            4008 => RecordType::TextBytesAtom,
            4026 => RecordType::CString,
            4057 => RecordType::HeadersFooters,
            4058 => RecordType::HeadersFootersAtom,
            4080 => RecordType::SlideListWithText,
            4085 => RecordType::UserEditAtom,
            4086 => RecordType::CurrentUserAtom,
            4113 => RecordType::ExOleObjStg,
            6001 => RecordType::PersistPtrFullBlock,
            6002 => RecordType::PersistPtrIncrementalBlock,
            12052 => RecordType::DocumentEncryptionAtom,
            _ => RecordType::Unknown,
        }
    }
}

/// Type ids whose payload is a sequence of child records. Classification is
/// registry-driven; unknown ids decode as opaque atoms so unrecognized
/// content survives a round trip untouched.
static CONTAINER_TYPES: Set<u16> = phf_set! {
    1000u16, // Document
    1006u16, // Slide
    1008u16, // Notes
    1010u16, // Environment
    1016u16, // MainMaster
    1023u16, // VBAInfo
    1033u16, // ExObjList
    2000u16, // List
    2005u16, // FontCollection
    2020u16, // SoundCollection
    2022u16, // Sound
    4057u16, // HeadersFooters
    4080u16, // SlideListWithText
};

/// Type ids never routed through the block cipher gate: the bookkeeping
/// records a reader must parse before it can derive any key.
static PLAINTEXT_EXEMPT_TYPES: Set<u16> = phf_set! {
    4085u16,  // UserEditAtom
    6001u16,  // PersistPtrFullBlock
    6002u16,  // PersistPtrIncrementalBlock
    12052u16, // DocumentEncryptionAtom
};

/// Whether records of this type id hold child records.
#[inline]
pub fn is_container_type(type_id: u16) -> bool {
    CONTAINER_TYPES.contains(&type_id)
}

/// Whether records of this type id bypass the block cipher gate.
#[inline]
pub fn is_plaintext_exempt(type_id: u16) -> bool {
    PLAINTEXT_EXEMPT_TYPES.contains(&type_id)
}
