//! The assembled engine: open a document's streams, expose the resolved
//! record view, and save it back through the offset-recomputing writer.

use crate::consts::{CURRENT_USER_STREAM, DOCUMENT_STREAM, PICTURES_STREAM};
use crate::crypto::{EncryptionDescriptor, EncryptionSession};
use crate::current_user::CurrentUserAtom;
use crate::error::{Error, Result};
use crate::persist::{UserEditAtom, walk_chain};
use crate::pictures::PictureStore;
use crate::record::Record;
use crate::writer;
use std::collections::{BTreeMap, HashMap};

/// Named-stream access to the surrounding compound-file container. The
/// OLE2 layer itself lives outside this crate; anything that can hand out
/// and accept whole named streams can back a document.
pub trait StreamContainer {
    /// Read a stream by name.
    fn read_stream(&self, name: &str) -> Result<Vec<u8>>;
    /// Create or replace a stream by name.
    fn write_stream(&mut self, name: &str, data: &[u8]) -> Result<()>;
    /// Whether a stream exists.
    fn has_stream(&self, name: &str) -> bool;
}

/// One top-level record and its bookkeeping.
#[derive(Debug, Clone)]
pub struct SavedRecord {
    /// The decoded (plaintext) record
    pub record: Record,
    /// Stream offset of the last on-disk incarnation; `None` until the
    /// record has been through a save
    pub last_offset: Option<u32>,
    /// Persist id, for records the pointer directories address
    pub persist_id: Option<u32>,
}

/// An opened presentation document.
pub struct Document {
    /// Top-level records in stream order
    records: Vec<SavedRecord>,
    /// Persist id → index of its most recent incarnation in `records`
    persist_index: HashMap<u32, usize>,
    /// Template for the next generation record, carrying the fields a save
    /// does not recompute (doc ref, view state, encryption session ref)
    head: UserEditAtom,
    current_user: CurrentUserAtom,
    session: Option<EncryptionSession>,
    pictures: PictureStore,
    /// Next save emits a complete directory and a chain of length one
    pending_full_directory: bool,
}

impl Document {
    /// An empty document with no history. The document root conventionally
    /// takes persist id 1; append it first.
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            persist_index: HashMap::new(),
            head: UserEditAtom::new(0, 1, 0),
            current_user: CurrentUserAtom::new(0),
            session: None,
            pictures: PictureStore::default(),
            pending_full_directory: true,
        }
    }

    /// Open a document from its container streams.
    pub fn open<C: StreamContainer>(container: &C, password: Option<&str>) -> Result<Self> {
        let document = container.read_stream(DOCUMENT_STREAM)?;
        let current_user = container.read_stream(CURRENT_USER_STREAM)?;
        let pictures = if container.has_stream(PICTURES_STREAM) {
            Some(container.read_stream(PICTURES_STREAM)?)
        } else {
            None
        };
        Self::from_streams(&document, &current_user, pictures.as_deref(), password)
    }

    /// Open a document from raw stream bytes.
    ///
    /// Walks the generation chain from the current-user pointer, opens the
    /// encryption session when one is required (before any persist record
    /// is touched), then materializes every record the live chain
    /// references. The picture store is loaded best-effort: a truncated
    /// entry is logged and skipped, never fatal.
    pub fn from_streams(
        document: &[u8],
        current_user: &[u8],
        pictures: Option<&[u8]>,
        password: Option<&str>,
    ) -> Result<Self> {
        let current_user = CurrentUserAtom::parse(current_user)?;
        let chain = walk_chain(document, current_user.current_edit_offset)?;
        let head = chain.newest().atom.clone();

        let session = if current_user.is_encrypted() {
            let descriptor_id = head.encrypt_session_ref.ok_or_else(|| {
                Error::corrupt("encrypted document without an encryption session reference")
            })?;
            let descriptor_offset = chain.directory.get(descriptor_id).ok_or_else(|| {
                Error::corrupt(format!(
                    "encryption descriptor persist id {descriptor_id} is not in the directory"
                ))
            })?;
            let (record, _) = Record::decode(document, descriptor_offset as usize)?;
            let descriptor = EncryptionDescriptor::from_record(&record)?;
            let password = password.ok_or(Error::EncryptedDocumentLocked)?;
            Some(EncryptionSession::open(descriptor, password)?)
        } else {
            None
        };

        // Every offset the live chain references, in stream order. Chain
        // bookkeeping first so a directory's persist label wins if a
        // malformed file maps an id onto a chain record.
        let mut offsets: BTreeMap<u32, Option<u32>> = BTreeMap::new();
        for link in &chain.generations {
            offsets.insert(link.offset, None);
            offsets.insert(link.atom.persist_dir_offset, None);
        }
        for (id, offset) in chain.directory.iter() {
            offsets.insert(offset, Some(id));
        }

        let mut records = Vec::with_capacity(offsets.len());
        let mut persist_index = HashMap::new();
        for (&offset, &persist_id) in &offsets {
            let record = match (&session, persist_id) {
                // The descriptor is a persist record but stays plaintext.
                (Some(session), Some(id)) if head.encrypt_session_ref != Some(id) => {
                    let plaintext = session.decrypt_record(document, offset as usize, id)?;
                    Record::decode(&plaintext, 0)?.0
                }
                _ => Record::decode(document, offset as usize)?.0,
            };
            if let Some(id) = persist_id {
                persist_index.insert(id, records.len());
            }
            records.push(SavedRecord {
                record,
                last_offset: Some(offset),
                persist_id,
            });
        }

        let pictures = match pictures {
            Some(data) => PictureStore::load(data, session.as_ref())?,
            None => PictureStore::default(),
        };

        Ok(Self {
            records,
            persist_index,
            head,
            current_user,
            session,
            pictures,
            pending_full_directory: false,
        })
    }

    /// Save into a container: document stream, current-user stream, and a
    /// picture stream when the store is not empty.
    pub fn write<C: StreamContainer>(&mut self, container: &mut C) -> Result<()> {
        let (document, current_user, pictures) = self.write_to_streams()?;
        container.write_stream(DOCUMENT_STREAM, &document)?;
        container.write_stream(CURRENT_USER_STREAM, &current_user)?;
        if let Some(pictures) = pictures {
            container.write_stream(PICTURES_STREAM, &pictures)?;
        }
        Ok(())
    }

    /// Serialize all streams. Appends a generation to the document stream
    /// (or, after normalization, replaces the chain with a single one) and
    /// repoints the current-user stream at it.
    pub fn write_to_streams(&mut self) -> Result<(Vec<u8>, Vec<u8>, Option<Vec<u8>>)> {
        let document = writer::save_document_stream(
            &mut self.records,
            &self.head,
            &mut self.current_user,
            self.session.as_ref(),
            self.pending_full_directory,
        )?;
        self.pending_full_directory = false;

        self.current_user.set_encrypted(self.session.is_some());
        let current_user = self.current_user.build();

        let pictures = if self.pictures.is_empty() {
            None
        } else {
            Some(self.pictures.encode(self.session.as_ref())?)
        };
        Ok((document, current_user, pictures))
    }

    /// Register a new persist record for the next save, allocating the next
    /// persist id.
    pub fn append_persist_record(&mut self, record: Record) -> u32 {
        let id = self.head.max_persist_written + 1;
        self.head.max_persist_written = id;
        self.persist_index.insert(id, self.records.len());
        self.records.push(SavedRecord {
            record,
            last_offset: None,
            persist_id: Some(id),
        });
        id
    }

    /// Replace the record behind an existing persist id. The change lands
    /// in the next save's generation.
    pub fn replace_persist_record(&mut self, persist_id: u32, record: Record) -> Result<()> {
        let &index = self
            .persist_index
            .get(&persist_id)
            .ok_or_else(|| Error::corrupt(format!("unknown persist id {persist_id}")))?;
        self.records[index].record = record;
        Ok(())
    }

    /// The record behind one persist id.
    pub fn persist_record(&self, persist_id: u32) -> Option<&Record> {
        self.persist_index
            .get(&persist_id)
            .map(|&index| &self.records[index].record)
    }

    /// The resolved view: the most recent incarnation of every persist
    /// record, in persist-id order. This is what an object model interprets.
    pub fn resolved_records(&self) -> Vec<(u32, &Record)> {
        let mut ids: Vec<u32> = self.persist_index.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .map(|id| (id, &self.records[self.persist_index[&id]].record))
            .collect()
    }

    /// Collapse the edit history: only the live incarnation of each persist
    /// record survives, and the next save writes a one-generation chain.
    pub fn normalize_history(&mut self) {
        crate::normalize::squash_history(&mut self.records);
        self.rebuild_persist_index();
        self.pending_full_directory = true;
    }

    /// Set, change, or remove the document password. History is normalized
    /// first: superseded incarnations and old generations would otherwise
    /// survive under the old key (or in plaintext). Every persist record
    /// and picture is re-encrypted by the next save.
    pub fn set_password(&mut self, password: Option<&str>) -> Result<()> {
        self.normalize_history();
        match password {
            Some(password) => {
                let session = EncryptionSession::create(password)?;
                let descriptor_record = session.descriptor().to_record();
                match self.head.encrypt_session_ref {
                    Some(id) => self.replace_persist_record(id, descriptor_record)?,
                    None => {
                        let id = self.append_persist_record(descriptor_record);
                        self.head.encrypt_session_ref = Some(id);
                    }
                }
                self.session = Some(session);
                self.current_user.set_encrypted(true);
            }
            None => {
                if let Some(id) = self.head.encrypt_session_ref.take() {
                    self.records.retain(|saved| saved.persist_id != Some(id));
                    self.rebuild_persist_index();
                }
                self.session = None;
                self.current_user.set_encrypted(false);
            }
        }
        Ok(())
    }

    /// Whether an encryption session is active.
    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.session.is_some()
    }

    /// The current-user stream state (username, newest-generation pointer).
    #[inline]
    pub fn current_user(&self) -> &CurrentUserAtom {
        &self.current_user
    }

    /// Set the username recorded by the next save.
    pub fn set_username(&mut self, username: impl Into<String>) {
        self.current_user.username = username.into();
    }

    /// The picture store.
    #[inline]
    pub fn pictures(&self) -> &PictureStore {
        &self.pictures
    }

    /// Mutable access to the picture store.
    #[inline]
    pub fn pictures_mut(&mut self) -> &mut PictureStore {
        &mut self.pictures
    }

    fn rebuild_persist_index(&mut self) {
        self.persist_index = self
            .records
            .iter()
            .enumerate()
            .filter_map(|(index, saved)| saved.persist_id.map(|id| (id, index)))
            .collect();
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}
