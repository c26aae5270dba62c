//! Generation-chain resolution.
//!
//! Two distinct algorithms produce a persist-id → offset table:
//!
//! - [`full_merge`] scans every pointer directory in file order
//!   (oldest-first, since saves append) and lets later directories override
//!   earlier ones. It sees everything in the stream, including directories
//!   of superseded generations, and requires a plaintext stream since it
//!   walks record headers linearly.
//! - [`walk_chain`] follows the backward links from the current generation,
//!   newest-first, installing only ids not yet seen. Only the live lineage
//!   contributes, so stale or orphaned directories elsewhere in the stream
//!   cannot leak into the view. Works on encrypted streams too: everything
//!   it touches is plaintext-exempt.

use crate::consts::{
    MAX_RECORD_LENGTH, RECORD_HEADER_SIZE, RecordType, USER_EDIT_PAYLOAD,
    USER_EDIT_PAYLOAD_ENCRYPTED, USER_EDIT_RECORD_SIZE,
};
use crate::error::{Error, Result};
use crate::persist::directory::PersistDirectory;
use crate::persist::user_edit::UserEditAtom;
use crate::record::{Record, RecordHeader};
use std::collections::BTreeSet;

/// One generation visited by the chain walk.
#[derive(Debug, Clone)]
pub struct GenerationLink {
    /// Offset of the generation record
    pub offset: u32,
    /// The generation record itself
    pub atom: UserEditAtom,
    /// Its pointer directory, as read
    pub directory: PersistDirectory,
}

/// Product of the newest-first chain walk.
#[derive(Debug, Clone)]
pub struct ChainView {
    /// Merged live mapping, first-seen-wins over the walk
    pub directory: PersistDirectory,
    /// Visited generations, newest first
    pub generations: Vec<GenerationLink>,
}

impl ChainView {
    /// The newest generation (the one the current-user stream points at).
    pub fn newest(&self) -> &GenerationLink {
        // walk_chain never returns an empty chain
        &self.generations[0]
    }
}

/// Build the authoritative table by merging every directory in file order.
/// For each directory, mappings for ids it redefines are evicted first,
/// then its pairs installed; oldest-to-newest order makes the table
/// converge to the most recent offset per id.
pub fn full_merge(data: &[u8]) -> Result<PersistDirectory> {
    let mut merged = PersistDirectory::new();
    let mut offset = 0usize;

    while offset < data.len() {
        let (header, length) = RecordHeader::read(data, offset)?;
        if length > MAX_RECORD_LENGTH {
            return Err(Error::corrupt(format!(
                "record at offset {offset} declares implausible length {length}"
            )));
        }
        let end = offset + RECORD_HEADER_SIZE + length as usize;
        if end > data.len() {
            return Err(Error::corrupt(format!(
                "record at offset {offset} overruns the stream"
            )));
        }
        if matches!(
            RecordType::from(header.type_id),
            RecordType::PersistPtrFullBlock | RecordType::PersistPtrIncrementalBlock
        ) {
            let dir = PersistDirectory::parse_payload(&data[offset + RECORD_HEADER_SIZE..end]);
            for (id, off) in dir.iter() {
                merged.remove(id);
                merged.insert(id, off);
            }
        }
        offset = end;
    }

    Ok(merged)
}

/// Walk the generation chain backward from `current_edit_offset`.
///
/// A revisited offset means the chain loops; one repair is attempted (see
/// [`repair_candidate`]) and a second loop escalates to `CorruptStream`.
pub fn walk_chain(data: &[u8], current_edit_offset: u32) -> Result<ChainView> {
    if current_edit_offset == 0 {
        return Err(Error::corrupt("current-user pointer names no generation"));
    }

    let mut merged = PersistDirectory::new();
    let mut generations: Vec<GenerationLink> = Vec::new();
    let mut visited: BTreeSet<u32> = BTreeSet::new();
    // Every offset the walk has learned about, for the repair heuristic.
    let mut known_offsets: BTreeSet<u32> = BTreeSet::new();
    let mut offset = current_edit_offset;
    let mut repaired = false;

    loop {
        if !visited.insert(offset) {
            if repaired {
                return Err(Error::corrupt(
                    "generation chain still loops after repair",
                ));
            }
            offset = repair_candidate(data, &known_offsets, &visited)?;
            repaired = true;
            continue;
        }
        known_offsets.insert(offset);

        let (record, _) = Record::decode(data, offset as usize)?;
        let atom = UserEditAtom::from_record(&record)?;

        let (dir_record, _) = Record::decode(data, atom.persist_dir_offset as usize)?;
        let directory = PersistDirectory::from_record(&dir_record)?;
        known_offsets.insert(atom.persist_dir_offset);

        // Newest-first walk: the first offset seen for an id is the live one.
        for (id, off) in directory.iter() {
            known_offsets.insert(off);
            if merged.get(id).is_none() {
                merged.insert(id, off);
            }
        }

        let prev = atom.prev_edit_offset;
        generations.push(GenerationLink { offset, atom, directory });
        if prev == 0 {
            break;
        }
        offset = prev;
    }

    Ok(ChainView { directory: merged, generations })
}

/// Recompute a plausible generation offset for a looping chain: a
/// generation record spans 36 bytes, so probe exactly that far before the
/// smallest offset the walk knows about, and accept only if a generation
/// header with a sane payload length actually decodes there. The candidate
/// sits below every visited offset, so the walk keeps shrinking.
fn repair_candidate(
    data: &[u8],
    known_offsets: &BTreeSet<u32>,
    visited: &BTreeSet<u32>,
) -> Result<u32> {
    let min_known = known_offsets
        .iter()
        .next()
        .copied()
        .ok_or_else(|| Error::corrupt("looping generation chain with no known records"))?;
    let candidate = min_known.checked_sub(USER_EDIT_RECORD_SIZE).ok_or_else(|| {
        Error::corrupt("generation chain loops and no room remains for a repair candidate")
    })?;
    if visited.contains(&candidate) {
        return Err(Error::corrupt("generation chain repair would revisit a generation"));
    }

    let (header, length) = RecordHeader::read(data, candidate as usize)?;
    let plausible = RecordType::from(header.type_id) == RecordType::UserEditAtom
        && (length as usize == USER_EDIT_PAYLOAD || length as usize == USER_EDIT_PAYLOAD_ENCRYPTED)
        && candidate as usize + RECORD_HEADER_SIZE + length as usize <= data.len();
    if !plausible {
        return Err(Error::corrupt(format!(
            "generation chain loops and no generation record decodes at offset {candidate}"
        )));
    }

    log::warn!("generation chain loops; repaired backward link to offset {candidate}");
    Ok(candidate)
}
