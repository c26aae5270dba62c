//! Offset-recomputing writer.
//!
//! Saving re-lays the whole document stream, so every record that was on
//! disk may move. Two passes keep the cross-references consistent: a
//! counting dry run assigns each record its post-save offset and derives an
//! old-offset → new-offset map, then the commit pass rewrites the
//! position-dependent records (generation records and pointer directories)
//! through that map and encodes everything, routing persist records through
//! the cipher gate when a session is active. The save finishes by appending
//! a fresh pointer directory and generation record; prior generations stay
//! in the stream, so edit history accumulates until it is normalized away.

use crate::consts::{RecordType, is_plaintext_exempt};
use crate::crypto::EncryptionSession;
use crate::current_user::CurrentUserAtom;
use crate::document::SavedRecord;
use crate::error::{Error, Result};
use crate::persist::{PersistDirectory, UserEditAtom};
use crate::record::RecordBody;
use std::collections::HashMap;

/// Re-emit a chain record (generation or pointer directory) through its
/// typed form without changing its meaning. The dry run measures records in
/// this canonical shape, so the later offset patch cannot change a length
/// after offsets have been assigned.
fn canonicalize_chain_record(saved: &mut SavedRecord) -> Result<()> {
    match RecordType::from(saved.record.header.type_id) {
        RecordType::UserEditAtom => {
            let atom = UserEditAtom::from_record(&saved.record)?;
            saved.record.body = atom.to_record().body;
        }
        RecordType::PersistPtrFullBlock | RecordType::PersistPtrIncrementalBlock => {
            let dir = PersistDirectory::from_record(&saved.record)?;
            saved.record.body = RecordBody::Atom(dir.build_payload());
        }
        _ => {}
    }
    Ok(())
}

/// Serialize the document stream.
///
/// `head` is the template for the appended generation record; its offset
/// fields are overwritten here. With `full_directory` set (first save of a
/// fresh or freshly normalized document) the appended directory carries the
/// complete persist mapping and the generation's previous link is 0;
/// otherwise the directory holds only the ids whose offsets changed and the
/// generation links back to the previous newest generation's new offset.
///
/// On success `records` has gained the appended pair, every record's
/// `last_offset` is its post-save offset, and `current_user` points at the
/// new generation.
pub(crate) fn save_document_stream(
    records: &mut Vec<SavedRecord>,
    head: &UserEditAtom,
    current_user: &mut CurrentUserAtom,
    session: Option<&EncryptionSession>,
    full_directory: bool,
) -> Result<Vec<u8>> {
    for saved in records.iter_mut() {
        if saved.last_offset.is_some() {
            canonicalize_chain_record(saved)?;
        }
    }

    // Pass one: counting dry run.
    let mut new_offsets = Vec::with_capacity(records.len());
    let mut cursor: usize = 0;
    for saved in records.iter() {
        new_offsets.push(cursor as u32);
        cursor += saved.record.encoded_len();
    }

    let mut old_to_new: HashMap<u32, u32> = HashMap::new();
    for (saved, &new_offset) in records.iter().zip(&new_offsets) {
        if let Some(old) = saved.last_offset {
            old_to_new.insert(old, new_offset);
        }
    }

    // The appended directory: the full mapping, or the ids that moved or
    // were never on disk.
    let mut directory = PersistDirectory::new();
    for (saved, &new_offset) in records.iter().zip(&new_offsets) {
        if let Some(id) = saved.persist_id
            && (full_directory || saved.last_offset != Some(new_offset))
        {
            directory.insert(id, new_offset);
        }
    }
    let directory_record = if full_directory {
        directory.to_full_record()
    } else {
        directory.to_record()
    };
    let directory_offset = cursor as u32;
    cursor += directory_record.encoded_len();

    let mut generation = head.clone();
    generation.persist_dir_offset = directory_offset;
    generation.prev_edit_offset = if full_directory {
        0
    } else {
        *old_to_new
            .get(&current_user.current_edit_offset)
            .ok_or_else(|| {
                Error::corrupt(format!(
                    "previous generation at offset {} is not part of this save",
                    current_user.current_edit_offset
                ))
            })?
    };
    let generation_record = generation.to_record();
    let generation_offset = cursor as u32;
    cursor += generation_record.encoded_len();

    // Pass two: commit.
    let mut out = Vec::with_capacity(cursor);
    for (saved, &new_offset) in records.iter_mut().zip(&new_offsets) {
        debug_assert_eq!(out.len() as u32, new_offset);
        let type_id = saved.record.header.type_id;
        if saved.last_offset.is_some() {
            match RecordType::from(type_id) {
                RecordType::UserEditAtom => {
                    let mut atom = UserEditAtom::from_record(&saved.record)?;
                    atom.patch_offsets(&old_to_new);
                    saved.record.body = atom.to_record().body;
                }
                RecordType::PersistPtrFullBlock | RecordType::PersistPtrIncrementalBlock => {
                    let mut dir = PersistDirectory::from_record(&saved.record)?;
                    dir.patch_offsets(&old_to_new);
                    saved.record.body = RecordBody::Atom(dir.build_payload());
                }
                _ => {}
            }
        }

        let bytes = saved.record.encode_to_vec();
        match (session, saved.persist_id) {
            (Some(session), Some(id)) if !is_plaintext_exempt(type_id) => {
                out.extend_from_slice(&session.encrypt_record(&bytes, id));
            }
            _ => out.extend_from_slice(&bytes),
        }
        saved.last_offset = Some(new_offset);
    }

    debug_assert_eq!(out.len() as u32, directory_offset);
    directory_record.encode(&mut out);
    debug_assert_eq!(out.len() as u32, generation_offset);
    generation_record.encode(&mut out);

    records.push(SavedRecord {
        record: directory_record,
        last_offset: Some(directory_offset),
        persist_id: None,
    });
    records.push(SavedRecord {
        record: generation_record,
        last_offset: Some(generation_offset),
        persist_id: None,
    });
    current_user.current_edit_offset = generation_offset;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::tests_support::fixed_session;
    use crate::persist::walk_chain;
    use crate::record::Record;

    fn slide(payload: &[u8], persist_id: u32) -> SavedRecord {
        SavedRecord {
            record: Record::atom(RecordType::SlideAtom as u16, 2, 0, payload.to_vec()),
            last_offset: None,
            persist_id: Some(persist_id),
        }
    }

    fn first_save(records: &mut Vec<SavedRecord>) -> (UserEditAtom, CurrentUserAtom, Vec<u8>) {
        let max = records.iter().filter_map(|r| r.persist_id).max().unwrap_or(0);
        let head = UserEditAtom::new(0, 1, max);
        let mut current_user = CurrentUserAtom::new(0);
        let stream =
            save_document_stream(records, &head, &mut current_user, None, true).unwrap();
        (head, current_user, stream)
    }

    #[test]
    fn test_first_save_emits_full_directory() {
        let mut records = vec![slide(&[1, 2, 3], 1), slide(&[4, 5], 2)];
        let (_, current_user, stream) = first_save(&mut records);

        let chain = walk_chain(&stream, current_user.current_edit_offset).unwrap();
        assert_eq!(chain.generations.len(), 1);
        assert_eq!(chain.newest().atom.prev_edit_offset, 0);
        assert_eq!(chain.directory.len(), 2);

        let (rec, _) = Record::decode(&stream, chain.directory.get(1).unwrap() as usize).unwrap();
        assert_eq!(rec.payload().unwrap(), &[1, 2, 3]);
        let (rec, _) = Record::decode(&stream, chain.directory.get(2).unwrap() as usize).unwrap();
        assert_eq!(rec.payload().unwrap(), &[4, 5]);

        // The appended pair joined the record list with their offsets.
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.last_offset.is_some()));
    }

    #[test]
    fn test_incremental_save_links_back_and_patches() {
        let mut records = vec![slide(&[1, 2, 3], 1), slide(&[4, 5], 2)];
        let (head, mut current_user, _) = first_save(&mut records);
        let first_gen_old = current_user.current_edit_offset;

        records.push(slide(&[9, 9, 9], 3));
        let stream =
            save_document_stream(&mut records, &head, &mut current_user, None, false).unwrap();

        let chain = walk_chain(&stream, current_user.current_edit_offset).unwrap();
        assert_eq!(chain.generations.len(), 2);

        // The new generation links to the first one's post-save offset, and
        // every offset the chain names decodes to the right record kind.
        let prev = chain.newest().atom.prev_edit_offset;
        assert_ne!(prev, first_gen_old);
        let (rec, _) = Record::decode(&stream, prev as usize).unwrap();
        assert_eq!(rec.record_type(), RecordType::UserEditAtom);
        for link in &chain.generations {
            let (rec, _) =
                Record::decode(&stream, link.atom.persist_dir_offset as usize).unwrap();
            assert!(matches!(
                rec.record_type(),
                RecordType::PersistPtrFullBlock | RecordType::PersistPtrIncrementalBlock
            ));
        }

        // Merged mapping covers all three ids.
        for (id, expected) in [(1u32, vec![1, 2, 3]), (2, vec![4, 5]), (3, vec![9, 9, 9])] {
            let offset = chain.directory.get(id).unwrap();
            let (rec, _) = Record::decode(&stream, offset as usize).unwrap();
            assert_eq!(rec.payload().unwrap(), &expected[..]);
        }
    }

    #[test]
    fn test_edited_record_wins_after_incremental_save() {
        let mut records = vec![slide(&[1, 2, 3], 1)];
        let (head, mut current_user, _) = first_save(&mut records);

        records[0] = SavedRecord {
            record: Record::atom(RecordType::SlideAtom as u16, 2, 0, vec![7, 7]),
            ..records[0].clone()
        };
        let stream =
            save_document_stream(&mut records, &head, &mut current_user, None, false).unwrap();

        let chain = walk_chain(&stream, current_user.current_edit_offset).unwrap();
        let (rec, _) = Record::decode(&stream, chain.directory.get(1).unwrap() as usize).unwrap();
        assert_eq!(rec.payload().unwrap(), &[7, 7]);
    }

    #[test]
    fn test_encrypted_save_keeps_chain_plaintext() {
        let session = fixed_session("pw");
        let mut records = vec![slide(&[1, 2, 3, 4], 1)];
        let mut head = UserEditAtom::new(0, 1, 1);
        head.encrypt_session_ref = Some(1);
        let mut current_user = CurrentUserAtom::new(0);
        current_user.set_encrypted(true);

        let stream =
            save_document_stream(&mut records, &head, &mut current_user, Some(&session), true)
                .unwrap();

        // The chain itself stays readable without the password.
        let chain = walk_chain(&stream, current_user.current_edit_offset).unwrap();
        let offset = chain.directory.get(1).unwrap() as usize;

        // The persist record does not: its bytes are ciphertext until routed
        // back through the gate with its persist id as the block number.
        let plain = records[0].record.encode_to_vec();
        assert_ne!(&stream[offset..offset + plain.len()], &plain[..]);
        let decrypted = session.decrypt_record(&stream, offset, 1).unwrap();
        assert_eq!(decrypted, plain);
    }

    #[test]
    fn test_missing_previous_generation_is_corrupt() {
        let mut records = vec![slide(&[1], 1)];
        let head = UserEditAtom::new(0, 1, 1);
        let mut current_user = CurrentUserAtom::new(9999);
        let result = save_document_stream(&mut records, &head, &mut current_user, None, false);
        assert!(matches!(result, Err(Error::CorruptStream(_))));
    }
}
