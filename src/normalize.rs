//! Generation normalizer: collapses the accumulated edit history.
//!
//! After a squash the record list holds only the most recent incarnation of
//! every persist record, in persist-id order. All generation records and
//! pointer directories are dropped; the next save emits a single generation
//! with a previous link of 0 and one complete directory, so a reader sees
//! the same resolved table through a one-step chain.

use crate::document::SavedRecord;

/// Drop everything but the live persist records and order them by id.
///
/// `last_offset` values survive the squash: until the next save the kept
/// records are still at their old stream positions.
pub(crate) fn squash_history(records: &mut Vec<SavedRecord>) {
    let mut kept: Vec<SavedRecord> = records
        .drain(..)
        .filter(|saved| saved.persist_id.is_some())
        .collect();
    kept.sort_by_key(|saved| saved.persist_id);
    *records = kept;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::RecordType;
    use crate::current_user::CurrentUserAtom;
    use crate::persist::{UserEditAtom, walk_chain};
    use crate::record::Record;
    use crate::writer::save_document_stream;

    fn slide(payload: &[u8], persist_id: u32) -> SavedRecord {
        SavedRecord {
            record: Record::atom(RecordType::SlideAtom as u16, 2, 0, payload.to_vec()),
            last_offset: None,
            persist_id: Some(persist_id),
        }
    }

    #[test]
    fn test_squash_keeps_only_persist_records_in_id_order() {
        let mut records = vec![slide(&[2], 2), slide(&[1], 1)];
        records.push(SavedRecord {
            record: UserEditAtom::new(0, 1, 2).to_record(),
            last_offset: Some(100),
            persist_id: None,
        });

        squash_history(&mut records);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].persist_id, Some(1));
        assert_eq!(records[1].persist_id, Some(2));
    }

    #[test]
    fn test_normalized_save_converges_to_one_generation() {
        // Build up three generations.
        let mut records = vec![slide(&[1, 1], 1), slide(&[2, 2], 2)];
        let head = UserEditAtom::new(0, 1, 2);
        let mut current_user = CurrentUserAtom::new(0);
        save_document_stream(&mut records, &head, &mut current_user, None, true).unwrap();
        records[0].record = Record::atom(RecordType::SlideAtom as u16, 2, 0, vec![1, 1, 1]);
        save_document_stream(&mut records, &head, &mut current_user, None, false).unwrap();
        records.push(slide(&[3], 3));
        let before =
            save_document_stream(&mut records, &head, &mut current_user, None, false).unwrap();
        let resolved_before = walk_chain(&before, current_user.current_edit_offset)
            .unwrap()
            .directory
            .iter()
            .map(|(id, _)| id)
            .collect::<Vec<_>>();

        // Squash and save once more: one generation, same resolved ids.
        squash_history(&mut records);
        let head = UserEditAtom::new(0, 1, 3);
        let after =
            save_document_stream(&mut records, &head, &mut current_user, None, true).unwrap();
        let chain = walk_chain(&after, current_user.current_edit_offset).unwrap();
        assert_eq!(chain.generations.len(), 1);
        assert_eq!(chain.newest().atom.prev_edit_offset, 0);
        assert_eq!(
            chain.directory.iter().map(|(id, _)| id).collect::<Vec<_>>(),
            resolved_before
        );

        // Same record contents through the single-step chain.
        let (rec, _) = Record::decode(&after, chain.directory.get(1).unwrap() as usize).unwrap();
        assert_eq!(rec.payload().unwrap(), &[1, 1, 1]);
        let (rec, _) = Record::decode(&after, chain.directory.get(3).unwrap() as usize).unwrap();
        assert_eq!(rec.payload().unwrap(), &[3]);
    }
}
