//! Pitaya - persistence engine for the legacy PowerPoint binary format
//!
//! This library implements the storage layer of 97-2003 era `.ppt` files:
//! the record codec, the incremental edit-generation chain, the per-record
//! RC4 encryption gate, and the offset-recomputing writer. It deliberately
//! stops below the object model — what a slide or shape *means* is for a
//! layer above; this crate answers which bytes are live, where they sit,
//! and how to write them back without breaking the chain.
//!
//! The OLE2 compound file itself is also out of scope: a document is opened
//! from its named streams through the [`StreamContainer`] trait (or raw
//! byte slices).
//!
//! # Example - resolving the live records
//!
//! ```no_run
//! use pitaya::Document;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let (doc_stream, current_user_stream) = (vec![], vec![]);
//! let doc = Document::from_streams(&doc_stream, &current_user_stream, None, None)?;
//!
//! // The most recent incarnation of every persist record, in id order.
//! for (persist_id, record) in doc.resolved_records() {
//!     println!("persist {} -> record type {:?}", persist_id, record.record_type());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Example - editing and saving
//!
//! ```no_run
//! use pitaya::{Document, Record};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let (doc_stream, current_user_stream) = (vec![], vec![]);
//! let mut doc = Document::from_streams(&doc_stream, &current_user_stream, None, None)?;
//!
//! doc.append_persist_record(Record::atom(1007, 2, 0, vec![0; 24]));
//! // Collapse the accumulated edit history before protecting the file.
//! doc.set_password(Some("s3cret"))?;
//! let (doc_stream, current_user_stream, _) = doc.write_to_streams()?;
//! # let _ = (doc_stream, current_user_stream);
//! # Ok(())
//! # }
//! ```

pub mod consts;
pub mod crypto;
pub mod current_user;
pub mod document;
pub mod error;
mod normalize;
pub mod persist;
pub mod pictures;
pub mod record;
mod writer;

pub use consts::RecordType;
pub use current_user::CurrentUserAtom;
pub use document::{Document, SavedRecord, StreamContainer};
pub use error::{Error, Result};
pub use persist::{ChainView, PersistDirectory, UserEditAtom, full_merge, walk_chain};
pub use pictures::{PictureEntry, PictureStore};
pub use record::{Record, RecordBody, RecordHeader};
