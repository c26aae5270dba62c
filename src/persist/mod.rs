//! Persist-identifier bookkeeping: pointer directories, generation records,
//! and the two chain-resolution algorithms.

pub mod directory;
pub mod resolver;
pub mod user_edit;

pub use directory::PersistDirectory;
pub use resolver::{ChainView, GenerationLink, full_merge, walk_chain};
pub use user_edit::UserEditAtom;
