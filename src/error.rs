//! Error types for the persistence engine.

use thiserror::Error;

/// Main error type for pitaya operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed record stream: bad header, length overrun, or an
    /// unresolvable edit-generation chain.
    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    /// File predates the 97-2003 binary revision. Fail fast instead of
    /// guessing at a layout this engine does not know.
    #[error("unsupported legacy format: {0}")]
    UnsupportedLegacyFormat(String),

    /// The document is encrypted and no password was supplied.
    #[error("document is encrypted; a password is required")]
    EncryptedDocumentLocked,

    /// The supplied password failed the verifier check.
    #[error("wrong password")]
    WrongPassword,

    /// The picture stream ends before the entry its own header promises.
    /// During document open this is recovered locally; the variant is
    /// surfaced only by strict standalone parsing.
    #[error("picture stream truncated: {read} of {expected} bytes available")]
    TruncatedAuxiliaryStream { read: usize, expected: usize },
}

/// Result type for pitaya operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand used by the codec and resolver for malformed-stream failures.
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::CorruptStream(msg.into())
    }
}
