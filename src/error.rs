//! Error types for archive access and repair operations.
//!
//! Validation findings are never surfaced as errors; they live in
//! [`crate::report::Report`]. The variants here cover the two hard failure
//! classes (unreadable archive, repair-time I/O) plus internal parse errors
//! that the validator converts into Fatal findings itself.

use std::io;

use thiserror::Error;

/// Top-level error for open/repair operations.
#[derive(Debug, Error)]
pub enum EpubError {
    /// The underlying ZIP container could not be read.
    #[error("archive error: {0}")]
    Zip(#[from] ZipError),

    /// Filesystem failure while reading input or publishing repair output.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// An XML document could not be parsed at all.
    #[error("xml error: {0}")]
    Xml(String),

    /// A navigation document was structurally unusable.
    #[error("navigation error: {0}")]
    Navigation(String),
}

/// Structural errors from the ZIP accessor.
#[derive(Debug, Error)]
pub enum ZipError {
    /// The end-of-central-directory record was not found; this is not a
    /// ZIP archive (or it is truncated beyond recovery).
    #[error("not a ZIP archive: end of central directory record not found")]
    NotAnArchive,

    /// The archive ended before a declared structure was complete.
    #[error("truncated archive while reading {0}")]
    Truncated(&'static str),

    /// A central-directory or local-header signature did not match.
    #[error("bad signature while reading {0}")]
    BadSignature(&'static str),

    /// Entry is compressed with a method this reader does not support.
    #[error("unsupported compression method {method} for entry '{name}'")]
    UnsupportedMethod { name: String, method: u16 },

    /// Stored CRC does not match the decompressed bytes.
    #[error("CRC mismatch for entry '{name}'")]
    CrcMismatch { name: String },

    /// The deflate stream for an entry is corrupt.
    #[error("corrupt deflate stream in entry '{name}'")]
    BadDeflate { name: String },

    /// Lookup of an entry name that is not present.
    #[error("entry not found: '{0}'")]
    EntryNotFound(String),

    /// Entry sizes exceed what a ZIP32 archive can describe.
    #[error("entry too large for a ZIP32 archive: '{0}'")]
    TooLarge(String),
}
