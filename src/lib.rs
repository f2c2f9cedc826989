//! epub-doctor -- EPUB validation and mechanical repair
//!
//! Validates EPUB 2 and EPUB 3 packages against a fixed catalog of
//! container, package, navigation, content, stylesheet and media checks,
//! and optionally repairs the mechanically-fixable findings by rewriting
//! the archive.
//!
//! Validation never panics or errors on bad book content: every problem in
//! the package becomes a [`report::Message`] and the run always yields a
//! complete [`report::Report`]. Hard `Err`s are reserved for I/O and for
//! repair-time write failures.
//!
//! ```no_run
//! use epub_doctor::validate::validate_path;
//!
//! let report = validate_path("book.epub");
//! for msg in report.messages() {
//!     println!("{msg}");
//! }
//! assert!(report.is_valid());
//! ```

#![warn(missing_docs)]

pub mod archive;
pub mod doctor;
pub mod error;
pub mod mime;
pub mod navigation;
pub mod package;
pub mod report;
pub mod resolver;
pub mod validate;

// Re-export key types for convenience
pub use archive::Archive;
pub use doctor::{repair_path, Fix, RepairOutcome};
pub use error::{EpubError, ZipError};
pub use navigation::{Navigation, Ncx};
pub use package::PackageDoc;
pub use report::{Message, Report, Severity};
pub use validate::{validate_bytes, validate_path, ValidationOptions};
