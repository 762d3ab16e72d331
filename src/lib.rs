//! Changeset Patcher: applies JSON-described file edits to a directory tree
//!
//! A changeset lists files and, for each file, an ordered sequence of changes.
//! Changes are produced by a non-deterministic source (typically a language
//! model), so the line numbers they carry are treated as hints: the "old"
//! fragment is searched for outward from the hinted line and the nearest
//! match wins.
//!
//! # Architecture
//!
//! - [`text`] splits text into lines while remembering each line ending
//! - [`locate`] finds a fragment nearest to a line hint
//! - [`edit`] rebuilds text around a replaced span and writes it out
//! - [`safety`] confines every path to the root directory
//! - [`changeset`] parses changesets and dispatches the seven change types
//! - [`log`] collects the human-readable diagnostics returned to callers
//!
//! # Guarantees
//!
//! - Line endings outside an edited span are preserved byte-for-byte
//! - A change whose anchor cannot be found leaves the file untouched
//! - Paths escaping the root are rejected before any filesystem access
//! - Writes are direct by default; [`WriteMode::Atomic`] opts into
//!   tempfile + fsync + rename
//!
//! # Example
//!
//! ```no_run
//! use changeset_patcher::ChangesetProcessor;
//!
//! let json = r#"{"changeset": {"description": "fix", "files": [
//!     {"path": "a.txt", "changes": [
//!         {"change_type": "modifyFile", "lineNumber": 2,
//!          "oldContent": "line2", "newContent": "LINE2"}
//!     ]}
//! ]}}"#;
//!
//! let mut processor = ChangesetProcessor::new("/path/to/project");
//! match processor.process_changeset(json) {
//!     Ok(report) => print!("{}", report.log_text()),
//!     Err(e) => eprintln!("Changeset rejected: {}", e),
//! }
//! ```

pub mod changeset;
pub mod edit;
pub mod locate;
pub mod log;
pub mod safety;
pub mod text;

// Re-exports
pub use changeset::{
    load_from_path, load_from_str, Applied, ApplyError, ApplyReport, ChangeItem, ChangeOutcome,
    ChangeRecord, ChangeType, Changeset, ChangesetProcessor, FileChange, LoadError,
    ProcessorOptions, SkipReason, Skipped, ValidationError, ValidationIssue,
};
pub use edit::{rebuild, replace_at_hint, LineSpan, TextEditError, WriteMode};
pub use locate::{locate_fragment, MatchMode};
pub use log::{ChangeLog, LogEntry, LogLevel};
pub use safety::{is_path_safe, resolve_path, PathSandbox, SandboxError};
pub use text::{split_bom, LineEnding, TextInfo};
