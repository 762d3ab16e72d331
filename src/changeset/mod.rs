pub mod applicator;
pub mod loader;
pub mod schema;

pub use applicator::{
    Applied, ApplyError, ApplyReport, ChangeOutcome, ChangeRecord, ChangesetProcessor,
    ProcessorOptions, SkipReason, Skipped,
};
pub use loader::{load_from_path, load_from_str, LoadError};
pub use schema::{ChangeItem, ChangeType, Changeset, FileChange, ValidationError, ValidationIssue};
