//! Changeset applicator - dispatches each change to its file operation
//!
//! This module provides the engine that:
//! - Parses and validates a changeset, failing fast on structural problems
//! - Confines every path to the sandbox root before touching the disk
//! - Applies changes in document order against the current file contents
//! - Records a per-change outcome plus a human-readable log
//!
//! A missing anchor, missing file or sandbox violation skips that one change;
//! the rest of the changeset still runs.

use crate::changeset::loader::{load_from_str, LoadError};
use crate::changeset::schema::{ChangeItem, ChangeType, Changeset};
use crate::edit::{insert_at_start, replace_at_hint, write_file, WriteMode};
use crate::locate::{closest_line, MatchMode};
use crate::log::{render, ChangeLog, LogEntry};
use crate::safety::{PathSandbox, SandboxError};
use crate::text::{split_bom, TextInfo};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tunables for a [`ChangesetProcessor`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorOptions {
    pub match_mode: MatchMode,
    pub write_mode: WriteMode,
}

/// A change that took effect (or provably needed no effect).
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "Applied should be checked for the kind of effect"]
pub enum Applied {
    /// Fragment edit written back to the file
    Written { file: PathBuf },
    /// Nothing to do: the change would not alter the file
    Unchanged { file: PathBuf },
    Created { file: PathBuf },
    Replaced { file: PathBuf },
    Renamed {
        from: PathBuf,
        to: PathBuf,
        /// An existing file at `to` was deleted first
        replaced_existing: bool,
    },
    Deleted { file: PathBuf },
}

impl fmt::Display for Applied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Applied::Written { file } => write!(f, "Modified {}", file.display()),
            Applied::Unchanged { file } => write!(f, "No changes needed for {}", file.display()),
            Applied::Created { file } => write!(f, "Created {}", file.display()),
            Applied::Replaced { file } => write!(f, "Replaced contents of {}", file.display()),
            Applied::Renamed { from, to, .. } => {
                write!(f, "Renamed {} to {}", from.display(), to.display())
            }
            Applied::Deleted { file } => write!(f, "Deleted {}", file.display()),
        }
    }
}

/// Why a change was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// `oldContent` does not occur anywhere in the file
    AnchorNotFound {
        line_number: i64,
        /// 1-based line that most resembles the anchor, if any
        near_miss: Option<usize>,
    },
    /// A fragment operation arrived without `oldContent`
    EmptyAnchor,
    FileNotFound,
    OutsideRoot { root: PathBuf },
    Io { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub file: PathBuf,
    pub reason: SkipReason,
}

impl Skipped {
    fn new(file: impl Into<PathBuf>, reason: SkipReason) -> Self {
        Self {
            file: file.into(),
            reason,
        }
    }

    fn io(file: &Path, error: impl fmt::Display) -> Self {
        Self::new(
            file,
            SkipReason::Io {
                message: error.to_string(),
            },
        )
    }
}

impl fmt::Display for Skipped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self.file.display();
        match &self.reason {
            SkipReason::AnchorNotFound {
                line_number,
                near_miss,
            } => {
                write!(
                    f,
                    "Failed to find matching content at line {line_number} in file {file}"
                )?;
                if let Some(line) = near_miss {
                    write!(f, " (closest similar line: {line})")?;
                }
                Ok(())
            }
            SkipReason::EmptyAnchor => write!(f, "No oldContent given for change to {file}"),
            SkipReason::FileNotFound => write!(f, "File not found: {file}"),
            SkipReason::OutsideRoot { root } => write!(
                f,
                "Access denied: Path is outside the root directory: {file} (root: {})",
                root.display()
            ),
            SkipReason::Io { message } => write!(f, "I/O error on {file}: {message}"),
        }
    }
}

pub type ChangeOutcome = Result<Applied, Skipped>;

/// Outcome of one change item, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub file_index: usize,
    pub change_index: usize,
    pub path: String,
    pub change_type: ChangeType,
    pub outcome: ChangeOutcome,
}

/// Result of processing a changeset.
///
/// Returned whenever the changeset was structurally valid and processed;
/// individual changes may still have been skipped.
#[derive(Debug, Clone)]
pub struct ApplyReport {
    pub description: String,
    pub records: Vec<ChangeRecord>,
    /// Log entries produced while processing this changeset
    pub log: Vec<LogEntry>,
    /// Number of file content writes performed
    pub files_written: usize,
}

impl ApplyReport {
    pub fn all_applied(&self) -> bool {
        self.records.iter().all(|record| record.outcome.is_ok())
    }

    pub fn applied(&self) -> impl Iterator<Item = &Applied> {
        self.records
            .iter()
            .filter_map(|record| record.outcome.as_ref().ok())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &Skipped> {
        self.records
            .iter()
            .filter_map(|record| record.outcome.as_ref().err())
    }

    pub fn log_text(&self) -> String {
        render(&self.log)
    }
}

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("invalid root directory: {0}")]
    Root(#[from] SandboxError),
}

/// Applies changesets to files under one root directory.
///
/// Holds a single mutable log, so one instance must not be shared between
/// concurrent applications.
#[derive(Debug, Clone)]
pub struct ChangesetProcessor {
    root: String,
    options: ProcessorOptions,
    log: ChangeLog,
}

impl ChangesetProcessor {
    pub fn new(root: impl Into<String>) -> Self {
        Self::with_options(root, ProcessorOptions::default())
    }

    pub fn with_options(root: impl Into<String>, options: ProcessorOptions) -> Self {
        Self {
            root: root.into().trim().to_string(),
            options,
            log: ChangeLog::new(),
        }
    }

    pub fn set_root(&mut self, root: impl Into<String>) {
        self.root = root.into().trim().to_string();
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn options(&self) -> ProcessorOptions {
        self.options
    }

    /// Everything logged by this processor so far, across calls.
    pub fn log(&self) -> &ChangeLog {
        &self.log
    }

    /// Parse a JSON changeset and apply it.
    pub fn process_changeset(&mut self, json: &str) -> Result<ApplyReport, ApplyError> {
        let mark = self.log.len();
        let changeset = match load_from_str(json) {
            Ok(changeset) => changeset,
            Err(err) => {
                self.log.error(format!("Invalid changeset: {err}"));
                return Err(err.into());
            }
        };
        self.apply_from(mark, &changeset)
    }

    /// Apply an already-parsed changeset.
    pub fn apply_changeset(&mut self, changeset: &Changeset) -> Result<ApplyReport, ApplyError> {
        let mark = self.log.len();
        if let Err(err) = changeset.validate() {
            self.log.error(format!("Invalid changeset: {err}"));
            return Err(LoadError::Validation(err).into());
        }
        self.apply_from(mark, changeset)
    }

    fn apply_from(&mut self, mark: usize, changeset: &Changeset) -> Result<ApplyReport, ApplyError> {
        if self.root.is_empty() {
            self.log
                .warn("Root path not specified; using the current directory as root");
        }

        let sandbox = match PathSandbox::new(&self.root) {
            Ok(sandbox) => sandbox,
            Err(err) => {
                self.log.error(format!("Cannot use root directory: {err}"));
                return Err(err.into());
            }
        };

        let span = tracing::info_span!(
            "changeset",
            root = %sandbox.root().display(),
            changes = changeset.change_count()
        );
        let _entered = span.enter();

        let mut dispatcher = Dispatcher {
            sandbox: &sandbox,
            options: self.options,
            files_written: 0,
        };
        let mut records = Vec::with_capacity(changeset.change_count());

        for (file_index, file) in changeset.files.iter().enumerate() {
            for (change_index, change) in file.changes.iter().enumerate() {
                tracing::debug!(
                    path = %file.path,
                    change_type = %change.change_type,
                    line = change.line_hint(),
                    "dispatching change"
                );

                let outcome = dispatcher.apply(&file.path, change);
                self.record(change.change_type, &outcome);
                records.push(ChangeRecord {
                    file_index,
                    change_index,
                    path: file.path.clone(),
                    change_type: change.change_type,
                    outcome,
                });
            }
        }

        Ok(ApplyReport {
            description: changeset.description.clone(),
            records,
            log: self.log.since(mark).to_vec(),
            files_written: dispatcher.files_written,
        })
    }

    fn record(&mut self, change_type: ChangeType, outcome: &ChangeOutcome) {
        match outcome {
            Ok(applied) => {
                if let Applied::Renamed {
                    to,
                    replaced_existing: true,
                    ..
                } = applied
                {
                    self.log
                        .warn(format!("Target file already exists: {}", to.display()));
                }
                self.log.info(format!("{change_type}: {applied}"));
            }
            Err(skipped) => match skipped.reason {
                SkipReason::OutsideRoot { .. } | SkipReason::Io { .. } => {
                    self.log.error(format!("{change_type}: {skipped}"))
                }
                _ => self.log.warn(format!("{change_type}: {skipped}")),
            },
        }
    }
}

/// Per-changeset state shared by the operation handlers.
struct Dispatcher<'a> {
    sandbox: &'a PathSandbox,
    options: ProcessorOptions,
    files_written: usize,
}

impl Dispatcher<'_> {
    fn apply(&mut self, path: &str, change: &ChangeItem) -> ChangeOutcome {
        match change.change_type {
            ChangeType::ModifyFile => self.modify(path, change),
            ChangeType::AddToFile => self.add_to(path, change),
            ChangeType::DeleteFromFile => self.delete_from(path, change),
            ChangeType::CreateNewFile => self.create_new(path, change),
            ChangeType::ReplaceFile => self.replace(path, change),
            ChangeType::RenameFile => self.rename(path, change),
            ChangeType::DeleteFile => self.delete(path),
        }
    }

    fn guard(&self, path: &str) -> Result<PathBuf, Skipped> {
        self.sandbox.check(path).map_err(|err| match err {
            SandboxError::OutsideRoot { path, root } => {
                tracing::warn!(path = %path.display(), "sandbox violation");
                Skipped::new(path, SkipReason::OutsideRoot { root })
            }
            other => Skipped::io(Path::new(path), other),
        })
    }

    fn modify(&mut self, path: &str, change: &ChangeItem) -> ChangeOutcome {
        let file = self.guard(path)?;
        if change.old_content == change.new_content {
            return Ok(Applied::Unchanged { file });
        }

        let content = read_existing(&file)?;
        let old = change.old_text();
        if old.is_empty() {
            return Err(Skipped::new(file, SkipReason::EmptyAnchor));
        }
        self.rewrite(file, &content, old, change.new_text(), change.line_hint())
    }

    fn add_to(&mut self, path: &str, change: &ChangeItem) -> ChangeOutcome {
        let file = self.guard(path)?;
        let content = read_existing(&file)?;
        let (old, new) = (change.old_text(), change.new_text());

        if old.is_empty() {
            let (bom, body) = split_bom(&content);
            let updated = format!("{bom}{}", insert_at_start(body, new));
            return self.write_if_changed(file, &content, &updated);
        }

        let replacement = format!("{old}{new}");
        self.rewrite(file, &content, old, &replacement, change.line_hint())
    }

    fn delete_from(&mut self, path: &str, change: &ChangeItem) -> ChangeOutcome {
        let file = self.guard(path)?;
        let content = read_existing(&file)?;
        let old = change.old_text();
        if old.is_empty() {
            return Err(Skipped::new(file, SkipReason::EmptyAnchor));
        }
        self.rewrite(file, &content, old, "", change.line_hint())
    }

    fn create_new(&mut self, path: &str, change: &ChangeItem) -> ChangeOutcome {
        let file = self.guard(path)?;
        ensure_parent(&file)?;
        self.write(&file, change.new_text())?;
        Ok(Applied::Created { file })
    }

    fn replace(&mut self, path: &str, change: &ChangeItem) -> ChangeOutcome {
        let file = self.guard(path)?;
        ensure_parent(&file)?;
        self.write(&file, change.new_text())?;
        Ok(Applied::Replaced { file })
    }

    fn rename(&mut self, path: &str, change: &ChangeItem) -> ChangeOutcome {
        let from = self.guard(path)?;
        let to = self.guard(change.new_text())?;

        if !from.is_file() {
            return Err(Skipped::new(from, SkipReason::FileNotFound));
        }
        let from_id = self.sandbox.normalize(&from);
        let to_id = self.sandbox.normalize(&to);
        if from_id == to_id {
            return Ok(Applied::Unchanged { file: from });
        }

        // A case-only difference may name the source itself on a case-insensitive
        // filesystem, so the destination must not be deleted up front.
        let case_variant =
            from_id.to_string_lossy().to_lowercase() == to_id.to_string_lossy().to_lowercase();

        ensure_parent(&to)?;
        let replaced_existing = !case_variant && to.exists();
        if replaced_existing {
            fs::remove_file(&to).map_err(|err| Skipped::io(&to, err))?;
        }
        fs::rename(&from, &to).map_err(|err| Skipped::io(&from, err))?;

        Ok(Applied::Renamed {
            from,
            to,
            replaced_existing,
        })
    }

    fn delete(&mut self, path: &str) -> ChangeOutcome {
        let file = self.guard(path)?;
        if !file.is_file() {
            return Err(Skipped::new(file, SkipReason::FileNotFound));
        }
        fs::remove_file(&file).map_err(|err| Skipped::io(&file, err))?;
        Ok(Applied::Deleted { file })
    }

    /// Locate `old` near the hint, substitute `new`, and write the result.
    fn rewrite(
        &mut self,
        file: PathBuf,
        content: &str,
        old: &str,
        new: &str,
        line_number: i64,
    ) -> ChangeOutcome {
        let (bom, body) = split_bom(content);
        match replace_at_hint(body, old, new, line_number, self.options.match_mode) {
            Some(updated) => self.write_if_changed(file, content, &format!("{bom}{updated}")),
            None => {
                let reason = anchor_not_found(body, old, line_number);
                Err(Skipped::new(file, reason))
            }
        }
    }

    fn write_if_changed(&mut self, file: PathBuf, before: &str, after: &str) -> ChangeOutcome {
        if before == after {
            return Ok(Applied::Unchanged { file });
        }
        self.write(&file, after)?;
        Ok(Applied::Written { file })
    }

    fn write(&mut self, file: &Path, content: &str) -> Result<(), Skipped> {
        write_file(file, content, self.options.write_mode).map_err(|err| Skipped::io(file, err))?;
        self.files_written += 1;
        tracing::info!(file = %file.display(), bytes = content.len(), "wrote file");
        Ok(())
    }
}

fn anchor_not_found(content: &str, old: &str, line_number: i64) -> SkipReason {
    let source = TextInfo::split(content);
    let fragment = TextInfo::split(old);
    SkipReason::AnchorNotFound {
        line_number,
        near_miss: closest_line(&source.lines, &fragment.lines).map(|miss| miss.line + 1),
    }
}

fn read_existing(file: &Path) -> Result<String, Skipped> {
    if !file.is_file() {
        return Err(Skipped::new(file, SkipReason::FileNotFound));
    }
    fs::read_to_string(file).map_err(|err| Skipped::io(file, err))
}

fn ensure_parent(file: &Path) -> Result<(), Skipped> {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => {
            fs::create_dir_all(parent).map_err(|err| Skipped::io(parent, err))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::schema::FileChange;
    use tempfile::TempDir;

    fn processor(dir: &TempDir) -> ChangesetProcessor {
        ChangesetProcessor::new(dir.path().to_string_lossy().into_owned())
    }

    fn single(path: &str, change: ChangeItem) -> Changeset {
        Changeset {
            description: "test".to_string(),
            files: vec![FileChange {
                path: path.to_string(),
                changes: vec![change],
            }],
        }
    }

    #[test]
    fn test_add_to_appends_directly_after_anchor() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "X\r\nZ\r\n").unwrap();

        let changeset = single(
            "a.txt",
            ChangeItem::new(ChangeType::AddToFile)
                .with_line(1)
                .with_old("X")
                .with_new("Y"),
        );
        let report = processor(&dir).apply_changeset(&changeset).unwrap();

        assert!(report.all_applied());
        assert_eq!(
            fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "XY\r\nZ\r\n"
        );
    }

    #[test]
    fn test_rename_through_parent_component_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.txt"), "precious").unwrap();

        let changeset = single(
            "a.txt",
            ChangeItem::new(ChangeType::RenameFile).with_new("sub/../a.txt"),
        );
        let report = processor(&dir).apply_changeset(&changeset).unwrap();

        assert!(matches!(
            report.records[0].outcome,
            Ok(Applied::Unchanged { .. })
        ));
        assert_eq!(
            fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "precious"
        );
    }

    #[test]
    fn test_modify_first_line_after_byte_order_mark() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "\u{feff}line1\nline2\n").unwrap();

        let changeset = single(
            "a.txt",
            ChangeItem::new(ChangeType::ModifyFile)
                .with_line(1)
                .with_old("line1")
                .with_new("LINE1"),
        );
        let report = processor(&dir).apply_changeset(&changeset).unwrap();

        assert!(report.all_applied());
        assert_eq!(
            fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "\u{feff}LINE1\nline2\n"
        );
    }

    #[test]
    fn test_root_is_trimmed_and_resettable() {
        let mut processor = ChangesetProcessor::new("  /tmp/a  ");
        assert_eq!(processor.root(), "/tmp/a");
        processor.set_root(" /tmp/b");
        assert_eq!(processor.root(), "/tmp/b");
    }

    #[test]
    fn test_modify_same_content_skips_write() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a\n").unwrap();

        let changeset = single(
            "a.txt",
            ChangeItem::new(ChangeType::ModifyFile)
                .with_line(1)
                .with_old("a")
                .with_new("a"),
        );
        let report = processor(&dir).apply_changeset(&changeset).unwrap();

        assert_eq!(report.files_written, 0);
        assert!(matches!(
            report.records[0].outcome,
            Ok(Applied::Unchanged { .. })
        ));
    }

    #[test]
    fn test_anchor_not_found_reports_near_miss() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "fn main() {\n    run_server();\n}\n").unwrap();

        let changeset = single(
            "a.txt",
            ChangeItem::new(ChangeType::DeleteFromFile)
                .with_line(1)
                .with_old("run_servr();"),
        );
        let report = processor(&dir).apply_changeset(&changeset).unwrap();

        let skipped: Vec<_> = report.skipped().collect();
        assert_eq!(skipped.len(), 1);
        assert_eq!(
            skipped[0].reason,
            SkipReason::AnchorNotFound {
                line_number: 1,
                near_miss: Some(2)
            }
        );
        assert!(report.log_text().contains("Failed to find matching content"));
    }

    #[test]
    fn test_rename_onto_itself_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "keep").unwrap();

        let changeset = single(
            "a.txt",
            ChangeItem::new(ChangeType::RenameFile).with_new("a.txt"),
        );
        let report = processor(&dir).apply_changeset(&changeset).unwrap();

        assert!(report.all_applied());
        assert_eq!(
            fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "keep"
        );
    }

    #[test]
    fn test_invalid_changeset_is_logged_and_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut processor = processor(&dir);

        let result = processor.process_changeset("{\"changeset\": {}}");
        assert!(matches!(
            result,
            Err(ApplyError::Load(LoadError::MissingFiles { .. }))
        ));
        assert!(processor.log().to_text().contains("Invalid changeset"));
    }

    #[test]
    fn test_report_log_only_covers_current_call() {
        let dir = tempfile::tempdir().unwrap();
        let mut processor = processor(&dir);
        let changeset = single(
            "new.txt",
            ChangeItem::new(ChangeType::CreateNewFile).with_new("x"),
        );

        let first = processor.apply_changeset(&changeset).unwrap();
        let second = processor.apply_changeset(&changeset).unwrap();

        assert_eq!(first.log.len(), 1);
        assert_eq!(second.log.len(), 1);
        assert_eq!(processor.log().len(), 2);
    }
}
