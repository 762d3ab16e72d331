use serde::Deserialize;
use std::fmt;

/// The `changeset` object of a changeset document.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Changeset {
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    pub files: Vec<FileChange>,
}

/// Ordered edits for one path. The same path may appear in several entries.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct FileChange {
    #[serde(default, deserialize_with = "null_as_default")]
    pub path: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub changes: Vec<ChangeItem>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ChangeItem {
    pub change_type: ChangeType,
    /// 1-based approximate location; absent or zero means start of file.
    #[serde(rename = "lineNumber", default)]
    pub line_number: Option<i64>,
    #[serde(rename = "oldContent", default)]
    pub old_content: Option<String>,
    #[serde(rename = "newContent", default)]
    pub new_content: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ChangeItem {
    pub fn new(change_type: ChangeType) -> Self {
        Self {
            change_type,
            line_number: None,
            old_content: None,
            new_content: None,
            description: None,
        }
    }

    pub fn with_line(mut self, line_number: i64) -> Self {
        self.line_number = Some(line_number);
        self
    }

    pub fn with_old(mut self, old_content: impl Into<String>) -> Self {
        self.old_content = Some(old_content.into());
        self
    }

    pub fn with_new(mut self, new_content: impl Into<String>) -> Self {
        self.new_content = Some(new_content.into());
        self
    }

    pub fn line_hint(&self) -> i64 {
        self.line_number.unwrap_or(0)
    }

    pub fn old_text(&self) -> &str {
        self.old_content.as_deref().unwrap_or("")
    }

    pub fn new_text(&self) -> &str {
        self.new_content.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    #[serde(rename = "modifyFile")]
    ModifyFile,
    #[serde(rename = "addToFile")]
    AddToFile,
    #[serde(rename = "deleteFromFile")]
    DeleteFromFile,
    #[serde(rename = "createnewFile")]
    CreateNewFile,
    #[serde(rename = "replaceFile")]
    ReplaceFile,
    #[serde(rename = "renameFile")]
    RenameFile,
    #[serde(rename = "deleteFile")]
    DeleteFile,
}

impl ChangeType {
    /// Name as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::ModifyFile => "modifyFile",
            ChangeType::AddToFile => "addToFile",
            ChangeType::DeleteFromFile => "deleteFromFile",
            ChangeType::CreateNewFile => "createnewFile",
            ChangeType::ReplaceFile => "replaceFile",
            ChangeType::RenameFile => "renameFile",
            ChangeType::DeleteFile => "deleteFile",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Changeset {
    /// Check required fields without touching the filesystem.
    ///
    /// All issues are collected rather than stopping at the first one.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.files.is_empty() {
            issues.push(ValidationIssue::EmptyFileList);
        }

        for (file_index, file) in self.files.iter().enumerate() {
            if file.path.trim().is_empty() {
                issues.push(ValidationIssue::MissingPath { file_index });
            }
            if file.changes.is_empty() {
                issues.push(ValidationIssue::NoChanges {
                    file_index,
                    path: file.path.clone(),
                });
            }

            for (change_index, change) in file.changes.iter().enumerate() {
                let missing = |field: &'static str| ValidationIssue::MissingField {
                    file_index,
                    change_index,
                    change_type: change.change_type,
                    field,
                };

                match change.change_type {
                    ChangeType::ModifyFile | ChangeType::DeleteFromFile => {
                        if change.old_content.is_none() {
                            issues.push(missing("oldContent"));
                        }
                    }
                    ChangeType::CreateNewFile | ChangeType::ReplaceFile => {
                        if change.new_content.is_none() {
                            issues.push(missing("newContent"));
                        }
                    }
                    ChangeType::RenameFile => {
                        if change.new_text().trim().is_empty() {
                            issues.push(missing("newContent"));
                        }
                    }
                    ChangeType::AddToFile | ChangeType::DeleteFile => {}
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Total number of change items across all file entries.
    pub fn change_count(&self) -> usize {
        self.files.iter().map(|file| file.changes.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    EmptyFileList,
    MissingPath {
        file_index: usize,
    },
    NoChanges {
        file_index: usize,
        path: String,
    },
    MissingField {
        file_index: usize,
        change_index: usize,
        change_type: ChangeType,
        field: &'static str,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyFileList => write!(f, "changeset contains no files"),
            ValidationIssue::MissingPath { file_index } => {
                write!(f, "file entry {file_index} is missing 'path'")
            }
            ValidationIssue::NoChanges { file_index, path } => {
                write!(f, "file entry {file_index} ('{path}') has no changes")
            }
            ValidationIssue::MissingField {
                file_index,
                change_index,
                change_type,
                field,
            } => write!(
                f,
                "change {change_index} of file entry {file_index} ({change_type}) requires '{field}'"
            ),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
