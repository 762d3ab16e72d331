use crate::changeset::schema::{Changeset, ValidationError};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const COMBINED_PREFIX: &str = "Combined multiple changesets: ";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read changeset from {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("changeset JSON content is empty")]
    Empty,

    #[error("failed to parse changeset JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid changeset format: document {document} has no 'changeset' object")]
    MissingChangeset { document: usize },

    #[error("invalid changeset format: document {document} has no 'files' array")]
    MissingFiles { document: usize },

    #[error("invalid changeset: {0}")]
    Validation(#[from] ValidationError),
}

/// Parse and validate a changeset document.
///
/// `\r\n` sequences are normalized to `\n` before parsing, and raw control
/// characters inside string literals are escaped, so multi-line content pasted
/// without escaping still parses. Several documents concatenated back to back
/// are merged into one changeset.
pub fn load_from_str(input: &str) -> Result<Changeset, LoadError> {
    let normalized = input.replace("\r\n", "\n");
    if normalized.trim().is_empty() {
        return Err(LoadError::Empty);
    }

    let escaped = escape_raw_controls(&normalized);
    let documents = read_documents(&escaped)?;
    let changeset = merge_documents(documents)?;
    let changeset: Changeset = serde_json::from_value(changeset)?;
    changeset.validate()?;
    Ok(changeset)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Changeset, LoadError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents)
}

/// Escape literal newlines, carriage returns and tabs that appear inside JSON
/// string literals. Text outside strings is left untouched.
fn escape_raw_controls(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in input.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            } else {
                match c {
                    '\n' => {
                        out.push_str("\\n");
                        continue;
                    }
                    '\r' => {
                        out.push_str("\\r");
                        continue;
                    }
                    '\t' => {
                        out.push_str("\\t");
                        continue;
                    }
                    _ => {}
                }
            }
        } else if c == '"' {
            in_string = true;
        }
        out.push(c);
    }

    out
}

/// Read every JSON value in `input`, allowing them to be concatenated.
fn read_documents(input: &str) -> Result<Vec<Value>, LoadError> {
    serde_json::Deserializer::from_str(input)
        .into_iter::<Value>()
        .map(|value| value.map_err(LoadError::from))
        .collect()
}

/// Pull the `changeset` object out of a document.
///
/// Accepts the bare envelope `{"changeset": {...}}` as well as a tool-call
/// wrapper `{"name": ..., "args" | "parameters": {"changeset": {...}}}`.
fn extract_changeset(document: Value, index: usize) -> Result<Map<String, Value>, LoadError> {
    let Value::Object(mut envelope) = document else {
        return Err(LoadError::MissingChangeset { document: index });
    };

    let changeset = match envelope.remove("changeset") {
        Some(changeset) => changeset,
        None => ["args", "parameters"]
            .iter()
            .find_map(|key| match envelope.get_mut(*key) {
                Some(Value::Object(args)) => args.remove("changeset"),
                _ => None,
            })
            .ok_or(LoadError::MissingChangeset { document: index })?,
    };

    let Value::Object(changeset) = changeset else {
        return Err(LoadError::MissingChangeset { document: index });
    };
    if !matches!(changeset.get("files"), Some(Value::Array(_))) {
        return Err(LoadError::MissingFiles { document: index });
    }
    Ok(changeset)
}

fn merge_documents(documents: Vec<Value>) -> Result<Value, LoadError> {
    let mut changesets = documents
        .into_iter()
        .enumerate()
        .map(|(index, document)| extract_changeset(document, index))
        .collect::<Result<Vec<_>, _>>()?;

    match changesets.len() {
        0 => Err(LoadError::Empty),
        1 => Ok(Value::Object(changesets.remove(0))),
        count => {
            tracing::info!(count, "merging concatenated changesets");
            Ok(combine(changesets))
        }
    }
}

/// Combine several changesets, grouping file entries by path.
///
/// Paths compare case-insensitively; the first spelling and first-seen order
/// win, and changes are appended in document order.
fn combine(changesets: Vec<Map<String, Value>>) -> Value {
    let mut descriptions = Vec::new();
    let mut files: Vec<(String, Vec<Value>)> = Vec::new();

    for mut changeset in changesets {
        let description = changeset
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("Unnamed changeset")
            .to_string();
        descriptions.push(description);

        let Some(Value::Array(entries)) = changeset.remove("files") else {
            continue;
        };

        for entry in entries {
            let Value::Object(mut entry) = entry else {
                continue;
            };
            let Some(path) = entry.get("path").and_then(Value::as_str).map(str::to_string)
            else {
                continue;
            };
            let changes = match entry.remove("changes") {
                Some(Value::Array(changes)) => changes,
                _ => Vec::new(),
            };

            let key = path.to_lowercase();
            match files
                .iter_mut()
                .find(|(existing, _)| existing.to_lowercase() == key)
            {
                Some((_, existing)) => existing.extend(changes),
                None => files.push((path, changes)),
            }
        }
    }

    let files = files
        .into_iter()
        .map(|(path, changes)| {
            let mut entry = Map::new();
            entry.insert("path".to_string(), Value::String(path));
            entry.insert("changes".to_string(), Value::Array(changes));
            Value::Object(entry)
        })
        .collect();

    let mut combined = Map::new();
    combined.insert(
        "description".to_string(),
        Value::String(format!("{COMBINED_PREFIX}{}", descriptions.join("; "))),
    );
    combined.insert("files".to_string(), Value::Array(files));
    Value::Object(combined)
}
