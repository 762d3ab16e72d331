use std::env;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Confines file operations to a root directory.
///
/// Unlike a canonicalizing guard, the sandbox must judge paths that do not
/// exist yet (files about to be created, rename targets), so containment is
/// decided on a lexically normalized path whose deepest existing ancestor has
/// been canonicalized. That still catches `..` traversal and symlinked
/// directories pointing out of the root.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    /// Absolute, normalized root
    root: PathBuf,
}

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Path is outside the root directory: {path} (root: {root})")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("Failed to determine current directory: {0}")]
    CurrentDir(#[from] std::io::Error),
}

impl PathSandbox {
    /// Create a sandbox rooted at `root`.
    ///
    /// A relative root is taken relative to the current directory; an empty
    /// root means the current directory itself.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        let root = if root.as_os_str().is_empty() {
            env::current_dir()?
        } else {
            absolutize(root)?
        };

        Ok(Self {
            root: resolve_existing_prefix(&normalize_lexically(&root)),
        })
    }

    /// Resolve a changeset path against the root without checking containment.
    pub fn resolve(&self, path: &str) -> PathBuf {
        resolve_path(path, &self.root)
    }

    /// Check whether an already-resolved path lies inside the root.
    pub fn is_safe(&self, resolved: &Path) -> bool {
        is_path_safe(resolved, &self.root)
    }

    /// Resolve `path` and reject it if it escapes the root.
    pub fn check(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let resolved = self.resolve(path);
        if !self.is_safe(&resolved) {
            return Err(SandboxError::OutsideRoot {
                path: resolved,
                root: self.root.clone(),
            });
        }
        Ok(resolved)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The form containment is judged on: absolute, `.`/`..` folded, existing
    /// prefix canonicalized. Two spellings of one location normalize equal.
    pub fn normalize(&self, resolved: &Path) -> PathBuf {
        let absolute = absolutize(resolved).unwrap_or_else(|_| resolved.to_path_buf());
        resolve_existing_prefix(&normalize_lexically(&absolute))
    }
}

/// Resolve `path` against `root`.
///
/// Absolute paths that already point inside `root` are kept. Otherwise a
/// single leading `/` is stripped, so `/src/lib.rs` means `<root>/src/lib.rs`;
/// paths that are still absolute after that are used as-is.
pub fn resolve_path(path: &str, root: &Path) -> PathBuf {
    let trimmed = path.trim();
    let candidate = Path::new(trimmed);
    if candidate.is_absolute() && !root.as_os_str().is_empty() && is_path_safe(candidate, root) {
        return candidate.to_path_buf();
    }

    let stripped = trimmed.strip_prefix('/').unwrap_or(trimmed);
    let stripped_path = Path::new(stripped);
    if stripped_path.is_absolute() {
        stripped_path.to_path_buf()
    } else {
        root.join(stripped_path)
    }
}

/// Check whether `resolved` lies strictly under `root`.
///
/// Both sides are made absolute and normalized, then compared as strings
/// with a trailing separator, ignoring case. An empty root contains nothing.
pub fn is_path_safe(resolved: &Path, root: &Path) -> bool {
    if resolved.as_os_str().is_empty() || root.as_os_str().is_empty() {
        return false;
    }

    let (Ok(path), Ok(root)) = (absolutize(resolved), absolutize(root)) else {
        return false;
    };
    let path = resolve_existing_prefix(&normalize_lexically(&path));
    let root = resolve_existing_prefix(&normalize_lexically(&root));

    let path = with_trailing_separator(&path);
    let root = with_trailing_separator(&root);
    path.to_lowercase().starts_with(&root.to_lowercase()) && path.len() > root.len()
}

fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

/// Drop `.` components and fold `..` into their parent without touching the disk.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Popping past the root is a no-op, matching how the OS resolves `/..`
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the deepest ancestor that exists and re-attach the rest.
fn resolve_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut remainder = Vec::new();

    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for part in remainder.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                remainder.push(name.to_os_string());
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

fn with_trailing_separator(path: &Path) -> String {
    let mut text = path.to_string_lossy().into_owned();
    if !text.ends_with(std::path::MAIN_SEPARATOR) && !text.ends_with('/') {
        text.push(std::path::MAIN_SEPARATOR);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_resolve_relative_path() {
        let root = Path::new("/project");
        assert_eq!(
            resolve_path("src/main.rs", root),
            PathBuf::from("/project/src/main.rs")
        );
    }

    #[test]
    fn test_resolve_strips_single_leading_slash() {
        let root = Path::new("/project");
        assert_eq!(
            resolve_path("/src/main.rs", root),
            PathBuf::from("/project/src/main.rs")
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_resolve_keeps_absolute_path_inside_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let inside = root.join("a.txt");
        assert_eq!(resolve_path(inside.to_str().unwrap(), &root), inside);
    }

    #[test]
    fn test_parent_traversal_is_unsafe() {
        let root = Path::new("/project");
        let resolved = resolve_path("../outside.txt", root);
        assert_eq!(resolved, PathBuf::from("/project/../outside.txt"));
        assert!(!is_path_safe(&resolved, root));
    }

    #[test]
    fn test_inner_traversal_is_safe() {
        let root = Path::new("/project");
        let resolved = resolve_path("src/../lib.rs", root);
        assert!(is_path_safe(&resolved, root));
    }

    #[test]
    fn test_sibling_with_common_prefix_is_unsafe() {
        let root = Path::new("/project");
        assert!(!is_path_safe(Path::new("/project-other/a.txt"), root));
    }

    #[test]
    fn test_root_itself_is_not_a_target() {
        let root = Path::new("/project");
        assert!(!is_path_safe(Path::new("/project"), root));
        assert!(!is_path_safe(Path::new("/project/"), root));
    }

    #[test]
    #[cfg(unix)]
    fn test_case_insensitive_prefix() {
        let root = Path::new("/Project");
        assert!(is_path_safe(Path::new("/project/a.txt"), root));
    }

    #[test]
    fn test_empty_root_contains_nothing() {
        assert!(!is_path_safe(Path::new("/a.txt"), Path::new("")));
    }

    #[test]
    fn test_sandbox_check_inside_and_outside() {
        let temp_dir = tempfile::tempdir().unwrap();
        let workspace = temp_dir.path().join("workspace");
        fs::create_dir_all(&workspace).unwrap();
        let sandbox = PathSandbox::new(&workspace).unwrap();

        let inside = sandbox.check("new/dir/file.txt").unwrap();
        assert!(inside.starts_with(sandbox.root()));

        let result = sandbox.check("../outside.rs");
        assert!(matches!(result, Err(SandboxError::OutsideRoot { .. })));
    }

    #[test]
    fn test_normalize_folds_spellings_of_one_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::create_dir(temp_dir.path().join("sub")).unwrap();
        fs::write(temp_dir.path().join("a.txt"), "a").unwrap();
        let sandbox = PathSandbox::new(temp_dir.path()).unwrap();

        let direct = sandbox.normalize(&sandbox.resolve("a.txt"));
        assert_eq!(sandbox.normalize(&sandbox.resolve("sub/../a.txt")), direct);
        assert_eq!(sandbox.normalize(&sandbox.resolve("./a.txt")), direct);
        assert_ne!(sandbox.normalize(&sandbox.resolve("sub/a.txt")), direct);
    }

    #[test]
    fn test_empty_root_falls_back_to_current_dir() {
        let sandbox = PathSandbox::new("").unwrap();
        let cwd = env::current_dir().unwrap().canonicalize().unwrap();
        assert_eq!(sandbox.root(), cwd.as_path());
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinked_directory_escape() {
        use std::os::unix::fs::symlink;

        let temp_dir = tempfile::tempdir().unwrap();
        let workspace = temp_dir.path().join("workspace");
        let outside = temp_dir.path().join("outside");
        fs::create_dir_all(&workspace).unwrap();
        fs::create_dir_all(&outside).unwrap();
        symlink(&outside, workspace.join("escape")).unwrap();

        let sandbox = PathSandbox::new(&workspace).unwrap();
        let result = sandbox.check("escape/new.rs");

        assert!(matches!(result, Err(SandboxError::OutsideRoot { .. })));
    }
}
