use std::{
    io,
    path::{Component, Path, PathBuf},
};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path escapes storage root: {0}")]
    Escape(String),
    #[error("invalid path: {0}")]
    Invalid(String),
}

/// A request target mapped into the storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// `/`-joined path below the root; empty for the root itself.
    pub relative: String,
    /// First segment of `relative`, the nominal owner of the resource.
    pub owner: String,
    pub absolute: PathBuf,
}

impl ResolvedPath {
    pub fn is_root(&self) -> bool {
        self.relative.is_empty()
    }
}

/// Lexical sandbox over a directory. Symlinks below the root are not
/// resolved, so a link pointing outside the root is followed.
#[derive(Debug, Clone)]
pub struct StorageRoot {
    root: PathBuf,
}

impl StorageRoot {
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = std::path::absolute(root.as_ref())?;
        Ok(Self {
            root: normalize_lexically(&root),
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, requested: &str) -> Result<ResolvedPath, PathError> {
        if requested.contains('\0') {
            return Err(PathError::Invalid(requested.escape_default().to_string()));
        }

        let unified = requested.replace('\\', "/");
        let trimmed = unified.trim_matches('/');
        let absolute = normalize_lexically(&self.root.join(trimmed));
        if !absolute.starts_with(&self.root) {
            return Err(PathError::Escape(requested.to_string()));
        }

        let relative = absolute
            .strip_prefix(&self.root)
            .map_err(|_| PathError::Escape(requested.to_string()))?
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let owner = relative.split('/').next().unwrap_or_default().to_string();

        Ok(ResolvedPath {
            relative,
            owner,
            absolute,
        })
    }
}

/// Collapses `.` and `..` without touching the file system. `..` at the root
/// stays at the root.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn resolves_owner_and_relative_path() {
        let dir = TempDir::new().unwrap();
        let root = StorageRoot::new(dir.path()).unwrap();

        let resolved = root.resolve("/client1/docs/./a.txt").unwrap();
        assert_eq!(resolved.relative, "client1/docs/a.txt");
        assert_eq!(resolved.owner, "client1");
        assert_eq!(resolved.absolute, root.path().join("client1/docs/a.txt"));

        let resolved = root.resolve("\\client2\\x\\..\\y\\").unwrap();
        assert_eq!(resolved.relative, "client2/y");

        let resolved = root.resolve("/").unwrap();
        assert!(resolved.is_root());
        assert_eq!(resolved.owner, "");
        assert_eq!(resolved.absolute, root.path());
    }

    #[test]
    fn dot_dot_inside_root_is_accepted() {
        let dir = TempDir::new().unwrap();
        let root = StorageRoot::new(dir.path()).unwrap();
        let resolved = root.resolve("client1/../client2/f").unwrap();
        assert_eq!(resolved.owner, "client2");
    }

    #[test]
    fn escapes_are_rejected() {
        let dir = TempDir::new().unwrap();
        let root = StorageRoot::new(dir.path().join("storage")).unwrap();

        for path in [
            "../../etc/passwd",
            "/..",
            "client1/../../storage2",
            "..\\x",
            "a/b/../../../c",
        ] {
            assert!(
                matches!(root.resolve(path), Err(PathError::Escape(_))),
                "{path} should escape"
            );
        }
        assert!(matches!(root.resolve("a\0b"), Err(PathError::Invalid(_))));
    }

    #[test]
    fn acceptance_follows_segment_depth() {
        let dir = TempDir::new().unwrap();
        let root = StorageRoot::new(dir.path().join("storage")).unwrap();

        // Every sequence of `a`, `.` and `..` segments stays inside the root
        // unless some prefix climbs above it.
        for mask in 0u32..729 {
            let mut segments = Vec::new();
            let mut depth = 0i32;
            let mut escapes = false;
            let mut code = mask;
            for _ in 0..6 {
                let segment = match code % 3 {
                    0 => "a",
                    1 => ".",
                    _ => "..",
                };
                code /= 3;
                match segment {
                    "a" => depth += 1,
                    ".." => depth -= 1,
                    _ => {}
                }
                escapes |= depth < 0;
                segments.push(segment);
            }

            let path = segments.join("/");
            let result = root.resolve(&path);
            assert_eq!(result.is_err(), escapes, "{path}");
            if let Ok(resolved) = result {
                assert!(resolved.absolute.starts_with(root.path()));
            }
        }
    }
}
