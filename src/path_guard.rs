use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::errors::{not_found, permission_denied, unsupported_format, validation};

/// Canonicalizes every file reference and enforces containment in an
/// operator-supplied allow-list of root directories plus an extension
/// allow-list. The canonical path returned on success is the stable identity
/// used by the Handle Manager and embedded in cursors.
#[derive(Debug, Clone)]
pub struct PathGuard {
    roots: Vec<PathBuf>,
    extensions: Vec<String>,
}

impl PathGuard {
    /// `roots` must already be canonicalized, existing directories; an empty
    /// list means every open is rejected with `PERMISSION_DENIED`.
    pub fn new(roots: Vec<PathBuf>, extensions: Vec<String>) -> Self {
        Self { roots, extensions }
    }

    pub fn validate_open_path(&self, input: &str) -> Result<PathBuf> {
        if input.trim().is_empty() {
            return Err(validation("path must not be empty").into());
        }
        if self.roots.is_empty() {
            return Err(permission_denied("no workspace roots are configured").into());
        }

        let candidate = PathBuf::from(input);

        let ext = candidate
            .extension()
            .and_then(|os| os.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !self.extensions.iter().any(|allowed| allowed == &ext) {
            return Err(unsupported_format(format!(
                "extension '{ext}' is not in the supported set {:?}",
                self.extensions
            ))
            .into());
        }

        let absolute = if candidate.is_absolute() {
            candidate
        } else {
            std::env::current_dir()
                .map_err(|e| anyhow::anyhow!("failed to resolve current directory: {e}"))?
                .join(candidate)
        };

        if !absolute.exists() {
            return Err(not_found(format!("path '{}' does not exist", absolute.display())).into());
        }

        let resolved = absolute
            .canonicalize()
            .map_err(|e| permission_denied(format!("failed to resolve symlinks: {e}")))?;

        if !resolved.is_file() {
            return Err(validation(format!("path '{}' is not a regular file", resolved.display())).into());
        }

        let contained = self.roots.iter().any(|root| {
            resolved
                .strip_prefix(root)
                .map(|rel| !rel.starts_with(".."))
                .unwrap_or(false)
        });
        if !contained {
            return Err(permission_denied(format!(
                "path '{}' is outside every allow-listed root",
                resolved.display()
            ))
            .into());
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn guard_with(dir: &Path) -> PathGuard {
        PathGuard::new(vec![dir.to_path_buf()], vec!["xlsx".into()])
    }

    #[test]
    fn accepts_file_within_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("book.xlsx");
        fs::write(&file, b"stub").unwrap();
        let resolved = guard_with(dir.path()).validate_open_path(file.to_str().unwrap()).unwrap();
        assert_eq!(resolved, file.canonicalize().unwrap());
    }

    #[test]
    fn rejects_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("book.csv");
        fs::write(&file, b"stub").unwrap();
        let err = guard_with(dir.path())
            .validate_open_path(file.to_str().unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("UNSUPPORTED_FORMAT"));
    }

    #[test]
    fn rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.xlsx");
        let err = guard_with(dir.path())
            .validate_open_path(missing.to_str().unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("NOT_FOUND"));
    }

    #[test]
    fn rejects_escape_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let sibling_dir = tempfile::tempdir().unwrap();
        let sibling_file = sibling_dir.path().join("outside.xlsx");
        fs::write(&sibling_file, b"stub").unwrap();
        let err = guard_with(dir.path())
            .validate_open_path(sibling_file.to_str().unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("PERMISSION_DENIED"));
    }

    #[test]
    fn empty_roots_reject_everything() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("book.xlsx");
        fs::write(&file, b"stub").unwrap();
        let guard = PathGuard::new(Vec::new(), vec!["xlsx".into()]);
        let err = guard.validate_open_path(file.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("PERMISSION_DENIED"));
    }
}
