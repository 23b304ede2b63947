use std::path::{Component, Path, PathBuf};

use globset::GlobMatcher;
use qcode_types::{Error, ErrorKind, contains_steganographic_chars};

/// §4.1 path validation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    Read,
    Write,
    Dir,
}

pub(crate) fn validate_path(
    policy: &qcode_types::SecurityPolicy,
    forbidden: &[(String, GlobMatcher)],
    p: &str,
    mode: PathMode,
    working_dir: &Path,
) -> Result<PathBuf, Error> {
    if p.trim().is_empty() {
        return Err(Error::new(ErrorKind::PathOutsideWorkspace, "path must not be empty"));
    }
    if contains_steganographic_chars(p) {
        return Err(Error::new(
            ErrorKind::PathOutsideWorkspace,
            "path contains invisible or control characters",
        ));
    }

    let input = Path::new(p);
    let absolute = if input.is_absolute() {
        input.to_path_buf()
    } else {
        working_dir.join(input)
    };

    let normalized = normalize(&absolute);

    if !policy.allow_outside_roots && !is_within_allowed_roots(policy, &normalized, mode, working_dir)? {
        return Err(Error::new(
            ErrorKind::PathOutsideWorkspace,
            format!("path '{}' is outside the workspace", normalized.display()),
        )
        .with_context("path", normalized.display().to_string()));
    }

    if let Some(pattern) = matches_forbidden(forbidden, &normalized) {
        return Err(Error::new(
            ErrorKind::ForbiddenPathPattern,
            format!("path '{}' matches forbidden pattern '{pattern}'", normalized.display()),
        )
        .with_context("pattern", pattern));
    }

    check_exists_for_mode(&normalized, mode)?;

    Ok(normalized)
}

/// Collapse `.`, `..`, and redundant separators without touching the
/// filesystem. Canonicalization via symlink resolution happens only for
/// paths that exist (`std::fs::canonicalize`); a normalized-but-not-yet-
/// created path (the `write`/`create` case) keeps this lexical form.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // A leading `..` that would escape the root is caught by the
                // allowed-roots containment check below; popping here keeps
                // `a/b/../c` equal to `a/c` for matching purposes.
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Resolve symlinks for the containment check. Falls back to the lexical
/// normalization for paths (or parents) that do not yet exist, so `write`
/// targets in not-yet-created directories can still be validated.
fn resolve_for_containment(path: &Path) -> PathBuf {
    if let Ok(canon) = std::fs::canonicalize(path) {
        return canon;
    }
    // Walk up to the nearest existing ancestor, canonicalize that, and
    // rejoin the non-existent suffix.
    let mut ancestor = path.parent();
    let mut suffix: Vec<&std::ffi::OsStr> = Vec::new();
    if let Some(name) = path.file_name() {
        suffix.push(name);
    }
    while let Some(a) = ancestor {
        if let Ok(canon) = std::fs::canonicalize(a) {
            let mut result = canon;
            for part in suffix.into_iter().rev() {
                result.push(part);
            }
            return result;
        }
        if let Some(name) = a.file_name() {
            suffix.push(name);
        }
        ancestor = a.parent();
    }
    path.to_path_buf()
}

fn is_within_allowed_roots(
    policy: &qcode_types::SecurityPolicy,
    normalized: &Path,
    _mode: PathMode,
    _working_dir: &Path,
) -> Result<bool, Error> {
    let resolved = resolve_for_containment(normalized);
    Ok(policy.allowed_roots.iter().any(|root| resolved.starts_with(root)))
}

pub(crate) fn matches_forbidden(forbidden: &[(String, GlobMatcher)], normalized: &Path) -> Option<String> {
    let text = normalize_for_glob(normalized);
    forbidden
        .iter()
        .find(|(_, matcher)| matcher.is_match(&text))
        .map(|(pattern, _)| pattern.clone())
}

#[cfg(windows)]
fn normalize_for_glob(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

#[cfg(not(windows))]
fn normalize_for_glob(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn check_exists_for_mode(path: &Path, mode: PathMode) -> Result<(), Error> {
    match mode {
        PathMode::Read => {
            let meta = std::fs::symlink_metadata(path).map_err(|e| {
                Error::new(
                    ErrorKind::PathOutsideWorkspace,
                    format!("cannot stat '{}': {e}", path.display()),
                )
            })?;
            if !(meta.is_file() || meta.file_type().is_symlink()) {
                return Err(Error::new(
                    ErrorKind::PathOutsideWorkspace,
                    format!("'{}' is not a regular file", path.display()),
                ));
            }
            Ok(())
        }
        PathMode::Dir => {
            let meta = std::fs::symlink_metadata(path).map_err(|e| {
                Error::new(
                    ErrorKind::PathOutsideWorkspace,
                    format!("cannot stat '{}': {e}", path.display()),
                )
            })?;
            if !(meta.is_dir() || meta.file_type().is_symlink()) {
                return Err(Error::new(
                    ErrorKind::PathOutsideWorkspace,
                    format!("'{}' is not a directory", path.display()),
                ));
            }
            Ok(())
        }
        PathMode::Write => {
            let parent = path.parent().ok_or_else(|| {
                Error::new(ErrorKind::PathOutsideWorkspace, "path has no parent directory")
            })?;
            if parent.exists() {
                if !parent.is_dir() {
                    return Err(Error::new(
                        ErrorKind::PathOutsideWorkspace,
                        format!("parent '{}' is not a directory", parent.display()),
                    ));
                }
                Ok(())
            } else {
                // Creatable: the parent doesn't exist yet but lives inside
                // an allowed root, which was already checked above.
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_parent_dir() {
        let normalized = normalize(Path::new("/a/b/../c"));
        assert_eq!(normalized, PathBuf::from("/a/c"));
    }

    #[test]
    fn normalize_collapses_current_dir() {
        let normalized = normalize(Path::new("/a/./b"));
        assert_eq!(normalized, PathBuf::from("/a/b"));
    }
}
