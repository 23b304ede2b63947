//! Policy Gate (§4.1) — the single source of truth for "is this path
//! reachable?" and "is this command runnable?". Every tool in
//! `qcode-tools` routes filesystem and subprocess intent through a
//! [`PolicyGate`] before touching the filesystem or spawning a process.
//!
//! The gate is stateless and pure: the same `(policy, input)` always
//! produces the same outcome (§4.1 "State machine").

mod blacklist;
mod command;
mod path;

pub use blacklist::{CATASTROPHIC_COMMAND_PATTERNS, is_catastrophic_command};
pub use command::CommandValidation;
pub use path::PathMode;

use globset::{Glob, GlobMatcher};
use qcode_types::{Error, ErrorKind, HomoglyphWarning, SecurityPolicy};

/// A compiled [`SecurityPolicy`]: glob patterns parsed into matchers once,
/// at construction, rather than re-parsed on every call.
pub struct PolicyGate {
    policy: SecurityPolicy,
    forbidden_path: Vec<(String, GlobMatcher)>,
    allow_command: Vec<(String, GlobMatcher)>,
    deny_command: Vec<(String, GlobMatcher)>,
}

impl PolicyGate {
    /// Compile a [`SecurityPolicy`] into a gate. Fails if any glob pattern
    /// is syntactically invalid or an allowed root cannot be canonicalized.
    pub fn new(policy: SecurityPolicy) -> Result<Self, Error> {
        let allowed_roots = policy
            .allowed_roots
            .iter()
            .map(|root| {
                std::fs::canonicalize(root).map_err(|e| {
                    Error::new(
                        ErrorKind::PathOutsideWorkspace,
                        format!("allowed root {} could not be canonicalized: {e}", root.display()),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let forbidden_path = compile_path_globs(&policy.forbidden_path_globs)?;
        let allow_command = compile_command_globs(&policy.allow_command_globs)?;
        let deny_command = compile_command_globs(&policy.deny_command_globs)?;

        Ok(Self {
            policy: SecurityPolicy {
                allowed_roots,
                ..policy
            },
            forbidden_path,
            allow_command,
            deny_command,
        })
    }

    #[must_use]
    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// §4.1 `validatePath`. `working_dir` resolves a relative `p`.
    pub fn validate_path(
        &self,
        p: &str,
        mode: PathMode,
        working_dir: &std::path::Path,
    ) -> Result<std::path::PathBuf, Error> {
        let result = path::validate_path(&self.policy, &self.forbidden_path, p, mode, working_dir);
        if let Err(e) = &result {
            tracing::warn!(path = p, ?mode, kind = ?e.kind, "policy gate denied path");
        }
        result
    }

    /// §4.1 `validateCommand`. Returns the matched allow pattern (for
    /// logging) on success.
    pub fn validate_command(&self, cmd: &str, args: &[String]) -> Result<CommandValidation, Error> {
        let result = command::validate_command(&self.allow_command, &self.deny_command, cmd, args);
        match &result {
            Ok(validation) => {
                tracing::debug!(cmd, pattern = %validation.matched_allow_pattern, "policy gate allowed command");
            }
            Err(e) => {
                tracing::warn!(cmd, kind = ?e.kind, "policy gate denied command");
            }
        }
        result
    }

    /// Lightweight forbidden-pattern check for directory traversal (§4.3.1
    /// `list`: "forbidden patterns are honored even during traversal").
    /// Unlike `validate_path`, this does not stat the filesystem or check
    /// root containment — callers only use it to prune an already-rooted
    /// walk.
    #[must_use]
    pub fn is_forbidden_path(&self, path: &std::path::Path) -> Option<String> {
        path::matches_forbidden(&self.forbidden_path, path)
    }

    /// Supplemental hardening (§ SPEC_FULL "Supplemental Hardening" #1):
    /// advisory, non-fatal homoglyph detection over a display string
    /// (e.g. the reassembled shell command line). The caller decides what
    /// to do with a returned warning; the gate only reports the fact.
    #[must_use]
    pub fn detect_mixed_script(&self, field_name: &str, text: &str) -> Option<HomoglyphWarning> {
        qcode_types::detect_mixed_script(text, field_name)
    }
}

fn compile_path_globs(patterns: &[String]) -> Result<Vec<(String, GlobMatcher)>, Error> {
    patterns
        .iter()
        .map(|pat| {
            let glob = Glob::new(pat).map_err(|e| {
                Error::new(
                    ErrorKind::ForbiddenPathPattern,
                    format!("invalid forbidden path pattern '{pat}': {e}"),
                )
            })?;
            Ok((pat.clone(), glob.compile_matcher()))
        })
        .collect()
}

fn compile_command_globs(patterns: &[String]) -> Result<Vec<(String, GlobMatcher)>, Error> {
    patterns
        .iter()
        .map(|pat| {
            let glob = globset::GlobBuilder::new(pat)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    Error::new(
                        ErrorKind::CommandNotAllowed,
                        format!("invalid command pattern '{pat}': {e}"),
                    )
                })?;
            Ok((pat.clone(), glob.compile_matcher()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn gate(root: PathBuf) -> PolicyGate {
        PolicyGate::new(SecurityPolicy {
            allowed_roots: vec![root],
            forbidden_path_globs: vec!["**/.git/**".to_string(), "**/.env*".to_string()],
            allow_outside_roots: false,
            allow_command_globs: vec!["git *".to_string(), "ls *".to_string()],
            deny_command_globs: vec!["rm *".to_string()],
        })
        .unwrap()
    }

    #[test]
    fn read_existing_file_within_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let g = gate(dir.path().to_path_buf());
        let resolved = g.validate_path("a.txt", PathMode::Read, dir.path()).unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap().join("a.txt"));
    }

    #[test]
    fn escape_via_parent_dir_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let g = gate(dir.path().to_path_buf());
        let err = g
            .validate_path("../etc/passwd", PathMode::Read, dir.path())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PathOutsideWorkspace);
    }

    #[test]
    fn forbidden_glob_wins_even_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/config"), "x").unwrap();
        let g = gate(dir.path().to_path_buf());
        let err = g
            .validate_path(".git/config", PathMode::Read, dir.path())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ForbiddenPathPattern);
    }

    #[test]
    fn command_deny_wins_over_allow() {
        let dir = tempfile::tempdir().unwrap();
        let g = gate(dir.path().to_path_buf());
        let err = g
            .validate_command("rm", &["-rf".to_string(), "/".to_string()])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::CommandDenied);
    }

    #[test]
    fn command_not_in_allow_list_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let g = gate(dir.path().to_path_buf());
        let err = g
            .validate_command("curl", &["http://example.com".to_string()])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::CommandNotAllowed);
    }

    #[test]
    fn command_allowed_when_matching_glob() {
        let dir = tempfile::tempdir().unwrap();
        let g = gate(dir.path().to_path_buf());
        g.validate_command("git", &["status".to_string()]).unwrap();
    }
}
