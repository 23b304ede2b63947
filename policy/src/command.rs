use globset::GlobMatcher;
use qcode_types::{Error, ErrorKind, contains_steganographic_chars};

use crate::blacklist::is_catastrophic_command;

/// Metacharacters whose presence in a single argument would change shell
/// interpretation if the command were ever run through a shell. qcode
/// never spawns through a shell (§4.3.3), but rejecting these defends
/// against a configuration mistake downstream and matches the spec's
/// explicit requirement (§4.1 step 4).
const SHELL_METACHARACTERS: &[char] = &[';', '|', '&', '>', '<', '`'];

/// Successful command validation: which allow pattern matched, for logging.
#[derive(Debug, Clone)]
pub struct CommandValidation {
    pub matched_allow_pattern: String,
}

pub(crate) fn validate_command(
    allow: &[(String, GlobMatcher)],
    deny: &[(String, GlobMatcher)],
    cmd: &str,
    args: &[String],
) -> Result<CommandValidation, Error> {
    if cmd.trim().is_empty() {
        return Err(Error::new(ErrorKind::CommandNotAllowed, "command must not be empty"));
    }

    let display = reassemble(cmd, args);

    if contains_steganographic_chars(&display) {
        return Err(Error::new(
            ErrorKind::CommandDenied,
            "command contains invisible or control characters",
        ));
    }

    for arg in args {
        if arg.contains("$(") || arg.chars().any(|c| SHELL_METACHARACTERS.contains(&c)) {
            return Err(Error::new(
                ErrorKind::CommandDenied,
                format!("argument '{arg}' contains an unescaped shell metacharacter"),
            ));
        }
    }

    if is_catastrophic_command(&display) {
        return Err(Error::new(
            ErrorKind::CommandDenied,
            format!("command '{display}' matches the catastrophic command blacklist"),
        ));
    }

    if let Some((pattern, _)) = deny.iter().find(|(_, matcher)| matcher.is_match(&display)) {
        return Err(Error::new(
            ErrorKind::CommandDenied,
            format!("command '{display}' matches deny pattern '{pattern}'"),
        )
        .with_context("pattern", pattern.clone()));
    }

    match allow.iter().find(|(_, matcher)| matcher.is_match(&display)) {
        Some((pattern, _)) => Ok(CommandValidation {
            matched_allow_pattern: pattern.clone(),
        }),
        None => Err(Error::new(
            ErrorKind::CommandNotAllowed,
            format!("command '{display}' does not match any allowed pattern"),
        )),
    }
}

fn reassemble(cmd: &str, args: &[String]) -> String {
    if args.is_empty() {
        cmd.to_string()
    } else {
        format!("{cmd} {}", args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(pattern: &str) -> (String, GlobMatcher) {
        let glob = globset::GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .unwrap();
        (pattern.to_string(), glob.compile_matcher())
    }

    #[test]
    fn rejects_semicolon_injection() {
        let allow = vec![matcher("*")];
        let err = validate_command(&allow, &[], "ls", &["; rm -rf /".to_string()]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CommandDenied);
    }

    #[test]
    fn rejects_command_substitution() {
        let allow = vec![matcher("*")];
        let err = validate_command(&allow, &[], "echo", &["$(whoami)".to_string()]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CommandDenied);
    }

    #[test]
    fn catastrophic_blacklist_wins_over_any_allow() {
        let allow = vec![matcher("*")];
        let err = validate_command(&allow, &[], "rm", &["-rf".to_string(), "/".to_string()]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CommandDenied);
    }

    #[test]
    fn allows_matching_command() {
        let allow = vec![matcher("git *")];
        let ok = validate_command(&allow, &[], "git", &["log".to_string()]).unwrap();
        assert_eq!(ok.matched_allow_pattern, "git *");
    }
}
