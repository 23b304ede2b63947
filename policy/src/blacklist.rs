//! Catastrophic command blacklist (SPEC_FULL "Supplemental Hardening" #2).
//!
//! A second, always-deny layer independent of `deny_command_globs`,
//! matching commands with no legitimate AI-assistant use case: root/home
//! filesystem wipes, fork bombs, disk-device destruction, and recursive
//! permission changes on root. Checked before the ordinary deny-glob list
//! and wins regardless of any configured allow pattern.

use std::sync::OnceLock;

use regex::RegexSet;

/// `(regex_pattern, human_readable_reason)` pairs. Patterns are
/// case-insensitive: odd casing (`RM -RF /`) is itself a signal of an
/// attempted filter bypass, not a reason to let it through.
pub const CATASTROPHIC_COMMAND_PATTERNS: &[(&str, &str)] = &[
    (
        r"(?i)\brm\s+(?:(?:--recursive|-[^\s-]*[rR][^\s-]*)(?:\s+(?:--[\w-]+|-[^\s]+))*|(?:--[\w-]+|-[^\s]+)\s+(?:--recursive|-[^\s-]*[rR][^\s-]*)(?:\s+(?:--[\w-]+|-[^\s]+))*)\s+(?:--\s+)?(?:/+|/\*|/\.\*(?:/+)?|/(?:\.{1,2})(?:/\.{1,2})*(?:/+)?|/(?:\.{1,2})(?:/\.{1,2})*/+\*)(?:\s|$|[&|;])",
        "delete root filesystem",
    ),
    (
        r"(?i)\brm\s+(?:(?:--recursive|-[^\s-]*[rR][^\s-]*)(?:\s+(?:--[\w-]+|-[^\s]+))*|(?:--[\w-]+|-[^\s]+)\s+(?:--recursive|-[^\s-]*[rR][^\s-]*)(?:\s+(?:--[\w-]+|-[^\s]+))*)\s+(?:--\s+)?(?:~|\$HOME|\$\{HOME\})(?:\s|$|[&|;/])",
        "delete home directory",
    ),
    (r":\(\)\s*\{\s*:\|:&\s*\}\s*;:", "fork bomb"),
    (
        r"(?i)dd\s+.*of=/dev/(?:sd|hd|nvme|vd|xvd|loop)\w*",
        "overwrite disk device",
    ),
    (
        r"(?i)mkfs(?:\.\w+)?\s+/dev/(?:sd|hd|nvme|vd|xvd)\w*",
        "format disk device",
    ),
    (
        r"(?i)chmod\s+-R\s+\d+\s+/(?:\s|$|[&|;])",
        "recursive permission change on root filesystem",
    ),
    (
        r"(?i)Remove-Item\s+(?:C:\\|~)\s+-(?:Recurse|Force)\s+-(?:Recurse|Force)",
        "delete system drive or home directory",
    ),
    (
        r"(?i)Remove-Item\s+-(?:Recurse|Force)\s+-(?:Recurse|Force)\s+(?:C:\\|~)(?:\s|$)",
        "delete system drive or home directory",
    ),
    (
        r"(?i)rd\s+/[sq]\s+/[sq]\s+[A-Z]:\\(?:\s|$)",
        "recursively delete drive via rd",
    ),
    (
        r"(?i)\bri\s+(?:C:\\|~)\s+-(?:Recurse|Force)\s+-(?:Recurse|Force)",
        "delete system drive or home directory via ri alias",
    ),
    (
        r"(?i)\bri\s+-(?:Recurse|Force)\s+-(?:Recurse|Force)\s+(?:C:\\|~)(?:\s|$)",
        "delete system drive or home directory via ri alias",
    ),
];

fn compiled() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        let patterns: Vec<&str> = CATASTROPHIC_COMMAND_PATTERNS.iter().map(|(p, _)| *p).collect();
        RegexSet::new(patterns).expect("catastrophic command patterns are valid regexes")
    })
}

/// True if `display` (the reassembled `cmd + " " + args.join(" ")` line)
/// matches any catastrophic pattern.
#[must_use]
pub fn is_catastrophic_command(display: &str) -> bool {
    compiled().is_match(display)
}
