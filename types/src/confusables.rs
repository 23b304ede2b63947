//! Homoglyph and confusable-character detection, and steganographic
//! character rejection, used by the Policy Gate's supplemental hardening
//! checks over paths and command arguments.

use unicode_script::{Script, UnicodeScript};

/// Proof that homoglyph analysis was performed and flagged suspicious content.
///
/// This is a mechanism, not a policy: it reports that mixed scripts were
/// found in a field. Callers decide whether to treat that as fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomoglyphWarning {
    pub field_name: String,
    pub snippet: String,
    pub scripts: Vec<Script>,
}

impl HomoglyphWarning {
    #[must_use]
    pub fn scripts_display(&self) -> String {
        self.scripts
            .iter()
            .map(|s| format!("{s:?}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Detect Latin text mixed with Cyrillic or Greek — the highest-value
/// homoglyph attack surface for an ASCII-oriented path/command vocabulary.
/// Pure non-Latin content (legitimate non-English text) is not flagged.
#[must_use]
pub fn detect_mixed_script(input: &str, field_name: &str) -> Option<HomoglyphWarning> {
    if input.is_ascii() {
        return None;
    }

    let mut has_latin = false;
    let mut has_cyrillic = false;
    let mut has_greek = false;

    for c in input.chars() {
        match c.script() {
            Script::Latin => has_latin = true,
            Script::Cyrillic => has_cyrillic = true,
            Script::Greek => has_greek = true,
            _ => {}
        }
    }

    if !(has_latin && (has_cyrillic || has_greek)) {
        return None;
    }

    let mut scripts = vec![Script::Latin];
    if has_cyrillic {
        scripts.push(Script::Cyrillic);
    }
    if has_greek {
        scripts.push(Script::Greek);
    }

    Some(HomoglyphWarning {
        field_name: field_name.to_string(),
        snippet: truncate_for_display(input, 40),
        scripts,
    })
}

fn truncate_for_display(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len).collect();
        format!("{truncated}...")
    }
}

/// True if `c` is a character that has no legitimate place in a filesystem
/// path or shell command argument: C0/C1 controls, DEL, zero-width
/// characters, bidi control/override characters, variation selectors, and
/// Unicode tag characters. These can hide or alter the apparent meaning of
/// a path/command string without changing how a naive byte-prefix check
/// would see it.
#[must_use]
pub fn is_steganographic_char(c: char) -> bool {
    matches!(c,
        '\u{0000}'..='\u{001f}'
        | '\u{007f}'
        | '\u{0080}'..='\u{009f}'
        | '\u{200b}'..='\u{200f}'   // zero-width space/joiners, LRM/RLM
        | '\u{202a}'..='\u{202e}'   // bidi embedding/override
        | '\u{2060}'..='\u{2064}'   // word joiner, invisible operators
        | '\u{2066}'..='\u{2069}'   // bidi isolates
        | '\u{fe00}'..='\u{fe0f}'   // variation selectors
        | '\u{feff}'                // BOM / zero-width no-break space
        | '\u{e0000}'..='\u{e007f}' // tag characters
    )
}

/// True if `s` contains any steganographic character.
#[must_use]
pub fn contains_steganographic_chars(s: &str) -> bool {
    s.chars().any(is_steganographic_char)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_latin_cyrillic_mix() {
        let warning = detect_mixed_script("pаypal.com", "url");
        assert!(warning.is_some());
        let w = warning.unwrap();
        assert!(w.scripts.contains(&Script::Cyrillic));
        assert!(w.scripts.contains(&Script::Latin));
    }

    #[test]
    fn ignores_pure_latin() {
        assert!(detect_mixed_script("google.com", "url").is_none());
    }

    #[test]
    fn ignores_pure_cyrillic() {
        assert!(detect_mixed_script("привет", "text").is_none());
    }

    #[test]
    fn ignores_ascii_only_fast_path() {
        assert!(detect_mixed_script("https://example.com/path?q=test", "url").is_none());
    }

    #[test]
    fn steganographic_detects_zero_width_space() {
        assert!(contains_steganographic_chars("foo\u{200b}bar"));
    }

    #[test]
    fn steganographic_detects_bidi_override() {
        assert!(contains_steganographic_chars("foo\u{202e}bar"));
    }

    #[test]
    fn steganographic_detects_tag_characters() {
        assert!(contains_steganographic_chars("foo\u{e0001}bar"));
    }

    #[test]
    fn steganographic_ignores_clean_ascii() {
        assert!(!contains_steganographic_chars("src/main.rs"));
    }

    #[test]
    fn steganographic_ignores_legitimate_unicode() {
        assert!(!contains_steganographic_chars("café/naïve.txt"));
    }
}
