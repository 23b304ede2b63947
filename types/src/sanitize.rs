//! Sanitization of untrusted text (tool output, LLM content) before it is
//! embedded in conversation messages, logs, or terminal output.

use std::borrow::Cow;

const ESC: char = '\x1b';
const BEL: char = '\x07';

/// Strip ANSI/control sequences from untrusted text.
///
/// Strips CSI/OSC/DCS escape sequences, C0 control characters (except
/// `\n`, `\t`, `\r`), C1 control characters, and DEL. Preserves all other
/// printable text, including non-ASCII Unicode.
///
/// Returns `Cow::Borrowed` when nothing needed stripping.
#[must_use]
pub fn sanitize_terminal_text(input: &str) -> Cow<'_, str> {
    if !needs_sanitization(input) {
        return Cow::Borrowed(input);
    }

    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == ESC {
            skip_escape_sequence(&mut chars);
        } else if is_allowed_control(c) {
            result.push(c);
        } else if is_c0_control(c) || is_c1_control(c) || c == '\x7f' {
            if is_c1_csi(c) {
                skip_csi_params(&mut chars);
            }
        } else {
            result.push(c);
        }
    }

    Cow::Owned(result)
}

fn needs_sanitization(input: &str) -> bool {
    input.chars().any(|c| {
        c == ESC
            || c == BEL
            || (is_c0_control(c) && !is_allowed_control(c))
            || is_c1_control(c)
            || c == '\x7f'
    })
}

fn is_c0_control(c: char) -> bool {
    c <= '\x1f'
}

fn is_allowed_control(c: char) -> bool {
    matches!(c, '\n' | '\t' | '\r')
}

fn is_c1_control(c: char) -> bool {
    ('\u{0080}'..='\u{009f}').contains(&c)
}

fn is_c1_csi(c: char) -> bool {
    c == '\u{009b}'
}

fn skip_escape_sequence<I: Iterator<Item = char>>(chars: &mut std::iter::Peekable<I>) {
    let Some(&next) = chars.peek() else {
        return;
    };

    match next {
        '[' => {
            chars.next();
            skip_csi_params(chars);
        }
        ']' => {
            chars.next();
            skip_osc_sequence(chars);
        }
        'P' | '^' | '_' => {
            chars.next();
            skip_until_st(chars);
        }
        '(' | ')' | '*' | '+' | '#' | ' ' => {
            chars.next();
            chars.next();
        }
        '7' | '8' | 'c' | 'D' | 'E' | 'H' | 'M' | 'N' | 'O' | 'Z' | '=' | '>' | '<' => {
            chars.next();
        }
        _ => {}
    }
}

fn skip_csi_params<I: Iterator<Item = char>>(chars: &mut std::iter::Peekable<I>) {
    while let Some(&c) = chars.peek() {
        if ('\x40'..='\x7e').contains(&c) {
            chars.next();
            return;
        } else if ('\x20'..='\x3f').contains(&c) {
            chars.next();
        } else {
            return;
        }
    }
}

fn skip_osc_sequence<I: Iterator<Item = char>>(chars: &mut std::iter::Peekable<I>) {
    while let Some(c) = chars.next() {
        if c == BEL {
            return;
        }
        if c == ESC && chars.peek() == Some(&'\\') {
            chars.next();
            return;
        }
    }
}

fn skip_until_st<I: Iterator<Item = char>>(chars: &mut std::iter::Peekable<I>) {
    while let Some(c) = chars.next() {
        if c == ESC && chars.peek() == Some(&'\\') {
            chars.next();
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_no_allocation() {
        let input = "Hello, world! This is clean text.";
        match sanitize_terminal_text(input) {
            Cow::Borrowed(s) => assert_eq!(s, input),
            Cow::Owned(_) => panic!("should not allocate for clean input"),
        }
    }

    #[test]
    fn preserves_newlines_tabs_cr() {
        let input = "Line 1\nLine 2\tTabbed\r\nCRLF";
        assert_eq!(sanitize_terminal_text(input), input);
    }

    #[test]
    fn strips_csi_clear_screen() {
        let input = "Before\x1b[2JAfter";
        assert_eq!(sanitize_terminal_text(input), "BeforeAfter");
    }

    #[test]
    fn strips_osc52_clipboard_bel() {
        let input = "text\x1b]52;c;SGVsbG8=\x07more";
        assert_eq!(sanitize_terminal_text(input), "textmore");
    }

    #[test]
    fn strips_c0_controls() {
        let input = "A\x00B\x01C\x02D\x03E";
        assert_eq!(sanitize_terminal_text(input), "ABCDE");
    }

    #[test]
    fn strips_del_character() {
        let input = "Hello\x7fWorld";
        assert_eq!(sanitize_terminal_text(input), "HelloWorld");
    }

    #[test]
    fn handles_incomplete_escape() {
        let input = "Text\x1b";
        assert_eq!(sanitize_terminal_text(input), "Text");
    }

    #[test]
    fn empty_string() {
        assert_eq!(sanitize_terminal_text(""), "");
    }
}
