//! Keystroke translation
//!
//! Shift+Enter becomes a literal newline so the assistant treats it as a line
//! break inside one message instead of a submit. Terminals report it with one
//! of two escape encodings; every other byte passes through untouched.

use std::borrow::Cow;

/// Shift+Enter under the kitty / CSI-u keyboard protocol
pub const SHIFT_ENTER_CSI_U: &[u8] = b"\x1b[13;2u";

/// Shift+Enter under xterm's modifyOtherKeys
pub const SHIFT_ENTER_MODIFY_OTHER_KEYS: &[u8] = b"\x1b[27;2;13~";

const ESC: u8 = 0x1b;

fn shift_enter_at(data: &[u8]) -> Option<usize> {
    [SHIFT_ENTER_CSI_U, SHIFT_ENTER_MODIFY_OTHER_KEYS]
        .into_iter()
        .find(|seq| data.starts_with(seq))
        .map(<[u8]>::len)
}

/// Translate user input before it is sent to the session
pub fn translate_input(data: &[u8]) -> Cow<'_, [u8]> {
    if !data.contains(&ESC) {
        return Cow::Borrowed(data);
    }

    let mut out = Vec::with_capacity(data.len());
    let mut rest = data;
    let mut changed = false;

    while let Some((&byte, tail)) = rest.split_first() {
        if byte == ESC {
            if let Some(len) = shift_enter_at(rest) {
                out.push(b'\n');
                rest = &rest[len..];
                changed = true;
                continue;
            }
        }
        out.push(byte);
        rest = tail;
    }

    if changed {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_input_is_borrowed() {
        let out = translate_input(b"ls -la\r");
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(&*out, b"ls -la\r");
    }

    #[test]
    fn both_shift_enter_encodings_become_newline() {
        assert_eq!(&*translate_input(b"\x1b[13;2u"), b"\n");
        assert_eq!(&*translate_input(b"\x1b[27;2;13~"), b"\n");
        assert_eq!(
            &*translate_input(b"first\x1b[13;2usecond\r"),
            b"first\nsecond\r"
        );
    }

    #[test]
    fn other_escape_sequences_pass_through() {
        // Arrow up and plain Enter
        let input = b"\x1b[A\r";
        let out = translate_input(input);
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(&*out, input);

        // Ctrl+Enter is not Shift+Enter
        assert_eq!(&*translate_input(b"\x1b[13;5u"), b"\x1b[13;5u");
    }
}
