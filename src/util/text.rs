use std::borrow::Cow;

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;
const DEL: u8 = 0x7f;

/// C0 controls and DEL, except tab, newline and carriage return.
fn is_control(b: u8) -> bool {
    b == DEL || (b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r'))
}

/// SEC-001: Strip terminal control characters and ANSI escape sequences.
///
/// Feed titles, names and descriptions are remote input that ends up on a
/// terminal. This removes C0 control bytes, DEL, CSI sequences
/// (`ESC [` up to a final byte in `0x40..=0x7e`), OSC sequences
/// (`ESC ]` up to BEL or `ESC \`) and any bare ESC. Tab, newline and
/// carriage return are kept.
///
/// Clean input comes back borrowed.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    if !bytes.iter().any(|&b| b == ESC || is_control(b)) {
        return Cow::Borrowed(s);
    }

    let len = bytes.len();
    let mut out = String::with_capacity(len);
    let mut i = 0;

    while i < len {
        match bytes[i] {
            ESC if bytes.get(i + 1) == Some(&b'[') => {
                i += 2;
                while i < len {
                    let c = bytes[i];
                    i += 1;
                    if (0x40..=0x7e).contains(&c) {
                        break;
                    }
                }
            }
            ESC if bytes.get(i + 1) == Some(&b']') => {
                i += 2;
                while i < len {
                    if bytes[i] == BEL {
                        i += 1;
                        break;
                    }
                    if bytes[i] == ESC && bytes.get(i + 1) == Some(&b'\\') {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            }
            b if b == ESC || is_control(b) => i += 1,
            _ => {
                let start = i;
                while i < len && bytes[i] != ESC && !is_control(bytes[i]) {
                    i += 1;
                }
                // Only ASCII bytes end a run, so the slice is on char boundaries
                out.push_str(&s[start..i]);
            }
        }
    }

    Cow::Owned(out)
}
