//! Byte-level helpers shared by the JavaScript, CSS and HTML scanners.
//!
//! Every delimiter the scanners stop on is ASCII, so any index returned
//! here is a valid `str` slice boundary.

/// Index just past a quoted string starting at `i` (which holds the quote).
/// Unterminated strings run to end of input.
pub(crate) fn skip_string(src: &[u8], i: usize) -> usize {
    let quote = src[i];
    let mut j = i + 1;
    while j < src.len() {
        match src[j] {
            b'\\' => j += 2,
            c if c == quote => return j + 1,
            // JS and CSS strings cannot span lines unescaped
            b'\n' if quote != b'`' => return j,
            _ => j += 1,
        }
    }
    src.len()
}

/// Index just past a template literal starting at `i` (the backtick),
/// including any `${ ... }` substitutions.
pub(crate) fn skip_template(src: &[u8], i: usize) -> usize {
    let mut j = i + 1;
    while j < src.len() {
        match src[j] {
            b'\\' => j += 2,
            b'`' => return j + 1,
            b'$' if src.get(j + 1) == Some(&b'{') => {
                j = skip_balanced(src, j + 1, true);
            }
            _ => j += 1,
        }
    }
    src.len()
}

/// Index just past a `/* ... */` comment starting at `i`.
pub(crate) fn skip_block_comment(src: &[u8], i: usize) -> usize {
    let mut j = i + 2;
    while j + 1 < src.len() {
        if src[j] == b'*' && src[j + 1] == b'/' {
            return j + 2;
        }
        j += 1;
    }
    src.len()
}

/// Index of the newline ending a `//` comment at `i` (or end of input).
pub(crate) fn skip_line_comment(src: &[u8], i: usize) -> usize {
    src[i..]
        .iter()
        .position(|&c| c == b'\n')
        .map(|p| i + p)
        .unwrap_or(src.len())
}

/// Skip whitespace and comments. `line_comments` enables `//` comments.
pub(crate) fn skip_trivia(src: &[u8], mut i: usize, line_comments: bool) -> usize {
    while i < src.len() {
        let c = src[i];
        if c.is_ascii_whitespace() {
            i += 1;
        } else if c == b'/' && src.get(i + 1) == Some(&b'*') {
            i = skip_block_comment(src, i);
        } else if line_comments && c == b'/' && src.get(i + 1) == Some(&b'/') {
            i = skip_line_comment(src, i);
        } else {
            break;
        }
    }
    i
}

/// Given `i` at an opening `{`, `(` or `[`, return the index just past its
/// matching closer. Strings, templates and comments are skipped.
pub(crate) fn skip_balanced(src: &[u8], i: usize, js: bool) -> usize {
    let mut depth = 0usize;
    let mut j = i;
    while j < src.len() {
        let c = src[j];
        match c {
            b'"' | b'\'' => {
                j = skip_string(src, j);
                continue;
            }
            b'`' if js => {
                j = skip_template(src, j);
                continue;
            }
            b'/' if src.get(j + 1) == Some(&b'*') => {
                j = skip_block_comment(src, j);
                continue;
            }
            b'/' if js && src.get(j + 1) == Some(&b'/') => {
                j = skip_line_comment(src, j);
                continue;
            }
            b'{' | b'(' | b'[' => depth += 1,
            b'}' | b')' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return j + 1;
                }
            }
            _ => {}
        }
        j += 1;
    }
    src.len()
}

/// Read an identifier-like word starting at `i`.
pub(crate) fn word_at(src: &[u8], i: usize) -> &str {
    let end = src[i..]
        .iter()
        .position(|c| !(c.is_ascii_alphanumeric() || *c == b'_' || *c == b'$'))
        .map(|p| i + p)
        .unwrap_or(src.len());
    std::str::from_utf8(&src[i..end]).unwrap_or("")
}
