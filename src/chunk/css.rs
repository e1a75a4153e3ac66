//! Top-level rule sets of a stylesheet. At-rules are skipped.

use super::scan::{skip_balanced, skip_block_comment, skip_string, skip_trivia};

pub fn chunk(text: &str) -> Vec<String> {
    let src = text.as_bytes();
    let mut out = Vec::new();
    let mut i = skip_trivia(src, 0, false);

    while i < src.len() {
        let at_rule = src[i] == b'@';
        let Some(end) = rule_end(src, i) else {
            break;
        };
        if !at_rule {
            let snippet = text[i..end].trim();
            if !snippet.is_empty() {
                out.push(snippet.to_string());
            }
        }
        i = skip_trivia(src, end, false);
    }

    out
}

/// End of the rule starting at `start`: past its block, or past `;` for
/// statement at-rules like `@import`. `None` when the input ends first.
fn rule_end(src: &[u8], start: usize) -> Option<usize> {
    let mut j = start;
    while j < src.len() {
        match src[j] {
            b'"' | b'\'' => {
                j = skip_string(src, j);
                continue;
            }
            b'/' if src.get(j + 1) == Some(&b'*') => {
                j = skip_block_comment(src, j);
                continue;
            }
            b'{' => return Some(skip_balanced(src, j, false)),
            b';' => return Some(j + 1),
            _ => {}
        }
        j += 1;
    }
    None
}
