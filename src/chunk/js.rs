//! Top-level statement splitter for JavaScript.
//!
//! Keeps function and class declarations, `const`/`let` declarations,
//! `export` statements and expression statements. Imports, `var`
//! declarations and control flow at module level are dropped.

use super::scan::{
    skip_balanced, skip_block_comment, skip_line_comment, skip_string, skip_template,
    skip_trivia, word_at,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatementKind {
    Function,
    Class,
    Lexical,
    Export,
    Expression,
    Other,
}

impl StatementKind {
    fn is_kept(self) -> bool {
        !matches!(self, StatementKind::Other)
    }
}

pub(crate) fn top_level_statements(text: &str) -> Vec<(StatementKind, &str)> {
    let src = text.as_bytes();
    let mut out = Vec::new();
    let mut i = skip_trivia(src, 0, true);

    while i < src.len() {
        if src[i] == b';' {
            i = skip_trivia(src, i + 1, true);
            continue;
        }
        let kind = classify(src, i);
        let end = statement_end(src, i, kind);
        let snippet = text[i..end].trim_end();
        if !snippet.is_empty() {
            out.push((kind, snippet));
        }
        i = skip_trivia(src, end.max(i + 1), true);
    }

    out
}

/// Statements worth indexing, in source order.
pub fn chunk(text: &str) -> Vec<String> {
    top_level_statements(text)
        .into_iter()
        .filter(|(kind, _)| kind.is_kept())
        .map(|(_, s)| s.to_string())
        .collect()
}

fn classify(src: &[u8], i: usize) -> StatementKind {
    let first = word_at(src, i);
    match first {
        "function" | "class" | "const" | "let" | "export" => {}
        "async" => {
            let next = skip_trivia(src, i + first.len(), true);
            if word_at(src, next) == "function" {
                return StatementKind::Function;
            }
            return StatementKind::Expression;
        }
        "" => return StatementKind::Expression,
        _ => {}
    }

    // A keyword followed by `.`, `(` or `=` is used as an expression (`let(...)` is rare but legal)
    let after = skip_trivia(src, i + first.len(), true);
    let next_char = src.get(after).copied();

    match first {
        "function" => StatementKind::Function,
        "class" => StatementKind::Class,
        "const" => StatementKind::Lexical,
        "let" if !matches!(next_char, Some(b'.') | Some(b'(') | Some(b'=')) => StatementKind::Lexical,
        "export" => StatementKind::Export,
        "import" | "var" | "if" | "for" | "while" | "do" | "switch" | "try" | "return"
        | "throw" | "break" | "continue" | "debugger" | "with" => StatementKind::Other,
        _ => StatementKind::Expression,
    }
}

/// Whether the statement ends at the close of its first top-level block.
fn is_block_statement(src: &[u8], start: usize, kind: StatementKind) -> bool {
    match kind {
        StatementKind::Function | StatementKind::Class => true,
        StatementKind::Export => {
            let mut j = skip_trivia(src, start + "export".len(), true);
            if word_at(src, j) == "default" {
                j = skip_trivia(src, j + "default".len(), true);
            }
            if word_at(src, j) == "async" {
                j = skip_trivia(src, j + "async".len(), true);
            }
            matches!(word_at(src, j), "function" | "class")
        }
        StatementKind::Other => matches!(
            word_at(src, start),
            "if" | "for" | "while" | "switch" | "try" | "with"
        ),
        _ => false,
    }
}

fn statement_end(src: &[u8], start: usize, kind: StatementKind) -> usize {
    let block = is_block_statement(src, start, kind);
    let mut j = start;
    let mut last_significant: Option<u8> = None;

    while j < src.len() {
        let c = src[j];
        match c {
            b'"' | b'\'' => {
                j = skip_string(src, j);
                last_significant = Some(b'"');
                continue;
            }
            b'`' => {
                j = skip_template(src, j);
                last_significant = Some(b'`');
                continue;
            }
            b'/' if src.get(j + 1) == Some(&b'*') => {
                j = skip_block_comment(src, j);
                continue;
            }
            b'/' if src.get(j + 1) == Some(&b'/') => {
                j = skip_line_comment(src, j);
                continue;
            }
            b'{' => {
                let close = skip_balanced(src, j, true);
                if block {
                    let next = skip_trivia(src, close, true);
                    // if/else and try/catch/finally continue past the first block
                    if matches!(word_at(src, next), "else" | "catch" | "finally") {
                        j = next;
                        last_significant = None;
                        continue;
                    }
                    return close;
                }
                j = close;
                last_significant = Some(b'}');
                continue;
            }
            b'(' | b'[' => {
                j = skip_balanced(src, j, true);
                last_significant = Some(b')');
                continue;
            }
            b';' => return j + 1,
            b'\n' => {
                if !block && ends_statement(last_significant) {
                    let next = skip_trivia(src, j, true);
                    if next >= src.len() || !continues_expression(src, next) {
                        return j;
                    }
                    j = next;
                    continue;
                }
            }
            c if c.is_ascii_whitespace() => {}
            _ => last_significant = Some(c),
        }
        j += 1;
    }
    src.len()
}

/// Whether a line ending after `last` can terminate a statement (ASI).
fn ends_statement(last: Option<u8>) -> bool {
    match last {
        Some(c) => {
            c.is_ascii_alphanumeric() || matches!(c, b')' | b']' | b'}' | b'"' | b'`' | b'_' | b'$')
        }
        None => false,
    }
}

/// Whether the token at `i` continues the previous line's expression.
fn continues_expression(src: &[u8], i: usize) -> bool {
    match src[i] {
        b'.' | b',' | b'?' | b':' | b'+' | b'-' | b'*' | b'/' | b'%' | b'&' | b'|' | b'='
        | b'<' | b'>' | b'(' | b'[' | b'^' => true,
        _ => matches!(word_at(src, i), "instanceof" | "in"),
    }
}
