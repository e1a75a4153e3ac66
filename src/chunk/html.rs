//! Top-level nodes of an HTML document.
//!
//! `<script>` and `<style>` elements are kept as JavaScript and CSS; any
//! other top-level element is kept as HTML when it is longer than
//! [`MIN_ELEMENT_CHARS`]. Text, comments and the doctype are skipped.
//! For a conventional page the single `<html>` element is the only
//! top-level node.

const MIN_ELEMENT_CHARS: usize = 50;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HtmlNode<'a> {
    Script(&'a str),
    Style(&'a str),
    Element(&'a str),
}

pub(crate) fn top_level_nodes(text: &str) -> Vec<HtmlNode<'_>> {
    let src = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < src.len() {
        if src[i] != b'<' {
            i += 1;
            continue;
        }
        if src[i..].starts_with(b"<!--") {
            i = find(src, i + 4, b"-->").map(|p| p + 3).unwrap_or(src.len());
            continue;
        }
        if matches!(src.get(i + 1), Some(b'!' | b'/' | b'?')) {
            i = tag_end(src, i);
            continue;
        }

        let name = tag_name(src, i + 1);
        if name.is_empty() {
            i += 1;
            continue;
        }
        let end = element_end(src, i, &name);
        let snippet = &text[i..end];
        match name.as_str() {
            "script" => out.push(HtmlNode::Script(snippet)),
            "style" => out.push(HtmlNode::Style(snippet)),
            _ => out.push(HtmlNode::Element(snippet)),
        }
        i = end;
    }

    out
}

/// `(language, snippet)` pairs worth indexing.
pub fn chunk(text: &str) -> Vec<(&'static str, String)> {
    top_level_nodes(text)
        .into_iter()
        .filter_map(|node| match node {
            HtmlNode::Script(s) => Some(("javascript", s.to_string())),
            HtmlNode::Style(s) => Some(("css", s.to_string())),
            HtmlNode::Element(s) if s.trim().chars().count() > MIN_ELEMENT_CHARS => {
                Some(("html", s.to_string()))
            }
            HtmlNode::Element(_) => None,
        })
        .collect()
}

fn find(src: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= src.len() {
        return None;
    }
    src[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}

/// Case-insensitive search for `needle` (lowercase ASCII).
fn find_ci(src: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= src.len() {
        return None;
    }
    src[from..]
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
        .map(|p| from + p)
}

/// Lowercased tag name starting at `i`.
fn tag_name(src: &[u8], i: usize) -> String {
    src[i.min(src.len())..]
        .iter()
        .take_while(|c| c.is_ascii_alphanumeric() || **c == b'-' || **c == b':')
        .map(|c| c.to_ascii_lowercase() as char)
        .collect()
}

/// Index just past the `>` closing the tag that opens at `i`, honouring
/// quoted attribute values.
fn tag_end(src: &[u8], i: usize) -> usize {
    let mut j = i + 1;
    let mut quote: Option<u8> = None;
    while j < src.len() {
        let c = src[j];
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == b'"' || c == b'\'' => quote = Some(c),
            None if c == b'>' => return j + 1,
            None => {}
        }
        j += 1;
    }
    src.len()
}

fn element_end(src: &[u8], start: usize, name: &str) -> usize {
    let open_end = tag_end(src, start);
    let self_closing = open_end >= 2 && src[open_end - 2] == b'/';
    if self_closing || VOID_ELEMENTS.contains(&name) {
        return open_end;
    }

    let close_tag = format!("</{}", name);
    if name == "script" || name == "style" {
        // Raw text: the first closing tag ends the element
        return find_ci(src, open_end, close_tag.as_bytes())
            .map(|p| tag_end(src, p))
            .unwrap_or(src.len());
    }

    let mut depth = 1usize;
    let mut j = open_end;
    while j < src.len() {
        if src[j] != b'<' {
            j += 1;
            continue;
        }
        if src[j..].starts_with(b"<!--") {
            j = find(src, j + 4, b"-->").map(|p| p + 3).unwrap_or(src.len());
            continue;
        }
        if src.get(j + 1) == Some(&b'/') {
            let closing = tag_name(src, j + 2);
            let end = tag_end(src, j);
            if closing == name {
                depth -= 1;
                if depth == 0 {
                    return end;
                }
            }
            j = end;
            continue;
        }
        let inner = tag_name(src, j + 1);
        if inner.is_empty() {
            j += 1;
            continue;
        }
        if inner == "script" || inner == "style" {
            j = element_end(src, j, &inner);
            continue;
        }
        let inner_end = tag_end(src, j);
        let inner_self_closing = inner_end >= 2 && src[inner_end - 2] == b'/';
        if inner == name && !inner_self_closing {
            depth += 1;
        }
        j = inner_end;
    }
    src.len()
}
