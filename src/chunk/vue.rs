//! Single-file Vue components: template, script and style sections.

use regex::Regex;
use std::sync::OnceLock;

const MIN_TEMPLATE_CHARS: usize = 50;
const MIN_BLOCK_CHARS: usize = 20;

fn section_regex(tag: &str) -> Regex {
    // (?is): case-insensitive, `.` matches newlines; lazy body stops at the first closer
    Regex::new(&format!(r"(?is)<{tag}[^>]*>.*?</{tag}>")).expect("static section regex")
}

fn template_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| section_regex("template"))
}

fn script_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| section_regex("script"))
}

fn style_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| section_regex("style"))
}

/// `(section, snippet)` pairs: at most one template, then every script and
/// style block, each including its enclosing tags.
pub fn chunk(text: &str) -> Vec<(&'static str, String)> {
    let mut out = Vec::new();

    if let Some(m) = template_re().find(text) {
        if m.as_str().trim().chars().count() > MIN_TEMPLATE_CHARS {
            out.push(("template", m.as_str().to_string()));
        }
    }
    for m in script_re().find_iter(text) {
        if m.as_str().trim().chars().count() > MIN_BLOCK_CHARS {
            out.push(("script", m.as_str().to_string()));
        }
    }
    for m in style_re().find_iter(text) {
        if m.as_str().trim().chars().count() > MIN_BLOCK_CHARS {
            out.push(("style", m.as_str().to_string()));
        }
    }

    out
}
