//! Unified diff preview shown before an edit is approved.

use similar::TextDiff;

/// Render `old` → `new` as a unified diff with three lines of context.
pub fn render_diff(old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header("current", "proposed")
        .to_string()
}
