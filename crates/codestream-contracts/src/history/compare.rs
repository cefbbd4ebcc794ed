use similar::TextDiff;

use super::commits::Commit;

/// Unified diff between the selected variants of two commits.
pub fn diff_commits(before: &Commit, after: &Commit) -> String {
    let old = before
        .selected_variant()
        .map(|variant| variant.code.as_str())
        .unwrap_or("");
    let new = after
        .selected_variant()
        .map(|variant| variant.code.as_str())
        .unwrap_or("");
    diff_code(old, new, before.hash.short(), after.hash.short())
}

pub fn diff_code(old: &str, new: &str, old_label: &str, new_label: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(old_label, new_label)
        .to_string()
}
