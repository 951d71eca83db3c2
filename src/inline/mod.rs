use crate::{DiffLine, DiffSection, LineKind};
use similar::{ChangeTag, TextDiff};

const ADDED_CODE_PREFIX: &str = "<span class=\"added-code\">";
const REMOVED_CODE_PREFIX: &str = "<span class=\"removed-code\">";
const CODE_TAG_SUFFIX: &str = "</span>";

/// Escape text for literal inclusion in HTML.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

impl DiffSection {
    /// Find the added or removed line pairing with the given file line
    /// number, correcting for the left/right offset established by the
    /// most recent context line.
    ///
    /// The positional arithmetic assumes one-to-one correspondence between
    /// same-position added/removed lines; adjacent unrelated edits can
    /// mispair. Known limitation, kept because rendering depends on this
    /// exact tie-break.
    pub fn line_for(&self, kind: LineKind, idx: u32) -> Option<&DiffLine> {
        let mut difference: i64 = 0;
        for line in &self.lines {
            if line.kind == LineKind::Context {
                difference = i64::from(line.right_index) - i64::from(line.left_index);
                continue;
            }
            match kind {
                LineKind::Removed
                    if line.kind == LineKind::Removed
                        && i64::from(line.left_index) == i64::from(idx) - difference =>
                {
                    return Some(line);
                }
                LineKind::Added
                    if line.kind == LineKind::Added
                        && i64::from(line.right_index) == i64::from(idx) + difference =>
                {
                    return Some(line);
                }
                _ => {}
            }
        }
        None
    }

    /// Render a line's content as HTML with the character-level changes
    /// against its paired counterpart wrapped in highlight spans.
    ///
    /// Only added and removed lines are highlighted; everything else, and
    /// any line without a counterpart, comes back as plain escaped text
    /// with the leading marker stripped.
    pub fn inline_diff_html(&self, line: &DiffLine) -> String {
        let counterpart = match line.kind {
            LineKind::Added => self.line_for(LineKind::Removed, line.right_index),
            LineKind::Removed => self.line_for(LineKind::Added, line.left_index),
            _ => None,
        };
        let Some(counterpart) = counterpart else {
            return escape_html(line.text());
        };

        let (removed_text, added_text) = match line.kind {
            LineKind::Added => (counterpart.text(), line.text()),
            _ => (line.text(), counterpart.text()),
        };

        let runs = cleanup_semantic(char_diff_runs(removed_text, added_text));
        render_runs(&runs, line.kind)
    }
}

/// Character-level diff with consecutive same-tag characters coalesced
/// into runs.
fn char_diff_runs(old: &str, new: &str) -> Vec<(ChangeTag, String)> {
    let diff = TextDiff::from_chars(old, new);
    let mut runs: Vec<(ChangeTag, String)> = Vec::new();
    for change in diff.iter_all_changes() {
        let tag = change.tag();
        match runs.last_mut() {
            Some((last, text)) if *last == tag => text.push_str(change.value()),
            _ => runs.push((tag, change.value().to_string())),
        }
    }
    runs
}

/// Reduce single-character fragmentation: a short equal run sitting
/// between two edits is absorbed into them, so `-foo x bar` vs
/// `+baz x qux` highlights one region instead of three slivers.
///
/// An equal run is absorbed when its length does not exceed the larger of
/// its two flanking edits; the equality text is re-emitted as a paired
/// deletion and insertion, then adjacent same-tag runs are merged and the
/// pass repeats until nothing changes.
fn cleanup_semantic(mut runs: Vec<(ChangeTag, String)>) -> Vec<(ChangeTag, String)> {
    loop {
        let mut changed = false;
        let mut i = 1;
        while i + 1 < runs.len() {
            if runs[i].0 == ChangeTag::Equal
                && runs[i - 1].0 != ChangeTag::Equal
                && runs[i + 1].0 != ChangeTag::Equal
            {
                let eq_len = runs[i].1.chars().count();
                let before_len = runs[i - 1].1.chars().count();
                let after_len = runs[i + 1].1.chars().count();
                if eq_len <= before_len.max(after_len) {
                    let text = runs[i].1.clone();
                    runs[i] = (ChangeTag::Delete, text.clone());
                    runs.insert(i + 1, (ChangeTag::Insert, text));
                    changed = true;
                    i += 1;
                }
            }
            i += 1;
        }
        runs = merge_runs(runs);
        if !changed {
            return runs;
        }
    }
}

fn merge_runs(runs: Vec<(ChangeTag, String)>) -> Vec<(ChangeTag, String)> {
    let mut merged: Vec<(ChangeTag, String)> = Vec::with_capacity(runs.len());
    for (tag, text) in runs {
        match merged.last_mut() {
            Some((last, merged_text)) if *last == tag => merged_text.push_str(&text),
            _ => merged.push((tag, text)),
        }
    }
    merged
}

fn render_runs(runs: &[(ChangeTag, String)], kind: LineKind) -> String {
    let mut out = String::new();
    for (tag, text) in runs {
        match tag {
            ChangeTag::Insert if kind == LineKind::Added => {
                out.push_str(ADDED_CODE_PREFIX);
                out.push_str(&escape_html(text));
                out.push_str(CODE_TAG_SUFFIX);
            }
            ChangeTag::Delete if kind == LineKind::Removed => {
                out.push_str(REMOVED_CODE_PREFIX);
                out.push_str(&escape_html(text));
                out.push_str(CODE_TAG_SUFFIX);
            }
            ChangeTag::Equal => out.push_str(&escape_html(text)),
            _ => {}
        }
    }
    out
}
