pub mod cli;
pub mod encoding;
pub mod git;
pub mod inline;
pub mod parser;

use serde::{Deserialize, Serialize};

/// Kind of a single rendered diff row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineKind {
    Context,
    Added,
    Removed,
    HunkHeader,
}

/// How a file changed between the two revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// One rendered diff row.
///
/// `left_index`/`right_index` are 1-based line numbers in the old/new
/// revision; 0 means the line does not exist in that revision (an added
/// line has `left_index == 0`, a removed line has `right_index == 0`).
/// `content` keeps the leading marker character from the patch text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffLine {
    pub kind: LineKind,
    pub left_index: u32,
    pub right_index: u32,
    pub content: String,
}

impl DiffLine {
    /// Content with the leading marker character stripped.
    pub fn text(&self) -> &str {
        self.content.get(1..).unwrap_or("")
    }
}

/// A hunk: one contiguous changed region of one file.
///
/// `name` is the optional trailing context from the hunk header (the text
/// after the closing `@@`, typically a surrounding function signature).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffSection {
    pub name: String,
    pub lines: Vec<DiffLine>,
}

/// One file's change within a patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffFile {
    pub name: String,
    /// Previous path, set only for renames.
    pub old_name: Option<String>,
    /// 1-based position of the file in the patch.
    pub index: usize,
    pub change_kind: ChangeKind,
    pub additions: usize,
    pub deletions: usize,
    pub is_binary: bool,
    /// Set when a per-file size cap was hit; the parsed lines are still
    /// complete, the flag is advisory.
    pub is_truncated: bool,
    pub sections: Vec<DiffSection>,
}

/// Whole-patch parse result. Immutable once the parse call returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diff {
    pub total_additions: usize,
    pub total_deletions: usize,
    pub files: Vec<DiffFile>,
    /// Set when the file-count cap stopped parsing early.
    pub is_truncated: bool,
}

impl Diff {
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Caller-supplied resource caps for one parse call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParseLimits {
    /// Lines per file before the file is flagged truncated.
    pub max_lines_per_file: usize,
    /// Byte length of a single line before the file is flagged truncated.
    pub max_line_chars: usize,
    /// Files before parsing stops early and the whole diff is flagged.
    pub max_files: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        ParseLimits {
            max_lines_per_file: 1000,
            max_line_chars: 500,
            max_files: 100,
        }
    }
}
