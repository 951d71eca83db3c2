use crate::{ChangeKind, Diff, DiffFile, DiffLine, DiffSection, LineKind, ParseLimits, encoding};
use std::io::{self, BufRead};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("io error reading patch: {0}")]
    Io(#[from] io::Error),
    #[error("malformed hunk header: {0}")]
    MalformedHunkHeader(String),
}

pub type Result<T> = std::result::Result<T, ParseError>;

const DIFF_HEAD: &str = "diff --git ";

/// Parse raw unified-diff text into a structured [`Diff`] model.
///
/// Consumes the stream in a single pass, tracking left/right line numbers
/// across hunks. File headers, hunk headers, context, added and removed
/// lines are classified by their leading bytes. The three caps in `limits`
/// bound resource use: hitting `max_files` stops parsing early and flags
/// the whole diff as truncated; the per-file caps only flag the file and
/// parsing continues. After parsing, each file's content is run through
/// charset detection and transcoded to UTF-8 where possible.
pub fn parse_patch(limits: ParseLimits, mut input: impl BufRead) -> Result<Diff> {
    let mut diff = Diff::default();
    // Raw bytes of every emitted line, per file, for the encoding pass.
    let mut raw_files: Vec<Vec<Vec<u8>>> = Vec::new();

    let mut left_line: u32 = 0;
    let mut right_line: u32 = 0;
    let mut file_lines = 0usize;
    let mut in_section = false;

    let mut buf: Vec<u8> = Vec::new();
    loop {
        buf.clear();
        if input.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }

        file_lines += 1;
        if file_lines >= limits.max_lines_per_file || buf.len() >= limits.max_line_chars {
            if let Some(file) = diff.files.last_mut() {
                file.is_truncated = true;
            }
        }

        // File-header noise carries no line-level data.
        if buf.is_empty() || buf.starts_with(b"+++ ") || buf.starts_with(b"--- ") {
            continue;
        }

        match buf[0] {
            b' ' => {
                if in_section
                    && let Some(file) = diff.files.last_mut()
                    && let Some(section) = file.sections.last_mut()
                {
                    section.lines.push(DiffLine {
                        kind: LineKind::Context,
                        left_index: left_line,
                        right_index: right_line,
                        content: String::from_utf8_lossy(&buf).into_owned(),
                    });
                    push_raw(&mut raw_files, &buf);
                    left_line += 1;
                    right_line += 1;
                }
            }
            b'@' => {
                if let Some(file) = diff.files.last_mut() {
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    let (left, right, name) = parse_hunk_header(&line)?;
                    left_line = left;
                    right_line = right;
                    file.sections.push(DiffSection {
                        name,
                        lines: vec![DiffLine {
                            kind: LineKind::HunkHeader,
                            left_index: 0,
                            right_index: 0,
                            content: line,
                        }],
                    });
                    push_raw(&mut raw_files, &buf);
                    in_section = true;
                }
            }
            b'+' => {
                if in_section
                    && let Some(file) = diff.files.last_mut()
                    && let Some(section) = file.sections.last_mut()
                {
                    file.additions += 1;
                    diff.total_additions += 1;
                    section.lines.push(DiffLine {
                        kind: LineKind::Added,
                        left_index: 0,
                        right_index: right_line,
                        content: String::from_utf8_lossy(&buf).into_owned(),
                    });
                    push_raw(&mut raw_files, &buf);
                    right_line += 1;
                }
            }
            b'-' => {
                if in_section
                    && let Some(file) = diff.files.last_mut()
                    && let Some(section) = file.sections.last_mut()
                {
                    file.deletions += 1;
                    diff.total_deletions += 1;
                    section.lines.push(DiffLine {
                        kind: LineKind::Removed,
                        left_index: left_line,
                        right_index: 0,
                        content: String::from_utf8_lossy(&buf).into_owned(),
                    });
                    push_raw(&mut raw_files, &buf);
                    // Guard against a removal arriving before any valid
                    // left line number has been established.
                    if left_line > 0 {
                        left_line += 1;
                    }
                }
            }
            _ => {
                if buf.starts_with(b"Binary") {
                    if let Some(file) = diff.files.last_mut() {
                        file.is_binary = true;
                    }
                } else if buf.starts_with(DIFF_HEAD.as_bytes()) {
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    if let Some((old_path, new_path)) = parse_diff_head(&line) {
                        diff.files.push(DiffFile {
                            name: old_path,
                            old_name: None,
                            index: diff.files.len() + 1,
                            change_kind: ChangeKind::Modified,
                            additions: 0,
                            deletions: 0,
                            is_binary: false,
                            is_truncated: false,
                            sections: Vec::new(),
                        });
                        raw_files.push(Vec::new());
                        in_section = false;

                        if diff.files.len() >= limits.max_files {
                            diff.is_truncated = true;
                            // The remainder must still be drained so a
                            // subprocess feeding the pipe can finish.
                            io::copy(&mut input, &mut io::sink())?;
                            break;
                        }
                        file_lines = 0;

                        // The header line right after `diff --git` decides
                        // the change kind; anything else stays Modified.
                        buf.clear();
                        if input.read_until(b'\n', &mut buf)? == 0 {
                            break;
                        }
                        if buf.last() == Some(&b'\n') {
                            buf.pop();
                        }
                        if let Some(file) = diff.files.last_mut() {
                            if buf.starts_with(b"new file") {
                                file.change_kind = ChangeKind::Added;
                            } else if buf.starts_with(b"deleted") {
                                file.change_kind = ChangeKind::Deleted;
                            } else if buf.starts_with(b"index") {
                                file.change_kind = ChangeKind::Modified;
                            } else if buf.starts_with(b"similarity index 100%") {
                                file.change_kind = ChangeKind::Renamed;
                                file.old_name =
                                    Some(std::mem::replace(&mut file.name, new_path));
                            }
                        }
                    }
                }
                // Anything else is header noise (mode lines, rename
                // from/to, index lines between hunks) and is skipped.
            }
        }
    }

    for (file, raw_lines) in diff.files.iter_mut().zip(&raw_files) {
        encoding::normalize_file(file, raw_lines);
    }

    Ok(diff)
}

fn push_raw(raw_files: &mut [Vec<Vec<u8>>], line: &[u8]) {
    if let Some(raw_lines) = raw_files.last_mut() {
        raw_lines.push(line.to_vec());
    }
}

/// Parse a `@@ -l,n +l,n @@ name` header into the left/right starting line
/// numbers and the optional trailing section name.
///
/// A header without a range body, or with an empty left field, is fatal.
/// A missing right range is recoverable: the right counter defaults to the
/// left value.
fn parse_hunk_header(line: &str) -> Result<(u32, u32, String)> {
    let malformed = || ParseError::MalformedHunkHeader(line.to_string());
    let mut parts = line.splitn(3, "@@");
    parts.next();
    let body = parts.next().ok_or_else(malformed)?;
    let name = parts.next().unwrap_or("").trim().to_string();

    // Skip the separator after the opening `@@`.
    let ranges = body.get(1..).ok_or_else(malformed)?;
    let mut fields = ranges.split(' ');

    let left_field = fields.next().unwrap_or("").split(',').next().unwrap_or("");
    let left: u32 = left_field
        .get(1..)
        .ok_or_else(malformed)?
        .parse()
        .unwrap_or(0);

    let right: u32 = match fields.next() {
        Some(field) => field.split(',').next().unwrap_or("").parse().unwrap_or(0),
        None => {
            log::warn!("hunk header has no right range, defaulting to left: {line}");
            left
        }
    };

    Ok((left, right, name))
}

/// Extract the two path operands from a `diff --git a/x b/x` line.
///
/// Handles both the plain form and the double-quoted form git emits for
/// paths with special characters (`diff --git "a/x y" "b/x y"`), decoding
/// git's C-style backslash escapes in the latter. Returns `None` when the
/// operands cannot be located; such a line is treated as noise.
fn parse_diff_head(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix(DIFF_HEAD)?;
    if rest.starts_with('"') {
        let middle = rest.find(" \"b/")?;
        let a = rest.get(2..middle)?;
        let b = rest.get(middle + 3..)?;
        Some((unquote_path(a)?, unquote_path(b)?))
    } else {
        let middle = rest.find(" b/")?;
        let a = rest.get(2..middle)?;
        let b = rest.get(middle + 3..)?;
        Some((a.to_string(), b.to_string()))
    }
}

/// Strip the leading separator and closing quote left around a quoted
/// operand, then decode backslash escapes.
fn unquote_path(operand: &str) -> Option<String> {
    let inner = operand.get(1..operand.len().checked_sub(1)?)?;
    Some(unescape_path(inner))
}

/// Decode the backslash escapes git uses when quoting paths: `\"`, `\\`,
/// the C control escapes and 1-3 digit octal byte escapes.
fn unescape_path(path: &str) -> String {
    if !path.contains('\\') {
        return path.to_string();
    }

    let bytes = path.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 == bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        i += 1;
        match bytes[i] {
            b'"' => {
                out.push(b'"');
                i += 1;
            }
            b'\\' => {
                out.push(b'\\');
                i += 1;
            }
            b'a' => {
                out.push(0x07);
                i += 1;
            }
            b'b' => {
                out.push(0x08);
                i += 1;
            }
            b'f' => {
                out.push(0x0c);
                i += 1;
            }
            b'n' => {
                out.push(b'\n');
                i += 1;
            }
            b'r' => {
                out.push(b'\r');
                i += 1;
            }
            b't' => {
                out.push(b'\t');
                i += 1;
            }
            b'v' => {
                out.push(0x0b);
                i += 1;
            }
            b'0'..=b'7' => {
                let mut value: u32 = 0;
                let mut digits = 0;
                while digits < 3 && i < bytes.len() && bytes[i].is_ascii_digit() && bytes[i] < b'8'
                {
                    value = value * 8 + u32::from(bytes[i] - b'0');
                    i += 1;
                    digits += 1;
                }
                out.push(value as u8);
            }
            other => {
                out.push(b'\\');
                out.push(other);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Diff {
        parse_patch(ParseLimits::default(), input.as_bytes()).unwrap()
    }

    #[test]
    fn parse_empty_patch_returns_empty() {
        let diff = parse("");
        assert!(diff.files.is_empty());
        assert_eq!(diff.total_additions, 0);
        assert_eq!(diff.total_deletions, 0);
        assert!(!diff.is_truncated);
    }

    #[test]
    fn parse_single_file_modified() {
        let diff = parse(
            "diff --git a/f.txt b/f.txt\n\
             index 1111111..2222222 100644\n\
             --- a/f.txt\n\
             +++ b/f.txt\n\
             @@ -1,2 +1,2 @@\n\
             -old\n\
             +new\n\
             \x20context\n",
        );
        assert_eq!(diff.file_count(), 1);

        let file = &diff.files[0];
        assert_eq!(file.name, "f.txt");
        assert_eq!(file.change_kind, ChangeKind::Modified);
        assert_eq!(file.index, 1);
        assert_eq!(file.additions, 1);
        assert_eq!(file.deletions, 1);
        assert_eq!(file.sections.len(), 1);

        let lines = &file.sections[0].lines;
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].kind, LineKind::HunkHeader);
        assert_eq!(lines[1].kind, LineKind::Removed);
        assert_eq!(lines[1].left_index, 1);
        assert_eq!(lines[1].right_index, 0);
        assert_eq!(lines[1].content, "-old");
        assert_eq!(lines[2].kind, LineKind::Added);
        assert_eq!(lines[2].left_index, 0);
        assert_eq!(lines[2].right_index, 1);
        assert_eq!(lines[2].content, "+new");
        assert_eq!(lines[3].kind, LineKind::Context);
        assert_eq!(lines[3].left_index, 2);
        assert_eq!(lines[3].right_index, 2);
    }

    #[test]
    fn parse_multiple_files_in_order() {
        let diff = parse(
            "diff --git a/file1.txt b/file1.txt\n\
             index 1111111..2222222 100644\n\
             --- a/file1.txt\n\
             +++ b/file1.txt\n\
             @@ -1,2 +1,2 @@\n\
             -old\n\
             +new\n\
             diff --git a/file2.txt b/file2.txt\n\
             index 3333333..4444444 100644\n\
             --- a/file2.txt\n\
             +++ b/file2.txt\n\
             @@ -1,2 +1,3 @@\n\
             \x20keep\n\
             +more\n",
        );
        assert_eq!(diff.file_count(), 2);
        assert_eq!(diff.files[0].name, "file1.txt");
        assert_eq!(diff.files[0].index, 1);
        assert_eq!(diff.files[1].name, "file2.txt");
        assert_eq!(diff.files[1].index, 2);
        assert_eq!(diff.total_additions, 2);
        assert_eq!(diff.total_deletions, 1);
    }

    #[test]
    fn totals_match_per_file_counts_and_line_kinds() {
        let diff = parse(
            "diff --git a/a.txt b/a.txt\n\
             index 1111111..2222222 100644\n\
             --- a/a.txt\n\
             +++ b/a.txt\n\
             @@ -1,3 +1,4 @@\n\
             \x20one\n\
             -two\n\
             +two!\n\
             +extra\n\
             \x20three\n\
             diff --git a/b.txt b/b.txt\n\
             index 3333333..4444444 100644\n\
             --- a/b.txt\n\
             +++ b/b.txt\n\
             @@ -1,2 +1,1 @@\n\
             -gone\n\
             \x20stay\n",
        );

        let additions: usize = diff.files.iter().map(|f| f.additions).sum();
        let deletions: usize = diff.files.iter().map(|f| f.deletions).sum();
        assert_eq!(diff.total_additions, additions);
        assert_eq!(diff.total_deletions, deletions);

        let added_lines = diff
            .files
            .iter()
            .flat_map(|f| &f.sections)
            .flat_map(|s| &s.lines)
            .filter(|l| l.kind == LineKind::Added)
            .count();
        let removed_lines = diff
            .files
            .iter()
            .flat_map(|f| &f.sections)
            .flat_map(|s| &s.lines)
            .filter(|l| l.kind == LineKind::Removed)
            .count();
        assert_eq!(diff.total_additions, added_lines);
        assert_eq!(diff.total_deletions, removed_lines);
    }

    #[test]
    fn context_offset_constant_within_section() {
        let diff = parse(
            "diff --git a/f.txt b/f.txt\n\
             index 1111111..2222222 100644\n\
             --- a/f.txt\n\
             +++ b/f.txt\n\
             @@ -10,4 +20,5 @@\n\
             \x20one\n\
             +added\n\
             \x20two\n\
             \x20three\n",
        );
        let offsets: Vec<i64> = diff.files[0].sections[0]
            .lines
            .iter()
            .filter(|l| l.kind == LineKind::Context)
            .map(|l| i64::from(l.right_index) - i64::from(l.left_index))
            .collect();
        assert_eq!(offsets, vec![10, 11, 11]);
        // The offset only moves when added/removed lines shift one side.
        assert!(offsets.windows(2).all(|w| w[1] - w[0] <= 1));
    }

    #[test]
    fn parse_new_file() {
        let diff = parse(
            "diff --git a/new.txt b/new.txt\n\
             new file mode 100644\n\
             index 0000000..abcdefg\n\
             --- /dev/null\n\
             +++ b/new.txt\n\
             @@ -0,0 +1,2 @@\n\
             +line1\n\
             +line2\n",
        );
        assert_eq!(diff.files[0].change_kind, ChangeKind::Added);
        assert_eq!(diff.files[0].name, "new.txt");
        assert_eq!(diff.files[0].additions, 2);
        assert_eq!(diff.files[0].deletions, 0);
    }

    #[test]
    fn parse_deleted_file() {
        let diff = parse(
            "diff --git a/gone.txt b/gone.txt\n\
             deleted file mode 100644\n\
             index abcdefg..0000000\n\
             --- a/gone.txt\n\
             +++ /dev/null\n\
             @@ -1,2 +0,0 @@\n\
             -line1\n\
             -line2\n",
        );
        assert_eq!(diff.files[0].change_kind, ChangeKind::Deleted);
        assert_eq!(diff.files[0].deletions, 2);
    }

    #[test]
    fn parse_renamed_file() {
        let diff = parse(
            "diff --git a/old.txt b/new.txt\n\
             similarity index 100%\n\
             rename from old.txt\n\
             rename to new.txt\n",
        );
        let file = &diff.files[0];
        assert_eq!(file.change_kind, ChangeKind::Renamed);
        assert_eq!(file.name, "new.txt");
        assert_eq!(file.old_name.as_deref(), Some("old.txt"));
        assert!(file.sections.is_empty());
    }

    #[test]
    fn parse_quoted_paths() {
        let diff = parse(
            "diff --git \"a/x y\" \"b/x y\"\n\
             index 1111111..2222222 100644\n\
             --- \"a/x y\"\n\
             +++ \"b/x y\"\n\
             @@ -1,1 +1,1 @@\n\
             -old\n\
             +new\n",
        );
        assert_eq!(diff.files[0].name, "x y");
    }

    #[test]
    fn parse_quoted_path_with_octal_escapes() {
        // git quotes non-ASCII paths with octal byte escapes.
        let diff = parse(
            "diff --git \"a/sp\\303\\244ter.txt\" \"b/sp\\303\\244ter.txt\"\n\
             index 1111111..2222222 100644\n",
        );
        assert_eq!(diff.files[0].name, "sp\u{e4}ter.txt");
    }

    #[test]
    fn unescape_path_handles_control_escapes() {
        assert_eq!(unescape_path("a\\tb"), "a\tb");
        assert_eq!(unescape_path("a\\\\b"), "a\\b");
        assert_eq!(unescape_path("a\\\"b"), "a\"b");
        assert_eq!(unescape_path("plain"), "plain");
    }

    #[test]
    fn binary_file_marker_sets_flag() {
        let diff = parse(
            "diff --git a/img.png b/img.png\n\
             index 1111111..2222222 100644\n\
             Binary files a/img.png and b/img.png differ\n",
        );
        let file = &diff.files[0];
        assert!(file.is_binary);
        assert!(file.sections.is_empty());
        assert_eq!(file.additions, 0);
        assert_eq!(file.deletions, 0);
    }

    #[test]
    fn max_files_cap_stops_parsing_early() {
        let input = "diff --git a/one.txt b/one.txt\n\
             index 1111111..2222222 100644\n\
             --- a/one.txt\n\
             +++ b/one.txt\n\
             @@ -1,1 +1,1 @@\n\
             -old\n\
             +new\n\
             diff --git a/two.txt b/two.txt\n\
             index 3333333..4444444 100644\n\
             --- a/two.txt\n\
             +++ b/two.txt\n\
             @@ -1,1 +1,1 @@\n\
             -old\n\
             +new\n";
        let limits = ParseLimits {
            max_files: 1,
            ..ParseLimits::default()
        };
        let diff = parse_patch(limits, input.as_bytes()).unwrap();
        assert_eq!(diff.file_count(), 1);
        assert!(diff.is_truncated);
    }

    #[test]
    fn max_lines_cap_is_advisory() {
        let mut input = String::from(
            "diff --git a/big.txt b/big.txt\n\
             index 1111111..2222222 100644\n\
             --- a/big.txt\n\
             +++ b/big.txt\n\
             @@ -0,0 +1,10 @@\n",
        );
        for n in 0..10 {
            input.push_str(&format!("+line {n}\n"));
        }
        let limits = ParseLimits {
            max_lines_per_file: 5,
            ..ParseLimits::default()
        };
        let diff = parse_patch(limits, input.as_bytes()).unwrap();
        let file = &diff.files[0];
        assert!(file.is_truncated);
        // Truncation flags the file, it does not clip the parsed lines.
        assert_eq!(file.sections[0].lines.len(), 11);
        assert_eq!(file.additions, 10);
        assert!(!diff.is_truncated);
    }

    #[test]
    fn max_line_chars_cap_flags_file() {
        let long = "x".repeat(100);
        let input = format!(
            "diff --git a/f.txt b/f.txt\n\
             index 1111111..2222222 100644\n\
             --- a/f.txt\n\
             +++ b/f.txt\n\
             @@ -1,1 +1,1 @@\n\
             -short\n\
             +{long}\n"
        );
        let limits = ParseLimits {
            max_line_chars: 80,
            ..ParseLimits::default()
        };
        let diff = parse_patch(limits, input.as_bytes()).unwrap();
        assert!(diff.files[0].is_truncated);
        assert_eq!(diff.files[0].additions, 1);
    }

    #[test]
    fn missing_right_range_defaults_to_left() {
        let diff = parse(
            "diff --git a/f.txt b/f.txt\n\
             index 1111111..2222222 100644\n\
             --- a/f.txt\n\
             +++ b/f.txt\n\
             @@ -5,2@@\n\
             \x20ctx\n",
        );
        let line = &diff.files[0].sections[0].lines[1];
        assert_eq!(line.kind, LineKind::Context);
        assert_eq!(line.left_index, 5);
        assert_eq!(line.right_index, 5);
    }

    #[test]
    fn malformed_hunk_header_is_fatal() {
        let input = "diff --git a/f.txt b/f.txt\n\
             index 1111111..2222222 100644\n\
             --- a/f.txt\n\
             +++ b/f.txt\n\
             @@\n\
             -old\n";
        let err = parse_patch(ParseLimits::default(), input.as_bytes()).unwrap_err();
        assert!(matches!(err, ParseError::MalformedHunkHeader(_)));
    }

    #[test]
    fn hunk_header_trailing_context_becomes_section_name() {
        let diff = parse(
            "diff --git a/main.rs b/main.rs\n\
             index 1111111..2222222 100644\n\
             --- a/main.rs\n\
             +++ b/main.rs\n\
             @@ -1,3 +1,3 @@ fn main()\n\
             \x20one\n\
             -two\n\
             +TWO\n",
        );
        assert_eq!(diff.files[0].sections[0].name, "fn main()");
    }

    #[test]
    fn commit_message_prelude_is_ignored() {
        // `git show` emits the commit header and indented message before
        // the diff itself.
        let diff = parse(
            "commit 0123456789abcdef0123456789abcdef01234567\n\
             Author: Someone <someone@example.com>\n\
             Date:   Thu Apr 3 12:00:00 2014 +0200\n\
             \n\
             \x20   add greeting\n\
             \n\
             diff --git a/hi.txt b/hi.txt\n\
             new file mode 100644\n\
             index 0000000..abcdefg\n\
             --- /dev/null\n\
             +++ b/hi.txt\n\
             @@ -0,0 +1,1 @@\n\
             +hello\n",
        );
        assert_eq!(diff.file_count(), 1);
        assert_eq!(diff.files[0].name, "hi.txt");
        assert_eq!(diff.total_additions, 1);
        assert_eq!(diff.total_deletions, 0);
    }

    #[test]
    fn removal_before_valid_left_line_keeps_counter() {
        let diff = parse(
            "diff --git a/f.txt b/f.txt\n\
             index 1111111..2222222 100644\n\
             --- a/f.txt\n\
             +++ b/f.txt\n\
             @@ -0,0 +1,1 @@\n\
             -stray\n\
             -stray2\n",
        );
        let lines = &diff.files[0].sections[0].lines;
        assert_eq!(lines[1].left_index, 0);
        assert_eq!(lines[2].left_index, 0);
        assert_eq!(diff.files[0].deletions, 2);
    }
}
