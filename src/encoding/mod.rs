use crate::DiffFile;
use chardetng::EncodingDetector;
use encoding_rs::Encoding;

/// Detect the charset label of a byte buffer.
///
/// Content that is already valid UTF-8 short-circuits to `UTF-8`,
/// everything else goes through statistical detection.
pub fn detect_charset(content: &[u8]) -> &'static str {
    if std::str::from_utf8(content).is_ok() {
        return "UTF-8";
    }
    let mut detector = EncodingDetector::new();
    detector.feed(content, true);
    detector.guess(None, true).name()
}

/// Transcode a parsed file's line contents to UTF-8, best effort.
///
/// `raw_lines` holds the original bytes of the file's lines in section
/// order, one entry per emitted line. The whole file is fed to charset
/// detection at once; individual lines would be too short to detect
/// reliably. Lines that fail to decode keep their existing content. This
/// never fails: when no decoder is available the lossy UTF-8 reading from
/// the parse stays in place.
pub fn normalize_file(file: &mut DiffFile, raw_lines: &[Vec<u8>]) {
    let mut buf = Vec::new();
    for raw in raw_lines {
        buf.extend_from_slice(raw);
        buf.push(b'\n');
    }

    let label = detect_charset(&buf);
    if label == "UTF-8" {
        return;
    }
    let Some(encoding) = Encoding::for_label(label.as_bytes()) else {
        return;
    };

    let mut raw_iter = raw_lines.iter();
    for section in &mut file.sections {
        for line in &mut section.lines {
            let Some(raw) = raw_iter.next() else {
                return;
            };
            let (decoded, _, had_errors) = encoding.decode(raw);
            if !had_errors {
                line.content = decoded.into_owned();
            }
        }
    }
}
