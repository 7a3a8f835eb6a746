//! Gold transcriptions stored next to page images.
//!
//! `scans/page.png` may be accompanied by `scans/page.txt` (diplomatic, as
//! printed) and `scans/page_normalized.txt` (modernized spelling), one text line
//! per image line. Both are optional.

use crate::Result;
use std::path::{Path, PathBuf};
use unicode_normalization::char::is_combining_mark;

const SPACE: &str = " ";

/// Which transcription to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoldTextKind {
    /// Characters exactly as printed
    Diplomatic,
    /// Normalized spelling
    Normalized,
}

impl GoldTextKind {
    fn suffix(self) -> &'static str {
        match self {
            GoldTextKind::Diplomatic => "",
            GoldTextKind::Normalized => "_normalized",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GoldTextKind::Diplomatic => "diplomatic",
            GoldTextKind::Normalized => "normalized",
        }
    }
}

/// Document path with its final extension replaced by the transcription suffix and `.txt`.
pub fn gold_text_path(document: &Path, kind: GoldTextKind) -> PathBuf {
    let stem = document
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    document.with_file_name(format!("{}{}.txt", stem, kind.suffix()))
}

/// Split a line into characters, keeping each base character together with the
/// combining marks that follow it.
pub fn read_characters(line: &str) -> Vec<String> {
    let mut characters: Vec<String> = Vec::new();
    for c in line.chars() {
        match characters.last_mut() {
            Some(last) if is_combining_mark(c) => last.push(c),
            _ => characters.push(c.to_string()),
        }
    }
    characters
}

/// Read a transcription file as lines of characters.
///
/// A missing file is not an error: it is logged and reported as `None`.
///
/// # Errors
///
/// `PalimpsestError::Io` if the file exists but cannot be read as UTF-8 text.
pub fn load_text_file(path: &Path, kind: GoldTextKind) -> Result<Option<Vec<Vec<String>>>> {
    if !path.is_file() {
        tracing::info!(
            path = %path.display(),
            kind = kind.label(),
            "no gold transcription found; only needed when evaluating accuracy"
        );
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)?;
    let lines: Vec<Vec<String>> = content.lines().map(read_characters).collect();
    tracing::debug!(path = %path.display(), kind = kind.label(), lines = lines.len(), "loaded gold transcription");
    Ok(Some(lines))
}

/// Flatten transcription lines into one character stream.
///
/// Lines are joined with a single space, runs of spaces collapse to one, and
/// the stream never starts or ends with a space.
pub fn normalize_text_stream(lines: &[Vec<String>]) -> Vec<String> {
    let mut stream: Vec<String> = Vec::new();
    for line in lines {
        for c in line {
            let is_redundant_space = c == SPACE && stream.last().is_none_or(|last| last == SPACE);
            if !is_redundant_space {
                stream.push(c.clone());
            }
        }
        if stream.last().is_some_and(|last| last != SPACE) {
            stream.push(SPACE.to_string());
        }
    }
    if stream.last().is_some_and(|last| last == SPACE) {
        stream.pop();
    }
    stream
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn chars(s: &str) -> Vec<String> {
        read_characters(s)
    }

    #[test]
    fn test_gold_text_paths() {
        let doc = Path::new("/scans/page.001.png");
        assert_eq!(gold_text_path(doc, GoldTextKind::Diplomatic), PathBuf::from("/scans/page.001.txt"));
        assert_eq!(
            gold_text_path(doc, GoldTextKind::Normalized),
            PathBuf::from("/scans/page.001_normalized.txt")
        );
    }

    #[test]
    fn test_read_characters_groups_combining_marks() {
        assert_eq!(read_characters("ab"), vec!["a", "b"]);
        assert_eq!(read_characters("e\u{301}x"), vec!["e\u{301}", "x"]);
        assert_eq!(read_characters("\u{301}a"), vec!["\u{301}", "a"]);
        assert!(read_characters("").is_empty());
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let loaded = load_text_file(&dir.path().join("page.txt"), GoldTextKind::Diplomatic).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_text_file_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("page.txt");
        std::fs::write(&path, "ab c\r\nde\n").unwrap();

        let lines = load_text_file(&path, GoldTextKind::Diplomatic).unwrap().unwrap();
        assert_eq!(lines, vec![chars("ab c"), chars("de")]);
    }

    #[test]
    fn test_normalize_text_stream() {
        let lines = vec![chars("  ab  c "), chars(""), chars("d")];
        let stream: String = normalize_text_stream(&lines).concat();
        assert_eq!(stream, "ab c d");
    }

    #[test]
    fn test_normalize_text_stream_empty() {
        assert!(normalize_text_stream(&[chars("   ")]).is_empty());
    }
}
