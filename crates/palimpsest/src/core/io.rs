//! File system helpers.
//!
//! Directory traversal and the path arithmetic that keys the line-extraction
//! cache: the lowest common input path and each document's parent directory
//! relative to it.

use crate::{PalimpsestError, Result};
use std::path::{Component, Path, PathBuf};

/// Traverse a directory and return all file paths matching a filter.
///
/// Results are sorted so that document order is stable across runs.
///
/// # Errors
///
/// Returns `PalimpsestError::Validation` if `dir` is not a directory, and
/// `PalimpsestError::Io` for I/O errors.
pub fn traverse_directory<F>(dir: impl AsRef<Path>, recursive: bool, filter: F) -> Result<Vec<PathBuf>>
where
    F: Fn(&Path) -> bool,
{
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(PalimpsestError::validation(format!(
            "Path is not a directory: {}",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    traverse_directory_impl(dir, recursive, &filter, &mut files)?;
    files.sort();
    Ok(files)
}

fn traverse_directory_impl<F>(dir: &Path, recursive: bool, filter: &F, files: &mut Vec<PathBuf>) -> Result<()>
where
    F: Fn(&Path) -> bool,
{
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();

        if path.is_file() {
            if filter(&path) {
                files.push(path);
            }
        } else if path.is_dir() && recursive {
            traverse_directory_impl(&path, recursive, filter, files)?;
        }
    }

    Ok(())
}

/// Longest shared component prefix of `paths`.
///
/// A single path is its own common path. Returns an empty path for an empty
/// slice or when nothing is shared.
pub fn lowest_common_path<P: AsRef<Path>>(paths: &[P]) -> PathBuf {
    let Some((first, rest)) = paths.split_first() else {
        return PathBuf::new();
    };

    let mut common: Vec<Component<'_>> = first.as_ref().components().collect();
    for path in rest {
        let shared = common
            .iter()
            .zip(path.as_ref().components())
            .take_while(|(a, b)| *a == b)
            .count();
        common.truncate(shared);
    }

    common.iter().collect()
}

/// Parent directory of `file` with the prefix it shares with the parent of
/// `input_root` removed.
///
/// When `input_root` is a directory, its own name is therefore kept as the
/// first component (`/data/imgs` + `/data/imgs/a/p.png` gives `imgs/a`); when
/// it is the document itself the result is empty.
pub fn relative_parent_dir(input_root: &Path, file: &Path) -> PathBuf {
    let root_parent = input_root.parent().unwrap_or_else(|| Path::new(""));
    let file_parent = file.parent().unwrap_or_else(|| Path::new(""));

    let shared = root_parent
        .components()
        .zip(file_parent.components())
        .take_while(|(a, b)| a == b)
        .count();

    file_parent.components().skip(shared).collect()
}

/// File name without its final extension.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Final extension of the file name, without the dot.
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
