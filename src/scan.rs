//! Enumerates the displayable images in local storage.

use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::error::SlideshowError;

/// Images present in the storage directory, in file-name order. Always
/// re-read from disk; never derived from the selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalImageSet {
    paths: Vec<PathBuf>,
}

impl LocalImageSet {
    /// Scan `dir` (non-recursively) for files whose extension is in `exts`.
    ///
    /// # Errors
    /// Returns [`SlideshowError::BadDir`] if `dir` is missing or not a directory.
    pub fn scan(dir: &Path, exts: &[String]) -> Result<Self, SlideshowError> {
        if !dir.is_dir() {
            return Err(SlideshowError::BadDir(dir.display().to_string()));
        }
        let paths = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_hidden(e))
            .flatten()
            .filter(|e| e.file_type().is_file())
            .map(DirEntry::into_path)
            .filter(|p| is_supported_image(p, exts))
            .collect();
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Return `true` if `path` has one of `exts` (lowercase, no dot), ignoring case.
#[must_use]
pub fn is_supported_image(path: &Path, exts: &[String]) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            exts.iter().any(|e| *e == ext)
        })
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|n| n.starts_with('.'))
}
