//! Cache entry completeness policies.

use super::CacheEntryPaths;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;

/// File written into the line directory by [`ManifestComplete`].
pub const MANIFEST_FILE: &str = "manifest.json";

/// Decides whether a cache entry may be trusted, and records completion after a store.
pub trait CacheValidity: Send + Sync {
    fn name(&self) -> &str;

    fn is_complete(&self, paths: &CacheEntryPaths) -> bool;

    /// Called once every line file of an entry has been written.
    fn mark_complete(&self, _paths: &CacheEntryPaths, _line_count: usize) -> Result<()> {
        Ok(())
    }
}

/// An entry counts as cached as soon as its first line file exists.
///
/// Cheap, and compatible with caches written by older tools, but a store that
/// was interrupted after line zero is treated as complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstLinePresent;

impl CacheValidity for FirstLinePresent {
    fn name(&self) -> &str {
        "first-line-present"
    }

    fn is_complete(&self, paths: &CacheEntryPaths) -> bool {
        paths.line_path(0).is_file()
    }
}

/// An entry counts as cached only once a manifest, written after the last
/// line, names a line count whose files all exist.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestComplete;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    line_count: usize,
}

impl CacheValidity for ManifestComplete {
    fn name(&self) -> &str {
        "manifest-complete"
    }

    fn is_complete(&self, paths: &CacheEntryPaths) -> bool {
        let Ok(bytes) = fs::read(paths.manifest_path()) else {
            return false;
        };
        match serde_json::from_slice::<Manifest>(&bytes) {
            Ok(manifest) => manifest.line_count > 0 && (0..manifest.line_count).all(|i| paths.line_path(i).is_file()),
            Err(e) => {
                tracing::warn!(
                    path = %paths.manifest_path().display(),
                    error = %e,
                    "ignoring unreadable cache manifest"
                );
                false
            }
        }
    }

    fn mark_complete(&self, paths: &CacheEntryPaths, line_count: usize) -> Result<()> {
        let manifest = serde_json::to_vec_pretty(&Manifest { line_count })?;
        fs::write(paths.manifest_path(), manifest)?;
        Ok(())
    }
}
