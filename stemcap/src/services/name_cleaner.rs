//! Download file name cleanup
//!
//! The site names every download after a long template containing the song
//! slug and a `Custom_Backing_Track` marker, sometimes with the applied key
//! offset. This module maps such names to the track's clean name.
//!
//! **Rules, in order:**
//! 1. A file needs cleaning iff its name contains `Custom_Backing_Track`
//!    (case-insensitive). Similarity to the track caption never gates cleaning:
//!    generic names like `Song(Custom_Backing_Track).mp3` must be renamed too.
//! 2. Target base name = sanitized track name (apostrophes kept, max 100 chars)
//! 3. Non-zero key and not a click track → ` (+N)` / ` (-N)` before the extension
//! 4. Existing targets get `_1`, `_2`, … appended; nothing is overwritten
//! 5. Rename is atomic; on failure the original file is left in place

use std::io;
use std::path::{Path, PathBuf};
use stemcap_common::models::{format_key_offset, sanitize_name};
use stemcap_common::Track;
use thiserror::Error;
use tracing::{debug, warn};

/// Marker the site puts into every default download name (compared lowercase)
pub const CLEANUP_MARKER: &str = "custom_backing_track";

/// Upper bound on collision suffixes tried before giving up
const MAX_COLLISION_SUFFIX: u32 = 999;

#[derive(Debug, Error)]
pub enum RenameError {
    #[error("Source file missing: {0}")]
    SourceMissing(PathBuf),

    #[error("No free name for {0}")]
    NoFreeName(PathBuf),

    #[error("Rename {from} -> {to} failed: {source}")]
    Io {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Whether a downloaded file still carries the site's default name
pub fn needs_cleaning(file_name: &str) -> bool {
    file_name.to_lowercase().contains(CLEANUP_MARKER)
}

/// Maps default download names to a track's clean name
#[derive(Debug, Clone)]
pub struct NameCleaner {
    target_base: String,
}

impl NameCleaner {
    pub fn for_track(track: &Track, key_adjustment: i8) -> Self {
        let mut target_base = sanitize_name(&track.name);
        if !track.is_click() {
            if let Some(offset) = format_key_offset(key_adjustment) {
                target_base = format!("{} ({})", target_base, offset);
            }
        }
        Self { target_base }
    }

    /// Base name (no extension) every cleaned file gets
    pub fn target_base(&self) -> &str {
        &self.target_base
    }

    /// Clean a file name; names without the marker are returned unchanged
    pub fn clean(&self, file_name: &str) -> String {
        if !needs_cleaning(file_name) {
            return file_name.to_string();
        }

        match Path::new(file_name).extension() {
            Some(ext) => format!("{}.{}", self.target_base, ext.to_string_lossy()),
            None => self.target_base.clone(),
        }
    }

    /// Rename `dir/file_name` to its clean name, resolving collisions
    ///
    /// Returns the final path (unchanged when the name needs no cleaning).
    pub fn rename_in(&self, dir: &Path, file_name: &str) -> Result<PathBuf, RenameError> {
        let source = dir.join(file_name);
        if !source.is_file() {
            return Err(RenameError::SourceMissing(source));
        }

        let cleaned = self.clean(file_name);
        if cleaned == file_name {
            return Ok(source);
        }

        let target = resolve_collision(dir, &cleaned)?;
        std::fs::rename(&source, &target).map_err(|e| {
            warn!(
                from = %source.display(),
                to = %target.display(),
                "Rename failed, original file kept: {}",
                e
            );
            RenameError::Io {
                from: source.clone(),
                to: target.clone(),
                source: e,
            }
        })?;

        debug!(from = %file_name, to = %target.display(), "Renamed download");
        Ok(target)
    }
}

/// First free path for `desired` inside `dir` (`name.ext`, `name_1.ext`, …)
pub fn resolve_collision(dir: &Path, desired: &str) -> Result<PathBuf, RenameError> {
    let candidate = dir.join(desired);
    if !candidate.exists() {
        return Ok(candidate);
    }

    let path = Path::new(desired);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| desired.to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().to_string());

    for n in 1..=MAX_COLLISION_SUFFIX {
        let name = match &ext {
            Some(ext) => format!("{}_{}.{}", stem, n, ext),
            None => format!("{}_{}", stem, n),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(RenameError::NoFreeName(dir.join(desired)))
}
