//! Scanner module for discovering media that still needs encoding.
//!
//! Each directory pair is diffed by base name: a source file is a candidate
//! when no file in the encoded-output tree carries the same base name.

use crate::skip_marker::has_skip_marker;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use walkdir::WalkDir;

/// Media file extensions considered by the scanner (case-insensitive matching).
pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mkv", ".mp4", ".m4v", ".avi", ".mov", ".ts", ".m2ts", ".wmv", ".webm", ".mpg",
];

/// Suffix appended to the stem of every encoded output.
pub const ENCODED_SUFFIX: &str = "_encoded";

/// Error type for directory scans.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The directory does not exist or is not a directory.
    #[error("Directory does not exist: {}", .0.display())]
    Missing(PathBuf),

    /// The directory itself could not be listed.
    #[error("Failed to read directory {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// A source file discovered without an encoded counterpart.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    /// Full path to the media file.
    pub path: PathBuf,
    /// Correlation key shared with the encoded output.
    pub base_name: String,
    /// File size in bytes at discovery time.
    pub size_bytes: u64,
    /// Last modified time of the file.
    pub modified_time: SystemTime,
}

/// Checks if a file has a media extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            VIDEO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Base name of a source file: its stem, extension dropped.
///
/// `/media/in/Movie (2019).mkv` -> `Movie (2019)`
pub fn base_name(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}

/// Base name of an encoded file: its stem with [`ENCODED_SUFFIX`] removed.
///
/// `/media/enc/Movie (2019)_encoded.mkv` -> `Movie (2019)`
pub fn encoded_base_name(path: &Path) -> Option<String> {
    let stem = base_name(path)?;
    Some(
        stem.strip_suffix(ENCODED_SUFFIX)
            .map(str::to_string)
            .unwrap_or(stem),
    )
}

/// Recursively lists media files under `root` in file-name order.
///
/// Hidden directories are skipped. Entries that fail below the root are
/// logged and skipped; failure to read the root itself is an error.
fn walk_media(root: &Path) -> Result<Vec<(PathBuf, std::fs::Metadata)>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::Missing(root.to_path_buf()));
    }

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.file_type().is_dir() && entry.depth() > 0 {
                if let Some(name) = entry.file_name().to_str() {
                    return !name.starts_with('.');
                }
            }
            true
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(ScanError::Unreadable {
                    path: root.to_path_buf(),
                    source: e,
                });
            }
            Err(e) => {
                tracing::warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };

        if !entry.file_type().is_file() || !is_video_file(entry.path()) {
            continue;
        }

        match entry.metadata() {
            Ok(metadata) => files.push((entry.path().to_path_buf(), metadata)),
            Err(e) => tracing::warn!("Failed to stat {}: {}", entry.path().display(), e),
        }
    }

    Ok(files)
}

/// Lists the media files of a source directory as candidate records.
///
/// Files carrying a dead-letter marker are left out.
pub fn list_sources(source_dir: &Path) -> Result<Vec<CandidateFile>, ScanError> {
    let files = walk_media(source_dir)?;

    Ok(files
        .into_iter()
        .filter(|(path, _)| !has_skip_marker(path))
        .filter_map(|(path, metadata)| {
            let base_name = base_name(&path)?;
            Some(CandidateFile {
                base_name,
                size_bytes: metadata.len(),
                modified_time: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                path,
            })
        })
        .collect())
}

/// Collects the base names present in an encoded-output directory.
///
/// A directory that does not exist yet holds nothing.
pub fn list_encoded_base_names(encoded_dir: &Path) -> Result<HashSet<String>, ScanError> {
    if !encoded_dir.exists() {
        return Ok(HashSet::new());
    }

    Ok(walk_media(encoded_dir)?
        .iter()
        .filter_map(|(path, _)| encoded_base_name(path))
        .collect())
}

/// Keeps the sources whose base name has no encoded counterpart, preserving order.
pub fn diff_by_base_name(
    sources: Vec<CandidateFile>,
    encoded: &HashSet<String>,
) -> Vec<CandidateFile> {
    sources
        .into_iter()
        .filter(|candidate| !encoded.contains(&candidate.base_name))
        .collect()
}

/// Returns the files of `source_dir` that have not been encoded into `encoded_dir`.
pub fn find_candidates(
    source_dir: &Path,
    encoded_dir: &Path,
) -> Result<Vec<CandidateFile>, ScanError> {
    let sources = list_sources(source_dir)?;
    let encoded = list_encoded_base_names(encoded_dir)?;
    Ok(diff_by_base_name(sources, &encoded))
}
