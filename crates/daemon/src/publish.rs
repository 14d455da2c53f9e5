//! Post-processing of a finished encode.
//!
//! The encoded file is copied from the encoded-output tree into the publish
//! tree at the same relative location, then the pair's library section is
//! refreshed. Neither step can undo a successful encode: failures are logged
//! and reported in the [`PublishOutcome`].

use crate::plex::LibraryNotifier;
use auto_encode_config::DirectoryPair;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};

/// Errors that can occur while publishing.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{} is not inside the encoded directory {}", .output.display(), .encoded.display())]
    OutsideEncodedDir { output: PathBuf, encoded: PathBuf },

    #[error("Failed to create {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy to {}: {source}", .dest.display())]
    CopyFailed {
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of post-processing one encode.
#[derive(Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Copied and the library was refreshed.
    Published(PathBuf),
    /// Copied, but the library refresh failed.
    NotifyFailed(PathBuf),
    /// The copy failed; no refresh was attempted.
    CopyFailed,
}

/// Publish location of `output`: the encoded-directory prefix swapped for
/// the publish directory.
pub fn publish_path(output: &Path, pair: &DirectoryPair) -> Result<PathBuf, PublishError> {
    let relative = output
        .strip_prefix(&pair.encoded)
        .map_err(|_| PublishError::OutsideEncodedDir {
            output: output.to_path_buf(),
            encoded: pair.encoded.clone(),
        })?;
    Ok(pair.publish.join(relative))
}

/// Copy `output` into the publish tree, creating directories as needed.
///
/// Permissions are carried by the copy; the modification time is restored
/// afterwards so the library sees the encode time rather than the copy time.
pub fn publish(output: &Path, pair: &DirectoryPair) -> Result<PathBuf, PublishError> {
    let dest = publish_path(output, pair)?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|source| PublishError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    fs::copy(output, &dest).map_err(|source| PublishError::CopyFailed {
        dest: dest.clone(),
        source,
    })?;

    // Timestamp preservation is cosmetic; a failure here still leaves a good copy.
    if let Ok(modified) = fs::metadata(output).and_then(|m| m.modified()) {
        if let Err(e) = File::options()
            .write(true)
            .open(&dest)
            .and_then(|f| f.set_modified(modified))
        {
            debug!(dest = %dest.display(), error = %e, "Could not preserve mtime");
        }
    }

    Ok(dest)
}

/// Publish a finished encode and refresh the pair's library section.
pub async fn post_process<N: LibraryNotifier>(
    output: &Path,
    pair: &DirectoryPair,
    notifier: &N,
) -> PublishOutcome {
    let dest = match publish(output, pair) {
        Ok(dest) => {
            info!(
                from = %output.display(),
                to = %dest.display(),
                "Copied encode to publish directory"
            );
            dest
        }
        Err(e) => {
            error!(
                output = %output.display(),
                error = %e,
                "Publish failed, skipping library refresh"
            );
            return PublishOutcome::CopyFailed;
        }
    };

    match notifier.refresh_section(&pair.section).await {
        Ok(()) => {
            info!(section = %pair.section, "Library section refresh requested");
            PublishOutcome::Published(dest)
        }
        Err(e) => {
            error!(section = %pair.section, error = %e, "Library section refresh failed");
            PublishOutcome::NotifyFailed(dest)
        }
    }
}
