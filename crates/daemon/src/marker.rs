//! Crash recovery marker.
//!
//! A single text file holding the path of the output currently being written
//! by the transcoder. It exists exactly while a transcode is running. If the
//! process dies mid-encode the marker survives, and the next startup removes
//! the half-written output it points to.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// What startup recovery found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// No marker: the previous run shut down between jobs.
    Clean,
    /// The interrupted output was deleted.
    RemovedPartial(PathBuf),
    /// The marker named a file that no longer exists.
    NothingToRemove(PathBuf),
    /// A marker was present but unusable; it has been cleared.
    Unreadable,
}

#[derive(Debug, Clone)]
pub struct RecoveryMarker {
    path: PathBuf,
}

impl RecoveryMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Persist `output` as the in-progress path, replacing any previous content.
    ///
    /// The raw path bytes are stored followed by a single newline.
    pub fn write(&self, output: &Path) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut content = output.as_os_str().as_bytes().to_vec();
        content.push(b'\n');
        fs::write(&self.path, content)
    }

    /// Read the recorded path, if a marker exists.
    pub fn read(&self) -> io::Result<Option<PathBuf>> {
        match fs::read(&self.path) {
            Ok(content) => {
                let raw = content.strip_suffix(b"\n").unwrap_or(&content[..]);
                if raw.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(PathBuf::from(OsStr::from_bytes(raw))))
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete the marker. Failures are logged, never returned.
    pub fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => error!(
                marker = %self.path.display(),
                error = %e,
                "Failed to delete crash recovery marker"
            ),
        }
    }

    /// Startup recovery: delete whatever the previous run left half-written,
    /// then the marker itself. Never fails; problems are logged.
    pub fn read_and_clear(&self) -> Recovery {
        if !self.exists() {
            return Recovery::Clean;
        }

        let recovery = match self.read() {
            Ok(Some(partial)) => {
                warn!(
                    output = %partial.display(),
                    "Previous run was interrupted mid-encode"
                );
                match fs::remove_file(&partial) {
                    Ok(()) => {
                        info!(output = %partial.display(), "Removed partial output");
                        Recovery::RemovedPartial(partial)
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        info!(output = %partial.display(), "Partial output already gone");
                        Recovery::NothingToRemove(partial)
                    }
                    Err(e) => {
                        error!(
                            output = %partial.display(),
                            error = %e,
                            "Failed to remove partial output"
                        );
                        Recovery::NothingToRemove(partial)
                    }
                }
            }
            Ok(None) => {
                warn!(marker = %self.path.display(), "Crash recovery marker is empty");
                Recovery::Unreadable
            }
            Err(e) => {
                error!(
                    marker = %self.path.display(),
                    error = %e,
                    "Failed to read crash recovery marker"
                );
                Recovery::Unreadable
            }
        };

        self.clear();
        recovery
    }
}
