//! Dead-letter markers for sources that keep failing to encode.
//!
//! A `.encskip` file next to a source removes it from discovery until the
//! marker is deleted by hand. A `.why.txt` sidecar records the
//! last failure so the operator can see what went wrong.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Constructs the skip marker path for a given source file.
///
/// For example: `/media/movie.mkv` -> `/media/movie.mkv.encskip`
pub fn skip_marker_path(source: &Path) -> PathBuf {
    let mut marker_path = source.as_os_str().to_owned();
    marker_path.push(".encskip");
    PathBuf::from(marker_path)
}

/// Constructs the why sidecar path for a given source file.
///
/// For example: `/media/movie.mkv` -> `/media/movie.mkv.why.txt`
pub fn why_sidecar_path(source: &Path) -> PathBuf {
    let mut sidecar_path = source.as_os_str().to_owned();
    sidecar_path.push(".why.txt");
    PathBuf::from(sidecar_path)
}

/// Checks if a skip marker exists for the given source file.
pub fn has_skip_marker(source: &Path) -> bool {
    skip_marker_path(source).exists()
}

/// Dead-letters a source: writes the empty marker, then the reason sidecar.
pub fn write_skip_marker(source: &Path, reason: &str) -> io::Result<()> {
    File::create(skip_marker_path(source))?;

    let mut sidecar = File::create(why_sidecar_path(source))?;
    writeln!(sidecar, "{}", reason)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_marker_paths() {
        let source = Path::new("/media/movies/film.2024.mkv");
        assert_eq!(
            skip_marker_path(source),
            PathBuf::from("/media/movies/film.2024.mkv.encskip")
        );
        assert_eq!(
            why_sidecar_path(source),
            PathBuf::from("/media/movies/film.2024.mkv.why.txt")
        );
    }

    #[test]
    fn test_write_skip_marker_creates_marker_and_reason() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("broken.mkv");
        File::create(&source).unwrap();

        write_skip_marker(&source, "ffmpeg exited with status 1 after 5 attempts").unwrap();

        assert!(has_skip_marker(&source));
        let marker = fs::read_to_string(skip_marker_path(&source)).unwrap();
        assert!(marker.is_empty(), "Skip marker should be empty");
        let why = fs::read_to_string(why_sidecar_path(&source)).unwrap();
        assert!(why.contains("after 5 attempts"));
    }
}
