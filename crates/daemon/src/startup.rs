//! Startup checks module
//!
//! Provides preflight checks before the daemon enters its loop:
//! - ffmpeg availability (`ffmpeg -version`), version captured for the banner
//! - ffprobe availability (`ffprobe -version`)
//! - state directory creation for the crash marker and probe artifacts

use auto_encode_config::{DaemonConfig, EncodeConfig};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{tool} not available: {detail}")]
    ToolUnavailable { tool: String, detail: String },

    #[error("Cannot create state directory {}: {source}", .path.display())]
    StateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Version text reported by the external tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolVersions {
    /// Full `ffmpeg -version` output.
    pub ffmpeg: String,
    pub ffmpeg_major: Option<u32>,
    /// First line of `ffprobe -version`.
    pub ffprobe: String,
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 7.1 ..."
/// - N-prefixed: "ffmpeg version n7.1-... ..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .trim()
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');

    // Major version is everything before the first '.' or '-'
    let major_str = version_str.split(|c| c == '.' || c == '-').next()?;

    major_str.parse().ok()
}

/// Run `<program> -version` and return its stdout.
async fn tool_version(program: &Path, tool: &str) -> Result<String, StartupError> {
    let output = Command::new(program)
        .arg("-version")
        .output()
        .await
        .map_err(|e| StartupError::ToolUnavailable {
            tool: tool.to_string(),
            detail: format!(
                "{} -version failed; is it installed and in PATH? Error: {}",
                program.display(),
                e
            ),
        })?;

    if !output.status.success() {
        return Err(StartupError::ToolUnavailable {
            tool: tool.to_string(),
            detail: format!("{} -version exited with {}", program.display(), output.status),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Check that ffmpeg and ffprobe both run.
pub async fn run_startup_checks(cfg: &EncodeConfig) -> Result<ToolVersions, StartupError> {
    let ffmpeg = tool_version(&cfg.ffmpeg, "ffmpeg").await?;
    let ffprobe = tool_version(&cfg.ffprobe, "ffprobe").await?;

    Ok(ToolVersions {
        ffmpeg_major: parse_ffmpeg_version(&ffmpeg),
        ffprobe: ffprobe.lines().next().unwrap_or("").to_string(),
        ffmpeg,
    })
}

/// Create the state directory and its probe subdirectory.
pub fn prepare_state_dir(cfg: &DaemonConfig) -> Result<(), StartupError> {
    let probe_dir = cfg.probe_dir();
    std::fs::create_dir_all(&probe_dir).map_err(|source| StartupError::StateDir {
        path: probe_dir,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    // *For any* FFmpeg version string (including n-prefixed formats like n7.1-...),
    // the version parser SHALL extract the major version number.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_ffmpeg_version_parsing_standard(
            major in 1u32..20,
            minor in 0u32..10,
            patch in 0u32..10,
        ) {
            let version_output = format!(
                "ffmpeg version {}.{}.{} Copyright (c) 2000-2024 the FFmpeg developers",
                major, minor, patch
            );

            prop_assert_eq!(parse_ffmpeg_version(&version_output), Some(major));
        }

        #[test]
        fn prop_ffmpeg_version_parsing_n_prefixed(
            major in 1u32..20,
            minor in 0u32..10,
            git_hash in "[a-f0-9]{7}",
        ) {
            let version_output = format!(
                "ffmpeg version n{}.{}-123-g{} Copyright (c) 2000-2024",
                major, minor, git_hash
            );

            prop_assert_eq!(parse_ffmpeg_version(&version_output), Some(major));
        }

        #[test]
        fn prop_ffmpeg_version_parsing_multiline(
            major in 1u32..20,
            minor in 0u32..10,
        ) {
            let version_output = format!(
                "ffmpeg version {}.{} Copyright (c) 2000-2024\nbuilt with gcc 12.2.0\nconfiguration: --enable-gpl",
                major, minor
            );

            prop_assert_eq!(parse_ffmpeg_version(&version_output), Some(major));
        }
    }

    #[test]
    fn test_parse_ffmpeg_version_distro_build() {
        let output = "ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023 the FFmpeg developers";
        assert_eq!(parse_ffmpeg_version(output), Some(6));
    }

    #[test]
    fn test_parse_ffmpeg_version_invalid() {
        assert_eq!(parse_ffmpeg_version("not ffmpeg output"), None);
        assert_eq!(parse_ffmpeg_version(""), None);
    }

    #[tokio::test]
    async fn test_startup_checks_report_versions() {
        let temp = TempDir::new().unwrap();
        let cfg = EncodeConfig {
            ffmpeg: script(
                temp.path(),
                "ffmpeg",
                "echo 'ffmpeg version n7.1-12-gdeadbee Copyright (c) 2000-2024'\necho 'built with gcc 13'",
            ),
            ffprobe: script(temp.path(), "ffprobe", "echo 'ffprobe version n7.1-12-gdeadbee'"),
            ..EncodeConfig::default()
        };

        let versions = run_startup_checks(&cfg).await.unwrap();
        assert_eq!(versions.ffmpeg_major, Some(7));
        assert_eq!(versions.ffmpeg.lines().count(), 2);
        assert_eq!(versions.ffprobe, "ffprobe version n7.1-12-gdeadbee");
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_is_fatal() {
        let cfg = EncodeConfig {
            ffmpeg: PathBuf::from("/nonexistent/ffmpeg"),
            ..EncodeConfig::default()
        };
        match run_startup_checks(&cfg).await {
            Err(StartupError::ToolUnavailable { tool, .. }) => assert_eq!(tool, "ffmpeg"),
            other => panic!("Expected ToolUnavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failing_ffprobe_is_fatal() {
        let temp = TempDir::new().unwrap();
        let cfg = EncodeConfig {
            ffmpeg: script(temp.path(), "ffmpeg", "echo 'ffmpeg version 7.0'"),
            ffprobe: script(temp.path(), "ffprobe", "exit 1"),
            ..EncodeConfig::default()
        };
        match run_startup_checks(&cfg).await {
            Err(StartupError::ToolUnavailable { tool, .. }) => assert_eq!(tool, "ffprobe"),
            other => panic!("Expected ToolUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_prepare_state_dir_creates_probe_dir() {
        let temp = TempDir::new().unwrap();
        let cfg = DaemonConfig {
            state_dir: temp.path().join("state"),
            ..DaemonConfig::default()
        };
        prepare_state_dir(&cfg).unwrap();
        assert!(cfg.probe_dir().is_dir());
    }
}
