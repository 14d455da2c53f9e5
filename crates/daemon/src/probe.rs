//! Source metadata extraction.
//!
//! A ready candidate is probed with ffprobe; the JSON report is written to a
//! probe artifact under the state directory, parsed into [`SourceMetadata`],
//! and removed once the encode command has been built. Removal never fails
//! the job: problems are logged and the artifact is left behind.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe command failed to execute.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// IO error during probe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The primary video stream of a source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoStream {
    /// Codec name (e.g., "hevc", "h264").
    pub codec_name: String,
    pub width: u32,
    pub height: u32,
    /// Pixel format (e.g., "yuv420p10le").
    pub pix_fmt: Option<String>,
    pub color_transfer: Option<String>,
    pub color_primaries: Option<String>,
    pub color_space: Option<String>,
    pub bits_per_raw_sample: Option<u32>,
}

impl VideoStream {
    /// True for PQ and HLG transfer characteristics.
    pub fn is_hdr(&self) -> bool {
        matches!(
            self.color_transfer.as_deref(),
            Some("smpte2084") | Some("arib-std-b67")
        )
    }

    pub fn is_10bit(&self) -> bool {
        if self.bits_per_raw_sample.map_or(false, |b| b >= 10) {
            return true;
        }
        self.pix_fmt
            .as_deref()
            .map_or(false, |fmt| fmt.contains("10") || fmt.contains("12"))
    }
}

/// An audio stream, indexed by its position among the audio streams.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioStream {
    pub index: usize,
    /// Codec name (e.g., "aac", "truehd", "dts").
    pub codec_name: String,
    /// Codec profile, used to tell DTS-HD MA apart from lossy DTS.
    pub profile: Option<String>,
    pub channels: u32,
}

impl AudioStream {
    /// Lossless tracks are too large to carry through unchanged.
    pub fn is_lossless(&self) -> bool {
        let codec = self.codec_name.to_lowercase();
        match codec.as_str() {
            "truehd" | "flac" | "mlp" | "alac" => true,
            "dts" => self
                .profile
                .as_deref()
                .map_or(false, |p| p.eq_ignore_ascii_case("DTS-HD MA")),
            _ => codec.starts_with("pcm_"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubtitleStream {
    pub codec_name: String,
    pub language: Option<String>,
}

/// Structural metadata of a source file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceMetadata {
    pub duration_secs: f64,
    /// First video stream, if any.
    pub video: Option<VideoStream>,
    pub audio: Vec<AudioStream>,
    pub subtitles: Vec<SubtitleStream>,
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub profile: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub pix_fmt: Option<String>,
        pub color_transfer: Option<String>,
        pub color_primaries: Option<String>,
        pub color_space: Option<String>,
        pub bits_per_raw_sample: Option<String>,
        pub channels: Option<u32>,
        pub tags: Option<HashMap<String, String>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
    }
}

/// Parses ffprobe JSON output into SourceMetadata.
pub fn parse_ffprobe_output(json_str: &str) -> Result<SourceMetadata, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let streams = ffprobe.streams.unwrap_or_default();
    let format = ffprobe.format.ok_or_else(|| {
        ProbeError::ParseError("Missing format information in ffprobe output".to_string())
    })?;

    let mut video = None;
    let mut audio = Vec::new();
    let mut subtitles = Vec::new();

    for stream in streams {
        let codec_type = stream.codec_type.as_deref().unwrap_or("");
        let codec_name = stream.codec_name.clone().unwrap_or_default();

        match codec_type {
            // Cover art shows up as an mjpeg/png video stream; skip it.
            "video" if video.is_none() && !matches!(codec_name.as_str(), "mjpeg" | "png") => {
                video = Some(VideoStream {
                    codec_name,
                    width: stream.width.unwrap_or(0),
                    height: stream.height.unwrap_or(0),
                    pix_fmt: stream.pix_fmt,
                    color_transfer: stream.color_transfer,
                    color_primaries: stream.color_primaries,
                    color_space: stream.color_space,
                    bits_per_raw_sample: stream
                        .bits_per_raw_sample
                        .as_ref()
                        .and_then(|b| b.parse::<u32>().ok()),
                });
            }
            "audio" => {
                audio.push(AudioStream {
                    index: audio.len(),
                    codec_name,
                    profile: stream.profile,
                    channels: stream.channels.unwrap_or(0),
                });
            }
            "subtitle" => {
                subtitles.push(SubtitleStream {
                    codec_name,
                    language: stream.tags.and_then(|mut t| t.remove("language")),
                });
            }
            _ => {}
        }
    }

    let duration_secs = format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(SourceMetadata {
        duration_secs,
        video,
        audio,
        subtitles,
    })
}

/// A probe report on disk. Removed by [`ProbeArtifact::remove`], or on drop
/// if the job bails out before getting that far.
#[derive(Debug)]
pub struct ProbeArtifact {
    path: PathBuf,
    removed: bool,
}

impl ProbeArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and parses the report.
    pub async fn read(&self) -> Result<SourceMetadata, ProbeError> {
        let json = tokio::fs::read_to_string(&self.path).await?;
        parse_ffprobe_output(&json)
    }

    /// Deletes the report, logging the outcome. Never fails.
    pub fn remove(mut self) {
        self.removed = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed probe artifact"),
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove probe artifact"
            ),
        }
    }
}

impl Drop for ProbeArtifact {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove probe artifact"
                );
            }
        }
    }
}

/// Probes `source` and materialises the report as `<probe_dir>/<id>.json`.
///
/// Runs `ffprobe -v error -print_format json -show_streams -show_format <path>`.
/// On failure no artifact is left on disk.
pub async fn extract(
    ffprobe: &Path,
    source: &Path,
    probe_dir: &Path,
    id: Uuid,
) -> Result<ProbeArtifact, ProbeError> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(source)
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::FfprobeFailed(format!(
            "ffprobe exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    tokio::fs::create_dir_all(probe_dir).await?;
    let artifact = ProbeArtifact {
        path: probe_dir.join(format!("{}.json", id)),
        removed: false,
    };
    // The guard is live before the write so a short write is cleaned up too.
    tokio::fs::write(&artifact.path, &output.stdout).await?;

    debug!(
        source = %source.display(),
        artifact = %artifact.path.display(),
        "Wrote probe artifact"
    );
    Ok(artifact)
}
