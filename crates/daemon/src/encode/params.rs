//! Encode parameter selection.
//!
//! Turns probed [`SourceMetadata`] plus the configured quality profile into
//! the concrete settings for one transcode, and works out where the output
//! lands inside the encoded-output directory.

use crate::probe::SourceMetadata;
use crate::scan::{base_name, ENCODED_SUFFIX};
use auto_encode_config::{DirectoryPair, EncodeConfig};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extension appended to the output while the transcoder is still writing it.
pub const PARTIAL_EXTENSION: &str = "partial";

/// Error type for command construction.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("source has no video stream")]
    NoVideoStream,

    #[error("source {} is not inside {}", .path.display(), .dir.display())]
    OutsideSourceDir { path: PathBuf, dir: PathBuf },

    #[error("source {} has no usable file name", .0.display())]
    NoFileName(PathBuf),
}

/// Resolution bucket that decides the CRF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionClass {
    Uhd,
    Hd,
    Sd,
}

impl ResolutionClass {
    pub fn from_height(height: u32) -> Self {
        if height >= 2000 {
            ResolutionClass::Uhd
        } else if height >= 700 {
            ResolutionClass::Hd
        } else {
            ResolutionClass::Sd
        }
    }
}

/// Colour metadata carried through for HDR sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdrColour {
    pub primaries: String,
    pub transfer: String,
    pub space: String,
}

/// What happens to one audio stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioAction {
    Copy,
    Transcode { codec: String, bitrate: String },
}

/// Settings for one transcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeParams {
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub pix_fmt: &'static str,
    pub hdr: Option<HdrColour>,
    /// One entry per audio stream, in stream order.
    pub audio: Vec<AudioAction>,
}

/// Pick encode settings for a source.
pub fn select_params(
    meta: &SourceMetadata,
    cfg: &EncodeConfig,
) -> Result<EncodeParams, CommandError> {
    let video = meta.video.as_ref().ok_or(CommandError::NoVideoStream)?;

    let crf = match ResolutionClass::from_height(video.height) {
        ResolutionClass::Uhd => cfg.crf_uhd,
        ResolutionClass::Hd => cfg.crf_hd,
        ResolutionClass::Sd => cfg.crf_sd,
    };

    let hdr = if video.is_hdr() {
        Some(HdrColour {
            primaries: video
                .color_primaries
                .clone()
                .unwrap_or_else(|| "bt2020".to_string()),
            transfer: video
                .color_transfer
                .clone()
                .unwrap_or_else(|| "smpte2084".to_string()),
            space: video
                .color_space
                .clone()
                .unwrap_or_else(|| "bt2020nc".to_string()),
        })
    } else {
        None
    };

    let pix_fmt = if video.is_10bit() || hdr.is_some() {
        "yuv420p10le"
    } else {
        "yuv420p"
    };

    let audio = meta
        .audio
        .iter()
        .map(|stream| {
            if stream.is_lossless() {
                AudioAction::Transcode {
                    codec: cfg.lossless_audio_codec.clone(),
                    bitrate: cfg.lossless_audio_bitrate.clone(),
                }
            } else {
                AudioAction::Copy
            }
        })
        .collect();

    Ok(EncodeParams {
        video_codec: cfg.video_codec.clone(),
        preset: cfg.preset.clone(),
        crf,
        pix_fmt,
        hdr,
        audio,
    })
}

/// Where the encode of `source` lands:
/// `<encoded>/<relative parent>/<stem>_encoded.mkv`.
///
/// Keeping the relative structure and stem lets discovery match it back to
/// the source on the next pass.
pub fn output_path_for(pair: &DirectoryPair, source: &Path) -> Result<PathBuf, CommandError> {
    let parent = source
        .parent()
        .ok_or_else(|| CommandError::NoFileName(source.to_path_buf()))?;
    let relative = parent
        .strip_prefix(&pair.source)
        .map_err(|_| CommandError::OutsideSourceDir {
            path: source.to_path_buf(),
            dir: pair.source.clone(),
        })?;
    let stem = base_name(source).ok_or_else(|| CommandError::NoFileName(source.to_path_buf()))?;

    Ok(pair
        .encoded
        .join(relative)
        .join(format!("{}{}.mkv", stem, ENCODED_SUFFIX)))
}

/// The temporary name the transcoder writes to, e.g. `movie_encoded.mkv.partial`.
pub fn partial_path(output: &Path) -> PathBuf {
    let mut partial = output.as_os_str().to_owned();
    partial.push(".");
    partial.push(PARTIAL_EXTENSION);
    PathBuf::from(partial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{AudioStream, VideoStream};
    use crate::scan::{base_name as source_key, encoded_base_name, is_video_file};
    use proptest::prelude::*;

    fn video(height: u32, pix_fmt: &str, transfer: Option<&str>) -> VideoStream {
        VideoStream {
            codec_name: "h264".to_string(),
            width: height * 16 / 9,
            height,
            pix_fmt: Some(pix_fmt.to_string()),
            color_transfer: transfer.map(String::from),
            color_primaries: transfer.map(|_| "bt2020".to_string()),
            color_space: transfer.map(|_| "bt2020nc".to_string()),
            bits_per_raw_sample: None,
        }
    }

    fn audio(index: usize, codec: &str, profile: Option<&str>) -> AudioStream {
        AudioStream {
            index,
            codec_name: codec.to_string(),
            profile: profile.map(String::from),
            channels: 6,
        }
    }

    fn metadata(video: Option<VideoStream>, audio: Vec<AudioStream>) -> SourceMetadata {
        SourceMetadata {
            duration_secs: 5400.0,
            video,
            audio,
            subtitles: vec![],
        }
    }

    fn pair() -> DirectoryPair {
        DirectoryPair {
            index: 0,
            source: PathBuf::from("/media/incoming/movies"),
            encoded: PathBuf::from("/media/encoded/movies"),
            publish: PathBuf::from("/media/plex/movies"),
            section: "1".to_string(),
        }
    }

    #[test]
    fn test_resolution_class_boundaries() {
        assert_eq!(ResolutionClass::from_height(2160), ResolutionClass::Uhd);
        assert_eq!(ResolutionClass::from_height(2000), ResolutionClass::Uhd);
        assert_eq!(ResolutionClass::from_height(1999), ResolutionClass::Hd);
        assert_eq!(ResolutionClass::from_height(720), ResolutionClass::Hd);
        assert_eq!(ResolutionClass::from_height(700), ResolutionClass::Hd);
        assert_eq!(ResolutionClass::from_height(576), ResolutionClass::Sd);
    }

    #[test]
    fn test_hdr_source_keeps_colour_and_10bit() {
        let cfg = EncodeConfig::default();
        let meta = metadata(
            Some(video(2160, "yuv420p10le", Some("smpte2084"))),
            vec![audio(0, "truehd", None), audio(1, "ac3", None)],
        );

        let params = select_params(&meta, &cfg).unwrap();
        assert_eq!(params.crf, cfg.crf_uhd);
        assert_eq!(params.pix_fmt, "yuv420p10le");
        let hdr = params.hdr.unwrap();
        assert_eq!(hdr.transfer, "smpte2084");
        assert_eq!(hdr.primaries, "bt2020");
        assert_eq!(
            params.audio,
            vec![
                AudioAction::Transcode {
                    codec: "eac3".to_string(),
                    bitrate: "640k".to_string()
                },
                AudioAction::Copy
            ]
        );
    }

    #[test]
    fn test_8bit_hd_source() {
        let cfg = EncodeConfig::default();
        let meta = metadata(Some(video(1080, "yuv420p", None)), vec![audio(0, "dts", Some("DTS"))]);

        let params = select_params(&meta, &cfg).unwrap();
        assert_eq!(params.crf, cfg.crf_hd);
        assert_eq!(params.pix_fmt, "yuv420p");
        assert!(params.hdr.is_none());
        assert_eq!(params.audio, vec![AudioAction::Copy]);
    }

    #[test]
    fn test_no_video_stream_is_an_error() {
        let meta = metadata(None, vec![audio(0, "flac", None)]);
        assert!(matches!(
            select_params(&meta, &EncodeConfig::default()),
            Err(CommandError::NoVideoStream)
        ));
    }

    #[test]
    fn test_output_path_preserves_relative_structure() {
        let source = Path::new("/media/incoming/movies/Heat (1995)/Heat (1995).mkv");
        assert_eq!(
            output_path_for(&pair(), source).unwrap(),
            PathBuf::from("/media/encoded/movies/Heat (1995)/Heat (1995)_encoded.mkv")
        );
    }

    #[test]
    fn test_output_path_rejects_foreign_source() {
        let source = Path::new("/elsewhere/movie.mkv");
        assert!(matches!(
            output_path_for(&pair(), source),
            Err(CommandError::OutsideSourceDir { .. })
        ));
    }

    #[test]
    fn test_partial_path_is_not_a_video_file() {
        let output = PathBuf::from("/media/encoded/movies/movie_encoded.mkv");
        let partial = partial_path(&output);
        assert_eq!(
            partial,
            PathBuf::from("/media/encoded/movies/movie_encoded.mkv.partial")
        );
        assert!(!is_video_file(&partial));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // The output of any source correlates back to that source's key.
        #[test]
        fn prop_output_matches_source_key(
            stem in "[a-zA-Z0-9 ._()-]{1,30}",
            sub in prop::option::of("[a-z]{1,8}"),
            ext in prop::sample::select(vec!["mkv", "mp4", "avi", "m2ts"]),
        ) {
            prop_assume!(!stem.starts_with('.') && !stem.ends_with('.'));
            let mut source = pair().source;
            if let Some(sub) = &sub {
                source.push(sub);
            }
            source.push(format!("{}.{}", stem, ext));

            let output = output_path_for(&pair(), &source).unwrap();
            prop_assert!(output.starts_with(&pair().encoded));
            prop_assert_eq!(encoded_base_name(&output), source_key(&source));
        }
    }
}
