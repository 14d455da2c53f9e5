//! Encode parameter selection and transcoder invocation

pub mod ffmpeg;
pub mod params;

pub use ffmpeg::{build_ffmpeg_command, command_line, run_transcode, TranscodeError, TranscodeOutcome};
pub use params::{
    output_path_for, partial_path, select_params, AudioAction, CommandError, EncodeParams,
    HdrColour, ResolutionClass,
};
