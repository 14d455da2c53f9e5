//! Auto Encode
//!
//! Watch-folder daemon: finds newly arrived media, waits for it to finish
//! arriving, transcodes it with ffmpeg, publishes the result and asks the
//! media library to rescan.

pub mod daemon;
pub mod encode;
pub mod job;
pub mod marker;
pub mod plex;
pub mod probe;
pub mod publish;
pub mod scan;
pub mod shutdown;
pub mod skip_marker;
pub mod stability;
pub mod startup;

pub use auto_encode_config as config;
pub use auto_encode_config::Config;
pub use daemon::{Daemon, DaemonError, PassSummary, PassTracker};
pub use encode::{
    build_ffmpeg_command, output_path_for, partial_path, run_transcode, select_params,
    CommandError, EncodeParams, TranscodeError, TranscodeOutcome,
};
pub use job::{CurrentJob, EncodeJob, JobController, JobOutcome, JobSettings, JobState};
pub use marker::{Recovery, RecoveryMarker};
pub use plex::{LibraryNotifier, NotifyError, PlexClient};
pub use probe::{ProbeArtifact, ProbeError, SourceMetadata};
pub use publish::{post_process, publish, publish_path, PublishError, PublishOutcome};
pub use scan::{find_candidates, CandidateFile, ScanError};
pub use shutdown::{spawn_signal_listener, Shutdown, ShutdownTrigger};
pub use stability::{Readiness, ReadinessDetector};
pub use startup::{
    parse_ffmpeg_version, prepare_state_dir, run_startup_checks, StartupError, ToolVersions,
};
