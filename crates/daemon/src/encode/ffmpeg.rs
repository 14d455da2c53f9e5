//! ffmpeg invocation.
//!
//! Builds the transcode command line from [`EncodeParams`] and runs it to
//! completion, capturing stderr and elapsed time. The run can be cut short
//! by a timeout or by shutdown, in which case the child is killed.

use super::params::{AudioAction, EncodeParams};
use crate::shutdown::Shutdown;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Error type for launching the transcoder.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for transcoder: {0}")]
    Wait(#[source] std::io::Error),
}

/// How a transcode run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    Succeeded { elapsed: Duration },
    /// Non-zero exit. `code` is `None` when the process died from a signal.
    Failed {
        code: Option<i32>,
        stderr: String,
        elapsed: Duration,
    },
    TimedOut { elapsed: Duration },
    /// Shutdown was requested while the transcode was running.
    Interrupted,
}

/// Build the ffmpeg command that transcodes `input` into `output`.
///
/// Maps the first video stream plus every audio and subtitle stream, applies
/// the per-stream audio actions, and forces the Matroska muxer since the
/// output name carries a temporary extension.
pub fn build_ffmpeg_command(
    ffmpeg: &Path,
    input: &Path,
    output: &Path,
    params: &EncodeParams,
) -> Command {
    let mut cmd = Command::new(ffmpeg);

    cmd.args(["-hide_banner", "-nostdin", "-y"]);
    cmd.arg("-i").arg(input);

    cmd.args(["-map", "0:v:0", "-map", "0:a?", "-map", "0:s?"]);

    cmd.arg("-c:v").arg(&params.video_codec);
    cmd.arg("-preset").arg(&params.preset);
    cmd.arg("-crf").arg(params.crf.to_string());
    cmd.arg("-pix_fmt").arg(params.pix_fmt);

    if let Some(hdr) = &params.hdr {
        cmd.arg("-color_primaries").arg(&hdr.primaries);
        cmd.arg("-color_trc").arg(&hdr.transfer);
        cmd.arg("-colorspace").arg(&hdr.space);
    }

    if params.audio.is_empty() {
        cmd.args(["-c:a", "copy"]);
    }
    for (i, action) in params.audio.iter().enumerate() {
        match action {
            AudioAction::Copy => {
                cmd.arg(format!("-c:a:{}", i)).arg("copy");
            }
            AudioAction::Transcode { codec, bitrate } => {
                cmd.arg(format!("-c:a:{}", i)).arg(codec);
                cmd.arg(format!("-b:a:{}", i)).arg(bitrate);
            }
        }
    }

    cmd.args(["-c:s", "copy"]);
    cmd.args(["-f", "matroska"]);
    cmd.arg(output);

    cmd
}

/// Render a command as a single line for logging.
pub fn command_line(cmd: &Command) -> String {
    let std_cmd = cmd.as_std();
    std::iter::once(std_cmd.get_program())
        .chain(std_cmd.get_args())
        .map(|arg| {
            let arg = arg.to_string_lossy();
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("\"{}\"", arg)
            } else {
                arg.into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run the transcoder to completion.
///
/// Blocks the caller for the whole encode. stderr is drained concurrently so
/// a chatty encoder can't fill the pipe and stall.
pub async fn run_transcode(
    mut cmd: Command,
    timeout: Option<Duration>,
    shutdown: &mut Shutdown,
) -> Result<TranscodeOutcome, TranscodeError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();

    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started = Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|source| TranscodeError::Spawn { program, source })?;

    let stderr_task = child.stderr.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            // A read error just truncates what gets logged.
            let _ = pipe.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        })
    });

    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    let status = tokio::select! {
        status = child.wait() => status.map_err(TranscodeError::Wait)?,
        _ = deadline => {
            let _ = child.kill().await;
            return Ok(TranscodeOutcome::TimedOut { elapsed: started.elapsed() });
        }
        _ = shutdown.wait() => {
            let _ = child.kill().await;
            return Ok(TranscodeOutcome::Interrupted);
        }
    };
    let elapsed = started.elapsed();

    if status.success() {
        return Ok(TranscodeOutcome::Succeeded { elapsed });
    }

    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };
    Ok(TranscodeOutcome::Failed {
        code: status.code(),
        stderr,
        elapsed,
    })
}
