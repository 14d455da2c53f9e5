//! Encode job controller.
//!
//! Owns the single active job and walks it through
//! `Selected -> MetadataExtracted -> CommandBuilt -> Running -> {Succeeded, Failed}`.
//! The crash recovery marker and the current-job reference belong to the
//! controller; the signal listener only gets a read handle to the latter.

use crate::encode::{
    build_ffmpeg_command, command_line, output_path_for, partial_path, run_transcode,
    select_params, TranscodeOutcome,
};
use crate::marker::{Recovery, RecoveryMarker};
use crate::probe;
use crate::scan::CandidateFile;
use crate::shutdown::Shutdown;
use crate::skip_marker::write_skip_marker;
use auto_encode_config::{Config, DirectoryPair, EncodeConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Job state representing the current stage in the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Selected,
    MetadataExtracted,
    CommandBuilt,
    Running,
    Succeeded,
    Failed(String),
}

impl JobState {
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Selected => "selected",
            JobState::MetadataExtracted => "metadata_extracted",
            JobState::CommandBuilt => "command_built",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed(_) => "failed",
        }
    }
}

/// One unit of encoding work.
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub id: Uuid,
    pub source: PathBuf,
    /// Index of the directory pair the source came from.
    pub pair_index: usize,
    /// The transcode command line, once built.
    pub command: Option<String>,
    pub output: Option<PathBuf>,
    pub started_at: Option<SystemTime>,
    pub stopped_at: Option<SystemTime>,
    pub state: JobState,
}

impl EncodeJob {
    pub fn new(source: PathBuf, pair_index: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            pair_index,
            command: None,
            output: None,
            started_at: None,
            stopped_at: None,
            state: JobState::Selected,
        }
    }

    fn advance(&mut self, next: JobState) {
        debug!(
            job = %self.id,
            from = self.state.as_str(),
            to = next.as_str(),
            "Job state change"
        );
        if matches!(next, JobState::Succeeded | JobState::Failed(_)) {
            self.stopped_at = Some(SystemTime::now());
        }
        self.state = next;
    }
}

/// How a job ended, as seen by the orchestration loop.
#[derive(Debug)]
pub enum JobOutcome {
    /// The encode is in place at `output`.
    Succeeded { job: EncodeJob, output: PathBuf },
    /// The job failed; the source stays a candidate unless dead-lettered.
    Failed { job: EncodeJob, reason: String },
    /// Shutdown was requested mid-transcode.
    Interrupted { job: EncodeJob },
}

/// Shared handle to the source currently being encoded.
#[derive(Debug, Clone, Default)]
pub struct CurrentJob(Arc<Mutex<Option<PathBuf>>>);

impl CurrentJob {
    pub fn get(&self) -> Option<PathBuf> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set(&self, source: Option<PathBuf>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = source;
    }
}

/// Settings the controller needs from the configuration.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub encode: EncodeConfig,
    pub probe_dir: PathBuf,
    pub marker_path: PathBuf,
    pub timeout: Option<Duration>,
    /// Consecutive transcode failures before a source is dead-lettered; 0 disables.
    pub max_failures: u32,
}

impl JobSettings {
    pub fn from_config(config: &Config) -> Self {
        let timeout = match config.daemon.transcode_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self {
            encode: config.encode.clone(),
            probe_dir: config.daemon.probe_dir(),
            marker_path: config.daemon.marker_path(),
            timeout,
            max_failures: config.daemon.max_failures,
        }
    }
}

pub struct JobController {
    settings: JobSettings,
    marker: RecoveryMarker,
    current: CurrentJob,
    shutdown: Shutdown,
    failures: HashMap<PathBuf, u32>,
}

impl JobController {
    pub fn new(settings: JobSettings, shutdown: Shutdown) -> Self {
        let marker = RecoveryMarker::new(&settings.marker_path);
        Self {
            settings,
            marker,
            current: CurrentJob::default(),
            shutdown,
            failures: HashMap::new(),
        }
    }

    /// Read handle to the current job, for the signal listener.
    pub fn current_job(&self) -> CurrentJob {
        self.current.clone()
    }

    pub fn marker(&self) -> &RecoveryMarker {
        &self.marker
    }

    /// Clean up after an interrupted previous run. Call once, before any job.
    pub fn recover(&self) -> Recovery {
        self.marker.read_and_clear()
    }

    /// Consecutive failures recorded for `source`.
    pub fn failure_count(&self, source: &Path) -> u32 {
        self.failures.get(source).copied().unwrap_or(0)
    }

    /// Run one ready candidate through the whole job.
    pub async fn run(&mut self, candidate: &CandidateFile, pair: &DirectoryPair) -> JobOutcome {
        let job = EncodeJob::new(candidate.path.clone(), pair.index);
        info!(job = %job.id, source = %job.source.display(), "Starting encode job");

        self.current.set(Some(candidate.path.clone()));
        let outcome = self.execute(job, pair).await;
        self.current.set(None);
        outcome
    }

    async fn execute(&mut self, mut job: EncodeJob, pair: &DirectoryPair) -> JobOutcome {
        // Selected -> MetadataExtracted. ffprobe can stall on a bad mount, so
        // it races shutdown like the transcode does.
        let extracted = tokio::select! {
            result = probe::extract(
                &self.settings.encode.ffprobe,
                &job.source,
                &self.settings.probe_dir,
                job.id,
            ) => Some(result),
            _ = self.shutdown.wait() => None,
        };
        let artifact = match extracted {
            Some(Ok(artifact)) => artifact,
            Some(Err(e)) => return fail(job, format!("metadata extraction failed: {}", e)),
            None => return interrupted(job),
        };
        let metadata = match artifact.read().await {
            Ok(metadata) => metadata,
            Err(e) => {
                artifact.remove();
                return fail(job, format!("metadata extraction failed: {}", e));
            }
        };
        job.advance(JobState::MetadataExtracted);

        // MetadataExtracted -> CommandBuilt. The artifact goes either way.
        let params = select_params(&metadata, &self.settings.encode);
        let output = output_path_for(pair, &job.source);
        artifact.remove();

        let (params, output) = match (params, output) {
            (Ok(params), Ok(output)) => (params, output),
            (Err(e), _) | (_, Err(e)) => {
                return fail(job, format!("command construction failed: {}", e))
            }
        };
        if let Some(parent) = output.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return fail(
                    job,
                    format!("cannot create output directory {}: {}", parent.display(), e),
                );
            }
        }
        let partial = partial_path(&output);
        let cmd = build_ffmpeg_command(&self.settings.encode.ffmpeg, &job.source, &partial, &params);
        let line = command_line(&cmd);
        info!(job = %job.id, command = %line, "Built encode command");
        job.command = Some(line);
        job.output = Some(output.clone());
        job.advance(JobState::CommandBuilt);

        // CommandBuilt -> Running
        if self.shutdown.is_triggered() {
            return interrupted(job);
        }
        if let Err(e) = self.marker.write(&partial) {
            return fail(job, format!("cannot write crash recovery marker: {}", e));
        }
        job.started_at = Some(SystemTime::now());
        job.advance(JobState::Running);
        info!(job = %job.id, output = %output.display(), "Encoding");

        let result = run_transcode(cmd, self.settings.timeout, &mut self.shutdown).await;

        // Running -> {Succeeded, Failed}
        let reason = match result {
            Ok(TranscodeOutcome::Succeeded { elapsed }) => {
                if let Err(e) = std::fs::rename(&partial, &output) {
                    self.marker.clear();
                    remove_partial(&partial);
                    return fail(
                        job,
                        format!("cannot move finished encode into place: {}", e),
                    );
                }
                self.marker.clear();
                self.failures.remove(&job.source);
                job.advance(JobState::Succeeded);
                info!(
                    job = %job.id,
                    output = %output.display(),
                    elapsed = %format_elapsed(elapsed),
                    "Encode finished"
                );
                return JobOutcome::Succeeded { job, output };
            }
            Ok(TranscodeOutcome::Interrupted) => {
                remove_partial(&partial);
                self.marker.clear();
                return interrupted(job);
            }
            Ok(TranscodeOutcome::Failed {
                code,
                stderr,
                elapsed,
            }) => {
                let status = code
                    .map(|c| format!("exit code {}", c))
                    .unwrap_or_else(|| "killed by signal".to_string());
                error!(
                    job = %job.id,
                    source = %job.source.display(),
                    elapsed = %format_elapsed(elapsed),
                    "Encode failed with {}",
                    status
                );
                for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
                    error!("Encode failed: {}", line);
                }
                format!("transcoder failed with {}", status)
            }
            Ok(TranscodeOutcome::TimedOut { elapsed }) => {
                format!("transcode timed out after {}", format_elapsed(elapsed))
            }
            Err(e) => e.to_string(),
        };

        remove_partial(&partial);
        self.marker.clear();
        self.record_failure(&job.source, &reason);
        fail(job, reason)
    }

    /// Count a transcode failure and dead-letter the source once it hits the limit.
    fn record_failure(&mut self, source: &Path, reason: &str) {
        if self.settings.max_failures == 0 {
            return;
        }
        let count = self.failures.entry(source.to_path_buf()).or_insert(0);
        *count += 1;
        if *count < self.settings.max_failures {
            warn!(
                source = %source.display(),
                failures = *count,
                limit = self.settings.max_failures,
                "Encode will be retried next pass"
            );
            return;
        }

        let attempts = *count;
        self.failures.remove(source);
        let why = format!("{} (gave up after {} attempts)", reason, attempts);
        match write_skip_marker(source, &why) {
            Ok(()) => error!(
                source = %source.display(),
                attempts,
                "Giving up on source; delete its .encskip file to retry"
            ),
            Err(e) => error!(
                source = %source.display(),
                error = %e,
                "Failed to write skip marker"
            ),
        }
    }
}

fn fail(mut job: EncodeJob, reason: String) -> JobOutcome {
    error!(job = %job.id, source = %job.source.display(), reason = %reason, "Encode job failed");
    job.advance(JobState::Failed(reason.clone()));
    JobOutcome::Failed { job, reason }
}

fn interrupted(mut job: EncodeJob) -> JobOutcome {
    warn!(job = %job.id, source = %job.source.display(), "Encode job interrupted by shutdown");
    job.advance(JobState::Failed("interrupted".to_string()));
    JobOutcome::Interrupted { job }
}

fn remove_partial(partial: &Path) {
    match std::fs::remove_file(partial) {
        Ok(()) => debug!(path = %partial.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %partial.display(), error = %e, "Failed to remove partial output"),
    }
}

pub(crate) fn format_elapsed(elapsed: Duration) -> String {
    humantime::format_duration(Duration::from_secs(elapsed.as_secs())).to_string()
}
