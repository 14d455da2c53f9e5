//! Orchestration loop
//!
//! Runs passes over every directory pair: discover candidates, check each for
//! readiness, hand ready ones to the job controller one at a time, publish
//! successes. When a pass finds no work the daemon sleeps before the next.

use crate::job::{CurrentJob, JobController, JobOutcome, JobSettings};
use crate::marker::Recovery;
use crate::plex::{LibraryNotifier, NotifyError};
use crate::publish::post_process;
use crate::scan::find_candidates;
use crate::shutdown::Shutdown;
use crate::stability::{Readiness, ReadinessDetector};
use crate::startup::StartupError;
use auto_encode_config::{Config, ConfigError, DirectoryPair};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    #[error("Failed to set up library notifier: {0}")]
    Notifier(#[from] NotifyError),

    #[error("Failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    /// A termination signal stopped the daemon.
    #[error("Terminated by signal")]
    Terminated,
}

/// Whether a pass found work, and therefore whether to skip the idle sleep.
///
/// A pair with candidates marks the pass busy. A candidate that is not ready
/// marks it idle again, and a later ready candidate marks it busy. So only an
/// unready *last* candidate leaves the pass idle and triggers the backoff,
/// which keeps the loop from spinning while one large file is still arriving.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassTracker {
    found_work: bool,
}

impl PassTracker {
    pub fn pair_has_candidates(&mut self) {
        self.found_work = true;
    }

    pub fn candidate_not_ready(&mut self) {
        self.found_work = false;
    }

    pub fn candidate_ready(&mut self) {
        self.found_work = true;
    }

    pub fn found_work(&self) -> bool {
        self.found_work
    }
}

/// Counters for one pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub found_work: bool,
    pub candidates: usize,
    pub not_ready: usize,
    pub encoded: usize,
    pub failed: usize,
}

pub struct Daemon<N> {
    pairs: Vec<DirectoryPair>,
    readiness: ReadinessDetector,
    controller: JobController,
    notifier: N,
    idle_sleep: Duration,
    shutdown: Shutdown,
}

impl<N: LibraryNotifier> Daemon<N> {
    /// Resolve directory pairs and assemble the pipeline.
    ///
    /// Mismatched directory list lengths are logged and the shortest wins;
    /// an empty list is a configuration error.
    pub fn new(config: &Config, notifier: N, shutdown: Shutdown) -> Result<Self, DaemonError> {
        let resolution = config.directory_pairs()?;
        if let Some(mismatch) = resolution.mismatch {
            warn!(
                used = mismatch.min,
                longest = mismatch.max,
                "Directory lists have different lengths; only the first {} pairs will be processed",
                mismatch.min
            );
        }

        Ok(Self {
            pairs: resolution.pairs,
            readiness: ReadinessDetector::from_config(&config.readiness),
            controller: JobController::new(JobSettings::from_config(config), shutdown.clone()),
            notifier,
            idle_sleep: Duration::from_secs(config.daemon.idle_sleep_secs),
            shutdown,
        })
    }

    pub fn pairs(&self) -> &[DirectoryPair] {
        &self.pairs
    }

    /// Handle for the signal listener.
    pub fn current_job(&self) -> CurrentJob {
        self.controller.current_job()
    }

    /// Clean up after an interrupted previous run.
    pub fn recover(&self) -> Recovery {
        self.controller.recover()
    }

    /// Recover, then run passes until shutdown.
    ///
    /// Only returns on termination, so the result is always an error.
    pub async fn run(&mut self) -> Result<(), DaemonError> {
        self.recover();

        loop {
            let summary = self.run_pass().await?;
            info!(
                candidates = summary.candidates,
                not_ready = summary.not_ready,
                encoded = summary.encoded,
                failed = summary.failed,
                "Pass complete"
            );

            if !summary.found_work {
                info!(
                    "No work found, sleeping for {}",
                    humantime::format_duration(self.idle_sleep)
                );
                let mut shutdown = self.shutdown.clone();
                tokio::select! {
                    _ = tokio::time::sleep(self.idle_sleep) => {}
                    _ = shutdown.wait() => return Err(DaemonError::Terminated),
                }
            }
        }
    }

    /// One pass over every directory pair, strictly sequential.
    pub async fn run_pass(&mut self) -> Result<PassSummary, DaemonError> {
        let mut tracker = PassTracker::default();
        let mut summary = PassSummary::default();
        let mut shutdown = self.shutdown.clone();

        for pair in &self.pairs {
            if shutdown.is_triggered() {
                return Err(DaemonError::Terminated);
            }

            let candidates = match find_candidates(&pair.source, &pair.encoded) {
                Ok(candidates) => candidates,
                Err(e) => {
                    error!(pair = pair.index, error = %e, "Skipping directory pair this pass");
                    continue;
                }
            };
            if candidates.is_empty() {
                debug!(pair = pair.index, source = %pair.source.display(), "Nothing to encode");
                continue;
            }

            info!(
                pair = pair.index,
                source = %pair.source.display(),
                "Found {} file(s) to encode",
                candidates.len()
            );
            for (position, candidate) in candidates.iter().enumerate() {
                info!(
                    pair = pair.index,
                    position = position + 1,
                    size_bytes = candidate.size_bytes,
                    "  {}",
                    candidate.base_name
                );
            }
            tracker.pair_has_candidates();
            summary.candidates += candidates.len();

            for candidate in &candidates {
                let readiness = tokio::select! {
                    readiness = self.readiness.check(&candidate.path) => readiness,
                    _ = shutdown.wait() => return Err(DaemonError::Terminated),
                };

                match readiness {
                    Readiness::NotReady { reason } => {
                        info!(
                            source = %candidate.path.display(),
                            "Not ready yet: {}",
                            reason
                        );
                        tracker.candidate_not_ready();
                        summary.not_ready += 1;
                        continue;
                    }
                    Readiness::Ready => tracker.candidate_ready(),
                }

                match self.controller.run(candidate, pair).await {
                    JobOutcome::Succeeded { output, .. } => {
                        summary.encoded += 1;
                        post_process(&output, pair, &self.notifier).await;
                    }
                    JobOutcome::Failed { .. } => summary.failed += 1,
                    JobOutcome::Interrupted { .. } => return Err(DaemonError::Terminated),
                }
            }
        }

        summary.found_work = tracker.found_work();
        Ok(summary)
    }
}
