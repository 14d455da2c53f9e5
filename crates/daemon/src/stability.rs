//! Readiness checking module for verifying files are no longer being written.
//!
//! Before a candidate is probed we verify it's stable: its size and modification
//! time must not move over a settle window, and it must not have been touched
//! more recently than a minimum age. One check is made per candidate per pass;
//! a file that is not ready is simply looked at again on the next pass.

use auto_encode_config::ReadinessConfig;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::time::sleep;

/// Result of comparing two size observations of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StabilityResult {
    /// File size remained unchanged during the stability window.
    Stable,
    /// File size changed during the stability window.
    Unstable {
        /// Size when first checked.
        initial_size: u64,
        /// Size after waiting.
        current_size: u64,
    },
}

/// Compare two file sizes and return the appropriate StabilityResult.
#[inline]
pub fn compare_sizes(initial_size: u64, current_size: u64) -> StabilityResult {
    if initial_size == current_size {
        StabilityResult::Stable
    } else {
        StabilityResult::Unstable {
            initial_size,
            current_size,
        }
    }
}

/// Whether a candidate may be read, with the reason when it may not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady { reason: String },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// One stat of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub size: u64,
    pub modified: SystemTime,
}

async fn observe(path: &Path) -> std::io::Result<Observation> {
    let metadata = tokio::fs::metadata(path).await?;
    Ok(Observation {
        size: metadata.len(),
        modified: metadata.modified()?,
    })
}

/// Decide readiness from two observations taken a settle window apart.
pub fn evaluate(
    first: Observation,
    second: Observation,
    now: SystemTime,
    min_age: Duration,
) -> Readiness {
    if let StabilityResult::Unstable {
        initial_size,
        current_size,
    } = compare_sizes(first.size, second.size)
    {
        return Readiness::NotReady {
            reason: format!(
                "still being written: size changed from {} to {} bytes",
                initial_size, current_size
            ),
        };
    }

    if first.modified != second.modified {
        return Readiness::NotReady {
            reason: "still being written: modification time changed".to_string(),
        };
    }

    // A modification time in the future counts as brand new.
    let age = now.duration_since(second.modified).unwrap_or(Duration::ZERO);
    if age < min_age {
        return Readiness::NotReady {
            reason: format!(
                "modified {} ago, waiting until it is {} old",
                humantime::format_duration(Duration::from_secs(age.as_secs())),
                humantime::format_duration(min_age)
            ),
        };
    }

    Readiness::Ready
}

/// Decides whether a discovered file has finished arriving.
#[derive(Debug, Clone)]
pub struct ReadinessDetector {
    settle: Duration,
    min_age: Duration,
}

impl ReadinessDetector {
    pub fn new(settle: Duration, min_age: Duration) -> Self {
        Self { settle, min_age }
    }

    pub fn from_config(cfg: &ReadinessConfig) -> Self {
        Self::new(
            Duration::from_secs(cfg.settle_secs),
            Duration::from_secs(cfg.min_age_secs),
        )
    }

    /// Stat the file, wait out the settle window, stat again and compare.
    pub async fn check(&self, path: &Path) -> Readiness {
        let first = match observe(path).await {
            Ok(o) => o,
            Err(e) => {
                return Readiness::NotReady {
                    reason: format!("cannot stat {}: {}", path.display(), e),
                }
            }
        };

        sleep(self.settle).await;

        let second = match observe(path).await {
            Ok(o) => o,
            Err(e) => {
                return Readiness::NotReady {
                    reason: format!("cannot stat {}: {}", path.display(), e),
                }
            }
        };

        evaluate(first, second, SystemTime::now(), self.min_age)
    }
}
