//! Process-wide termination handling.
//!
//! A listener task waits for SIGINT, SIGTERM, SIGHUP, SIGQUIT or SIGALRM,
//! logs which job was interrupted, and flips the shutdown channel. The job
//! controller and the idle sleep both watch that channel.

use crate::job::CurrentJob;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Sending half of the shutdown channel.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // send_replace never fails, even with no receivers left.
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving half of the shutdown channel.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been triggered. Never resolves if the
    /// trigger was dropped without firing.
    pub async fn wait(&mut self) {
        let closed = self.rx.wait_for(|triggered| *triggered).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Installs the signal handlers and spawns the listener task.
///
/// The listener keeps running after the first signal so repeated signals
/// are logged rather than lost.
pub fn spawn_signal_listener(
    trigger: ShutdownTrigger,
    current_job: CurrentJob,
) -> std::io::Result<JoinHandle<()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut alarm = signal(SignalKind::alarm())?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                Some(()) = interrupt.recv() => "SIGINT",
                Some(()) = terminate.recv() => "SIGTERM",
                Some(()) = hangup.recv() => "SIGHUP",
                Some(()) = quit.recv() => "SIGQUIT",
                Some(()) = alarm.recv() => "SIGALRM",
                else => break,
            };

            if trigger.is_triggered() {
                warn!(signal = name, "Shutdown already in progress");
            } else {
                info!(signal = name, "Program exited/terminated. Cleaning up.");
                match current_job.get() {
                    Some(source) => {
                        info!(source = %source.display(), "Interrupting in-flight encode")
                    }
                    None => info!("No encode in progress"),
                }
            }
            trigger.trigger();
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_after_trigger() {
        let (trigger, mut shutdown) = channel();
        assert!(!shutdown.is_triggered());

        let waiter = tokio::spawn(async move {
            shutdown.wait().await;
            shutdown.is_triggered()
        });
        trigger.trigger();

        let triggered = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(triggered);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_trigger() {
        let (trigger, _shutdown) = channel();
        trigger.trigger();
        let mut late = trigger.subscribe();
        assert!(late.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), late.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_trigger_never_resolves() {
        let (trigger, mut shutdown) = channel();
        drop(trigger);
        let result = tokio::time::timeout(Duration::from_millis(50), shutdown.wait()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_listener_survives_repeated_signals() {
        let (trigger, mut shutdown) = channel();
        let listener = spawn_signal_listener(trigger, CurrentJob::default()).unwrap();
        let send_hangup = || {
            std::process::Command::new("kill")
                .args(["-HUP", &std::process::id().to_string()])
                .status()
                .unwrap()
        };

        assert!(send_hangup().success());
        tokio::time::timeout(Duration::from_secs(5), shutdown.wait())
            .await
            .unwrap();

        assert!(send_hangup().success());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!listener.is_finished());
        assert!(shutdown.is_triggered());
        listener.abort();
    }
}
