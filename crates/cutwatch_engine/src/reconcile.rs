//! Polling backstop for one task.
//!
//! Fetches a snapshot immediately and then on a fixed interval until the
//! shared ledger reports a terminal state or the handle is stopped. Failed
//! ticks are logged at debug level and retried; they never reach observers.

use std::sync::Arc;
use std::time::Duration;

use cutwatch_core::TaskKey;
use cutwatch_logging::{watch_debug, watch_info};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::SnapshotSource;
use crate::router::{SharedLedger, TaskObserver};

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub interval: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileExit {
    /// The ledger reached a terminal state (from either path).
    Terminal,
    Stopped,
}

pub struct Reconciler;

impl Reconciler {
    pub fn spawn(
        source: Arc<dyn SnapshotSource>,
        key: TaskKey,
        ledger: SharedLedger,
        observer: Arc<dyn TaskObserver>,
        settings: ReconcileSettings,
    ) -> ReconcilerHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(source, key, ledger, observer, settings, cancel.clone()));
        ReconcilerHandle {
            cancel,
            task: Some(task),
        }
    }
}

/// Stops the loop when dropped.
pub struct ReconcilerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<ReconcileExit>>,
}

impl ReconcilerHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    pub async fn join(mut self) -> ReconcileExit {
        match self.task.take() {
            Some(task) => task.await.unwrap_or(ReconcileExit::Stopped),
            None => ReconcileExit::Stopped,
        }
    }
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    source: Arc<dyn SnapshotSource>,
    key: TaskKey,
    ledger: SharedLedger,
    observer: Arc<dyn TaskObserver>,
    settings: ReconcileSettings,
    cancel: CancellationToken,
) -> ReconcileExit {
    let slot = key.slot().to_string();
    loop {
        if ledger.read(|ledger| ledger.is_terminal(&slot)) {
            return ReconcileExit::Terminal;
        }

        let fetched = tokio::select! {
            _ = cancel.cancelled() => return ReconcileExit::Stopped,
            fetched = source.fetch_snapshot(&key) => fetched,
        };
        match fetched {
            Ok(snapshot) => {
                let (delivered, terminal) = ledger.apply(observer.as_ref(), &key, |ledger| {
                    let notices = ledger.apply_snapshot(&slot, &snapshot);
                    (notices, ledger.is_terminal(&slot))
                });
                if terminal && delivered {
                    watch_info!(
                        "poll observed terminal {} for {}/{}",
                        snapshot.status.as_token(),
                        key.scope,
                        slot
                    );
                }
                if terminal {
                    return ReconcileExit::Terminal;
                }
            }
            Err(err) => watch_debug!("poll tick for {}/{} failed: {}", key.scope, slot, err),
        }

        tokio::select! {
            _ = cancel.cancelled() => return ReconcileExit::Stopped,
            _ = tokio::time::sleep(settings.interval) => {}
        }
    }
}
