//! Push + poll composition for a single remote task.

use std::sync::Arc;
use std::time::Duration;

use cutwatch_core::{ScopeFilter, TaskKey, TaskOutcome, TaskView};
use cutwatch_logging::{watch_info, watch_warn};
use serde_json::Value;
use tokio::sync::watch;

use crate::api::{SnapshotSource, TaskStarter};
use crate::reconcile::{ReconcileSettings, Reconciler, ReconcilerHandle};
use crate::router::{new_ledger, Matcher, ScopeRouter, Subscription, TaskObserver};
use crate::types::WatchError;

/// Forwards to the caller's observer and publishes the terminal outcome.
struct OutcomeRelay {
    observer: Arc<dyn TaskObserver>,
    outcome: watch::Sender<Option<TaskOutcome>>,
}

impl TaskObserver for OutcomeRelay {
    fn on_progress(&self, key: &TaskKey, progress: f64, text: Option<&str>) {
        self.observer.on_progress(key, progress, text);
    }

    fn on_log(&self, key: &TaskKey, text: &str) {
        self.observer.on_log(key, text);
    }

    fn on_completed(&self, key: &TaskKey, result_ref: Option<&str>, text: Option<&str>) {
        self.observer.on_completed(key, result_ref, text);
        self.outcome.send_replace(Some(TaskOutcome::Completed {
            result_ref: result_ref.map(str::to_string),
            text: text.map(str::to_string),
        }));
    }

    fn on_cancelled(&self, key: &TaskKey, text: Option<&str>) {
        self.observer.on_cancelled(key, text);
        self.outcome.send_replace(Some(TaskOutcome::Cancelled {
            text: text.map(str::to_string),
        }));
    }

    fn on_error(&self, key: &TaskKey, text: &str) {
        self.observer.on_error(key, text);
        self.outcome.send_replace(Some(TaskOutcome::Failed {
            text: text.to_string(),
        }));
    }
}

pub struct TaskWatcher {
    router: ScopeRouter,
    source: Arc<dyn SnapshotSource>,
    settings: ReconcileSettings,
}

impl TaskWatcher {
    pub fn new(router: ScopeRouter, source: Arc<dyn SnapshotSource>, settings: ReconcileSettings) -> Self {
        Self {
            router,
            source,
            settings,
        }
    }

    pub fn router(&self) -> &ScopeRouter {
        &self.router
    }

    /// Registers interest in `key`. With `reconcile`, a poller shares the
    /// subscription's ledger so whichever path sees the terminal state first
    /// wins and the other is silenced.
    pub fn watch(&self, key: TaskKey, observer: Arc<dyn TaskObserver>, reconcile: bool) -> TaskWatch {
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let relay: Arc<dyn TaskObserver> = Arc::new(OutcomeRelay {
            observer,
            outcome: outcome_tx,
        });
        let ledger = new_ledger();
        let subscription = self.router.subscribe_with(
            Matcher::Exact(ScopeFilter::from(&key)),
            ledger.clone(),
            relay.clone(),
        );
        let reconciler = reconcile.then(|| {
            Reconciler::spawn(
                self.source.clone(),
                key.clone(),
                ledger,
                relay,
                self.settings.clone(),
            )
        });
        TaskWatch {
            key,
            subscription,
            reconciler,
            outcome: outcome_rx,
        }
    }

    /// Starts a task, registers for it before any push message can be
    /// correlated, and waits for its terminal state up to `ceiling`.
    pub async fn start_and_wait(
        &self,
        starter: &dyn TaskStarter,
        key: TaskKey,
        params: &Value,
        observer: Arc<dyn TaskObserver>,
        ceiling: Duration,
    ) -> Result<TaskOutcome, WatchError> {
        let task_id = starter.start_task(key.project_id.as_deref(), params).await?;
        watch_info!("started {} task {}", key.scope, task_id);
        let mut watch = self.watch(key.with_task(task_id), observer, true);
        let result = watch.wait(ceiling).await;
        if let Err(err) = &result {
            watch_warn!("{} task {:?} ended without success: {}", watch.key().scope, watch.key().task_id, err);
        }
        result
    }
}

/// Live interest in one task. Dropping it releases the subscription and
/// stops the reconciler.
pub struct TaskWatch {
    key: TaskKey,
    subscription: Subscription,
    reconciler: Option<ReconcilerHandle>,
    outcome: watch::Receiver<Option<TaskOutcome>>,
}

impl TaskWatch {
    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn view(&self) -> TaskView {
        self.subscription
            .ledger()
            .read(|ledger| ledger.view(self.key.slot()).cloned())
            .unwrap_or_default()
    }

    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.outcome.borrow().clone()
    }

    pub fn is_reconciling(&self) -> bool {
        self.reconciler
            .as_ref()
            .is_some_and(|reconciler| !reconciler.is_finished())
    }

    /// Waits for the first terminal state. Elapsing `ceiling` counts as a
    /// failure of the operation.
    pub async fn wait(&mut self, ceiling: Duration) -> Result<TaskOutcome, WatchError> {
        let outcome = match tokio::time::timeout(ceiling, self.outcome.wait_for(Option::is_some)).await {
            Err(_) => return Err(WatchError::TimedOut(ceiling)),
            Ok(Err(_)) => return Err(WatchError::Detached),
            Ok(Ok(outcome)) => outcome.clone(),
        };
        match outcome {
            Some(TaskOutcome::Failed { text }) => Err(WatchError::Failed(text)),
            Some(TaskOutcome::Cancelled { text }) => Err(WatchError::Cancelled(text)),
            Some(completed) => Ok(completed),
            None => Err(WatchError::Detached),
        }
    }

    pub fn release(self) {}
}
