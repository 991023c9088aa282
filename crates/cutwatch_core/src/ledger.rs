//! Locally visible task state shared by the push and poll paths.
//!
//! The ledger is the single place where terminal idempotence is enforced:
//! once a slot records an outcome, every later message or snapshot for that
//! slot is discarded without producing a notice.

use std::collections::BTreeMap;

use crate::task::{clamp_progress, TaskKind, TaskProgressMessage, TaskSnapshot, TaskStatus};

/// Terminal result of a task as first observed locally.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed {
        result_ref: Option<String>,
        text: Option<String>,
    },
    Failed {
        text: String,
    },
    Cancelled {
        text: Option<String>,
    },
}

/// A visible change that observers must be told about.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskNotice {
    Progress { progress: f64, text: Option<String> },
    Log { text: String },
    Terminal(TaskOutcome),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskView {
    pub progress: f64,
    pub text: Option<String>,
    pub phase: Option<String>,
    pub outcome: Option<TaskOutcome>,
}

impl TaskView {
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskLedger {
    slots: BTreeMap<String, TaskView>,
}

impl TaskLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self, slot: &str) -> Option<&TaskView> {
        self.slots.get(slot)
    }

    pub fn is_terminal(&self, slot: &str) -> bool {
        self.slots.get(slot).is_some_and(TaskView::is_terminal)
    }

    pub fn outcome(&self, slot: &str) -> Option<&TaskOutcome> {
        self.slots.get(slot).and_then(|view| view.outcome.as_ref())
    }

    /// Applies a push message to `slot`. Push messages always notify unless
    /// the slot is already terminal.
    pub fn apply_message(&mut self, slot: &str, message: &TaskProgressMessage) -> Vec<TaskNotice> {
        let view = self.slots.entry(slot.to_string()).or_default();
        if view.is_terminal() {
            return Vec::new();
        }
        if message.phase.is_some() {
            view.phase = message.phase.clone();
        }

        match message.kind {
            TaskKind::Progress => {
                if let Some(progress) = message.progress {
                    view.progress = clamp_progress(progress);
                }
                if message.text.is_some() {
                    view.text = message.text.clone();
                }
                vec![TaskNotice::Progress {
                    progress: view.progress,
                    text: message.text.clone(),
                }]
            }
            TaskKind::Log => match &message.text {
                Some(text) => vec![TaskNotice::Log { text: text.clone() }],
                None => Vec::new(),
            },
            TaskKind::Completed => finish(
                view,
                TaskOutcome::Completed {
                    result_ref: None,
                    text: message.text.clone(),
                },
            ),
            TaskKind::Error => finish(
                view,
                TaskOutcome::Failed {
                    text: message.text.clone().unwrap_or_default(),
                },
            ),
            TaskKind::Cancelled => finish(
                view,
                TaskOutcome::Cancelled {
                    text: message.text.clone(),
                },
            ),
        }
    }

    /// Applies a polled snapshot to `slot`. Non-terminal snapshots only notify
    /// when they change the visible progress or text.
    pub fn apply_snapshot(&mut self, slot: &str, snapshot: &TaskSnapshot) -> Vec<TaskNotice> {
        let view = self.slots.entry(slot.to_string()).or_default();
        if view.is_terminal() {
            return Vec::new();
        }

        match snapshot.status {
            TaskStatus::Pending | TaskStatus::Running => {
                let progress = snapshot.progress.map(clamp_progress).unwrap_or(view.progress);
                let text_changed = snapshot.text.is_some() && snapshot.text != view.text;
                if progress == view.progress && !text_changed {
                    return Vec::new();
                }
                view.progress = progress;
                if text_changed {
                    view.text = snapshot.text.clone();
                }
                vec![TaskNotice::Progress {
                    progress,
                    text: snapshot.text.clone(),
                }]
            }
            TaskStatus::Completed => finish(
                view,
                TaskOutcome::Completed {
                    result_ref: snapshot.result_ref.clone(),
                    text: snapshot.text.clone(),
                },
            ),
            TaskStatus::Failed => finish(
                view,
                TaskOutcome::Failed {
                    text: snapshot.text.clone().unwrap_or_default(),
                },
            ),
            TaskStatus::Cancelled => finish(
                view,
                TaskOutcome::Cancelled {
                    text: snapshot.text.clone(),
                },
            ),
        }
    }

    /// Drops a slot, e.g. when the owning caller tears down its interest.
    pub fn forget(&mut self, slot: &str) {
        self.slots.remove(slot);
    }
}

fn finish(view: &mut TaskView, outcome: TaskOutcome) -> Vec<TaskNotice> {
    match &outcome {
        TaskOutcome::Completed { text, .. } => {
            view.progress = 100.0;
            if text.is_some() {
                view.text = text.clone();
            }
        }
        TaskOutcome::Failed { text } => view.text = Some(text.clone()),
        TaskOutcome::Cancelled { text } => {
            if text.is_some() {
                view.text = text.clone();
            }
        }
    }
    view.outcome = Some(outcome.clone());
    vec![TaskNotice::Terminal(outcome)]
}
