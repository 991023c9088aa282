use serde::{Deserialize, Serialize};

/// Message class carried in the `type` field of a push frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Progress,
    Log,
    Completed,
    #[serde(alias = "failed")]
    Error,
    #[serde(alias = "canceled")]
    Cancelled,
}

impl TaskKind {
    /// Maps a wire token to a routable kind.
    ///
    /// Transport-level tokens (`heartbeat`, `pong`, `ping`) and anything
    /// unknown return `None` and are never routed to scopes.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "progress" => Some(Self::Progress),
            "log" => Some(Self::Log),
            "completed" => Some(Self::Completed),
            "error" | "failed" => Some(Self::Error),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

/// One push frame describing a remote task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgressMessage {
    pub scope: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default, rename = "message", alias = "text")]
    pub text: Option<String>,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub timestamp: String,
}

/// Status reported by a poll endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_token(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<String> for TaskStatus {
    fn from(token: String) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => Self::Pending,
            "completed" | "success" | "done" => Self::Completed,
            "failed" | "error" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            // Unknown states keep the task alive; only explicit tokens terminate it.
            _ => Self::Running,
        }
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        status.as_token().to_string()
    }
}

/// Snapshot returned by a status endpoint. Ephemeral: re-fetched every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default, rename = "message", alias = "text")]
    pub text: Option<String>,
    #[serde(default, alias = "file_path", alias = "output_path")]
    pub result_ref: Option<String>,
}

/// Identifies one remote task invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TaskKey {
    pub scope: String,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
}

impl TaskKey {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ..Self::default()
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Ledger slot for this key; untargeted keys share the empty slot.
    pub fn slot(&self) -> &str {
        self.task_id.as_deref().unwrap_or("")
    }
}

/// Clamps a reported progress value into `[0, 100]`. NaN becomes 0.
///
/// No monotonicity is enforced: a lower value than the previous one is
/// passed through as reported.
pub fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        return 0.0;
    }
    progress.clamp(0.0, 100.0)
}
