use crate::task::{TaskKey, TaskProgressMessage};

/// Exact-match rule for routing push messages to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFilter {
    pub scope: String,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
}

impl ScopeFilter {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            project_id: None,
            task_id: None,
        }
    }

    pub fn project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Scope must always match. A requested project must be present and equal.
    /// A requested task only rejects messages that name a different task.
    pub fn matches(&self, message: &TaskProgressMessage) -> bool {
        if message.scope != self.scope {
            return false;
        }
        if let Some(project_id) = self.project_id.as_deref() {
            if message.project_id.as_deref() != Some(project_id) {
                return false;
            }
        }
        match (self.task_id.as_deref(), message.task_id.as_deref()) {
            (Some(wanted), Some(actual)) => wanted == actual,
            _ => true,
        }
    }
}

impl From<&TaskKey> for ScopeFilter {
    fn from(key: &TaskKey) -> Self {
        Self {
            scope: key.scope.clone(),
            project_id: key.project_id.clone(),
            task_id: key.task_id.clone(),
        }
    }
}
