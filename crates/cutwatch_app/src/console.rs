use chrono::Local;
use cutwatch_core::TaskKey;
use cutwatch_engine::{ConnectionState, TaskObserver};
use cutwatch_logging::watch_info;

/// Prints task notices to stdout with a local timestamp.
pub struct ConsoleObserver;

fn stamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn label(key: &TaskKey) -> String {
    match (&key.project_id, &key.task_id) {
        (Some(project), Some(task)) => format!("{}/{}/{}", key.scope, project, task),
        (Some(project), None) => format!("{}/{}", key.scope, project),
        (None, Some(task)) => format!("{}/-/{}", key.scope, task),
        (None, None) => key.scope.clone(),
    }
}

impl TaskObserver for ConsoleObserver {
    fn on_progress(&self, key: &TaskKey, progress: f64, text: Option<&str>) {
        println!(
            "[{}] {} {:>5.1}% {}",
            stamp(),
            label(key),
            progress,
            text.unwrap_or_default()
        );
    }

    fn on_log(&self, key: &TaskKey, text: &str) {
        println!("[{}] {} | {}", stamp(), label(key), text);
    }

    fn on_completed(&self, key: &TaskKey, result_ref: Option<&str>, text: Option<&str>) {
        watch_info!("{} completed", label(key));
        println!(
            "[{}] {} completed {} {}",
            stamp(),
            label(key),
            result_ref.unwrap_or("-"),
            text.unwrap_or_default()
        );
    }

    fn on_cancelled(&self, key: &TaskKey, text: Option<&str>) {
        watch_info!("{} cancelled", label(key));
        println!("[{}] {} cancelled {}", stamp(), label(key), text.unwrap_or_default());
    }

    fn on_error(&self, key: &TaskKey, text: &str) {
        watch_info!("{} failed: {}", label(key), text);
        println!("[{}] {} failed: {}", stamp(), label(key), text);
    }
}

pub fn describe(state: ConnectionState) -> String {
    match state {
        ConnectionState::Disconnected => "push channel disconnected".to_string(),
        ConnectionState::Connecting => "push channel connecting".to_string(),
        ConnectionState::Open => "push channel open".to_string(),
        ConnectionState::Reconnecting { attempt } => {
            format!("push channel reconnecting (attempt {attempt})")
        }
    }
}
