//! Client configuration loaded from a RON file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cutwatch_engine::{ApiSettings, ReconcileSettings, TaskEndpoint, TransportSettings};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LogDestination;

pub const DEFAULT_CONFIG_FILE: &str = "./cutwatch.ron";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("no operation configured for scope '{0}'")]
    UnknownScope(String),
    #[error("operation '{scope}' has no {what} path configured")]
    MissingPath { scope: String, what: &'static str },
}

/// One remote task family. Paths are relative to `api_base_url` and may
/// contain `{project_id}` and `{task_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationConfig {
    pub scope: String,
    #[serde(default)]
    pub start_path: Option<String>,
    /// Without a status path the task is tracked through push only.
    #[serde(default)]
    pub status_path: Option<String>,
    pub ceiling_secs: u64,
}

impl OperationConfig {
    fn new(scope: &str, start_path: Option<&str>, status_path: Option<&str>, ceiling_secs: u64) -> Self {
        Self {
            scope: scope.to_string(),
            start_path: start_path.map(str::to_string),
            status_path: status_path.map(str::to_string),
            ceiling_secs,
        }
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.ceiling_secs)
    }

    pub fn endpoint(&self) -> TaskEndpoint {
        TaskEndpoint {
            scope: self.scope.clone(),
            start_path: self.start_path.clone().unwrap_or_default(),
            status_path: self.status_path.clone().unwrap_or_default(),
        }
    }

    pub fn require_start(&self) -> Result<(), ConfigError> {
        match self.start_path {
            Some(_) => Ok(()),
            None => Err(ConfigError::MissingPath {
                scope: self.scope.clone(),
                what: "start",
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_ws_url: String,
    pub api_base_url: String,
    pub reconnect_base_ms: u64,
    pub max_reconnect_attempts: u32,
    pub heartbeat_secs: u64,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub log_level: String,
    pub log_destination: LogDestination,
    pub operations: Vec<OperationConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_ws_url: "ws://127.0.0.1:8000/ws".to_string(),
            api_base_url: "http://127.0.0.1:8000/".to_string(),
            reconnect_base_ms: 1000,
            max_reconnect_attempts: 5,
            heartbeat_secs: 20,
            poll_interval_ms: 1500,
            request_timeout_ms: 10_000,
            log_level: "info".to_string(),
            log_destination: LogDestination::Terminal,
            operations: default_operations(),
        }
    }
}

/// Rendering and script generation answer their start call only once the
/// work is done and return no task id, so they are watch-only here.
fn default_operations() -> Vec<OperationConfig> {
    vec![
        OperationConfig::new("generate_video", None, None, 3600),
        OperationConfig::new("video_trim", None, None, 600),
        OperationConfig::new(
            "jianying_draft",
            Some("api/projects/{project_id}/generate-jianying-draft"),
            Some("api/projects/{project_id}/jianying-draft/status/{task_id}"),
            600,
        ),
        OperationConfig::new(
            "merge_videos",
            Some("api/projects/{project_id}/merge/videos"),
            Some("api/projects/{project_id}/merge/videos/status/{task_id}"),
            1800,
        ),
        OperationConfig::new("generate_script", None, None, 600),
    ]
}

impl ClientConfig {
    /// Reads `path`. `Ok(None)` means there is no file; callers fall back
    /// to the defaults and report that once logging is up.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        ron::from_str(&content)
            .map(Some)
            .map_err(|err| ConfigError::Parse {
                path: path.to_path_buf(),
                message: err.to_string(),
            })
    }

    pub fn operation(&self, scope: &str) -> Result<&OperationConfig, ConfigError> {
        self.operations
            .iter()
            .find(|operation| operation.scope == scope)
            .ok_or_else(|| ConfigError::UnknownScope(scope.to_string()))
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            url: self.server_ws_url.clone(),
            reconnect_base: Duration::from_millis(self.reconnect_base_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
        }
    }

    pub fn api_settings(&self) -> ApiSettings {
        ApiSettings {
            base_url: self.api_base_url.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            ..ApiSettings::default()
        }
    }

    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_reported_as_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded = ClientConfig::load(&dir.path().join("absent.ron")).expect("no error");
        assert_eq!(loaded, None);
        let config = ClientConfig::default();
        assert_eq!(config.transport_settings().max_reconnect_attempts, 5);
        assert_eq!(config.reconcile_settings().interval, Duration::from_millis(1500));
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cutwatch.ron");
        fs::write(
            &path,
            r#"(
                api_base_url: "http://studio.local:9000/",
                poll_interval_ms: 500,
                log_destination: Both,
                operations: [
                    (scope: "video_trim", start_path: Some("api/trim/{project_id}"), ceiling_secs: 120),
                ],
            )"#,
        )
        .expect("write");

        let config = ClientConfig::load(&path).expect("parse").expect("present");
        assert_eq!(config.api_settings().base_url, "http://studio.local:9000/");
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.heartbeat_secs, 20);
        assert_eq!(config.log_destination, LogDestination::Both);

        let trim = config.operation("video_trim").expect("trim");
        assert_eq!(trim.ceiling(), Duration::from_secs(120));
        assert_eq!(trim.status_path, None);
        assert!(trim.require_start().is_ok());
        assert!(matches!(
            config.operation("merge_videos"),
            Err(ConfigError::UnknownScope(_))
        ));
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cutwatch.ron");
        fs::write(&path, "(poll_interval_ms: \"soon\")").expect("write");
        assert!(matches!(
            ClientConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn default_operations_without_start_path_cannot_run() {
        let config = ClientConfig::default();
        for scope in ["video_trim", "generate_video", "generate_script"] {
            let operation = config.operation(scope).expect("operation");
            assert!(
                matches!(
                    operation.require_start(),
                    Err(ConfigError::MissingPath { what: "start", .. })
                ),
                "{scope} should be watch-only"
            );
            assert_eq!(operation.status_path, None);
        }
        assert_eq!(
            config.operation("generate_video").expect("video").ceiling(),
            Duration::from_secs(3600)
        );
        for scope in ["jianying_draft", "merge_videos"] {
            assert!(config.operation(scope).expect("operation").require_start().is_ok());
        }
        let merge = config.operation("merge_videos").expect("merge");
        assert_eq!(
            merge.endpoint().status_path,
            "api/projects/{project_id}/merge/videos/status/{task_id}"
        );
    }
}
