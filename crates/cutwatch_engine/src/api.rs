use std::time::Duration;

use cutwatch_core::{TaskKey, TaskSnapshot};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use url::Url;

use crate::types::ApiError;

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Request/response routes of one task family. Paths may contain
/// `{project_id}` and `{task_id}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEndpoint {
    pub scope: String,
    pub start_path: String,
    pub status_path: String,
}

/// Fetches the current snapshot of a task. One call per tick, no batching.
#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, key: &TaskKey) -> Result<TaskSnapshot, ApiError>;
}

/// Starts a remote task and returns its identifier.
#[async_trait::async_trait]
pub trait TaskStarter: Send + Sync {
    async fn start_task(&self, project_id: Option<&str>, params: &Value) -> Result<String, ApiError>;
}

#[derive(Debug, Clone)]
pub struct HttpTaskApi {
    client: reqwest::Client,
    base: Url,
    endpoint: TaskEndpoint,
}

impl HttpTaskApi {
    pub fn new(settings: &ApiSettings, endpoint: TaskEndpoint) -> Result<Self, ApiError> {
        let base = Url::parse(&settings.base_url)
            .map_err(|err| ApiError::InvalidUrl(format!("{}: {err}", settings.base_url)))?;
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| ApiError::Network(err.to_string()))?;
        Ok(Self {
            client,
            base,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &TaskEndpoint {
        &self.endpoint
    }

    fn resolve(&self, template: &str, project_id: Option<&str>, task_id: Option<&str>) -> Result<Url, ApiError> {
        let path = template
            .replace("{project_id}", project_id.unwrap_or_default())
            .replace("{task_id}", task_id.unwrap_or_default());
        self.base
            .join(&path)
            .map_err(|err| ApiError::InvalidUrl(format!("{path}: {err}")))
    }
}

#[async_trait::async_trait]
impl SnapshotSource for HttpTaskApi {
    async fn fetch_snapshot(&self, key: &TaskKey) -> Result<TaskSnapshot, ApiError> {
        let url = self.resolve(
            &self.endpoint.status_path,
            key.project_id.as_deref(),
            key.task_id.as_deref(),
        )?;
        let response = self.client.get(url).send().await.map_err(map_reqwest_error)?;
        let mut payload = unwrap_envelope(read_json(response).await?);
        if let (Value::Object(map), Some(task_id)) = (&mut payload, key.task_id.as_deref()) {
            map.entry("task_id")
                .or_insert_with(|| Value::String(task_id.to_string()));
        }
        serde_json::from_value(payload).map_err(|err| ApiError::Decode(err.to_string()))
    }
}

#[async_trait::async_trait]
impl TaskStarter for HttpTaskApi {
    async fn start_task(&self, project_id: Option<&str>, params: &Value) -> Result<String, ApiError> {
        let url = self.resolve(&self.endpoint.start_path, project_id, None)?;
        let body = serde_json::to_vec(params).map_err(|err| ApiError::Decode(err.to_string()))?;
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let payload = unwrap_envelope(read_json(response).await?);
        match payload.get("task_id") {
            Some(Value::String(task_id)) if !task_id.is_empty() => Ok(task_id.clone()),
            Some(Value::Number(task_id)) => Ok(task_id.to_string()),
            _ => Err(ApiError::MissingTaskId),
        }
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, ApiError> {
    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::HttpStatus(status.as_u16()));
    }
    let bytes = response.bytes().await.map_err(map_reqwest_error)?;
    serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode(err.to_string()))
}

/// Accepts both a bare body and the backend's `{ message, data, timestamp }` envelope.
fn unwrap_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut map) => match map.remove("data") {
            Some(data @ Value::Object(_)) => data,
            Some(other) => {
                map.insert("data".to_string(), other);
                Value::Object(map)
            }
            None => Value::Object(map),
        },
        other => other,
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        return ApiError::Timeout;
    }
    ApiError::Network(err.to_string())
}
