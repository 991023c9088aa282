use std::sync::Arc;
use std::time::Duration;

use cutwatch_core::{TaskKey, TaskOutcome};
use cutwatch_engine::{
    ApiError, ApiSettings, HttpTaskApi, ReconcileSettings, ScopeRouter, TaskEndpoint, TaskObserver,
    TaskStarter, TaskWatcher, WatchError,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Quiet;

impl TaskObserver for Quiet {}

fn trim_endpoint() -> TaskEndpoint {
    TaskEndpoint {
        scope: "video_trim".to_string(),
        start_path: "api/video/trim/{project_id}".to_string(),
        status_path: "api/video/trim/status/{task_id}".to_string(),
    }
}

fn setup(server: &MockServer) -> (Arc<HttpTaskApi>, TaskWatcher) {
    let settings = ApiSettings {
        base_url: format!("{}/", server.uri()),
        ..ApiSettings::default()
    };
    let api = Arc::new(HttpTaskApi::new(&settings, trim_endpoint()).expect("api"));
    let watcher = TaskWatcher::new(
        ScopeRouter::new(),
        api.clone(),
        ReconcileSettings {
            interval: Duration::from_millis(20),
        },
    );
    (api, watcher)
}

#[tokio::test]
async fn start_posts_params_and_returns_task_id_from_envelope() {
    let server = MockServer::start().await;
    let params = json!({"mode": "keep", "duration_ms": 60000, "ranges": []});
    Mock::given(method("POST"))
        .and(path("/api/video/trim/p1"))
        .and(body_json(params.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": "started",
            "data": {"task_id": "trim-7"},
            "timestamp": "2024-05-01T10:00:00"
        })))
        .mount(&server)
        .await;

    let (api, _) = setup(&server);
    let task_id = api.start_task(Some("p1"), &params).await.expect("start");
    assert_eq!(task_id, "trim-7");
}

#[tokio::test]
async fn start_without_task_id_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/video/trim/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "queued"})))
        .mount(&server)
        .await;

    let (api, _) = setup(&server);
    let err = api.start_task(Some("p1"), &json!({})).await.unwrap_err();
    assert_eq!(err, ApiError::MissingTaskId);
}

#[tokio::test]
async fn start_and_wait_resolves_with_polled_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/video/trim/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "trim-1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/video/trim/status/trim-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "progress": 100,
            "output_path": "/output/trimmed.mp4"
        })))
        .mount(&server)
        .await;

    let (api, watcher) = setup(&server);
    let outcome = watcher
        .start_and_wait(
            api.as_ref(),
            TaskKey::new("video_trim").with_project("p1"),
            &json!({}),
            Arc::new(Quiet),
            Duration::from_secs(5),
        )
        .await
        .expect("outcome");

    assert_eq!(
        outcome,
        TaskOutcome::Completed {
            result_ref: Some("/output/trimmed.mp4".to_string()),
            text: None
        }
    );
}

#[tokio::test]
async fn failed_status_surfaces_as_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/video/trim/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "trim-2"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/video/trim/status/trim-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "failed",
            "message": "ffmpeg exited with 1"
        })))
        .mount(&server)
        .await;

    let (api, watcher) = setup(&server);
    let err = watcher
        .start_and_wait(
            api.as_ref(),
            TaskKey::new("video_trim").with_project("p1"),
            &json!({}),
            Arc::new(Quiet),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

    assert_eq!(err, WatchError::Failed("ffmpeg exited with 1".to_string()));
}

#[tokio::test]
async fn wait_times_out_when_task_never_finishes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/video/trim/status/trim-3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running", "progress": 5})))
        .mount(&server)
        .await;

    let (_, watcher) = setup(&server);
    let mut watch = watcher.watch(
        TaskKey::new("video_trim").with_project("p1").with_task("trim-3"),
        Arc::new(Quiet),
        true,
    );

    let err = watch.wait(Duration::from_millis(150)).await.unwrap_err();
    assert_eq!(err, WatchError::TimedOut(Duration::from_millis(150)));
    assert_eq!(watch.view().progress, 5.0);
    assert!(watch.is_reconciling());
}

#[tokio::test]
async fn start_failure_is_reported_before_any_watch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/video/trim/p1"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let (api, watcher) = setup(&server);
    let err = watcher
        .start_and_wait(
            api.as_ref(),
            TaskKey::new("video_trim").with_project("p1"),
            &json!({}),
            Arc::new(Quiet),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

    assert_eq!(err, WatchError::Start(ApiError::HttpStatus(503)));
    assert_eq!(watcher.router().subscription_count(), 0);
}
