use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use cutwatch_core::{ScopeFilter, TaskKey, TaskKind, TaskOutcome, TaskProgressMessage};
use cutwatch_engine::{
    new_ledger, ApiSettings, HttpTaskApi, Matcher, ReconcileExit, ReconcileSettings, Reconciler,
    ScopeRouter, SnapshotSource, TaskEndpoint, TaskObserver, TaskWatcher,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(cutwatch_logging::initialize_for_tests);
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl TaskObserver for Recorder {
    fn on_progress(&self, _key: &TaskKey, progress: f64, _text: Option<&str>) {
        self.events.lock().unwrap().push(format!("progress {progress}"));
    }

    fn on_completed(&self, _key: &TaskKey, result_ref: Option<&str>, _text: Option<&str>) {
        self.events
            .lock()
            .unwrap()
            .push(format!("completed {}", result_ref.unwrap_or("-")));
    }

    fn on_cancelled(&self, _key: &TaskKey, _text: Option<&str>) {
        self.events.lock().unwrap().push("cancelled".to_string());
    }

    fn on_error(&self, _key: &TaskKey, text: &str) {
        self.events.lock().unwrap().push(format!("error {text}"));
    }
}

/// Signals when a progress callback starts, then takes its time finishing.
struct SlowProgress {
    entered: tokio::sync::mpsc::UnboundedSender<()>,
    events: Mutex<Vec<String>>,
}

impl TaskObserver for SlowProgress {
    fn on_progress(&self, _key: &TaskKey, progress: f64, _text: Option<&str>) {
        let _ = self.entered.send(());
        std::thread::sleep(Duration::from_millis(200));
        self.events.lock().unwrap().push(format!("progress {progress}"));
    }

    fn on_completed(&self, _key: &TaskKey, result_ref: Option<&str>, _text: Option<&str>) {
        self.events
            .lock()
            .unwrap()
            .push(format!("completed {}", result_ref.unwrap_or("-")));
    }
}

fn merge_endpoint() -> TaskEndpoint {
    TaskEndpoint {
        scope: "merge_videos".to_string(),
        start_path: "api/video/merge/{project_id}".to_string(),
        status_path: "api/video/merge/status/{task_id}".to_string(),
    }
}

fn api(server: &MockServer) -> Arc<HttpTaskApi> {
    let settings = ApiSettings {
        base_url: format!("{}/", server.uri()),
        ..ApiSettings::default()
    };
    Arc::new(HttpTaskApi::new(&settings, merge_endpoint()).expect("api"))
}

fn fast() -> ReconcileSettings {
    ReconcileSettings {
        interval: Duration::from_millis(20),
    }
}

fn status_body(status: &str, progress: f64) -> serde_json::Value {
    json!({
        "message": "ok",
        "data": {
            "task_id": "m1",
            "status": status,
            "progress": progress,
            "message": null,
            "file_path": if status == "completed" { json!("/output/merged.mp4") } else { json!(null) }
        },
        "timestamp": "2024-05-01T10:00:00"
    })
}

fn merge_key() -> TaskKey {
    TaskKey::new("merge_videos").with_project("p1").with_task("m1")
}

async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn http_snapshot_reads_enveloped_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/video/merge/status/m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("running", 42.0)))
        .mount(&server)
        .await;

    let snapshot = api(&server).fetch_snapshot(&merge_key()).await.expect("snapshot");
    assert_eq!(snapshot.task_id, "m1");
    assert_eq!(snapshot.progress, Some(42.0));
    assert!(!snapshot.status.is_terminal());
}

#[tokio::test]
async fn http_snapshot_maps_failure_status_codes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/video/merge/status/m1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = api(&server).fetch_snapshot(&merge_key()).await.unwrap_err();
    assert_eq!(err, cutwatch_engine::ApiError::HttpStatus(404));
}

#[tokio::test]
async fn poll_delivers_completion_when_push_is_silent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/video/merge/status/m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("running", 30.0)))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/video/merge/status/m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("completed", 100.0)))
        .mount(&server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let handle = Reconciler::spawn(api(&server), merge_key(), new_ledger(), recorder.clone(), fast());

    assert_eq!(handle.join().await, ReconcileExit::Terminal);
    assert_eq!(recorder.events(), vec!["progress 30", "completed /output/merged.mp4"]);
}

#[tokio::test]
async fn poll_errors_are_swallowed_and_retried() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/video/merge/status/m1"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/video/merge/status/m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("completed", 100.0)))
        .mount(&server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let handle = Reconciler::spawn(api(&server), merge_key(), new_ledger(), recorder.clone(), fast());

    assert_eq!(handle.join().await, ReconcileExit::Terminal);
    assert_eq!(recorder.events(), vec!["completed /output/merged.mp4"]);
}

#[tokio::test]
async fn stopping_the_reconciler_ends_the_loop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/video/merge/status/m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("running", 10.0)))
        .mount(&server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let handle = Reconciler::spawn(api(&server), merge_key(), new_ledger(), recorder.clone(), fast());
    tokio::time::sleep(Duration::from_millis(60)).await;
    handle.stop();

    assert_eq!(handle.join().await, ReconcileExit::Stopped);
    assert_eq!(recorder.events(), vec!["progress 10"]);
}

#[tokio::test]
async fn push_completion_silences_a_later_poll_completion() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/video/merge/status/m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("running", 50.0)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/video/merge/status/m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("completed", 100.0)))
        .mount(&server)
        .await;

    let router = ScopeRouter::new();
    let watcher = TaskWatcher::new(
        router.clone(),
        api(&server),
        ReconcileSettings {
            interval: Duration::from_millis(200),
        },
    );
    let recorder = Arc::new(Recorder::default());
    let watch = watcher.watch(merge_key(), recorder.clone(), true);

    eventually(|| !recorder.events().is_empty()).await;
    router.route(&TaskProgressMessage {
        scope: "merge_videos".to_string(),
        project_id: Some("p1".to_string()),
        task_id: Some("m1".to_string()),
        kind: TaskKind::Completed,
        progress: Some(100.0),
        text: Some("merged".to_string()),
        phase: None,
        timestamp: String::new(),
    });
    eventually(|| !watch.is_reconciling()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(recorder.events(), vec!["progress 50", "completed -"]);
    assert_eq!(
        watch.outcome(),
        Some(TaskOutcome::Completed {
            result_ref: None,
            text: Some("merged".to_string())
        })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn poll_terminal_waits_for_an_in_flight_push_callback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/video/merge/status/m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("completed", 100.0)))
        .mount(&server)
        .await;

    let router = ScopeRouter::new();
    let ledger = new_ledger();
    let (entered_tx, mut entered) = tokio::sync::mpsc::unbounded_channel();
    let observer = Arc::new(SlowProgress {
        entered: entered_tx,
        events: Mutex::new(Vec::new()),
    });
    let _sub = router.subscribe_with(
        Matcher::Exact(ScopeFilter::from(&merge_key())),
        ledger.clone(),
        observer.clone(),
    );

    let pusher = {
        let router = router.clone();
        std::thread::spawn(move || {
            router.route(&TaskProgressMessage {
                scope: "merge_videos".to_string(),
                project_id: Some("p1".to_string()),
                task_id: Some("m1".to_string()),
                kind: TaskKind::Progress,
                progress: Some(40.0),
                text: None,
                phase: None,
                timestamp: String::new(),
            });
        })
    };
    entered.recv().await.expect("push delivery started");

    let handle = Reconciler::spawn(api(&server), merge_key(), ledger, observer.clone(), fast());
    assert_eq!(handle.join().await, ReconcileExit::Terminal);
    pusher.join().expect("push thread");

    assert_eq!(
        observer.events.lock().unwrap().clone(),
        vec!["progress 40", "completed /output/merged.mp4"]
    );
}
