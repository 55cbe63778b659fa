#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use fileflow_node::agent::NodeState;
use fileflow_node::client::{HttpControlPlane, Version};
use fileflow_node::scheduler::{ScheduledTask, SchedulerHandle, TaskContext};
use fileflow_node::utils::http_client::build_client;
use fileflow_node::worker::{FlowWorker, FlowWorkerConfig, ProcessLauncher, STDOUT_HEADER};
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const NODE_UID: &str = "0b6f3c1a-2d4e-4f5a-9b8c-7d6e5f4a3b2c";
const LIBRARY_FILE_UID: &str = "5e4d3c2b-1a09-4f8e-8d7c-6b5a4f3e2d1c";

async fn mount_control_plane(server: &MockServer, temp_path: &str) {
    Mock::given(method("GET"))
        .and(path("/remote/node/by-address/render-box"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "uid": NODE_UID,
            "name": "render-box",
            "enabled": true,
            "flowRunners": 2,
            "tempPath": temp_path,
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/remote/system/version"))
        .respond_with(ResponseTemplate::new(200).set_body_string(Version::current().to_string()))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/remote/work/clear/{NODE_UID}")))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/remote/work/next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "libraryFileUid": LIBRARY_FILE_UID,
            "name": "movie.mkv",
        })))
        .up_to_n_times(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/remote/work/next"))
        .respond_with(ResponseTemplate::new(204))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/remote/work/[0-9a-f-]+/(log|status)$"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

async fn wait_for_request(server: &MockServer, suffix: &str) -> Request {
    for _ in 0..200 {
        let requests = server.received_requests().await.unwrap_or_default();
        if let Some(request) = requests.into_iter().find(|r| r.url.path().ends_with(suffix)) {
            return request;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("no request ending in {suffix}");
}

fn worker(server: &MockServer, runner_script: &str) -> FlowWorker {
    let client =
        HttpControlPlane::new(&server.uri(), build_client(Duration::from_secs(5))).unwrap();
    let state = Arc::new(NodeState::new());
    state.set_registered(true);
    let launcher = ProcessLauncher::new(
        "sh",
        vec!["-c".to_string(), runner_script.to_string(), "runner".to_string()],
    );
    FlowWorker::new(
        Arc::new(client),
        state,
        Arc::new(launcher),
        FlowWorkerConfig {
            hostname: "render-box".to_string(),
            internal: false,
            local_version: Version::current(),
        },
    )
}

#[tokio::test]
async fn runs_a_job_and_uploads_its_log() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    mount_control_plane(&server, &temp_dir.path().to_string_lossy()).await;

    // $4 is the library file uid: --uid <job> --libfile <file> ...
    let worker = worker(&server, "mkdir -p \"$6/Runner-$2\"; echo \"processing $4\"");
    let ctx = TaskContext::new(SchedulerHandle::new("flow-worker"));
    worker.execute(&ctx).await.unwrap();

    let log = wait_for_request(&server, "/log").await;
    let body = String::from_utf8_lossy(&log.body).into_owned();
    assert!(body.starts_with(STDOUT_HEADER));
    assert!(body.contains(&format!("processing {LIBRARY_FILE_UID}")));
    assert!(log.url.path().contains(LIBRARY_FILE_UID));

    for _ in 0..100 {
        if !worker.has_active_runners() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!worker.has_active_runners());

    // The job directory created by the runner is removed afterwards.
    let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
    assert!(leftovers.is_empty());

    // The queue is drained: the next tick asks and gets nothing.
    worker.execute(&ctx).await.unwrap();
    assert_eq!(worker.active_count(), 0);
}

#[tokio::test]
async fn failing_runner_marks_file_failed() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    mount_control_plane(&server, &temp_dir.path().to_string_lossy()).await;

    let worker = worker(&server, "echo broken 1>&2; exit 1");
    let ctx = TaskContext::new(SchedulerHandle::new("flow-worker"));
    worker.execute(&ctx).await.unwrap();

    let status = wait_for_request(&server, "/status").await;
    let body: serde_json::Value = serde_json::from_slice(&status.body).unwrap();
    assert_eq!(body["status"], "ProcessingFailed");
}
