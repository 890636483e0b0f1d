//! HTTP controller link against a stub controller.


use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde_json::Value;

use rawnode::config::NodeConfig;
use rawnode::controller::http::{CompletionUpdate, ErrorReport, DEFAULT_TIMEOUT};
use rawnode::controller::{ControllerLink, HttpControllerLink, JobResult};
use rawnode::dataset::{JsonLinesFormat, RawDataFormat};
use rawnode::error::ControllerError;
use rawnode::node::NodeServer;
use rawnode::scheduler::JobStatus;
use rawnode::strategy::StrategyRegistry;
use test_harness::*;

/// `(task, job, call, body)` for every request the stub received
type Calls = Arc<Mutex<Vec<(u64, u64, String, Value)>>>;

#[derive(Clone)]
struct StubState {
    calls: Calls,
    status: StatusCode,
}

async fn record_call(
    State(state): State<StubState>,
    Path((task_id, job_id, call)): Path<(u64, u64, String)>,
    Json(body): Json<Value>,
) -> StatusCode {
    state.calls.lock().unwrap().push((task_id, job_id, call, body));
    state.status
}

async fn start_stub(status: StatusCode) -> (SocketAddr, Calls) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/api/tasks/{task_id}/jobs/{job_id}/{call}", post(record_call))
        .with_state(StubState {
            calls: calls.clone(),
            status,
        });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, calls)
}

#[tokio::test]
async fn link_posts_each_call_to_its_endpoint() {
    let (addr, calls) = start_stub(StatusCode::OK).await;
    let link = HttpControllerLink::new(&format!("http://{}/", addr), DEFAULT_TIMEOUT).unwrap();

    link.update_job_completion_rate(3, 14, JobStatus::UnderProcessing, 0.25)
        .await
        .unwrap();
    link.set_job_result(3, 14, JobResult::TotalRawSignal(12.5))
        .await
        .unwrap();
    link.set_job_error_message(3, 15, "Unable to preload data.".to_string())
        .await
        .unwrap();

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 3);

    let (task, job, call, body) = &calls[0];
    assert_eq!((*task, *job, call.as_str()), (3, 14, "completion"));
    let update: CompletionUpdate = serde_json::from_value(body.clone()).unwrap();
    assert_eq!(
        update,
        CompletionUpdate {
            status: JobStatus::UnderProcessing,
            rate: 0.25
        }
    );
    assert_eq!(body["status"], "UNDER_PROCESSING");

    let (_, _, call, body) = &calls[1];
    assert_eq!(call, "result");
    let result: JobResult = serde_json::from_value(body.clone()).unwrap();
    assert_eq!(result, JobResult::TotalRawSignal(12.5));

    let (_, job, call, body) = &calls[2];
    assert_eq!((*job, call.as_str()), (15, "error"));
    let report: ErrorReport = serde_json::from_value(body.clone()).unwrap();
    assert_eq!(report.message, "Unable to preload data.");
}

#[tokio::test]
async fn non_success_status_is_rejected() {
    let (addr, _calls) = start_stub(StatusCode::INTERNAL_SERVER_ERROR).await;
    let link = HttpControllerLink::new(&format!("http://{}", addr), DEFAULT_TIMEOUT).unwrap();

    let err = link
        .update_job_completion_rate(1, 1, JobStatus::Queued, 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::Rejected(500)));
}

#[tokio::test]
async fn unreachable_controller_is_a_request_error() {
    let link = HttpControllerLink::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();

    let err = link
        .set_job_error_message(1, 1, "boom".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::Request(_)));
}

#[tokio::test]
async fn node_reports_to_configured_controller() {
    let (addr, calls) = start_stub(StatusCode::OK).await;
    let dir = tempfile::tempdir().unwrap();
    let scans = sample_scans(3);
    JsonLinesFormat
        .write_scans(&dir.path().join("a.jsonl"), &scans)
        .unwrap();

    let config = NodeConfig::default()
        .with_data_root(dir.path())
        .with_work_dir(dir.path().join("work"))
        .with_controller(format!("http://{}", addr));
    let node = NodeServer::start(config, StrategyRegistry::with_builtins()).unwrap();
    assert!(node.status().controller_set);

    node.add_open_raw_data(7, 21, "a.jsonl").unwrap();

    let polled = calls.clone();
    assert_eventually(
        || {
            let polled = polled.clone();
            async move { polled.lock().unwrap().iter().any(|(_, _, c, _)| c == "result") }
        },
        Duration::from_secs(10),
        "controller never received the result",
    )
    .await;

    let calls = calls.lock().unwrap().clone();
    let sequence: Vec<(&str, Value)> = calls
        .iter()
        .map(|(task, job, call, body)| {
            assert_eq!((*task, *job), (7, 21));
            (call.as_str(), body.get("rate").cloned().unwrap_or(Value::Null))
        })
        .collect();
    assert_eq!(
        sequence,
        vec![
            ("completion", serde_json::json!(0.0)),
            ("completion", serde_json::json!(0.0)),
            ("completion", serde_json::json!(0.5)),
            ("result", Value::Null),
        ]
    );
    assert_eq!(calls[0].3["status"], "QUEUED");
    assert_eq!(calls[3].3["kind"], "raw_data");
    assert_eq!(calls[3].3["value"]["raw_data_id"], 21);
}
