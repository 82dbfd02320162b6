mod common;

use common::{FakeChannel, FakeElement, runtime, tab};
use serde_json::{Value, json};
use tabpilot::chrome::TabRuntime;
use tabpilot::server::daemon::handle_request;
use tabpilot::server::protocol::{Request, Response, error_codes, methods};
use tabpilot::server::IpcServer;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    ipc: IpcServer,
    rt: TabRuntime,
}

impl Harness {
    fn new(channel: &std::sync::Arc<FakeChannel>) -> Self {
        let dir = TempDir::new().unwrap();
        let ipc = IpcServer::new(dir.path().join("tabpilot.sock"));
        Self {
            _dir: dir,
            ipc,
            rt: runtime(channel),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Response {
        handle_request(0, Request::new(1, method, params), &self.rt, &self.ipc).await
    }
}

fn result(response: Response) -> Value {
    assert!(response.error.is_none(), "unexpected error: {:?}", response.error);
    response.result.unwrap()
}

#[tokio::test]
async fn test_ping_and_unknown_method() {
    let h = Harness::new(&FakeChannel::new());

    assert_eq!(result(h.call(methods::PING, Value::Null).await), json!({"pong": true}));

    let response = h.call("tab.teleport", Value::Null).await;
    let error = response.error.unwrap();
    assert_eq!(error.code, error_codes::METHOD_NOT_FOUND);
    assert!(error.message.contains("tab.teleport"));
}

#[tokio::test]
async fn test_tab_param_required() {
    let h = Harness::new(&FakeChannel::new());

    for method in [methods::TASK_BEGIN, methods::COMMAND_RUN, methods::CAPTURE_START] {
        let error = h.call(method, json!({})).await.error.unwrap();
        assert_eq!(error.code, error_codes::INVALID_PARAMS);
        assert_eq!(error.message, "tab required");
    }

    let error = h
        .call(methods::COMMAND_RUN, json!({"tab": "T1"}))
        .await
        .error
        .unwrap();
    assert_eq!(error.message, "command required");
}

#[tokio::test]
async fn test_task_begin_and_end() {
    let channel = FakeChannel::new();
    let h = Harness::new(&channel);

    let status = result(
        h.call(methods::TASK_BEGIN, json!({"tab": "T1", "reason": "agent"}))
            .await,
    );
    assert_eq!(status["attached"], true);
    assert_eq!(status["taskRefs"], 1);

    let status = result(h.call(methods::TASK_END, json!({"tab": "T1"})).await);
    assert_eq!(status["attached"], false);
    assert_eq!(channel.closes(), 1);
}

#[tokio::test]
async fn test_attach_failure_maps_to_error_code() {
    let channel = FakeChannel::new();
    channel.set_fail_open(true);
    let h = Harness::new(&channel);

    let error = h
        .call(methods::TASK_BEGIN, json!({"tab": "T1"}))
        .await
        .error
        .unwrap();
    assert_eq!(error.code, error_codes::ATTACH_FAILED);
}

#[tokio::test]
async fn test_command_run_returns_action_results() {
    let channel = FakeChannel::new();
    channel.put(None, "#name", FakeElement::new("input"));
    let h = Harness::new(&channel);

    let value = result(
        h.call(
            methods::COMMAND_RUN,
            json!({
                "tab": "T1",
                "command": "RUN_ACTIONS",
                "args": {"actions": [{"type": "fill", "selector": "#name", "value": "Ada"}]},
            }),
        )
        .await,
    );
    assert_eq!(value["success"], true);
    assert_eq!(value["output"]["allVerified"], true);
    assert_eq!(channel.value_of(None, "#name").as_deref(), Some("Ada"));
}

#[tokio::test]
async fn test_capture_round_trip() {
    let channel = FakeChannel::new();
    let h = Harness::new(&channel);

    assert_eq!(
        result(h.call(methods::CAPTURE_START, json!({"tab": "T1"})).await),
        json!({"recording": true})
    );
    let draft = result(
        h.call(
            methods::CAPTURE_STOP,
            json!({"tab": "T1", "segmentEnds": [100, 200]}),
        )
        .await,
    );
    assert_eq!(draft["actions"], json!([]));
    assert_eq!(draft["segments"].as_array().unwrap().len(), 2);
    assert!(draft.get("pageMap").is_none());
    assert!(!h.rt.status(&tab()).attached);
}

#[tokio::test]
async fn test_session_status_single_and_list() {
    let channel = FakeChannel::new();
    let h = Harness::new(&channel);
    h.rt.attach_if_needed(&tab()).await.unwrap();

    let one = result(h.call(methods::SESSION_STATUS, json!({"tab": "T1"})).await);
    assert_eq!(one["tab"], "T1");
    assert_eq!(one["attached"], true);

    let all = result(h.call(methods::SESSION_STATUS, Value::Null).await);
    assert_eq!(all.as_array().unwrap().len(), 1);

    let cleaned = result(h.call(methods::TAB_CLEANUP, json!({"tab": "T1"})).await);
    assert_eq!(cleaned["attached"], false);
}
