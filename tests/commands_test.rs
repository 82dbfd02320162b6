mod common;

use common::{CollectingSink, FakeChannel, FakeElement, runtime, runtime_with_sink, tab, wait_until};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tabpilot::ErrorCode;
use tabpilot::chrome::{LogLevel, ProtocolCommand};

#[tokio::test]
async fn test_fill_verifies_read_back() {
    let channel = FakeChannel::new();
    channel.put(None, "#name", FakeElement::new("input"));
    let rt = runtime(&channel);

    let result = rt
        .run_command(
            &tab(),
            "RUN_ACTIONS",
            json!({"actions": [{"type": "fill", "selector": "#name", "value": "abc"}]}),
            None,
        )
        .await
        .unwrap();

    assert!(result.success, "{:?}", result);
    assert_eq!(channel.value_of(None, "#name").as_deref(), Some("abc"));
    let output = result.output.unwrap();
    assert_eq!(output["allVerified"], true);
    assert_eq!(output["results"][0]["state"], "verified");
    assert_eq!(output["results"][0]["evidence"], "current=\"abc\"");
}

#[tokio::test]
async fn test_fill_verifies_long_value() {
    let channel = FakeChannel::new();
    channel.put(None, "#body", FakeElement::new("textarea"));
    let rt = runtime(&channel);
    let value = "lorem ipsum ".repeat(60);

    let result = rt
        .run_command(
            &tab(),
            "RUN_ACTIONS",
            json!({"actions": [{"type": "fill", "selector": "#body", "value": value}]}),
            None,
        )
        .await
        .unwrap();

    assert!(result.success, "{:?}", result);
    let output = result.output.unwrap();
    assert_eq!(output["results"][0]["state"], "verified");
    let evidence = output["results"][0]["evidence"].as_str().unwrap();
    assert!(evidence.starts_with("current=\"lorem ipsum"));
    assert!(evidence.chars().count() <= 220);
}

#[tokio::test]
async fn test_fill_truncated_value_fails_verification() {
    let channel = FakeChannel::new();
    channel.put(None, "#code", FakeElement::new("input").max_length(2));
    let rt = runtime(&channel);

    let result = rt
        .run_command(
            &tab(),
            "RUN_ACTIONS",
            json!({"actions": [{"type": "fill", "selector": "#code", "value": "abc"}]}),
            None,
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::VerifyFailed));
    let output = result.output.unwrap();
    assert_eq!(output["executedCount"], 1);
    assert_eq!(output["verifiedCount"], 0);
    assert_eq!(output["results"][0]["executed"], true);
    assert_eq!(output["results"][0]["evidence"], "current=\"ab\"");
}

#[tokio::test]
async fn test_batch_stops_at_unresolved_target() {
    let channel = FakeChannel::new();
    channel.put(None, "#go", FakeElement::new("button"));
    let rt = runtime(&channel);

    let result = rt
        .run_command(
            &tab(),
            "RUN_ACTIONS",
            json!({
                "summary": "click then fill",
                "actions": [
                    {"type": "click", "selector": "#go"},
                    {"type": "fill", "selector": "#missing", "value": "x"},
                    {"type": "keyboard", "key": "Enter"}
                ]
            }),
            None,
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::TargetNotResolved));
    let output = result.output.unwrap();
    assert_eq!(output["summary"], "click then fill");
    assert_eq!(output["attempted"], 3);
    assert_eq!(output["executedCount"], 1);
    assert_eq!(output["verifiedCount"], 1);
    assert_eq!(output["allVerified"], false);
    assert_eq!(output["results"].as_array().unwrap().len(), 2);
    assert_eq!(output["results"][1]["index"], 1);
    assert_eq!(output["executed"][0]["selector"], "#go");

    assert_eq!(channel.count("Input.dispatchMouseEvent"), 3);
    assert!(channel.sent().iter().any(|command| matches!(
        command,
        ProtocolCommand::DispatchMouse { x, y, .. } if *x == 60.0 && *y == 40.0
    )));
    assert_eq!(channel.count("Input.dispatchKeyEvent"), 0);
}

#[tokio::test]
async fn test_click_requires_visible_rect() {
    let channel = FakeChannel::new();
    channel.put(None, "#ghost", FakeElement::new("button").hidden());
    let rt = runtime(&channel);

    let result = rt
        .run_command(
            &tab(),
            "RUN_ACTIONS",
            json!({"actions": [{"type": "click", "selector": "#ghost"}]}),
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.error_code, Some(ErrorCode::NotInteractable));
    assert_eq!(channel.count("Input.dispatchMouseEvent"), 0);
}

#[tokio::test]
async fn test_select_options_checks_tag() {
    let channel = FakeChannel::new();
    channel.put(None, "#country", FakeElement::new("select"));
    channel.put(None, "#city", FakeElement::new("input"));
    let rt = runtime(&channel);

    let ok = rt
        .run_command(
            &tab(),
            "RUN_ACTIONS",
            json!({"actions": [{"type": "selectOptions", "selector": "#country", "value": "kr"}]}),
            None,
        )
        .await
        .unwrap();
    assert!(ok.success);
    assert_eq!(channel.value_of(None, "#country").as_deref(), Some("kr"));

    let not_select = rt
        .run_command(
            &tab(),
            "RUN_ACTIONS",
            json!({"actions": [{"type": "selectOptions", "selector": "#city", "value": "kr"}]}),
            None,
        )
        .await
        .unwrap();
    assert_eq!(not_select.error_code, Some(ErrorCode::NotSelect));
}

#[tokio::test]
async fn test_type_appends_and_read_text() {
    let channel = FakeChannel::new();
    channel.put(None, "#q", FakeElement::new("input"));
    channel.put(None, "#title", FakeElement::new("h1").text("Quarterly report"));
    let rt = runtime(&channel);

    let result = rt
        .run_command(
            &tab(),
            "RUN_ACTIONS",
            json!({"actions": [
                {"type": "type", "selector": "#q", "text": "hello"},
                {"type": "type", "selector": "#q", "text": " world"},
                {"type": "readText", "selector": "#title"}
            ]}),
            None,
        )
        .await
        .unwrap();

    assert!(result.success, "{:?}", result);
    assert_eq!(channel.value_of(None, "#q").as_deref(), Some("hello world"));
    let output = result.output.unwrap();
    assert_eq!(output["results"][2]["readText"], "Quarterly report");
}

#[tokio::test]
async fn test_missing_value_fails_only_that_action() {
    let channel = FakeChannel::new();
    channel.put(None, "#first", FakeElement::new("input"));
    channel.put(None, "#second", FakeElement::new("input"));
    let rt = runtime(&channel);

    let result = rt
        .run_command(
            &tab(),
            "RUN_ACTIONS",
            json!({"actions": [
                {"type": "fill", "selector": "#first", "value": "kept"},
                {"type": "fill", "selector": "#second"},
                {"type": "fill", "selector": "#first", "value": "never"},
            ]}),
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.error_code, Some(ErrorCode::ValidationError));
    let output = result.output.unwrap();
    assert_eq!(output["executedCount"], 1);
    assert_eq!(output["verifiedCount"], 1);
    assert_eq!(output["results"].as_array().unwrap().len(), 2);
    assert_eq!(output["results"][1]["executed"], false);
    assert_eq!(channel.value_of(None, "#first").as_deref(), Some("kept"));
}

#[tokio::test]
async fn test_invalid_action_is_validation_error() {
    let channel = FakeChannel::new();
    let rt = runtime(&channel);

    let result = rt
        .run_command(
            &tab(),
            "RUN_ACTIONS",
            json!({"actions": [{"type": "fill", "selector": "#x"}]}),
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.error_code, Some(ErrorCode::ValidationError));

    let empty = rt
        .run_command(&tab(), "RUN_ACTIONS", json!({"actions": []}), None)
        .await
        .unwrap();
    assert_eq!(empty.error_code, Some(ErrorCode::ValidationError));

    let too_many: Vec<_> = (0..26).map(|_| json!({"type": "delay", "ms": 0})).collect();
    let oversized = rt
        .run_command(&tab(), "RUN_ACTIONS", json!({"actions": too_many}), None)
        .await
        .unwrap();
    assert_eq!(oversized.error_code, Some(ErrorCode::ValidationError));
}

#[tokio::test]
async fn test_unknown_command() {
    let channel = FakeChannel::new();
    let rt = runtime(&channel);

    let result = rt
        .run_command(&tab(), "TAKE_SCREENSHOT", json!({}), None)
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::CommandNotSupported));
}

#[tokio::test]
async fn test_attach_failure_is_error() {
    let channel = FakeChannel::new();
    channel.set_fail_open(true);
    let rt = runtime(&channel);

    let err = rt
        .run_command(&tab(), "INSPECT_PAGE_MAP", json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, tabpilot::TabError::AttachFailed(_)));
}

#[tokio::test(start_paused = true)]
async fn test_command_timeout_is_structured() {
    let channel = FakeChannel::new();
    channel.set_evaluate_delay(Duration::from_secs(60));
    let rt = runtime(&channel);

    let result = rt
        .run_command(&tab(), "INSPECT_PAGE_MAP", json!({}), Some(1_500))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::Timeout));
    assert_eq!(
        result.error.as_deref(),
        Some("Timeout: INSPECT_PAGE_MAP did not complete in 2s")
    );
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_clamped_to_minimum() {
    let channel = FakeChannel::new();
    channel.set_evaluate_delay(Duration::from_secs(60));
    let rt = runtime(&channel);

    let started = tokio::time::Instant::now();
    let result = rt
        .run_command(&tab(), "INSPECT_PAGE_MAP", json!({}), Some(5))
        .await
        .unwrap();
    assert_eq!(result.error_code, Some(ErrorCode::Timeout));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1_000));
    assert!(elapsed < Duration::from_millis(1_500));
}

#[tokio::test(start_paused = true)]
async fn test_raising_timeout_lets_slow_command_finish() {
    let channel = FakeChannel::new();
    channel.set_evaluate_delay(Duration::from_secs(2));
    let rt = runtime(&channel);

    let short = rt
        .run_command(&tab(), "INSPECT_PAGE_MAP", json!({}), Some(1_000))
        .await
        .unwrap();
    assert_eq!(short.error_code, Some(ErrorCode::Timeout));

    let long = rt
        .run_command(&tab(), "INSPECT_PAGE_MAP", json!({}), Some(5_000))
        .await
        .unwrap();
    assert!(long.success, "{:?}", long);
    let output = long.output.unwrap();
    assert_eq!(output["title"], "Example");
    assert_eq!(output["mode"], "summary");
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_element_times_out() {
    let channel = FakeChannel::new();
    let rt = runtime(&channel);

    let result = rt
        .run_command(
            &tab(),
            "RUN_ACTIONS",
            json!({"actions": [{"type": "waitForElement", "selector": "#late", "timeoutMs": 600}]}),
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.error_code, Some(ErrorCode::Timeout));
    assert!(channel.count("Runtime.evaluate") >= 3);
}

#[tokio::test]
async fn test_resolution_prefers_first_context_in_order() {
    let channel = FakeChannel::new().with_contexts(&[(2, Some("a")), (1, Some("a")), (5, None)]);
    channel.put(Some(2), "#save", FakeElement::new("button"));
    channel.put(Some(5), "#save", FakeElement::new("button"));
    let rt = runtime(&channel);
    let t = tab();

    rt.attach_if_needed(&t).await.unwrap();
    wait_until(|| rt.status(&t).context_count == 3).await;

    let resolution = rt.resolve_selector(&t, "#save").await;
    assert!(resolution.found);
    assert_eq!(resolution.context_id, Some(2));
    assert_eq!(resolution.frame_id.as_deref(), Some("a"));
}

#[tokio::test]
async fn test_resolution_skips_failing_contexts() {
    let channel = FakeChannel::new().with_contexts(&[(1, Some("a")), (2, Some("b"))]);
    channel.fail_context(1);
    channel.put(Some(2), "#ok", FakeElement::new("button"));
    let sink = Arc::new(CollectingSink::default());
    let rt = runtime_with_sink(&channel, sink.clone());
    let t = tab();

    rt.attach_if_needed(&t).await.unwrap();
    wait_until(|| rt.status(&t).context_count == 2).await;

    let resolution = rt.resolve_selector(&t, "#ok").await;
    assert_eq!(resolution.context_id, Some(2));

    channel.fail_context(2);
    let resolution = rt.resolve_selector(&t, "#ok").await;
    assert!(!resolution.found);
    assert!(sink.contains(LogLevel::Warn, "probe failed in all 2 context(s)"));
}

#[tokio::test]
async fn test_inspect_page_map_across_frames() {
    let channel = FakeChannel::new().with_contexts(&[(1, Some("main")), (4, Some("sub"))]);
    channel.inspect_payload(
        Some(1),
        json!({
            "mode": "summary",
            "url": "https://example.test/",
            "title": "Docs",
            "focusedSelector": "#search",
            "frameSummary": {
                "totalNodes": 40,
                "interactiveCount": 2,
                "landmarks": [{"role": "main"}],
                "interactive": [{"selector": "#search"}, {"selector": "#share"}]
            }
        }),
    );
    channel.inspect_payload(
        Some(4),
        json!({
            "mode": "summary",
            "url": "https://example.test/sub",
            "title": "Editor",
            "focusedSelector": "#body",
            "frameSummary": {
                "totalNodes": 10,
                "interactiveCount": 1,
                "landmarks": [],
                "interactive": [{"selector": "#body"}]
            }
        }),
    );
    let rt = runtime(&channel);
    let t = tab();
    rt.attach_if_needed(&t).await.unwrap();
    wait_until(|| rt.status(&t).context_count == 2).await;

    let result = rt
        .run_command(
            &t,
            "INSPECT_PAGE_MAP",
            json!({"targetSelector": "#body"}),
            None,
        )
        .await
        .unwrap();
    assert!(result.success);
    let map = result.output.unwrap();
    assert_eq!(map["mode"], "summary");
    assert_eq!(map["title"], "Docs");
    assert_eq!(map["focusedSelector"], "#search");
    assert_eq!(map["targetFound"], true);
    assert_eq!(map["frameSummaries"].as_array().unwrap().len(), 2);
    assert_eq!(map["frameSummaries"][1]["frameId"], "sub");
    assert_eq!(map["frameSummaries"][1]["mode"], "summary:frame");
}

#[tokio::test]
async fn test_action_context_reports_frame() {
    let channel = FakeChannel::new().with_contexts(&[(1, Some("main")), (4, Some("editor"))]);
    channel.put(Some(4), "#body", FakeElement::new("div"));
    let rt = runtime(&channel);
    let t = tab();
    rt.attach_if_needed(&t).await.unwrap();
    wait_until(|| rt.status(&t).context_count == 2).await;

    let found = rt
        .run_command(&t, "GET_ACTION_CONTEXT", json!({"selector": "#body"}), None)
        .await
        .unwrap();
    let output = found.output.unwrap();
    assert_eq!(output["found"], true);
    assert_eq!(output["frameId"], "editor");

    let missing = rt
        .run_command(&t, "GET_ACTION_CONTEXT", json!({"selector": "#nope"}), None)
        .await
        .unwrap();
    assert!(missing.success);
    assert_eq!(missing.output.unwrap()["found"], false);

    let invalid = rt
        .run_command(&t, "GET_ACTION_CONTEXT", json!({}), None)
        .await
        .unwrap();
    assert_eq!(invalid.error_code, Some(ErrorCode::ValidationError));
}
