use super::action_executor::ActionExecutor;
use super::context_resolver::ContextResolver;
use super::models::{Command, CommandResult, FrameSummary, PageMap, TabId};
use super::session_manager::SessionManager;
use crate::Result;
use crate::error::ErrorCode;
use crate::js_templates;
use crate::timeouts::clamp_command_timeout;
use serde_json::{Value, json};
use std::time::Duration;

fn arg_u32(args: &Value, key: &str, default: u32, min: u32, max: u32) -> u32 {
    match args.get(key).and_then(|v| v.as_f64()) {
        Some(v) if v.is_finite() => (v.floor().max(0.0) as u32).clamp(min, max),
        _ => default,
    }
}

fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

/// Public entry point for the three page commands.
#[derive(Clone)]
pub struct CommandDispatcher {
    sessions: SessionManager,
    resolver: ContextResolver,
    executor: ActionExecutor,
    default_timeout_ms: u64,
}

impl CommandDispatcher {
    pub fn new(
        sessions: SessionManager,
        resolver: ContextResolver,
        executor: ActionExecutor,
        default_timeout_ms: u64,
    ) -> Self {
        Self {
            sessions,
            resolver,
            executor,
            default_timeout_ms,
        }
    }

    /// Runs `command` against `tab` under a deadline clamped to 1-30s.
    ///
    /// The command runs on its own task. When the deadline wins, that task is
    /// left running: its remote calls are abandoned, not cancelled, so the side
    /// effects of a timed-out command are unknown. Only attach failures are `Err`.
    pub async fn run_command(
        &self,
        tab: &TabId,
        command: &str,
        args: Value,
        timeout_ms: Option<u64>,
    ) -> Result<CommandResult> {
        let timeout = clamp_command_timeout(timeout_ms, self.default_timeout_ms);

        let dispatcher = self.clone();
        let target = tab.clone();
        let name = command.to_string();
        let operation = tokio::spawn(async move { dispatcher.execute(&target, &name, &args).await });

        tokio::select! {
            joined = operation => match joined {
                Ok(result) => result,
                Err(e) => Ok(CommandResult::failure(
                    ErrorCode::ExecutionError,
                    format!("{} failed: {}", command, e),
                )),
            },
            _ = tokio::time::sleep(Duration::from_millis(timeout)) => {
                tracing::warn!(tab = %tab, command, timeout, "command timed out");
                Ok(CommandResult::failure(
                    ErrorCode::Timeout,
                    format!(
                        "Timeout: {} did not complete in {}s",
                        command,
                        (timeout as f64 / 1000.0).round() as u64
                    ),
                ))
            }
        }
    }

    async fn execute(&self, tab: &TabId, command: &str, args: &Value) -> Result<CommandResult> {
        self.sessions.attach_if_needed(tab).await?;
        let result = match Command::parse(command) {
            Some(Command::InspectPageMap) => {
                let map = self.inspect_page_map(tab, args).await;
                CommandResult::ok(serde_json::to_value(map)?)
            }
            Some(Command::GetActionContext) => self.action_context(tab, args).await,
            Some(Command::RunActions) => self.executor.run_batch(tab, args).await,
            None => CommandResult::failure(
                ErrorCode::CommandNotSupported,
                format!("Unsupported command: {}", command),
            ),
        };
        Ok(result)
    }

    /// `INSPECT_PAGE_MAP`: one summary per reachable context.
    pub async fn inspect_page_map(&self, tab: &TabId, args: &Value) -> PageMap {
        let mode = if arg_str(args, "mode") == Some("zoom") {
            "zoom"
        } else {
            "summary"
        };
        let target_selector = arg_str(args, "targetSelector");
        let max_nodes = arg_u32(args, "maxNodes", 180, 20, 500);
        let expression = js_templates::inspect_page(mode, target_selector, max_nodes);

        let mut summaries = Vec::new();
        let mut focused_selector = None;
        let mut zoom_hit = false;
        for context_id in self.resolver.context_order(tab) {
            let payload = match self
                .resolver
                .evaluate(tab, expression.clone(), context_id)
                .await
            {
                Ok(payload) if payload.is_object() => payload,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(tab = %tab, context = ?context_id, "inspect skipped: {}", e);
                    continue;
                }
            };

            let frame_id = self.resolver.frame_of(tab, context_id);
            if summaries.is_empty() {
                focused_selector = payload
                    .get("focusedSelector")
                    .and_then(|v| v.as_str())
                    .map(String::from);
            }
            zoom_hit |= payload.get("targetFound").and_then(|v| v.as_bool()) == Some(true);
            summaries.push(frame_summary(&payload, context_id.is_some(), frame_id));
        }

        let target_found = target_selector.is_some_and(|target| {
            (mode == "zoom" && zoom_hit)
                || summaries.iter().any(|summary| {
                    summary
                        .interactive
                        .iter()
                        .any(|node| node.get("selector").and_then(|v| v.as_str()) == Some(target))
                })
        });

        let (url, title) = summaries
            .first()
            .map(|s| (s.frame_url.clone(), s.frame_title.clone()))
            .unwrap_or_default();

        PageMap {
            mode: mode.to_string(),
            url,
            title,
            focused_selector,
            target_selector: target_selector.map(String::from),
            target_found,
            frame_summaries: summaries,
        }
    }

    /// `GET_ACTION_CONTEXT`: local neighbourhood of the first matching element.
    pub async fn action_context(&self, tab: &TabId, args: &Value) -> CommandResult {
        let Some(selector) = arg_str(args, "selector") else {
            return CommandResult::failure(
                ErrorCode::ValidationError,
                "selector is required for GET_ACTION_CONTEXT",
            );
        };
        let expression = js_templates::action_context(
            selector,
            arg_u32(args, "radius", 3, 1, 6),
            arg_u32(args, "maxSiblings", 8, 2, 20),
            arg_u32(args, "maxChildren", 16, 4, 40),
        );

        for context_id in self.resolver.context_order(tab) {
            let Ok(mut payload) = self
                .resolver
                .evaluate(tab, expression.clone(), context_id)
                .await
            else {
                continue;
            };
            if payload.get("found").and_then(|v| v.as_bool()) != Some(true) {
                continue;
            }
            if let Some(map) = payload.as_object_mut() {
                map.insert(
                    "frameId".to_string(),
                    json!(self.resolver.frame_of(tab, context_id)),
                );
            }
            return CommandResult::ok(payload);
        }

        CommandResult::ok(json!({
            "url": "",
            "frameTitle": "",
            "requestedSelector": selector,
            "found": false,
            "target": null,
            "ancestry": [],
            "siblings": [],
            "descendants": [],
        }))
    }
}

fn frame_summary(payload: &Value, in_frame: bool, frame_id: Option<String>) -> FrameSummary {
    let text = |key: &str| {
        payload
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let summary = payload.get("frameSummary");
    let count = |key: &str| {
        summary
            .and_then(|s| s.get(key))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };
    let list = |key: &str| {
        summary
            .and_then(|s| s.get(key))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
    };

    FrameSummary {
        mode: format!("{}:{}", text("mode"), if in_frame { "frame" } else { "top" }),
        frame_id,
        frame_url: text("url"),
        frame_title: text("title"),
        total_nodes: count("totalNodes"),
        interactive_count: count("interactiveCount"),
        landmarks: list("landmarks"),
        interactive: list("interactive"),
    }
}
