use super::channel::{CommandChannel, KeyEventKind, MouseEventKind, ProtocolCommand};
use super::context_resolver::ContextResolver;
use super::diagnostics::{Diagnostics, summarize_text};
use super::models::{CommandResult, Resolution, TabId};
use crate::error::ErrorCode;
use crate::js_templates;
use crate::timeouts::ms;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const MAX_BATCH: usize = 25;

/// Caller-supplied action before validation. Every field is optional here;
/// [`TypedAction::parse`] decides what each kind requires.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAction {
    #[serde(rename = "type")]
    kind: Option<String>,
    selector: Option<String>,
    value: Option<String>,
    text: Option<String>,
    key: Option<String>,
    ms: Option<f64>,
    timeout_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedAction {
    WaitForElement { selector: String, timeout_ms: u64 },
    Click { selector: String },
    Fill { selector: String, value: String },
    Type { selector: String, text: String },
    SelectOptions { selector: String, value: String },
    Keyboard { key: String },
    Delay { ms: u64 },
    ReadText { selector: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub kind: String,
    pub message: String,
}

fn clamp_ms(value: Option<f64>, default: u64, min: u64, max: u64) -> u64 {
    match value {
        Some(v) if v.is_finite() => (v.floor().max(0.0) as u64).clamp(min, max),
        _ => default,
    }
}

impl TypedAction {
    /// Validates one action object. Nothing remote happens before this succeeds.
    pub fn parse(value: &Value) -> std::result::Result<Self, ValidationError> {
        let raw: RawAction = serde_json::from_value(value.clone()).map_err(|e| ValidationError {
            kind: value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("unknown")
                .to_string(),
            message: format!("invalid action shape: {}", e),
        })?;
        let kind = raw.kind.clone().unwrap_or_else(|| "unknown".to_string());
        let invalid = |message: String| ValidationError {
            kind: kind.clone(),
            message,
        };

        match kind.as_str() {
            "delay" => {
                return Ok(Self::Delay {
                    ms: clamp_ms(raw.ms, ms::DELAY_DEFAULT, 0, ms::DELAY_MAX),
                });
            }
            "keyboard" => {
                return match raw.key.filter(|k| !k.is_empty()) {
                    Some(key) => Ok(Self::Keyboard { key }),
                    None => Err(invalid("keyboard action requires key".to_string())),
                };
            }
            "waitForElement" | "click" | "fill" | "type" | "selectOptions" | "readText" => {}
            other => return Err(invalid(format!("Unsupported action type: {}", other))),
        }

        let Some(selector) = raw.selector.filter(|s| !s.is_empty()) else {
            return Err(invalid(format!("{} action requires selector", kind)));
        };

        let action = match kind.as_str() {
            "waitForElement" => Self::WaitForElement {
                selector,
                timeout_ms: clamp_ms(
                    raw.timeout_ms,
                    ms::WAIT_FOR_ELEMENT_DEFAULT,
                    ms::WAIT_FOR_ELEMENT_MIN,
                    ms::WAIT_FOR_ELEMENT_MAX,
                ),
            },
            "click" => Self::Click { selector },
            "fill" => Self::Fill {
                selector,
                value: raw
                    .value
                    .ok_or_else(|| invalid("fill action requires value".to_string()))?,
            },
            "type" => Self::Type {
                selector,
                text: raw
                    .text
                    .ok_or_else(|| invalid("type action requires text".to_string()))?,
            },
            "selectOptions" => Self::SelectOptions {
                selector,
                value: raw
                    .value
                    .ok_or_else(|| invalid("selectOptions action requires value".to_string()))?,
            },
            _ => Self::ReadText { selector },
        };
        Ok(action)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::WaitForElement { .. } => "waitForElement",
            Self::Click { .. } => "click",
            Self::Fill { .. } => "fill",
            Self::Type { .. } => "type",
            Self::SelectOptions { .. } => "selectOptions",
            Self::Keyboard { .. } => "keyboard",
            Self::Delay { .. } => "delay",
            Self::ReadText { .. } => "readText",
        }
    }

    pub fn selector(&self) -> Option<&str> {
        match self {
            Self::WaitForElement { selector, .. }
            | Self::Click { selector }
            | Self::Fill { selector, .. }
            | Self::Type { selector, .. }
            | Self::SelectOptions { selector, .. }
            | Self::ReadText { selector } => Some(selector),
            Self::Keyboard { .. } | Self::Delay { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionState {
    Pending,
    Resolving,
    Executing,
    Verifying,
    Verified,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    #[serde(rename = "type")]
    pub kind: String,
    pub selector: Option<String>,
    pub value: Option<String>,
    pub text: Option<String>,
    pub state: ActionState,
    pub attempted: bool,
    pub executed: bool,
    pub verified: bool,
    pub evidence: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<String>,
}

impl ActionOutcome {
    fn pending(raw: &Value) -> Self {
        let field = |name: &str| raw.get(name).and_then(|v| v.as_str()).map(String::from);
        Self {
            kind: field("type").unwrap_or_else(|| "unknown".to_string()),
            selector: field("selector"),
            value: field("value"),
            text: field("text"),
            state: ActionState::Pending,
            attempted: true,
            executed: false,
            verified: false,
            evidence: String::new(),
            error_code: None,
            error: None,
            read_text: None,
            frame_id: None,
        }
    }

    fn advance(&mut self, state: ActionState) {
        tracing::trace!(kind = %self.kind, "{:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn fail(mut self, code: ErrorCode, error: impl Into<String>) -> Self {
        self.advance(ActionState::Failed);
        self.verified = false;
        self.error_code = Some(code);
        self.error = Some(error.into());
        self
    }

    fn verify(mut self, evidence: String) -> Self {
        self.advance(ActionState::Verified);
        self.executed = true;
        self.verified = true;
        self.evidence = evidence;
        self
    }
}

/// Runs typed actions against one tab: resolve, execute, verify.
#[derive(Clone)]
pub struct ActionExecutor {
    channel: Arc<dyn CommandChannel>,
    resolver: ContextResolver,
    diagnostics: Diagnostics,
    poll_interval: Duration,
}

impl ActionExecutor {
    pub fn new(
        channel: Arc<dyn CommandChannel>,
        resolver: ContextResolver,
        diagnostics: Diagnostics,
        poll_interval: Duration,
    ) -> Self {
        Self {
            channel,
            resolver,
            diagnostics,
            poll_interval,
        }
    }

    pub async fn execute(&self, tab: &TabId, raw: &Value) -> ActionOutcome {
        let outcome = ActionOutcome::pending(raw);
        let action = match TypedAction::parse(raw) {
            Ok(action) => action,
            Err(e) => return outcome.fail(ErrorCode::ValidationError, e.message),
        };

        let outcome = self.run(tab, &action, outcome).await;
        self.diagnostics.info(&format!(
            "[action] tab={} type={} selector={} executed={} verified={}{}",
            tab,
            action.kind(),
            summarize_text(action.selector().unwrap_or("-"), 100),
            outcome.executed,
            outcome.verified,
            outcome
                .error_code
                .map(|code| format!(" error={}", code))
                .unwrap_or_default()
        ));
        outcome
    }

    async fn run(&self, tab: &TabId, action: &TypedAction, mut outcome: ActionOutcome) -> ActionOutcome {
        match action {
            TypedAction::Delay { ms } => {
                outcome.advance(ActionState::Executing);
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                outcome.verify(format!("delay {}ms", ms))
            }
            TypedAction::Keyboard { key } => {
                outcome.advance(ActionState::Executing);
                match self.press_key(tab, key).await {
                    Ok(()) => outcome.verify(format!("keyboard {}", key)),
                    Err(e) => outcome.fail(ErrorCode::ExecutionError, e.to_string()),
                }
            }
            TypedAction::WaitForElement {
                selector,
                timeout_ms,
            } => {
                outcome.advance(ActionState::Resolving);
                self.wait_for_element(tab, selector, *timeout_ms, outcome).await
            }
            _ => {
                let selector = action.selector().unwrap_or_default();
                outcome.advance(ActionState::Resolving);
                let resolved = self.resolver.resolve_selector(tab, selector).await;
                if !resolved.found {
                    outcome.evidence = "resolver did not find target in any context".to_string();
                    return outcome.fail(
                        ErrorCode::TargetNotResolved,
                        format!("Selector not found: {}", selector),
                    );
                }
                outcome.frame_id = resolved.frame_id.clone();
                outcome.advance(ActionState::Executing);
                match self.perform(tab, action, &resolved, outcome.clone()).await {
                    Ok(done) => done,
                    Err(e) => outcome.fail(ErrorCode::ExecutionError, e.to_string()),
                }
            }
        }
    }

    async fn wait_for_element(
        &self,
        tab: &TabId,
        selector: &str,
        timeout_ms: u64,
        mut outcome: ActionOutcome,
    ) -> ActionOutcome {
        let started = Instant::now();
        let deadline = Duration::from_millis(timeout_ms);
        while started.elapsed() < deadline {
            let resolved = self.resolver.resolve_selector(tab, selector).await;
            if resolved.found {
                outcome.frame_id = resolved.frame_id;
                let waited = started.elapsed().as_millis().max(1);
                return outcome.verify(format!("found in {}ms", waited));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        outcome.evidence = "not found before timeout".to_string();
        outcome.fail(
            ErrorCode::Timeout,
            format!("Timeout waiting for selector: {}", selector),
        )
    }

    async fn press_key(&self, tab: &TabId, key: &str) -> crate::Result<()> {
        let text = (key.chars().count() == 1).then(|| key.to_string());
        self.channel
            .send(
                tab,
                ProtocolCommand::DispatchKey {
                    kind: KeyEventKind::KeyDown,
                    key: key.to_string(),
                    text,
                },
            )
            .await?;
        self.channel
            .send(
                tab,
                ProtocolCommand::DispatchKey {
                    kind: KeyEventKind::KeyUp,
                    key: key.to_string(),
                    text: None,
                },
            )
            .await?;
        Ok(())
    }

    async fn click(&self, tab: &TabId, x: f64, y: f64) -> crate::Result<()> {
        let sequence = [
            (MouseEventKind::MouseMoved, None),
            (MouseEventKind::MousePressed, Some(1)),
            (MouseEventKind::MouseReleased, Some(1)),
        ];
        for (kind, click_count) in sequence {
            self.channel
                .send(
                    tab,
                    ProtocolCommand::DispatchMouse {
                        kind,
                        x,
                        y,
                        click_count,
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Runs a page-side action script; `Err` carries the page's failure reason.
    async fn run_script(
        &self,
        tab: &TabId,
        expression: String,
        context_id: Option<i64>,
    ) -> crate::Result<std::result::Result<Value, (ErrorCode, String)>> {
        let payload = self.resolver.evaluate(tab, expression, context_id).await?;
        if payload.get("ok").and_then(|v| v.as_bool()) == Some(true) {
            return Ok(Ok(payload));
        }
        let code = payload
            .get("reason")
            .and_then(|v| v.as_str())
            .map(ErrorCode::from_page_reason)
            .unwrap_or(ErrorCode::ExecutionError);
        Ok(Err((code, summarize_text(&payload.to_string(), 200))))
    }

    async fn perform(
        &self,
        tab: &TabId,
        action: &TypedAction,
        resolved: &Resolution,
        mut outcome: ActionOutcome,
    ) -> crate::Result<ActionOutcome> {
        let context_id = resolved.context_id;
        let selector = resolved.selector.as_str();

        let (expression, expected) = match action {
            TypedAction::Click { .. } => {
                let rect = resolved.rect();
                if !rect.is_interactable() {
                    outcome.evidence = "target rect is not visible".to_string();
                    return Ok(outcome.fail(
                        ErrorCode::NotInteractable,
                        format!("Target is not visible: {}", selector),
                    ));
                }
                let (x, y) = rect.center();
                self.click(tab, x, y).await?;
                return Ok(outcome.verify(format!("clicked at ({}, {})", x, y)));
            }
            TypedAction::ReadText { .. } => {
                return Ok(
                    match self
                        .run_script(tab, js_templates::read_text(selector), context_id)
                        .await?
                    {
                        Ok(payload) => {
                            let text = payload
                                .get("text")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string();
                            outcome.read_text = Some(text.clone());
                            outcome.verify(summarize_text(&text, 180))
                        }
                        Err((code, evidence)) => {
                            outcome.evidence = evidence;
                            outcome.fail(code, "Failed to execute readText")
                        }
                    },
                );
            }
            TypedAction::Fill { value, .. } => {
                (js_templates::fill(selector, value), Expected::Contains(value))
            }
            TypedAction::Type { text, .. } => {
                (js_templates::type_text(selector, text), Expected::Contains(text))
            }
            TypedAction::SelectOptions { value, .. } => {
                let is_select = resolved
                    .element
                    .as_ref()
                    .and_then(|e| e.tag.as_deref())
                    .is_some_and(|tag| tag.eq_ignore_ascii_case("select"));
                if !is_select {
                    return Ok(outcome.fail(
                        ErrorCode::NotSelect,
                        format!("Target is not a select element: {}", selector),
                    ));
                }
                (js_templates::select_option(selector, value), Expected::Equals(value))
            }
            TypedAction::WaitForElement { .. } | TypedAction::Keyboard { .. } | TypedAction::Delay { .. } => {
                return Ok(outcome.verify("action executed".to_string()));
            }
        };

        if let Err((code, evidence)) = self.run_script(tab, expression, context_id).await? {
            outcome.evidence = evidence;
            return Ok(outcome.fail(code, format!("Failed to execute {}", action.kind())));
        }
        outcome.executed = true;

        outcome.advance(ActionState::Verifying);
        let current = match self
            .run_script(tab, js_templates::read_value(selector), context_id)
            .await?
        {
            Ok(payload) => payload
                .get("current")
                .and_then(|v| v.as_str())
                .map(String::from),
            Err(_) => None,
        };

        let verified = current.as_deref().is_some_and(|c| expected.matches(c));
        let evidence = summarize_text(
            &format!("current=\"{}\"", current.as_deref().unwrap_or_default()),
            220,
        );
        self.diagnostics.debug(&format!(
            "[verify] tab={} type={} selector={} verified={} evidence={}",
            tab,
            action.kind(),
            summarize_text(selector, 100),
            verified,
            summarize_text(&evidence, 120)
        ));
        if verified {
            Ok(outcome.verify(evidence))
        } else {
            outcome.evidence = evidence;
            Ok(outcome.fail(
                ErrorCode::VerifyFailed,
                format!("Verification failed for {} on {}", action.kind(), selector),
            ))
        }
    }

    /// Executes 1..=25 actions in order, stopping at the first unverified one.
    pub async fn run_batch(&self, tab: &TabId, args: &Value) -> CommandResult {
        let actions = match args.get("actions").and_then(|v| v.as_array()) {
            Some(actions) if !actions.is_empty() => actions,
            _ => {
                return CommandResult::failure(
                    ErrorCode::ValidationError,
                    "RUN_ACTIONS requires at least one action",
                );
            }
        };
        if actions.len() > MAX_BATCH {
            return CommandResult::failure(
                ErrorCode::ValidationError,
                format!("RUN_ACTIONS supports up to {} actions", MAX_BATCH),
            );
        }

        let mut results = Vec::with_capacity(actions.len());
        let mut executed = Vec::new();
        let mut all_verified = true;
        for (index, raw) in actions.iter().enumerate() {
            let outcome = self.execute(tab, raw).await;
            if outcome.executed {
                executed.push(json!({
                    "index": index,
                    "type": outcome.kind,
                    "selector": outcome.selector,
                }));
            }
            let verified = outcome.verified;
            results.push((index, outcome));
            if !verified {
                all_verified = false;
                break;
            }
        }

        let first_failed = results
            .iter()
            .find(|(_, o)| !o.verified)
            .map(|(_, o)| (o.error_code, o.error.clone()));
        let output = json!({
            "summary": args.get("summary").and_then(|v| v.as_str()).unwrap_or_default(),
            "attempted": actions.len(),
            "executedCount": results.iter().filter(|(_, o)| o.executed).count(),
            "verifiedCount": results.iter().filter(|(_, o)| o.verified).count(),
            "allVerified": all_verified,
            "results": results
                .iter()
                .map(|(index, outcome)| {
                    let mut entry = serde_json::to_value(outcome).unwrap_or(Value::Null);
                    if let Some(map) = entry.as_object_mut() {
                        map.insert("index".to_string(), json!(index));
                    }
                    entry
                })
                .collect::<Vec<_>>(),
            "executed": executed,
        });

        match first_failed {
            None => CommandResult::ok(output),
            Some((code, error)) => CommandResult::failure(
                code.unwrap_or(ErrorCode::VerifyFailed),
                error.unwrap_or_else(|| "One or more actions were not verified".to_string()),
            )
            .with_output(output),
        }
    }
}

enum Expected<'a> {
    Contains(&'a str),
    Equals(&'a str),
}

impl Expected<'_> {
    fn matches(&self, current: &str) -> bool {
        match self {
            Self::Contains(expected) => current.contains(expected),
            Self::Equals(expected) => current == *expected,
        }
    }
}
