#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tabpilot::chrome::{
    CommandChannel, DiagnosticsSink, EventSink, LogLevel, ProtocolCommand, ProtocolEvent, TabId,
    TabRuntime,
};
use tabpilot::config::Config;
use tabpilot::js_templates::script_kind;
use tabpilot::{Result, TabError};

#[derive(Debug, Clone)]
pub struct FakeElement {
    pub tag: String,
    pub rect: (f64, f64, f64, f64),
    pub value: String,
    pub text: String,
    pub max_length: Option<usize>,
}

impl FakeElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            rect: (10.0, 20.0, 100.0, 40.0),
            value: String::new(),
            text: String::new(),
            max_length: None,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.rect = (0.0, 0.0, 0.0, 0.0);
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    fn store(&mut self, value: String) {
        self.value = match self.max_length {
            Some(max) => value.chars().take(max).collect(),
            None => value,
        };
    }
}

#[derive(Default)]
struct Page {
    /// Keyed by evaluation context; `None` is the connection's default context.
    elements: HashMap<(Option<i64>, String), FakeElement>,
    contexts: Vec<(i64, Option<String>)>,
    failing_contexts: HashSet<i64>,
    inspect: HashMap<Option<i64>, Value>,
}

/// Scripted in-memory browser tab standing in for the DevTools connection.
#[derive(Default)]
pub struct FakeChannel {
    page: Mutex<Page>,
    sinks: Mutex<HashMap<TabId, EventSink>>,
    sent: Mutex<Vec<(TabId, ProtocolCommand)>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    scripts: AtomicUsize,
    open_delay: Mutex<Duration>,
    close_delay: Mutex<Duration>,
    evaluate_delay: Mutex<Duration>,
    fail_open: AtomicBool,
    fail_close: AtomicBool,
}

impl FakeChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Contexts announced to the session as soon as the connection opens.
    pub fn with_contexts(self: Arc<Self>, contexts: &[(i64, Option<&str>)]) -> Arc<Self> {
        self.page.lock().contexts = contexts
            .iter()
            .map(|(id, frame)| (*id, frame.map(String::from)))
            .collect();
        self
    }

    pub fn put(&self, context: Option<i64>, selector: &str, element: FakeElement) {
        self.page
            .lock()
            .elements
            .insert((context, selector.to_string()), element);
    }

    pub fn fail_context(&self, context: i64) {
        self.page.lock().failing_contexts.insert(context);
    }

    pub fn inspect_payload(&self, context: Option<i64>, payload: Value) {
        self.page.lock().inspect.insert(context, payload);
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock() = delay;
    }

    pub fn set_close_delay(&self, delay: Duration) {
        *self.close_delay.lock() = delay;
    }

    pub fn set_evaluate_delay(&self, delay: Duration) {
        *self.evaluate_delay.lock() = delay;
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Whether the tab currently has a live connection delivering events.
    pub fn is_open(&self, tab: &TabId) -> bool {
        self.sinks.lock().contains_key(tab)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn count(&self, method: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|(_, command)| command.method() == method)
            .count()
    }

    pub fn sent(&self) -> Vec<ProtocolCommand> {
        self.sent.lock().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn value_of(&self, context: Option<i64>, selector: &str) -> Option<String> {
        self.page
            .lock()
            .elements
            .get(&(context, selector.to_string()))
            .map(|e| e.value.clone())
    }

    /// Delivers a notification as if the browser had sent it.
    pub fn emit(&self, tab: &TabId, event: ProtocolEvent) {
        if let Some(sink) = self.sinks.lock().get(tab) {
            sink.send(event).ok();
        }
    }

    fn evaluate(&self, expression: &str, context: Option<i64>) -> Result<Value> {
        let mut page = self.page.lock();
        if let Some(id) = context
            && page.failing_contexts.contains(&id)
        {
            return Err(TabError::EvaluationError(
                "Execution context was destroyed".into(),
            ));
        }

        let kind = script_kind(expression).unwrap_or_default();
        if kind == "probe" {
            let selector = json_after(expression, "const selector = ").unwrap_or_default();
            return Ok(match page.elements.get(&(context, selector.clone())) {
                Some(el) => {
                    let (x, y, width, height) = el.rect;
                    json!({
                        "found": true,
                        "selector": selector,
                        "tag": el.tag,
                        "value": el.value,
                        "visible": width > 0.0 && height > 0.0,
                        "rect": {"x": x, "y": y, "width": width, "height": height},
                    })
                }
                None => json!({"found": false, "selector": selector}),
            });
        }
        if kind == "inspect" {
            return Ok(page.inspect.get(&context).cloned().unwrap_or_else(|| {
                json!({
                    "mode": "summary",
                    "url": "https://example.test/",
                    "title": "Example",
                    "frameSummary": {
                        "totalNodes": 0,
                        "interactiveCount": 0,
                        "landmarks": [],
                        "interactive": [],
                    },
                })
            }));
        }
        if kind == "recorder" {
            return Ok(json!("installed"));
        }

        let selector = json_after(expression, "const selector = ")
            .or_else(|| json_after(expression, "document.querySelector("))
            .unwrap_or_default();
        let Some(el) = page.elements.get_mut(&(context, selector.clone())) else {
            if kind == "context" {
                return Ok(json!({"found": false}));
            }
            return Ok(json!({"ok": false, "reason": "TARGET_NOT_FOUND"}));
        };
        Ok(match kind {
            "fill" => {
                let value = json_after(expression, "el.textContent = ").unwrap_or_default();
                el.store(value);
                json!({"ok": true})
            }
            "type" => {
                let text = json_after(expression, "insertText', false, ").unwrap_or_default();
                let value = format!("{}{}", el.value, text);
                el.store(value);
                json!({"ok": true})
            }
            "select" => {
                if el.tag != "select" {
                    json!({"ok": false, "reason": "NOT_SELECT"})
                } else {
                    el.value = json_after(expression, "el.value = ").unwrap_or_default();
                    json!({"ok": true})
                }
            }
            "read-value" => json!({"ok": true, "current": el.value}),
            "read-text" => json!({"ok": true, "text": el.text}),
            "context" => json!({
                "found": true,
                "requestedSelector": selector,
                "target": {"tag": el.tag, "selector": selector},
                "ancestry": [],
                "siblings": [],
                "descendants": [],
            }),
            _ => Value::Null,
        })
    }
}

/// Decodes the JSON string literal that follows `marker` in `expression`.
fn json_after(expression: &str, marker: &str) -> Option<String> {
    let start = expression.find(marker)? + marker.len();
    serde_json::Deserializer::from_str(&expression[start..])
        .into_iter::<String>()
        .next()?
        .ok()
}

#[async_trait]
impl CommandChannel for FakeChannel {
    async fn open(&self, tab: &TabId, events: EventSink) -> Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let delay = *self.open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(TabError::Connection("target refused connection".into()));
        }

        let contexts = self.page.lock().contexts.clone();
        for (context_id, frame_id) in contexts {
            events
                .send(ProtocolEvent::ContextCreated {
                    context_id,
                    unique_id: unique_id(context_id),
                    frame_id,
                    name: String::new(),
                    origin: "https://example.test".into(),
                })
                .ok();
        }
        self.sinks.lock().insert(tab.clone(), events);
        Ok(())
    }

    async fn send(&self, tab: &TabId, command: ProtocolCommand) -> Result<Value> {
        self.sent.lock().push((tab.clone(), command.clone()));
        match command {
            ProtocolCommand::Evaluate {
                expression,
                context_id,
            } => {
                let delay = *self.evaluate_delay.lock();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                self.evaluate(&expression, context_id)
            }
            ProtocolCommand::GetFrameTree => Ok(json!({
                "frameTree": {
                    "frame": {"id": "main", "url": "https://example.test/"},
                    "childFrames": [
                        {"frame": {"id": "editor", "url": "https://example.test/editor"}}
                    ],
                }
            })),
            ProtocolCommand::AddScriptOnNewDocument { .. } => {
                let n = self.scripts.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(json!({"identifier": format!("script-{}", n)}))
            }
            _ => Ok(json!({})),
        }
    }

    async fn close(&self, tab: &TabId) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.close_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.sinks.lock().remove(tab);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(TabError::Connection("socket already closed".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct CollectingSink {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl CollectingSink {
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }
}

impl DiagnosticsSink for CollectingSink {
    fn log(&self, level: LogLevel, message: &str) {
        self.entries.lock().push((level, message.to_string()));
    }
}

pub fn runtime(channel: &Arc<FakeChannel>) -> TabRuntime {
    TabRuntime::with_channel(channel.clone(), &Config::default(), None)
}

pub fn runtime_with_sink(channel: &Arc<FakeChannel>, sink: Arc<CollectingSink>) -> TabRuntime {
    TabRuntime::with_channel(channel.clone(), &Config::default(), Some(sink))
}

/// The browser-wide id the fake reports for a numeric context id.
pub fn unique_id(context_id: i64) -> String {
    format!("uid-{}", context_id)
}

pub fn tab() -> TabId {
    TabId::from("T1")
}

/// Polls until the event listener has folded what the test is waiting for.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached");
}
