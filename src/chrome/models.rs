use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Opaque id of one browser tab, as assigned by the browser (`Target.targetId`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(String);

impl TabId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TabId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TabId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One script execution environment inside one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    pub context_id: i64,
    #[serde(default)]
    pub unique_id: String,
    pub frame_id: Option<String>,
    pub name: String,
    pub origin: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}

impl Rect {
    pub fn is_interactable(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.x + self.width / 2.0).round(),
            (self.y + self.height / 2.0).round(),
        )
    }
}

/// What the selector probe reports about a matched element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSnapshot {
    #[serde(default)]
    pub found: bool,
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub aria_label: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub content_editable: bool,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub rect: Option<Rect>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub found: bool,
    pub selector: String,
    /// `None` when the match came from the default context.
    pub context_id: Option<i64>,
    pub frame_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<ElementSnapshot>,
}

impl Resolution {
    pub fn not_found(selector: &str) -> Self {
        Self {
            found: false,
            selector: selector.to_string(),
            context_id: None,
            frame_id: None,
            element: None,
        }
    }

    pub fn rect(&self) -> Rect {
        self.element
            .as_ref()
            .and_then(|e| e.rect)
            .unwrap_or_default()
    }
}

/// One observed user action or network completion captured while recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionEvent {
    #[serde(rename = "action")]
    pub action_kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(default)]
    pub frame_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<i64>,
    #[serde(default)]
    pub timestamp: u64,
    /// Remaining page-reported fields (tag, ariaLabel, confidence, ...).
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl ActionEvent {
    pub fn network(
        method: String,
        url: String,
        status: i64,
        frame_id: Option<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            action_kind: "network".to_string(),
            selector: None,
            value: None,
            key: None,
            method: Some(method),
            url: Some(url),
            status: Some(status),
            frame_id,
            context_id: None,
            timestamp,
            details: Map::new(),
        }
    }

    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(|v| v.as_str())
    }
}

/// Normalised outcome of one dispatched command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl CommandResult {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            error_code: None,
            error: None,
            output: Some(output),
        }
    }

    pub fn failure(code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: Some(code),
            error: Some(error.into()),
            output: None,
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    InspectPageMap,
    GetActionContext,
    RunActions,
}

impl Command {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "INSPECT_PAGE_MAP" => Some(Self::InspectPageMap),
            "GET_ACTION_CONTEXT" => Some(Self::GetActionContext),
            "RUN_ACTIONS" => Some(Self::RunActions),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InspectPageMap => "INSPECT_PAGE_MAP",
            Self::GetActionContext => "GET_ACTION_CONTEXT",
            Self::RunActions => "RUN_ACTIONS",
        }
    }
}

/// Per-context summary produced by `INSPECT_PAGE_MAP`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSummary {
    pub mode: String,
    pub frame_id: Option<String>,
    pub frame_url: String,
    pub frame_title: String,
    pub total_nodes: u64,
    pub interactive_count: u64,
    pub landmarks: Vec<Value>,
    pub interactive: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMap {
    pub mode: String,
    pub url: String,
    pub title: String,
    pub focused_selector: Option<String>,
    pub target_selector: Option<String>,
    pub target_found: bool,
    pub frame_summaries: Vec<FrameSummary>,
}

/// Serialisable view of one session, for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub tab: TabId,
    pub attached: bool,
    pub attaching: bool,
    pub task_refs: usize,
    pub recording: bool,
    pub context_count: usize,
    pub frame_urls: std::collections::BTreeMap<String, String>,
    pub buffered_events: usize,
    pub correlation_id: Option<String>,
    pub attached_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A page target listed by the DevTools HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "type")]
    pub target_type: String,
}
