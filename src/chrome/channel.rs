use super::models::TabId;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Notifications flow from the channel to the per-tab listener through this sink.
pub type EventSink = mpsc::UnboundedSender<ProtocolEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ProtocolEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MouseEventKind {
    MouseMoved,
    MousePressed,
    MouseReleased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyEventKind {
    KeyDown,
    KeyUp,
}

/// The remote commands this engine issues.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolCommand {
    EnablePage,
    EnableDom,
    EnableRuntime,
    EnableNetwork,
    EnableAccessibility,
    SetIgnoreInputEvents {
        ignore: bool,
    },
    AddBinding {
        name: String,
    },
    GetFrameTree,
    /// `context_id: None` evaluates in the connection's default context.
    Evaluate {
        expression: String,
        context_id: Option<i64>,
    },
    DispatchMouse {
        kind: MouseEventKind,
        x: f64,
        y: f64,
        click_count: Option<i64>,
    },
    DispatchKey {
        kind: KeyEventKind,
        key: String,
        text: Option<String>,
    },
    AddScriptOnNewDocument {
        source: String,
    },
    RemoveScriptOnNewDocument {
        identifier: String,
    },
}

impl ProtocolCommand {
    pub fn method(&self) -> &'static str {
        match self {
            Self::EnablePage => "Page.enable",
            Self::EnableDom => "DOM.enable",
            Self::EnableRuntime => "Runtime.enable",
            Self::EnableNetwork => "Network.enable",
            Self::EnableAccessibility => "Accessibility.enable",
            Self::SetIgnoreInputEvents { .. } => "Input.setIgnoreInputEvents",
            Self::AddBinding { .. } => "Runtime.addBinding",
            Self::GetFrameTree => "Page.getFrameTree",
            Self::Evaluate { .. } => "Runtime.evaluate",
            Self::DispatchMouse { .. } => "Input.dispatchMouseEvent",
            Self::DispatchKey { .. } => "Input.dispatchKeyEvent",
            Self::AddScriptOnNewDocument { .. } => "Page.addScriptToEvaluateOnNewDocument",
            Self::RemoveScriptOnNewDocument { .. } => "Page.removeScriptToEvaluateOnNewDocument",
        }
    }

    pub fn evaluate(expression: String, context_id: Option<i64>) -> Self {
        Self::Evaluate {
            expression,
            context_id,
        }
    }
}

/// Protocol notifications folded into the session store, one variant per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    ContextCreated {
        context_id: i64,
        /// Browser-wide id; destruction notices refer to contexts by this.
        unique_id: String,
        frame_id: Option<String>,
        name: String,
        origin: String,
    },
    ContextDestroyed {
        unique_id: String,
    },
    ContextsCleared,
    FrameNavigated {
        frame_id: String,
        url: String,
    },
    BindingCalled {
        name: String,
        payload: String,
        context_id: i64,
    },
    RequestWillBeSent {
        request_id: String,
        method: String,
        url: String,
    },
    ResponseReceived {
        request_id: String,
        url: String,
        status: i64,
        frame_id: Option<String>,
    },
    Detached {
        reason: String,
    },
}

/// Sends single commands to a debuggee and awaits their replies.
///
/// `send` returns the command's result object. For `Evaluate` it returns the
/// evaluated value itself (`returnByValue`), or an error when the page threw.
#[async_trait::async_trait]
pub trait CommandChannel: Send + Sync {
    /// Opens the connection to `tab`. Notifications for the tab go to `events`
    /// until `close` is called.
    async fn open(&self, tab: &TabId, events: EventSink) -> Result<()>;

    async fn send(&self, tab: &TabId, command: ProtocolCommand) -> Result<Value>;

    async fn close(&self, tab: &TabId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_methods() {
        assert_eq!(ProtocolCommand::EnableDom.method(), "DOM.enable");
        assert_eq!(
            ProtocolCommand::evaluate("1".into(), Some(3)).method(),
            "Runtime.evaluate"
        );
        assert_eq!(
            ProtocolCommand::AddBinding { name: "b".into() }.method(),
            "Runtime.addBinding"
        );
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = ProtocolEvent::ContextDestroyed {
            unique_id: "-7.4".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "context_destroyed");
        assert_eq!(json["unique_id"], "-7.4");
    }
}
