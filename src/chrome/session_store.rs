use super::channel::ProtocolEvent;
use super::models::{ActionEvent, ContextInfo, SessionStatus, TabId};
use crate::config::Config;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Event-folding settings shared by every session.
#[derive(Debug, Clone)]
pub struct ReducerConfig {
    pub binding_name: String,
    pub significant_get_patterns: Vec<String>,
}

impl ReducerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            binding_name: config.runtime.binding_name.clone(),
            significant_get_patterns: config.recorder.significant_get_patterns.clone(),
        }
    }

    /// Mutating requests are always significant; GETs only when the URL matches a pattern.
    pub fn is_significant(&self, method: &str, url: &str) -> bool {
        if !method.eq_ignore_ascii_case("GET") {
            return true;
        }
        self.significant_get_patterns
            .iter()
            .any(|pattern| url.contains(pattern.as_str()))
    }
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub method: String,
    pub url: String,
}

/// What folding one event did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Folded {
    Applied,
    Recorded,
    Ignored,
    Dropped(String),
    Detached(String),
}

/// Per-tab state. Created lazily by [`SessionStore`] and reset, never removed.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub attached: bool,
    pub attaching: bool,
    pub task_refs: usize,
    pub recording: bool,
    /// Set while a capture is being installed, before `recording` flips on.
    pub armed: bool,
    pub contexts: HashMap<i64, ContextInfo>,
    pub frame_urls: HashMap<String, String>,
    pub frame_tree: Option<Value>,
    pub recorder_script_id: Option<String>,
    pub recorded_actions: Vec<ActionEvent>,
    pub pending_requests: HashMap<String, PendingRequest>,
    pub correlation_id: Option<String>,
    pub attached_at: Option<DateTime<Utc>>,
    /// Bumped on every attach attempt; listeners of older attempts are ignored.
    pub generation: u64,
}

impl Session {
    fn is_live(&self) -> bool {
        self.attached || self.attaching
    }

    pub fn is_idle(&self) -> bool {
        self.task_refs == 0 && !self.recording && !self.armed
    }

    /// Folds one notification into the session.
    pub fn apply(&mut self, event: ProtocolEvent, config: &ReducerConfig, now: u64) -> Folded {
        match event {
            ProtocolEvent::ContextCreated {
                context_id,
                unique_id,
                frame_id,
                name,
                origin,
            } => {
                if !self.is_live() {
                    return Folded::Ignored;
                }
                self.contexts.insert(
                    context_id,
                    ContextInfo {
                        context_id,
                        unique_id,
                        frame_id,
                        name,
                        origin,
                    },
                );
                Folded::Applied
            }
            ProtocolEvent::ContextDestroyed { unique_id } => {
                let before = self.contexts.len();
                self.contexts.retain(|_, ctx| ctx.unique_id != unique_id);
                if self.contexts.len() < before {
                    Folded::Applied
                } else {
                    Folded::Ignored
                }
            }
            ProtocolEvent::ContextsCleared => {
                self.contexts.clear();
                Folded::Applied
            }
            ProtocolEvent::FrameNavigated { frame_id, url } => {
                if !self.is_live() {
                    return Folded::Ignored;
                }
                self.frame_urls.insert(frame_id, url);
                Folded::Applied
            }
            ProtocolEvent::BindingCalled {
                name,
                payload,
                context_id,
            } => {
                if name != config.binding_name || !self.recording {
                    return Folded::Ignored;
                }
                match serde_json::from_str::<ActionEvent>(&payload) {
                    Ok(mut action) => {
                        let ts = action
                            .details
                            .remove("ts")
                            .and_then(|v| v.as_f64())
                            .filter(|ts| *ts > 0.0);
                        action.timestamp = ts.map(|ts| ts as u64).unwrap_or(now);
                        action.frame_id = self
                            .contexts
                            .get(&context_id)
                            .and_then(|ctx| ctx.frame_id.clone());
                        action.context_id = Some(context_id);
                        self.recorded_actions.push(action);
                        Folded::Recorded
                    }
                    Err(e) => Folded::Dropped(format!("malformed binding payload: {}", e)),
                }
            }
            ProtocolEvent::RequestWillBeSent {
                request_id,
                method,
                url,
            } => {
                if !self.recording {
                    return Folded::Ignored;
                }
                self.pending_requests
                    .insert(request_id, PendingRequest { method, url });
                Folded::Applied
            }
            ProtocolEvent::ResponseReceived {
                request_id,
                url,
                status,
                frame_id,
            } => {
                if !self.recording {
                    return Folded::Ignored;
                }
                let Some(request) = self.pending_requests.remove(&request_id) else {
                    return Folded::Ignored;
                };
                if !config.is_significant(&request.method, &url) {
                    return Folded::Ignored;
                }
                self.recorded_actions.push(ActionEvent::network(
                    request.method,
                    url,
                    status,
                    frame_id,
                    now,
                ));
                Folded::Recorded
            }
            ProtocolEvent::Detached { reason } => {
                self.reset_connection();
                self.recording = false;
                Folded::Detached(reason)
            }
        }
    }

    /// Drops everything tied to the live connection in one step.
    pub fn reset_connection(&mut self) {
        self.attached = false;
        self.contexts.clear();
        self.frame_urls.clear();
        self.frame_tree = None;
        self.recorder_script_id = None;
        self.pending_requests.clear();
    }

    pub fn context_snapshot(&self) -> Vec<ContextInfo> {
        self.contexts.values().cloned().collect()
    }

    /// Empties the capture buffer, returning its events in timestamp order.
    pub fn take_recording(&mut self) -> Vec<ActionEvent> {
        let mut actions = std::mem::take(&mut self.recorded_actions);
        actions.sort_by_key(|a| a.timestamp);
        self.pending_requests.clear();
        actions
    }

    /// Seeds `frame_urls` from a `Page.getFrameTree` reply.
    pub fn seed_frame_tree(&mut self, tree: Value) {
        let root = tree.get("frameTree").cloned().unwrap_or(tree);
        collect_frame_urls(&root, &mut self.frame_urls);
        self.frame_tree = Some(root);
    }

    pub fn status(&self, tab: &TabId) -> SessionStatus {
        SessionStatus {
            tab: tab.clone(),
            attached: self.attached,
            attaching: self.attaching,
            task_refs: self.task_refs,
            recording: self.recording,
            context_count: self.contexts.len(),
            frame_urls: self
                .frame_urls
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            buffered_events: self.recorded_actions.len(),
            correlation_id: self.correlation_id.clone(),
            attached_at: self.attached_at,
        }
    }
}

fn collect_frame_urls(node: &Value, out: &mut HashMap<String, String>) {
    if let Some(frame) = node.get("frame")
        && let (Some(id), Some(url)) = (
            frame.get("id").and_then(|v| v.as_str()),
            frame.get("url").and_then(|v| v.as_str()),
        )
    {
        out.insert(id.to_string(), url.to_string());
    }
    if let Some(children) = node.get("childFrames").and_then(|v| v.as_array()) {
        for child in children {
            collect_frame_urls(child, out);
        }
    }
}

/// Registry of sessions keyed by tab. One instance per engine; no global state.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<TabId, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against the tab's session, creating it on first use.
    /// The lock is held only for the duration of `f`.
    pub fn with<R>(&self, tab: &TabId, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(tab.clone()).or_default();
        f(session)
    }

    /// Folds an event delivered by the listener of attach `generation`.
    pub fn apply(
        &self,
        tab: &TabId,
        generation: u64,
        event: ProtocolEvent,
        config: &ReducerConfig,
    ) -> Folded {
        self.with(tab, |session| {
            if session.generation != generation {
                return Folded::Ignored;
            }
            session.apply(event, config, now_ms())
        })
    }

    pub fn snapshot(&self, tab: &TabId) -> Session {
        self.with(tab, |session| session.clone())
    }

    pub fn status(&self, tab: &TabId) -> SessionStatus {
        self.with(tab, |session| session.status(tab))
    }

    pub fn tabs(&self) -> Vec<TabId> {
        let mut tabs: Vec<TabId> = self.sessions.lock().keys().cloned().collect();
        tabs.sort();
        tabs
    }
}
