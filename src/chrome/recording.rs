use super::channel::{CommandChannel, ProtocolCommand};
use super::context_resolver::ContextResolver;
use super::diagnostics::Diagnostics;
use super::models::{ActionEvent, PageMap, TabId};
use super::session_manager::SessionManager;
use crate::Result;
use crate::js_templates;
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    Idle,
    Armed,
    Recording,
}

/// Demo capture: installs the page-side recorder and collects what it reports.
#[derive(Clone)]
pub struct Recorder {
    sessions: SessionManager,
    resolver: ContextResolver,
    diagnostics: Diagnostics,
}

impl Recorder {
    pub fn new(sessions: SessionManager, resolver: ContextResolver, diagnostics: Diagnostics) -> Self {
        Self {
            sessions,
            resolver,
            diagnostics,
        }
    }

    fn channel(&self) -> &Arc<dyn CommandChannel> {
        self.sessions.channel()
    }

    pub fn state(&self, tab: &TabId) -> RecorderState {
        self.sessions.store().with(tab, |s| {
            if s.recording {
                RecorderState::Recording
            } else if s.armed {
                RecorderState::Armed
            } else {
                RecorderState::Idle
            }
        })
    }

    /// Injects the recorder into every live context and registers it for
    /// future documents, then starts buffering.
    ///
    /// The tab stays armed (and so busy) from the first step until recording
    /// starts, which keeps an idle detach from closing it mid-install.
    pub async fn start(&self, tab: &TabId) -> Result<()> {
        self.sessions.store().with(tab, |s| s.armed = true);
        if let Err(e) = self.sessions.attach_if_needed(tab).await {
            self.sessions.store().with(tab, |s| s.armed = false);
            return Err(e);
        }
        self.ensure_installed(tab).await;

        self.sessions.store().with(tab, |s| {
            s.recorded_actions.clear();
            s.pending_requests.clear();
            s.recording = true;
            s.armed = false;
        });
        self.diagnostics
            .info(&format!("[recorder] demo capture started tab={}", tab));
        Ok(())
    }

    async fn ensure_installed(&self, tab: &TabId) {
        let binding = self.sessions.reducer().binding_name.clone();
        let script = js_templates::recorder_install(&binding);

        for context_id in self.resolver.context_order(tab) {
            if let Err(e) = self.resolver.evaluate(tab, script.clone(), context_id).await {
                tracing::debug!(tab = %tab, context = ?context_id, "recorder injection skipped: {}", e);
            }
        }

        if self.sessions.store().with(tab, |s| s.recorder_script_id.is_some()) {
            return;
        }
        match self
            .channel()
            .send(tab, ProtocolCommand::AddScriptOnNewDocument { source: script })
            .await
        {
            Ok(reply) => {
                let identifier = reply
                    .get("identifier")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                self.sessions
                    .store()
                    .with(tab, |s| s.recorder_script_id = identifier);
            }
            Err(e) => self.diagnostics.error(&format!(
                "[recorder] failed to add bootstrap script tab={}: {}",
                tab, e
            )),
        }
    }

    /// Stops buffering and returns the captured events in timestamp order.
    pub async fn stop(&self, tab: &TabId) -> Vec<ActionEvent> {
        let actions = self.sessions.store().with(tab, |s| {
            s.recording = false;
            s.take_recording()
        });
        self.sessions.detach_if_idle(tab).await;
        self.diagnostics.info(&format!(
            "[recorder] demo capture stopped tab={} actions={}",
            tab,
            actions.len()
        ));
        actions
    }
}

/// Events narrated by one transcript segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub index: usize,
    pub ends_at: Option<u64>,
    pub events: Vec<ActionEvent>,
}

/// Splits time-ordered `events` by segment end timestamps.
///
/// An event belongs to the first segment ending at or after it. Events past
/// the last boundary stay with the last segment.
pub fn assign_segments(events: Vec<ActionEvent>, segment_ends: &[u64]) -> Vec<Segment> {
    let mut ends = segment_ends.to_vec();
    ends.sort_unstable();
    ends.dedup();

    if ends.is_empty() {
        return vec![Segment {
            index: 0,
            ends_at: None,
            events,
        }];
    }

    let mut segments: Vec<Segment> = ends
        .iter()
        .enumerate()
        .map(|(index, end)| Segment {
            index,
            ends_at: Some(*end),
            events: Vec::new(),
        })
        .collect();
    let last = segments.len() - 1;

    for event in events {
        let slot = ends
            .iter()
            .position(|end| *end >= event.timestamp)
            .unwrap_or(last);
        segments[slot].events.push(event);
    }
    segments
}

/// What the capture hands to the skill writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillDraft {
    pub actions: Vec<ActionEvent>,
    pub segments: Vec<Segment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_map: Option<PageMap>,
}

impl SkillDraft {
    pub fn new(actions: Vec<ActionEvent>, segment_ends: &[u64], page_map: Option<PageMap>) -> Self {
        let segments = assign_segments(actions.clone(), segment_ends);
        Self {
            actions,
            segments,
            page_map,
        }
    }

    pub fn event_summary(&self) -> Vec<String> {
        self.actions.iter().map(describe_event).collect()
    }
}

/// Relative stamps (under a day) render as seconds, absolute ones as RFC 3339.
pub fn format_timestamp(ts: u64) -> String {
    if ts < DAY_MS {
        return format!("{:.2}s", ts as f64 / 1000.0);
    }
    DateTime::from_timestamp_millis(ts as i64)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| "unknown-time".to_string())
}

pub fn describe_event(event: &ActionEvent) -> String {
    let ts = format_timestamp(event.timestamp);
    if event.action_kind == "network" {
        return format!(
            "[{}] [network] {} {} → {}",
            ts,
            event.method.as_deref().unwrap_or("?"),
            event.url.as_deref().unwrap_or(""),
            event
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
    }

    let mut line = format!(
        "[{}] [{}] {}",
        ts,
        event.action_kind,
        event.detail_str("tag").unwrap_or("-")
    );
    let parts = [
        ("selector", event.selector.as_deref()),
        ("label", event.detail_str("ariaLabel")),
        ("value", event.value.as_deref()),
        ("key", event.key.as_deref()),
        ("confidence", event.detail_str("confidence")),
    ];
    for (name, value) in parts {
        if let Some(value) = value {
            line.push_str(&format!(" | {}: {}", name, value));
        }
    }
    line
}
