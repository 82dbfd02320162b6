use super::action_executor::ActionExecutor;
use super::cdp::CdpChannel;
use super::channel::{CommandChannel, ProtocolEvent};
use super::context_resolver::ContextResolver;
use super::diagnostics::{Diagnostics, DiagnosticsSink};
use super::dispatcher::CommandDispatcher;
use super::models::{ActionEvent, CommandResult, PageMap, SessionStatus, TabId, TabInfo};
use super::recording::{Recorder, RecorderState, SkillDraft};
use super::session_manager::{SessionManager, TaskGuard};
use super::session_store::{Folded, ReducerConfig, SessionStore};
use crate::Result;
use crate::config::Config;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

struct Inner {
    sessions: SessionManager,
    resolver: ContextResolver,
    dispatcher: CommandDispatcher,
    recorder: Recorder,
    cdp: Option<Arc<CdpChannel>>,
}

/// The engine's caller-facing surface. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TabRuntime {
    inner: Arc<Inner>,
}

impl TabRuntime {
    /// Engine driving a real browser through the DevTools protocol.
    pub fn connect(config: &Config, sink: Option<Arc<dyn DiagnosticsSink>>) -> Self {
        let cdp = Arc::new(CdpChannel::new(config.browser.clone()));
        Self::build(cdp.clone(), Some(cdp), config, sink)
    }

    /// Engine over any channel, with a fresh session registry.
    pub fn with_channel(
        channel: Arc<dyn CommandChannel>,
        config: &Config,
        sink: Option<Arc<dyn DiagnosticsSink>>,
    ) -> Self {
        Self::build(channel, None, config, sink)
    }

    fn build(
        channel: Arc<dyn CommandChannel>,
        cdp: Option<Arc<CdpChannel>>,
        config: &Config,
        sink: Option<Arc<dyn DiagnosticsSink>>,
    ) -> Self {
        let diagnostics = Diagnostics::new(sink);
        let store = Arc::new(SessionStore::new());
        let reducer = Arc::new(ReducerConfig::from_config(config));

        let sessions = SessionManager::new(channel.clone(), store.clone(), reducer, diagnostics.clone());
        let resolver = ContextResolver::new(channel.clone(), store, diagnostics.clone());
        let executor = ActionExecutor::new(
            channel,
            resolver.clone(),
            diagnostics.clone(),
            Duration::from_millis(config.runtime.poll_interval_ms),
        );
        let dispatcher = CommandDispatcher::new(
            sessions.clone(),
            resolver.clone(),
            executor,
            config.runtime.default_timeout_ms,
        );
        let recorder = Recorder::new(sessions.clone(), resolver.clone(), diagnostics);

        Self {
            inner: Arc::new(Inner {
                sessions,
                resolver,
                dispatcher,
                recorder,
                cdp,
            }),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        self.inner.sessions.store()
    }

    pub async fn attach_if_needed(&self, tab: &TabId) -> Result<()> {
        self.inner.sessions.attach_if_needed(tab).await
    }

    pub async fn detach_if_idle(&self, tab: &TabId) {
        self.inner.sessions.detach_if_idle(tab).await
    }

    pub async fn begin_task(&self, tab: &TabId, reason: &str) -> Result<()> {
        self.inner.sessions.begin_task(tab, reason).await
    }

    pub async fn end_task(&self, tab: &TabId) {
        self.inner.sessions.end_task(tab).await
    }

    pub async fn task(&self, tab: &TabId, reason: &str) -> Result<TaskGuard> {
        self.inner.sessions.task(tab, reason).await
    }

    pub async fn start_demo_capture(&self, tab: &TabId) -> Result<()> {
        self.inner.recorder.start(tab).await
    }

    pub async fn stop_demo_capture(&self, tab: &TabId) -> Vec<ActionEvent> {
        self.inner.recorder.stop(tab).await
    }

    pub fn recorder_state(&self, tab: &TabId) -> RecorderState {
        self.inner.recorder.state(tab)
    }

    /// Stops capture and packages the result for the skill writer, optionally
    /// with a page map taken while the session is still attached. Capture is
    /// stopped even when the page map cannot be taken; the draft then has none.
    pub async fn capture_skill_draft(
        &self,
        tab: &TabId,
        segment_ends: &[u64],
        with_page_map: bool,
    ) -> Result<SkillDraft> {
        let page_map = if with_page_map {
            match self.page_map(tab).await {
                Ok(map) => Some(map),
                Err(e) => {
                    self.inner.sessions.diagnostics().warn(&format!(
                        "[recorder] page map unavailable tab={}: {}",
                        tab, e
                    ));
                    None
                }
            }
        } else {
            None
        };
        let actions = self.stop_demo_capture(tab).await;
        Ok(SkillDraft::new(actions, segment_ends, page_map))
    }

    async fn page_map(&self, tab: &TabId) -> Result<PageMap> {
        self.attach_if_needed(tab).await?;
        Ok(self
            .inner
            .dispatcher
            .inspect_page_map(tab, &Value::Object(Default::default()))
            .await)
    }

    pub async fn run_command(
        &self,
        tab: &TabId,
        command: &str,
        args: Value,
        timeout_ms: Option<u64>,
    ) -> Result<CommandResult> {
        self.inner
            .dispatcher
            .run_command(tab, command, args, timeout_ms)
            .await
    }

    pub async fn cleanup_tab(&self, tab: &TabId) {
        self.inner.sessions.cleanup_tab(tab).await
    }

    pub async fn resolve_selector(&self, tab: &TabId, selector: &str) -> super::models::Resolution {
        self.inner.resolver.resolve_selector(tab, selector).await
    }

    pub fn context_order(&self, tab: &TabId) -> Vec<Option<i64>> {
        self.inner.resolver.context_order(tab)
    }

    pub fn status(&self, tab: &TabId) -> SessionStatus {
        self.store().status(tab)
    }

    pub fn sessions(&self) -> Vec<SessionStatus> {
        self.store()
            .tabs()
            .iter()
            .map(|tab| self.store().status(tab))
            .collect()
    }

    /// Folds a notification delivered outside the channel, for the current generation.
    pub fn handle_event(&self, tab: &TabId, event: ProtocolEvent) -> Folded {
        let generation = self.store().with(tab, |s| s.generation);
        self.store()
            .apply(tab, generation, event, self.inner.sessions.reducer())
    }

    pub async fn list_tabs(&self) -> Result<Vec<TabInfo>> {
        match &self.inner.cdp {
            Some(cdp) => cdp.list_tabs().await,
            None => Ok(self
                .store()
                .tabs()
                .into_iter()
                .map(|tab| TabInfo {
                    id: tab.to_string(),
                    title: String::new(),
                    url: String::new(),
                    target_type: "page".to_string(),
                })
                .collect()),
        }
    }
}
