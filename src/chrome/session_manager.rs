use super::channel::{CommandChannel, ProtocolCommand};
use super::diagnostics::{Diagnostics, summarize_text};
use super::event_listener;
use super::models::TabId;
use super::session_store::{ReducerConfig, SessionStore};
use crate::{Result, TabError};
use chrono::Utc;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

type AttachAttempt = Shared<BoxFuture<'static, std::result::Result<(), String>>>;
/// Held across a whole attach or detach so the two never overlap on one tab.
type LifecycleLock = Arc<tokio::sync::Mutex<()>>;

/// Owns the attach/detach lifecycle of every tab's protocol connection.
#[derive(Clone)]
pub struct SessionManager {
    channel: Arc<dyn CommandChannel>,
    store: Arc<SessionStore>,
    reducer: Arc<ReducerConfig>,
    diagnostics: Diagnostics,
    attach_locks: Arc<Mutex<HashMap<TabId, AttachAttempt>>>,
    lifecycle: Arc<Mutex<HashMap<TabId, LifecycleLock>>>,
}

impl SessionManager {
    pub fn new(
        channel: Arc<dyn CommandChannel>,
        store: Arc<SessionStore>,
        reducer: Arc<ReducerConfig>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            channel,
            store,
            reducer,
            diagnostics,
            attach_locks: Arc::new(Mutex::new(HashMap::new())),
            lifecycle: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lifecycle_lock(&self, tab: &TabId) -> LifecycleLock {
        self.lifecycle.lock().entry(tab.clone()).or_default().clone()
    }

    pub fn channel(&self) -> &Arc<dyn CommandChannel> {
        &self.channel
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn reducer(&self) -> &Arc<ReducerConfig> {
        &self.reducer
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Attaches to `tab` unless already attached. Concurrent callers share one
    /// in-flight attempt and all observe its outcome. An attempt that starts
    /// while a detach is closing the connection waits for it, then reopens.
    pub async fn attach_if_needed(&self, tab: &TabId) -> Result<()> {
        if self.store.with(tab, |s| s.attached) {
            return Ok(());
        }

        let attempt = {
            let mut locks = self.attach_locks.lock();
            match locks.get(tab) {
                Some(in_flight) => in_flight.clone(),
                None => {
                    if self.store.with(tab, |s| s.attached) {
                        return Ok(());
                    }
                    let manager = self.clone();
                    let target = tab.clone();
                    let attempt = async move {
                        let _transition = manager.lifecycle_lock(&target).lock_owned().await;
                        if manager.store.with(&target, |s| s.attached) {
                            return Ok(());
                        }
                        manager
                            .run_attach(&target)
                            .await
                            .map_err(|e| e.to_string())
                    }
                    .boxed()
                    .shared();
                    locks.insert(tab.clone(), attempt.clone());
                    attempt
                }
            }
        };

        let outcome = attempt.clone().await;

        {
            let mut locks = self.attach_locks.lock();
            if locks.get(tab).is_some_and(|held| held.ptr_eq(&attempt)) {
                locks.remove(tab);
            }
        }

        outcome.map_err(TabError::AttachFailed)
    }

    async fn run_attach(&self, tab: &TabId) -> Result<()> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let generation = self.store.with(tab, |s| {
            s.attaching = true;
            s.generation += 1;
            s.correlation_id = Some(correlation_id.clone());
            s.generation
        });
        self.diagnostics.debug(&format!(
            "[session] attaching tab={} correlation={}",
            tab, correlation_id
        ));

        let (sink, _listener) = event_listener::spawn(
            tab.clone(),
            generation,
            self.store.clone(),
            self.reducer.clone(),
            self.diagnostics.clone(),
        );

        match self.open_and_enable(tab, sink).await {
            Ok(()) => {
                self.store.with(tab, |s| {
                    s.attached = true;
                    s.attaching = false;
                    s.attached_at = Some(Utc::now());
                });
                self.diagnostics.info(&format!(
                    "[session] attached tab={} correlation={}",
                    tab, correlation_id
                ));
                Ok(())
            }
            Err(e) => {
                self.store.with(tab, |s| {
                    s.attached = false;
                    s.attaching = false;
                    s.reset_connection();
                });
                self.diagnostics
                    .error(&format!("[session] attach failed tab={}: {}", tab, e));
                if let Err(close_err) = self.channel.close(tab).await {
                    tracing::debug!(tab = %tab, "close after failed attach: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn open_and_enable(&self, tab: &TabId, sink: super::channel::EventSink) -> Result<()> {
        self.channel.open(tab, sink).await?;

        self.send(tab, ProtocolCommand::EnablePage).await?;
        self.send(tab, ProtocolCommand::EnableDom).await?;
        self.send(tab, ProtocolCommand::EnableRuntime).await?;
        self.send_best_effort(tab, ProtocolCommand::SetIgnoreInputEvents { ignore: false })
            .await;
        self.send(tab, ProtocolCommand::EnableNetwork).await?;
        self.send_best_effort(tab, ProtocolCommand::EnableAccessibility)
            .await;
        self.send(
            tab,
            ProtocolCommand::AddBinding {
                name: self.reducer.binding_name.clone(),
            },
        )
        .await?;

        let tree = self.send(tab, ProtocolCommand::GetFrameTree).await?;
        self.store.with(tab, |s| s.seed_frame_tree(tree));
        Ok(())
    }

    async fn send(&self, tab: &TabId, command: ProtocolCommand) -> Result<serde_json::Value> {
        self.channel.send(tab, command).await
    }

    async fn send_best_effort(&self, tab: &TabId, command: ProtocolCommand) {
        let method = command.method();
        if let Err(e) = self.channel.send(tab, command).await {
            tracing::debug!(tab = %tab, "{} failed (ignored): {}", method, e);
        }
    }

    /// Closes the connection when nothing needs it. Never fails; close errors
    /// are logged and the session is reset anyway.
    pub async fn detach_if_idle(&self, tab: &TabId) {
        let lock = self.lifecycle_lock(tab);
        let _transition = lock.lock().await;

        // Claims the detach by clearing `attached`, so a second caller is a no-op.
        let claimed = self.store.with(tab, |s| {
            if !(s.attached && s.is_idle()) {
                return None;
            }
            s.attached = false;
            Some(s.recorder_script_id.take())
        });
        let Some(script_id) = claimed else {
            return;
        };

        if let Some(identifier) = script_id {
            self.send_best_effort(tab, ProtocolCommand::RemoveScriptOnNewDocument { identifier })
                .await;
        }

        let closed = self.channel.close(tab).await;
        let correlation_id = self.store.with(tab, |s| {
            s.reset_connection();
            s.correlation_id.clone()
        });

        match closed {
            Ok(()) => self.diagnostics.info(&format!(
                "[session] detached tab={} correlation={}",
                tab,
                correlation_id.as_deref().unwrap_or("n/a")
            )),
            Err(e) => self
                .diagnostics
                .error(&format!("[session] detach failed tab={}: {}", tab, e)),
        }
    }

    /// Takes a task reference, attaching first if needed. The reference is
    /// counted before the attach so no detach can claim the session meanwhile.
    pub async fn begin_task(&self, tab: &TabId, reason: &str) -> Result<()> {
        let refs = self.store.with(tab, |s| {
            s.task_refs += 1;
            s.task_refs
        });
        if let Err(e) = self.attach_if_needed(tab).await {
            self.store
                .with(tab, |s| s.task_refs = s.task_refs.saturating_sub(1));
            return Err(e);
        }
        self.diagnostics.info(&format!(
            "[session] begin task tab={} refs={} reason={}",
            tab,
            refs,
            summarize_text(reason, 100)
        ));
        Ok(())
    }

    pub async fn end_task(&self, tab: &TabId) {
        let refs = self.store.with(tab, |s| {
            if s.task_refs == 0 {
                None
            } else {
                s.task_refs -= 1;
                Some(s.task_refs)
            }
        });
        match refs {
            Some(refs) => self
                .diagnostics
                .info(&format!("[session] end task tab={} refs={}", tab, refs)),
            None => self
                .diagnostics
                .warn(&format!("[session] end task without begin tab={}", tab)),
        }
        self.detach_if_idle(tab).await;
    }

    /// Begins a task and returns a guard that ends it.
    pub async fn task(&self, tab: &TabId, reason: &str) -> Result<TaskGuard> {
        self.begin_task(tab, reason).await?;
        Ok(TaskGuard {
            manager: self.clone(),
            tab: tab.clone(),
            released: false,
        })
    }

    /// Force-stops recording, zeroes the reference count and detaches.
    pub async fn cleanup_tab(&self, tab: &TabId) {
        self.store.with(tab, |s| {
            s.recording = false;
            s.armed = false;
            s.task_refs = 0;
        });
        self.detach_if_idle(tab).await;
    }
}

/// Scoped task reference. Prefer [`TaskGuard::release`]; dropping the guard
/// ends the task on a spawned task instead.
pub struct TaskGuard {
    manager: SessionManager,
    tab: TabId,
    released: bool,
}

impl TaskGuard {
    pub fn tab(&self) -> &TabId {
        &self.tab
    }

    pub async fn release(mut self) {
        self.released = true;
        self.manager.end_task(&self.tab).await;
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let manager = self.manager.clone();
        let tab = self.tab.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { manager.end_task(&tab).await });
            }
            Err(_) => {
                tracing::warn!(tab = %tab, "task guard dropped outside a runtime; reference leaked");
            }
        }
    }
}
