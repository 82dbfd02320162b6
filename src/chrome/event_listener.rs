use super::channel::{EventReceiver, EventSink};
use super::diagnostics::Diagnostics;
use super::models::TabId;
use super::session_store::{Folded, ReducerConfig, SessionStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Starts the notification listener for one attach generation of `tab`.
///
/// The returned sink is handed to the channel. The task ends once every
/// sender is dropped, which the channel does on close.
pub fn spawn(
    tab: TabId,
    generation: u64,
    store: Arc<SessionStore>,
    reducer: Arc<ReducerConfig>,
    diagnostics: Diagnostics,
) -> (EventSink, JoinHandle<()>) {
    let (sink, events) = mpsc::unbounded_channel();
    let handle = tokio::spawn(drain(tab, generation, events, store, reducer, diagnostics));
    (sink, handle)
}

async fn drain(
    tab: TabId,
    generation: u64,
    mut events: EventReceiver,
    store: Arc<SessionStore>,
    reducer: Arc<ReducerConfig>,
    diagnostics: Diagnostics,
) {
    while let Some(event) = events.recv().await {
        match store.apply(&tab, generation, event, &reducer) {
            Folded::Dropped(reason) => {
                diagnostics.warn(&format!("[{}] dropped event: {}", tab, reason));
            }
            Folded::Detached(reason) => {
                diagnostics.info(&format!("[{}] debugger detached: {}", tab, reason));
            }
            Folded::Recorded => {
                tracing::debug!(tab = %tab, "captured event");
            }
            Folded::Applied | Folded::Ignored => {}
        }
    }
    tracing::debug!(tab = %tab, generation, "event listener stopped");
}
