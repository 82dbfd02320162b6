use super::channel::{CommandChannel, ProtocolCommand};
use super::diagnostics::{Diagnostics, summarize_text};
use super::models::{ContextInfo, ElementSnapshot, Resolution, TabId};
use super::session_store::SessionStore;
use crate::Result;
use crate::js_templates;
use serde_json::Value;
use std::sync::Arc;

/// Orders contexts by frame id (unknown frames last), then by ascending context id.
///
/// An empty set yields a single `None`, meaning the connection's default context.
pub fn order_contexts(mut contexts: Vec<ContextInfo>) -> Vec<Option<i64>> {
    if contexts.is_empty() {
        return vec![None];
    }
    contexts.sort_by(|a, b| {
        (a.frame_id.is_none(), &a.frame_id, a.context_id).cmp(&(
            b.frame_id.is_none(),
            &b.frame_id,
            b.context_id,
        ))
    });
    contexts.into_iter().map(|c| Some(c.context_id)).collect()
}

#[derive(Clone)]
pub struct ContextResolver {
    channel: Arc<dyn CommandChannel>,
    store: Arc<SessionStore>,
    diagnostics: Diagnostics,
}

impl ContextResolver {
    pub fn new(
        channel: Arc<dyn CommandChannel>,
        store: Arc<SessionStore>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            channel,
            store,
            diagnostics,
        }
    }

    /// Evaluation order over a snapshot of the tab's current contexts.
    pub fn context_order(&self, tab: &TabId) -> Vec<Option<i64>> {
        order_contexts(self.store.with(tab, |s| s.context_snapshot()))
    }

    pub fn frame_of(&self, tab: &TabId, context_id: Option<i64>) -> Option<String> {
        let context_id = context_id?;
        self.store
            .with(tab, |s| s.contexts.get(&context_id).and_then(|c| c.frame_id.clone()))
    }

    pub fn frame_url(&self, tab: &TabId, frame_id: Option<&str>) -> Option<String> {
        let frame_id = frame_id?;
        self.store.with(tab, |s| s.frame_urls.get(frame_id).cloned())
    }

    pub async fn evaluate(
        &self,
        tab: &TabId,
        expression: String,
        context_id: Option<i64>,
    ) -> Result<Value> {
        self.channel
            .send(tab, ProtocolCommand::evaluate(expression, context_id))
            .await
    }

    /// Probes each context in order and binds to the first match.
    ///
    /// Contexts whose evaluation fails are skipped.
    pub async fn resolve_selector(&self, tab: &TabId, selector: &str) -> Resolution {
        let order = self.context_order(tab);
        let expression = js_templates::selector_probe(selector);
        let mut failures = 0usize;

        for context_id in &order {
            let payload = match self.evaluate(tab, expression.clone(), *context_id).await {
                Ok(payload) => payload,
                Err(e) => {
                    failures += 1;
                    tracing::debug!(tab = %tab, context = ?context_id, "probe failed: {}", e);
                    continue;
                }
            };
            let snapshot: ElementSnapshot = match serde_json::from_value(payload) {
                Ok(snapshot) => snapshot,
                Err(_) => continue,
            };
            if snapshot.found {
                let frame_id = self.frame_of(tab, *context_id);
                self.diagnostics.debug(&format!(
                    "[resolve] tab={} selector={} context={:?} frame={}",
                    tab,
                    summarize_text(selector, 120),
                    context_id,
                    frame_id.as_deref().unwrap_or("default")
                ));
                return Resolution {
                    found: true,
                    selector: selector.to_string(),
                    context_id: *context_id,
                    frame_id,
                    element: Some(snapshot),
                };
            }
        }

        if failures > 0 && failures == order.len() {
            self.diagnostics.warn(&format!(
                "[resolve] tab={} probe failed in all {} context(s); connection may be lost",
                tab, failures
            ));
        } else {
            self.diagnostics.debug(&format!(
                "[resolve] tab={} selector={} not found",
                tab,
                summarize_text(selector, 120)
            ));
        }
        Resolution::not_found(selector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(id: i64, frame: Option<&str>) -> ContextInfo {
        ContextInfo {
            context_id: id,
            unique_id: format!("uid-{}", id),
            frame_id: frame.map(String::from),
            name: String::new(),
            origin: String::new(),
        }
    }

    #[test]
    fn test_order_frame_then_id() {
        let order = order_contexts(vec![ctx(2, Some("a")), ctx(1, Some("a")), ctx(5, None)]);
        assert_eq!(order, vec![Some(1), Some(2), Some(5)]);
    }

    #[test]
    fn test_order_by_frame_id_string() {
        let order = order_contexts(vec![
            ctx(1, Some("b")),
            ctx(9, None),
            ctx(3, Some("a")),
            ctx(4, None),
        ]);
        assert_eq!(order, vec![Some(3), Some(1), Some(4), Some(9)]);
    }

    #[test]
    fn test_empty_yields_default_context() {
        assert_eq!(order_contexts(Vec::new()), vec![None]);
    }
}
