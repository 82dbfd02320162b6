use super::channel::{
    CommandChannel, EventSink, KeyEventKind, MouseEventKind, ProtocolCommand, ProtocolEvent,
};
use super::models::{TabId, TabInfo};
use crate::config::BrowserConfig;
use crate::timeouts::{ms, secs};
use crate::{Result, TabError};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton, SetIgnoreInputEventsParams,
};
use chromiumoxide::cdp::browser_protocol::inspector::EventDetached;
use chromiumoxide::cdp::browser_protocol::network::{
    EventRequestWillBeSent, EventResponseReceived,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, EventFrameNavigated, GetFrameTreeParams,
    RemoveScriptToEvaluateOnNewDocumentParams, ScriptIdentifier,
};
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::cdp::browser_protocol::{accessibility, dom, network, page};
use chromiumoxide::cdp::js_protocol::runtime::{
    self, AddBindingParams, EvaluateParams, EventBindingCalled, EventExecutionContextCreated,
    EventExecutionContextDestroyed, EventExecutionContextsCleared, ExecutionContextId,
};
use chromiumoxide::handler::HandlerConfig;
use chromiumoxide::{Browser, Page};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Runs one CDP command on a page and returns its result object as JSON.
macro_rules! exec {
    ($page:expr, $method:expr, $params:expr) => {{
        let response = $page
            .execute($params)
            .await
            .map_err(|e| TabError::protocol($method, e))?;
        serde_json::to_value(&response.result)?
    }};
}

/// Maps one typed CDP event stream onto [`ProtocolEvent`]s.
macro_rules! forward {
    ($page:expr, $event:ty, |$ev:ident| $map:expr) => {{
        let events = $page
            .event_listener::<$event>()
            .await
            .map_err(|e| TabError::Connection(format!("event subscription failed: {}", e)))?;
        events.map(|$ev: Arc<$event>| $map).boxed()
    }};
}

struct AttachedPage {
    page: Arc<Page>,
    forwarder: JoinHandle<()>,
}

/// Command channel over a live Chrome DevTools connection.
pub struct CdpChannel {
    config: BrowserConfig,
    browser: Mutex<Option<Arc<Browser>>>,
    pages: Mutex<HashMap<TabId, AttachedPage>>,
}

impl CdpChannel {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            browser: Mutex::new(None),
            pages: Mutex::new(HashMap::new()),
        }
    }

    fn http_base(&self) -> String {
        format!("http://{}:{}", self.config.host, self.config.port)
    }

    async fn browser(&self) -> Result<Arc<Browser>> {
        let mut guard = self.browser.lock().await;
        if let Some(browser) = guard.as_ref() {
            return Ok(browser.clone());
        }

        let ws_url = match &self.config.ws_url {
            Some(url) => url.clone(),
            None => discover_ws_url(&self.http_base()).await?,
        };
        let handler_config = HandlerConfig {
            request_timeout: Duration::from_secs(self.config.request_timeout_secs),
            ..Default::default()
        };
        let (browser, mut handler) = Browser::connect_with_config(&ws_url, handler_config)
            .await
            .map_err(|e| TabError::Connection(format!("{}: {}", ws_url, e)))?;
        tokio::spawn(async move { while handler.next().await.is_some() {} });

        tracing::info!("connected to browser at {}", ws_url);
        let browser = Arc::new(browser);
        *guard = Some(browser.clone());
        Ok(browser)
    }

    async fn find_page(&self, browser: &Browser, tab: &TabId) -> Result<Page> {
        const ATTEMPTS: u32 = 10;
        let mut last_error = String::new();
        for _ in 0..ATTEMPTS {
            match browser.get_page(TargetId::new(tab.as_str())).await {
                Ok(page) => return Ok(page),
                Err(e) => last_error = e.to_string(),
            }
            tokio::time::sleep(Duration::from_millis(ms::DAEMON_POLL)).await;
        }
        Err(TabError::TargetNotFound(format!("{} ({})", tab, last_error)))
    }

    async fn page(&self, tab: &TabId) -> Result<Arc<Page>> {
        self.pages
            .lock()
            .await
            .get(tab)
            .map(|attached| attached.page.clone())
            .ok_or_else(|| TabError::NotAttached(tab.to_string()))
    }

    /// Page targets currently open in the browser.
    pub async fn list_tabs(&self) -> Result<Vec<TabInfo>> {
        list_tabs(&self.http_base()).await
    }
}

async fn subscribe(page: &Page) -> Result<BoxStream<'static, ProtocolEvent>> {
    let streams = vec![
        forward!(page, EventExecutionContextCreated, |ev| {
            ProtocolEvent::ContextCreated {
                context_id: *ev.context.id.inner(),
                unique_id: ev.context.unique_id.clone(),
                frame_id: ev
                    .context
                    .aux_data
                    .as_ref()
                    .and_then(|aux| aux.get("frameId"))
                    .and_then(|v| v.as_str())
                    .map(String::from),
                name: ev.context.name.clone(),
                origin: ev.context.origin.clone(),
            }
        }),
        forward!(page, EventExecutionContextDestroyed, |ev| {
            ProtocolEvent::ContextDestroyed {
                unique_id: ev.execution_context_unique_id.clone(),
            }
        }),
        forward!(page, EventExecutionContextsCleared, |_ev| {
            ProtocolEvent::ContextsCleared
        }),
        forward!(page, EventFrameNavigated, |ev| {
            ProtocolEvent::FrameNavigated {
                frame_id: ev.frame.id.inner().clone(),
                url: ev.frame.url.clone(),
            }
        }),
        forward!(page, EventBindingCalled, |ev| {
            ProtocolEvent::BindingCalled {
                name: ev.name.clone(),
                payload: ev.payload.clone(),
                context_id: *ev.execution_context_id.inner(),
            }
        }),
        forward!(page, EventRequestWillBeSent, |ev| {
            ProtocolEvent::RequestWillBeSent {
                request_id: ev.request_id.inner().clone(),
                method: ev.request.method.clone(),
                url: ev.request.url.clone(),
            }
        }),
        forward!(page, EventResponseReceived, |ev| {
            ProtocolEvent::ResponseReceived {
                request_id: ev.request_id.inner().clone(),
                url: ev.response.url.clone(),
                status: ev.response.status,
                frame_id: ev.frame_id.as_ref().map(|id| id.inner().clone()),
            }
        }),
        forward!(page, EventDetached, |ev| {
            ProtocolEvent::Detached {
                reason: ev.reason.clone(),
            }
        }),
    ];
    Ok(stream::select_all(streams).boxed())
}

#[async_trait::async_trait]
impl CommandChannel for CdpChannel {
    async fn open(&self, tab: &TabId, events: EventSink) -> Result<()> {
        let browser = self.browser().await?;
        let page = Arc::new(self.find_page(&browser, tab).await?);
        let mut notifications = subscribe(&page).await?;

        let forwarder = tokio::spawn(async move {
            while let Some(event) = notifications.next().await {
                if events.send(event).is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = self
            .pages
            .lock()
            .await
            .insert(tab.clone(), AttachedPage { page, forwarder })
        {
            previous.forwarder.abort();
        }
        Ok(())
    }

    async fn send(&self, tab: &TabId, command: ProtocolCommand) -> Result<Value> {
        let page = self.page(tab).await?;
        let method = command.method();

        let value = match command {
            ProtocolCommand::EnablePage => exec!(page, method, page::EnableParams::default()),
            ProtocolCommand::EnableDom => exec!(page, method, dom::EnableParams::default()),
            ProtocolCommand::EnableRuntime => exec!(page, method, runtime::EnableParams::default()),
            ProtocolCommand::EnableNetwork => exec!(page, method, network::EnableParams::default()),
            ProtocolCommand::EnableAccessibility => {
                exec!(page, method, accessibility::EnableParams::default())
            }
            ProtocolCommand::SetIgnoreInputEvents { ignore } => {
                exec!(page, method, SetIgnoreInputEventsParams::new(ignore))
            }
            ProtocolCommand::AddBinding { name } => exec!(page, method, AddBindingParams::new(name)),
            ProtocolCommand::GetFrameTree => exec!(page, method, GetFrameTreeParams::default()),
            ProtocolCommand::Evaluate {
                expression,
                context_id,
            } => return evaluate(&page, expression, context_id).await,
            ProtocolCommand::DispatchMouse {
                kind,
                x,
                y,
                click_count,
            } => {
                let mut builder = DispatchMouseEventParams::builder()
                    .r#type(match kind {
                        MouseEventKind::MouseMoved => DispatchMouseEventType::MouseMoved,
                        MouseEventKind::MousePressed => DispatchMouseEventType::MousePressed,
                        MouseEventKind::MouseReleased => DispatchMouseEventType::MouseReleased,
                    })
                    .x(x)
                    .y(y)
                    .button(MouseButton::Left);
                if let Some(count) = click_count {
                    builder = builder.click_count(count);
                }
                let params = builder.build().map_err(|e| TabError::protocol(method, e))?;
                exec!(page, method, params)
            }
            ProtocolCommand::DispatchKey { kind, key, text } => {
                let mut builder = DispatchKeyEventParams::builder()
                    .r#type(match kind {
                        KeyEventKind::KeyDown => DispatchKeyEventType::KeyDown,
                        KeyEventKind::KeyUp => DispatchKeyEventType::KeyUp,
                    })
                    .key(key);
                if let Some(text) = text {
                    builder = builder.text(text);
                }
                let params = builder.build().map_err(|e| TabError::protocol(method, e))?;
                exec!(page, method, params)
            }
            ProtocolCommand::AddScriptOnNewDocument { source } => exec!(
                page,
                method,
                AddScriptToEvaluateOnNewDocumentParams::new(source)
            ),
            ProtocolCommand::RemoveScriptOnNewDocument { identifier } => exec!(
                page,
                method,
                RemoveScriptToEvaluateOnNewDocumentParams::new(ScriptIdentifier::new(identifier))
            ),
        };
        Ok(value)
    }

    async fn close(&self, tab: &TabId) -> Result<()> {
        if let Some(attached) = self.pages.lock().await.remove(tab) {
            attached.forwarder.abort();
        }
        Ok(())
    }
}

async fn evaluate(page: &Page, expression: String, context_id: Option<i64>) -> Result<Value> {
    let mut builder = EvaluateParams::builder()
        .expression(expression)
        .return_by_value(true)
        .await_promise(true);
    if let Some(id) = context_id {
        builder = builder.context_id(ExecutionContextId::new(id));
    }
    let params = builder
        .build()
        .map_err(|e| TabError::protocol("Runtime.evaluate", e))?;

    let response = page
        .execute(params)
        .await
        .map_err(|e| TabError::protocol("Runtime.evaluate", e))?;
    let returns = &response.result;

    if let Some(details) = &returns.exception_details {
        let message = details
            .exception
            .as_ref()
            .and_then(|ex| ex.description.clone())
            .unwrap_or_else(|| details.text.clone());
        return Err(TabError::EvaluationError(message));
    }

    Ok(match (&returns.result.value, &returns.result.description) {
        (Some(value), _) => value.clone(),
        (None, Some(description)) => Value::String(description.clone()),
        (None, None) => Value::Null,
    })
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(secs::DISCOVERY))
        .build()
        .map_err(|e| TabError::Connection(e.to_string()))
}

/// Reads the browser websocket URL from the DevTools `/json/version` endpoint.
pub async fn discover_ws_url(base: &str) -> Result<String> {
    let url = format!("{}/json/version", base.trim_end_matches('/'));
    let response: Value = http_client()?
        .get(&url)
        .send()
        .await
        .map_err(|e| TabError::Connection(format!("{}: {}", url, e)))?
        .json()
        .await
        .map_err(|e| TabError::Connection(format!("{}: {}", url, e)))?;

    response
        .get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or(TabError::ConnectionLost)
}

/// Lists page targets from the DevTools `/json/list` endpoint.
pub async fn list_tabs(base: &str) -> Result<Vec<TabInfo>> {
    let url = format!("{}/json/list", base.trim_end_matches('/'));
    let targets: Vec<TabInfo> = http_client()?
        .get(&url)
        .send()
        .await
        .map_err(|e| TabError::Connection(format!("{}: {}", url, e)))?
        .json()
        .await
        .map_err(|e| TabError::Connection(format!("{}: {}", url, e)))?;

    Ok(targets
        .into_iter()
        .filter(|t| t.target_type == "page")
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_discover_ws_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/version"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Browser": "Chrome/140.0",
                "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/abc"
            })))
            .mount(&server)
            .await;

        let ws = discover_ws_url(&server.uri()).await.unwrap();
        assert_eq!(ws, "ws://127.0.0.1:9222/devtools/browser/abc");
    }

    #[tokio::test]
    async fn test_discover_ws_url_missing_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/version"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Browser": "x"})))
            .mount(&server)
            .await;

        assert!(matches!(
            discover_ws_url(&server.uri()).await,
            Err(TabError::ConnectionLost)
        ));
    }

    #[tokio::test]
    async fn test_list_tabs_keeps_pages_only() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "A1", "title": "Docs", "url": "https://docs.test/", "type": "page"},
                {"id": "W1", "title": "sw", "url": "chrome-extension://x/sw.js", "type": "service_worker"},
                {"id": "B2", "url": "about:blank", "type": "page"}
            ])))
            .mount(&server)
            .await;

        let tabs = list_tabs(&server.uri()).await.unwrap();
        assert_eq!(tabs.len(), 2);
        assert_eq!(tabs[0].id, "A1");
        assert_eq!(tabs[1].title, "");
    }

    #[tokio::test]
    async fn test_send_without_open_is_not_attached() {
        let channel = CdpChannel::new(BrowserConfig::default());
        let err = channel
            .send(&TabId::from("nope"), ProtocolCommand::EnablePage)
            .await
            .unwrap_err();
        assert!(matches!(err, TabError::NotAttached(_)));
    }
}
