use crate::chrome::{CommandResult, SessionStatus, SkillDraft, TabInfo};
use crate::server::protocol::{Request, Response, methods};
use crate::{Result, TabError, timeouts::secs};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Line-oriented JSON-RPC client for the tabpilot daemon.
pub struct DaemonClient {
    stream: UnixStream,
    timeout: Duration,
}

impl DaemonClient {
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|e| TabError::Connection(format!("Failed to connect to daemon: {}", e)))?;

        Ok(Self {
            stream,
            timeout: Duration::from_secs(secs::REQUEST),
        })
    }

    pub async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = REQUEST_ID.fetch_add(1, Ordering::SeqCst);
        let request = Request::new(id, method, params);

        let json = serde_json::to_string(&request)?;
        self.stream
            .write_all(format!("{}\n", json).as_bytes())
            .await
            .map_err(|e| TabError::General(format!("Write error: {}", e)))?;

        let (read_half, _) = self.stream.split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        match tokio::time::timeout(self.timeout, reader.read_line(&mut line)).await {
            Ok(Ok(0)) => return Err(TabError::ConnectionLost),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(TabError::General(format!("Read error: {}", e))),
            Err(_) => {
                return Err(TabError::General(format!(
                    "Daemon did not answer {} within {}s",
                    method,
                    self.timeout.as_secs()
                )));
            }
        }

        let response: Response = serde_json::from_str(&line)?;

        if let Some(error) = response.error {
            return Err(TabError::General(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn call<T: DeserializeOwned>(&mut self, method: &str, params: Value) -> Result<T> {
        let value = self.request(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn ping(&mut self) -> Result<bool> {
        let result = self.request(methods::PING, Value::Null).await?;
        Ok(result
            .get("pong")
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    pub async fn list_tabs(&mut self) -> Result<Vec<TabInfo>> {
        self.call(methods::TABS_LIST, Value::Null).await
    }

    pub async fn begin_task(&mut self, tab: &str, reason: &str) -> Result<SessionStatus> {
        self.call(methods::TASK_BEGIN, json!({"tab": tab, "reason": reason}))
            .await
    }

    pub async fn end_task(&mut self, tab: &str) -> Result<SessionStatus> {
        self.call(methods::TASK_END, json!({"tab": tab})).await
    }

    pub async fn start_capture(&mut self, tab: &str) -> Result<()> {
        self.request(methods::CAPTURE_START, json!({"tab": tab}))
            .await?;
        Ok(())
    }

    pub async fn stop_capture(
        &mut self,
        tab: &str,
        segment_ends: &[u64],
        page_map: bool,
    ) -> Result<SkillDraft> {
        self.call(
            methods::CAPTURE_STOP,
            json!({"tab": tab, "segmentEnds": segment_ends, "pageMap": page_map}),
        )
        .await
    }

    pub async fn run_command(
        &mut self,
        tab: &str,
        command: &str,
        args: Value,
        timeout_ms: Option<u64>,
    ) -> Result<CommandResult> {
        let mut params = json!({"tab": tab, "command": command, "args": args});
        if let Some(timeout) = timeout_ms {
            params["timeoutMs"] = json!(timeout);
        }
        self.call(methods::COMMAND_RUN, params).await
    }

    pub async fn cleanup_tab(&mut self, tab: &str) -> Result<SessionStatus> {
        self.call(methods::TAB_CLEANUP, json!({"tab": tab})).await
    }

    pub async fn session_status(&mut self, tab: &str) -> Result<SessionStatus> {
        self.call(methods::SESSION_STATUS, json!({"tab": tab}))
            .await
    }

    pub async fn list_sessions(&mut self) -> Result<Vec<SessionStatus>> {
        self.call(methods::SESSION_STATUS, Value::Null).await
    }

    pub async fn shutdown_daemon(&mut self) -> Result<()> {
        self.request(methods::SHUTDOWN, Value::Null).await?;
        Ok(())
    }
}

pub fn is_daemon_running(socket_path: &Path) -> bool {
    socket_path.exists() && std::os::unix::net::UnixStream::connect(socket_path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_is_daemon_running_false() {
        assert!(!is_daemon_running(&PathBuf::from("/tmp/tabpilot-nonexistent.sock")));
    }
}
