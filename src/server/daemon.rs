use crate::Result;
use crate::chrome::{TabId, TabRuntime};
use crate::config::Config;
use crate::server::adapter::{ToResponse, opt_bool, opt_str, opt_u64};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::ipc::{ClientId, IpcServer};
use super::protocol::{Request, Response, error_codes, methods};

const DEFAULT_SOCKET_PATH: &str = "/tmp/tabpilot.sock";

pub struct DaemonConfig {
    pub socket_path: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }
}

impl DaemonConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            socket_path: config
                .server
                .socket_path
                .clone()
                .unwrap_or_else(default_socket_path),
        }
    }
}

/// Long-lived process holding the tab sessions between CLI invocations.
pub struct Daemon {
    runtime: TabRuntime,
    daemon_config: DaemonConfig,
    ipc_server: Arc<IpcServer>,
}

impl Daemon {
    pub fn new(runtime: TabRuntime, daemon_config: DaemonConfig) -> Self {
        let ipc_server = Arc::new(IpcServer::new(daemon_config.socket_path.clone()));
        Self {
            runtime,
            daemon_config,
            ipc_server,
        }
    }

    pub async fn start(&self) -> Result<()> {
        self.write_pid_file()?;

        tracing::info!(
            "Daemon starting on {}",
            self.daemon_config.socket_path.display()
        );

        let listener = self.ipc_server.bind().await?;

        let runtime = self.runtime.clone();
        let ipc_server = self.ipc_server.clone();

        self.ipc_server
            .accept(&listener, move |client_id, request| {
                let runtime = runtime.clone();
                let ipc = ipc_server.clone();
                async move { handle_request(client_id, request, &runtime, &ipc).await }
            })
            .await
    }

    pub async fn run(&self) -> Result<()> {
        let served = tokio::select! {
            result = self.start() => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                Ok(())
            }
        };
        self.stop().await;
        served
    }

    /// Releases every known session, then removes the socket and pid file.
    pub async fn stop(&self) {
        tracing::info!("Daemon stopping...");

        let tabs = self.runtime.store().tabs();
        for tab in &tabs {
            self.runtime.cleanup_tab(tab).await;
        }
        tracing::info!("Released {} tab session(s)", tabs.len());

        self.ipc_server.shutdown();
        self.remove_pid_file();
        tracing::info!("Daemon stopped");
    }

    fn pid_file_path(&self) -> PathBuf {
        self.daemon_config.socket_path.with_extension("pid")
    }

    fn write_pid_file(&self) -> Result<()> {
        std::fs::write(self.pid_file_path(), std::process::id().to_string())?;
        Ok(())
    }

    fn remove_pid_file(&self) {
        std::fs::remove_file(self.pid_file_path()).ok();
    }

    pub fn is_running(socket_path: &Path) -> bool {
        let pid_path = socket_path.with_extension("pid");

        if let Ok(pid_str) = std::fs::read_to_string(&pid_path)
            && let Ok(pid) = pid_str.trim().parse::<u32>()
        {
            return Self::process_exists(pid);
        }

        false
    }

    fn process_exists(pid: u32) -> bool {
        Path::new(&format!("/proc/{}", pid)).exists()
            || std::process::Command::new("kill")
                .args(["-0", &pid.to_string()])
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
    }
}

pub async fn handle_request(
    _client_id: ClientId,
    request: Request,
    runtime: &TabRuntime,
    ipc: &IpcServer,
) -> Response {
    let id = request.id;
    let params = &request.params;

    macro_rules! require_str {
        ($name:literal) => {
            match opt_str!(params, $name).filter(|s| !s.is_empty()) {
                Some(s) => s,
                None => {
                    return Response::error(
                        id,
                        error_codes::INVALID_PARAMS,
                        concat!($name, " required"),
                    )
                }
            }
        };
    }

    macro_rules! require_tab {
        () => {
            TabId::from(require_str!("tab"))
        };
    }

    match request.method.as_str() {
        methods::PING => Response::success(id, json!({"pong": true})),

        methods::SHUTDOWN => {
            ipc.shutdown();
            Response::success(id, json!({"shutting_down": true}))
        }

        methods::TABS_LIST => runtime.list_tabs().await.to_response(id),

        methods::TASK_BEGIN => {
            let tab = require_tab!();
            let reason = opt_str!(params, "reason").unwrap_or_default();
            runtime
                .begin_task(&tab, reason)
                .await
                .map(|()| runtime.status(&tab))
                .to_response(id)
        }

        methods::TASK_END => {
            let tab = require_tab!();
            runtime.end_task(&tab).await;
            Response::success(id, json!(runtime.status(&tab)))
        }

        methods::CAPTURE_START => {
            let tab = require_tab!();
            runtime
                .start_demo_capture(&tab)
                .await
                .map(|()| json!({"recording": true}))
                .to_response(id)
        }

        methods::CAPTURE_STOP => {
            let tab = require_tab!();
            let segment_ends: Vec<u64> = params
                .get("segmentEnds")
                .and_then(|v| v.as_array())
                .map(|ends| ends.iter().filter_map(|v| v.as_u64()).collect())
                .unwrap_or_default();
            let with_page_map = opt_bool!(params, "pageMap", false);
            runtime
                .capture_skill_draft(&tab, &segment_ends, with_page_map)
                .await
                .to_response(id)
        }

        methods::COMMAND_RUN => {
            let tab = require_tab!();
            let command = require_str!("command");
            let args = params.get("args").cloned().unwrap_or(Value::Null);
            let timeout_ms = opt_u64!(params, "timeoutMs");
            runtime
                .run_command(&tab, command, args, timeout_ms)
                .await
                .to_response(id)
        }

        methods::TAB_CLEANUP => {
            let tab = require_tab!();
            runtime.cleanup_tab(&tab).await;
            Response::success(id, json!(runtime.status(&tab)))
        }

        methods::SESSION_STATUS => match opt_str!(params, "tab") {
            Some(tab) => Response::success(id, json!(runtime.status(&TabId::from(tab)))),
            None => Response::success(id, json!(runtime.sessions())),
        },

        _ => Response::error(
            id,
            error_codes::METHOD_NOT_FOUND,
            format!("Unknown method: {}", request.method),
        ),
    }
}

pub fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}
