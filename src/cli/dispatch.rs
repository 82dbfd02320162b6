use super::{
    Cli,
    commands::{CaptureCommand, Command, ConfigCommand, ServerCommand, TaskCommand},
};
use crate::{
    Result, TabError,
    client::{DaemonClient, is_daemon_running},
    config::Config,
    output::{self, ConfigInfo, SessionList, TabList, text},
    server::{Daemon, DaemonConfig},
    timeouts::{ms, secs},
};
use serde_json::{Value, json};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn get_socket_path(config: &Config) -> PathBuf {
    DaemonConfig::from_config(config).socket_path
}

fn start_daemon_background(cli: &Cli) -> Result<()> {
    let exe = std::env::current_exe()
        .map_err(|e| TabError::General(format!("Failed to get executable path: {}", e)))?;

    let mut command = ProcessCommand::new(exe);
    if let Some(config) = &cli.config {
        command.arg("--config").arg(config);
    }
    if let Some(host) = &cli.host {
        command.args(["--host", host]);
    }
    if let Some(port) = cli.port {
        command.args(["--port", &port.to_string()]);
    }

    command
        .args(["server", "start"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| TabError::General(format!("Failed to spawn daemon: {}", e)))?;

    Ok(())
}

async fn wait_for_daemon(socket_path: &Path) -> bool {
    let deadline = Instant::now() + Duration::from_secs(secs::DAEMON_STARTUP);
    while Instant::now() < deadline {
        if is_daemon_running(socket_path) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(ms::DAEMON_POLL)).await;
    }
    is_daemon_running(socket_path)
}

/// Connects to the daemon, starting it in the background when absent.
async fn connect_daemon(cli: &Cli, config: &Config) -> Result<DaemonClient> {
    let socket_path = get_socket_path(config);

    if !is_daemon_running(&socket_path) {
        eprintln!("Starting daemon...");
        start_daemon_background(cli)?;

        if !wait_for_daemon(&socket_path).await {
            return Err(TabError::Connection("Failed to start daemon".into()));
        }
    }

    DaemonClient::connect(&socket_path).await
}

pub async fn dispatch(mut cli: Cli, config: Arc<Config>) -> Result<()> {
    let command = match cli.command.take() {
        Some(cmd) => cmd,
        None => {
            eprintln!("No command provided. Use --help for usage.");
            std::process::exit(1);
        }
    };

    match command {
        Command::Server { subcommand } => handle_server_command(subcommand, &config).await,
        Command::Config { subcommand } => handle_config_command(subcommand, &cli, &config),
        _ => handle_tab_command(command, &cli, &config).await,
    }
}

async fn handle_server_command(subcommand: ServerCommand, config: &Arc<Config>) -> Result<()> {
    match subcommand {
        ServerCommand::Start { socket } => {
            let socket_path = socket.unwrap_or_else(|| get_socket_path(config));

            if is_daemon_running(&socket_path) {
                println!("Daemon already running at {}", socket_path.display());
                return Ok(());
            }

            let daemon = Daemon::new(
                crate::chrome::TabRuntime::connect(config, None),
                DaemonConfig { socket_path },
            );
            println!("Starting daemon server...");
            daemon.run().await
        }

        ServerCommand::Stop => {
            let socket_path = get_socket_path(config);

            if !is_daemon_running(&socket_path) {
                println!("Daemon not running");
                return Ok(());
            }

            let mut client = DaemonClient::connect(&socket_path).await?;
            client.shutdown_daemon().await?;
            println!("Daemon stopped");
            Ok(())
        }

        ServerCommand::Status => {
            let socket_path = get_socket_path(config);

            if is_daemon_running(&socket_path) {
                let mut client = DaemonClient::connect(&socket_path).await?;
                if client.ping().await.is_ok() {
                    println!("Daemon running at {}", socket_path.display());
                    let sessions = client.list_sessions().await?;
                    println!("Known tab sessions: {}", sessions.len());
                    return Ok(());
                }
            }

            println!("Daemon not running");
            Ok(())
        }
    }
}

fn handle_config_command(subcommand: ConfigCommand, cli: &Cli, config: &Config) -> Result<()> {
    match subcommand {
        ConfigCommand::Init => {
            let config_path = crate::config::default_config_path()?;
            if config_path.exists() {
                return Err(TabError::ConfigError(format!(
                    "Config file already exists at {}",
                    config_path.display()
                )));
            }
            if let Some(dir) = config_path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(&config_path, toml::to_string_pretty(&Config::default())?)?;
            output::print_output(
                &ConfigInfo {
                    path: config_path,
                    exists: true,
                },
                cli.json,
                true,
            )
        }
        ConfigCommand::Show => output::print_output(config, cli.json, true),
        ConfigCommand::Path => {
            let path = crate::config::default_config_path()?;
            let exists = path.exists();
            output::print_output(&ConfigInfo { path, exists }, cli.json, true)
        }
    }
}

async fn handle_tab_command(command: Command, cli: &Cli, config: &Config) -> Result<()> {
    let mut client = connect_daemon(cli, config).await?;
    let pretty = config.output.json_pretty;
    let timeout = cli.timeout;

    match command {
        Command::Tabs => {
            let tabs = client.list_tabs().await?;
            output::print_output(&TabList(tabs), cli.json, pretty)
        }

        Command::Task { subcommand } => {
            let tab = cli.require_tab()?;
            let status = match subcommand {
                TaskCommand::Begin { reason } => client.begin_task(tab, &reason).await?,
                TaskCommand::End => client.end_task(tab).await?,
            };
            output::print_output(&status, cli.json, pretty)
        }

        Command::Inspect { zoom, max_nodes } => {
            let mut args = json!({"mode": if zoom.is_some() { "zoom" } else { "summary" }});
            if let Some(selector) = zoom {
                args["targetSelector"] = json!(selector);
            }
            if let Some(max) = max_nodes {
                args["maxNodes"] = json!(max);
            }
            let result = client
                .run_command(cli.require_tab()?, "INSPECT_PAGE_MAP", args, timeout)
                .await?;
            output::print_output(&result, cli.json, pretty)
        }

        Command::Context {
            selector,
            radius,
            max_siblings,
            max_children,
        } => {
            let mut args = json!({"selector": selector});
            if let Some(radius) = radius {
                args["radius"] = json!(radius);
            }
            if let Some(max) = max_siblings {
                args["maxSiblings"] = json!(max);
            }
            if let Some(max) = max_children {
                args["maxChildren"] = json!(max);
            }
            let result = client
                .run_command(cli.require_tab()?, "GET_ACTION_CONTEXT", args, timeout)
                .await?;
            output::print_output(&result, cli.json, pretty)
        }

        Command::Run { file, summary } => {
            let args = read_actions(&file, summary)?;
            let result = client
                .run_command(cli.require_tab()?, "RUN_ACTIONS", args, timeout)
                .await?;
            output::print_output(&result, cli.json, pretty)
        }

        Command::Capture { subcommand } => {
            let tab = cli.require_tab()?;
            match subcommand {
                CaptureCommand::Start => {
                    client.start_capture(tab).await?;
                    if cli.json {
                        println!("{}", json!({"recording": true}));
                    } else {
                        println!("{}", text::success(&format!("Recording tab {}", tab)));
                    }
                    Ok(())
                }
                CaptureCommand::Stop {
                    segment_ends,
                    page_map,
                    output: path,
                } => {
                    let draft = client.stop_capture(tab, &segment_ends, page_map).await?;
                    if let Some(path) = path {
                        std::fs::write(&path, output::to_json(&draft, true)?)?;
                        eprintln!("{}", text::success(&format!("Saved {}", path.display())));
                    }
                    output::print_output(&draft, cli.json, pretty)
                }
            }
        }

        Command::Cleanup => {
            let status = client.cleanup_tab(cli.require_tab()?).await?;
            output::print_output(&status, cli.json, pretty)
        }

        Command::Status => match cli.tab.as_deref() {
            Some(tab) => {
                let status = client.session_status(tab).await?;
                output::print_output(&status, cli.json, pretty)
            }
            None => {
                let sessions = client.list_sessions().await?;
                output::print_output(&SessionList(sessions), cli.json, pretty)
            }
        },

        Command::Server { .. } | Command::Config { .. } => Ok(()),
    }
}

/// Reads a `RUN_ACTIONS` payload: either a bare action array or a full `{actions, summary}` object.
fn read_actions(file: &Path, summary: Option<String>) -> Result<Value> {
    let content = if file == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(file)?
    };
    actions_payload(serde_json::from_str(&content)?, summary)
}

fn actions_payload(parsed: Value, summary: Option<String>) -> Result<Value> {
    let mut args = match parsed {
        Value::Array(actions) => json!({"actions": actions}),
        Value::Object(map) if map.contains_key("actions") => Value::Object(map),
        _ => {
            return Err(TabError::General(
                "Expected an action array or an object with \"actions\"".into(),
            ));
        }
    };
    if let Some(summary) = summary {
        args["summary"] = json!(summary);
    }
    Ok(args)
}
