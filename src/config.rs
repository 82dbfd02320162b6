use crate::{Result, TabError, timeouts::ms};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Explicit browser websocket URL. Skips `/json/version` discovery when set.
    pub ws_url: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Name of the page-injected callback the recorder reports through.
    #[serde(default = "default_binding_name")]
    pub binding_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecorderConfig {
    /// URL substrings that make a GET request worth recording.
    #[serde(default = "default_significant_get_patterns")]
    pub significant_get_patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ServerConfig {
    pub socket_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_json_pretty")]
    pub json_pretty: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    9222
}
fn default_request_timeout() -> u64 {
    crate::timeouts::secs::REQUEST
}
fn default_timeout_ms() -> u64 {
    ms::COMMAND_DEFAULT
}
fn default_poll_interval() -> u64 {
    ms::POLL_INTERVAL
}
fn default_binding_name() -> String {
    "tabpilotRecordAction".to_string()
}
fn default_significant_get_patterns() -> Vec<String> {
    vec![
        "/slides/".to_string(),
        "/document/".to_string(),
        "/spreadsheet/".to_string(),
    ]
}
fn default_json_pretty() -> bool {
    true
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval(),
            binding_name: default_binding_name(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            significant_get_patterns: default_significant_get_patterns(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            json_pretty: default_json_pretty(),
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    default_config_dir().map(|p| p.join("config.toml"))
}

pub fn default_config_dir() -> Result<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .map(|p| p.join("tabpilot"))
        .ok_or_else(|| TabError::ConfigError("Could not determine config directory".into()))
}

const PROJECT_CONFIG: &str = ".tabpilot.toml";

impl Config {
    pub fn load() -> Result<Self> {
        let global_path = default_config_path()?;
        let mut config = Self::load_layers(&global_path, Path::new(PROJECT_CONFIG))?;
        config.load_from_env();
        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    fn load_layers(global_path: &Path, project_path: &Path) -> Result<Self> {
        let mut config = Self::default();

        if global_path.exists() {
            config = Self::load_file(global_path)?;
        }

        if project_path.exists() {
            let project_config = Self::load_file(project_path)?;
            config = config.merge(project_config);
        }

        Ok(config)
    }

    pub fn load_with_overrides(&self, cli_overrides: ConfigOverrides) -> Self {
        let mut config = self.clone();

        if let Some(host) = cli_overrides.host {
            config.browser.host = host;
        }
        if let Some(port) = cli_overrides.port {
            config.browser.port = port;
        }
        if let Some(json) = cli_overrides.json_pretty {
            config.output.json_pretty = json;
        }
        if let Some(timeout) = cli_overrides.timeout_ms {
            config.runtime.default_timeout_ms = timeout;
        }
        if let Some(socket) = cli_overrides.socket_path {
            config.server.socket_path = Some(socket);
        }

        config
    }

    /// Project settings win over global ones, field by field where they differ from defaults.
    fn merge(mut self, other: Config) -> Self {
        let defaults = Config::default();

        if other.browser.host != defaults.browser.host {
            self.browser.host = other.browser.host;
        }
        if other.browser.port != defaults.browser.port {
            self.browser.port = other.browser.port;
        }
        if other.browser.ws_url.is_some() {
            self.browser.ws_url = other.browser.ws_url;
        }
        if other.runtime.default_timeout_ms != defaults.runtime.default_timeout_ms {
            self.runtime.default_timeout_ms = other.runtime.default_timeout_ms;
        }
        if other.runtime.binding_name != defaults.runtime.binding_name {
            self.runtime.binding_name = other.runtime.binding_name;
        }
        if other.recorder.significant_get_patterns != defaults.recorder.significant_get_patterns
        {
            self.recorder.significant_get_patterns = other.recorder.significant_get_patterns;
        }
        if other.server.socket_path.is_some() {
            self.server.socket_path = other.server.socket_path;
        }
        self
    }

    fn load_from_env(&mut self) {
        if let Ok(port) = std::env::var("TABPILOT_DEBUG_PORT")
            && let Ok(port) = port.parse()
        {
            self.browser.port = port;
        }
        if let Ok(host) = std::env::var("TABPILOT_DEBUG_HOST")
            && !host.is_empty()
        {
            self.browser.host = host;
        }
        if let Ok(ws_url) = std::env::var("TABPILOT_WS_URL")
            && !ws_url.is_empty()
        {
            self.browser.ws_url = Some(ws_url);
        }
        if let Ok(timeout) = std::env::var("TABPILOT_TIMEOUT_MS")
            && let Ok(timeout) = timeout.parse()
        {
            self.runtime.default_timeout_ms = timeout;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.browser.port < 1024 {
            return Err(TabError::InvalidPort(self.browser.port));
        }

        if self.runtime.default_timeout_ms == 0 {
            return Err(TabError::ConfigError(
                "default_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.runtime.poll_interval_ms == 0 {
            return Err(TabError::ConfigError(
                "poll_interval_ms must be greater than 0".into(),
            ));
        }

        let identifier = Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$")
            .map_err(|e| TabError::ConfigError(e.to_string()))?;
        if !identifier.is_match(&self.runtime.binding_name) {
            return Err(TabError::ConfigError(format!(
                "binding_name must be a JavaScript identifier: '{}'",
                self.runtime.binding_name
            )));
        }

        if let Some(ref ws_url) = self.browser.ws_url
            && !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://"))
        {
            return Err(TabError::ConfigError(format!(
                "ws_url must be a websocket URL: {}",
                ws_url
            )));
        }

        Ok(())
    }

    pub fn show(&self) -> String {
        format!(
            r#"Browser:
  Endpoint: {}:{}
  WebSocket: {}
  Request Timeout: {}s

Runtime:
  Command Timeout: {}ms
  Poll Interval: {}ms
  Binding: {}

Recorder:
  Significant GET patterns: {}

Server:
  Socket: {}
"#,
            self.browser.host,
            self.browser.port,
            self.browser.ws_url.as_deref().unwrap_or("discover"),
            self.browser.request_timeout_secs,
            self.runtime.default_timeout_ms,
            self.runtime.poll_interval_ms,
            self.runtime.binding_name,
            self.recorder.significant_get_patterns.join(", "),
            self.server
                .socket_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "default".into()),
        )
    }
}

#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub json_pretty: Option<bool>,
    pub timeout_ms: Option<u64>,
    pub socket_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.browser.port, 9222);
        assert_eq!(config.browser.host, "127.0.0.1");
        assert_eq!(config.runtime.default_timeout_ms, 12_000);
        assert_eq!(config.runtime.poll_interval_ms, 200);
        assert_eq!(config.recorder.significant_get_patterns.len(), 3);
    }

    #[test]
    fn test_config_validate_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validate_invalid_port() {
        let mut config = Config::default();
        config.browser.port = 80;
        assert!(matches!(config.validate(), Err(TabError::InvalidPort(80))));
    }

    #[test]
    fn test_config_validate_binding_name() {
        let mut config = Config::default();
        config.runtime.binding_name = "not valid".into();
        assert!(config.validate().is_err());

        config.runtime.binding_name = String::new();
        assert!(config.validate().is_err());

        config.runtime.binding_name = "$rec_1".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_ws_url() {
        let mut config = Config::default();
        config.browser.ws_url = Some("http://localhost:9222".into());
        assert!(config.validate().is_err());

        config.browser.ws_url = Some("ws://localhost:9222/devtools/browser/abc".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_load_with_overrides() {
        let config = Config::default();
        let overrides = ConfigOverrides {
            host: Some("10.0.0.2".into()),
            port: Some(9333),
            json_pretty: Some(false),
            timeout_ms: Some(5000),
            socket_path: None,
        };

        let result = config.load_with_overrides(overrides);
        assert_eq!(result.browser.host, "10.0.0.2");
        assert_eq!(result.browser.port, 9333);
        assert!(!result.output.json_pretty);
        assert_eq!(result.runtime.default_timeout_ms, 5000);
    }

    #[test]
    fn test_config_merge() {
        let base = Config::default();
        let mut other = Config::default();
        other.browser.port = 9444;
        other.recorder.significant_get_patterns = vec!["/api/save".into()];

        let merged = base.merge(other);
        assert_eq!(merged.browser.port, 9444);
        assert_eq!(merged.recorder.significant_get_patterns, vec!["/api/save"]);
        assert_eq!(merged.runtime.binding_name, "tabpilotRecordAction");
    }

    #[test]
    fn test_config_partial_toml() {
        let parsed: Config = toml::from_str("[runtime]\npoll_interval_ms = 50\n").unwrap();
        assert_eq!(parsed.runtime.poll_interval_ms, 50);
        assert_eq!(parsed.runtime.default_timeout_ms, 12_000);
        assert_eq!(parsed.browser.port, 9222);
    }

    #[test]
    fn test_config_load_layers() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("config.toml");
        let project = dir.path().join(".tabpilot.toml");
        std::fs::write(&global, "[browser]\nport = 9500\n").unwrap();
        std::fs::write(&project, "[runtime]\ndefault_timeout_ms = 4000\n").unwrap();

        let config = Config::load_layers(&global, &project).unwrap();
        assert_eq!(config.browser.port, 9500);
        assert_eq!(config.runtime.default_timeout_ms, 4000);
    }

    #[test]
    fn test_config_load_layers_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_layers(
            &dir.path().join("absent.toml"),
            &dir.path().join("also-absent.toml"),
        )
        .unwrap();
        assert_eq!(config.browser.port, 9222);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[browser]"));
        assert!(toml_str.contains("[runtime]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.browser.port, config.browser.port);
    }
}
