pub mod commands;
pub mod dispatch;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "tabpilot")]
#[command(version, about = "Verified tab automation and demo capture over DevTools")]
#[command(
    long_about = "Drives an already-running Chrome tab: inspects pages, runs verified actions and records demonstrations"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<commands::Command>,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "DevTools host")]
    pub host: Option<String>,

    #[arg(long, global = true, help = "DevTools debugging port")]
    pub port: Option<u16>,

    #[arg(long, global = true, help = "Command timeout in milliseconds")]
    pub timeout: Option<u64>,

    #[arg(
        short = 't',
        long,
        global = true,
        env = "TABPILOT_TAB",
        help = "Target tab id"
    )]
    pub tab: Option<String>,
}

impl Cli {
    pub fn require_tab(&self) -> crate::Result<&str> {
        self.tab.as_deref().filter(|t| !t.is_empty()).ok_or_else(|| {
            crate::TabError::General("Tab required. Use --tab or TABPILOT_TAB".into())
        })
    }
}

pub async fn run() -> crate::Result<()> {
    let cli = Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        crate::config::Config::load_file(config_path)?
    } else {
        crate::config::Config::load()?
    };

    let overrides = crate::config::ConfigOverrides {
        host: cli.host.clone(),
        port: cli.port,
        json_pretty: None,
        timeout_ms: cli.timeout,
        socket_path: None,
    };

    let config = Arc::new(config.load_with_overrides(overrides));
    config.validate()?;

    dispatch::dispatch(cli, config).await
}
