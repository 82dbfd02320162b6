use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    #[command(about = "List open page targets")]
    Tabs,

    #[command(about = "Hold or release a tab's session for an agent task")]
    Task {
        #[command(subcommand)]
        subcommand: TaskCommand,
    },

    #[command(about = "Summarise interactive elements and landmarks (INSPECT_PAGE_MAP)")]
    Inspect {
        #[arg(long, help = "Zoom into the area around this selector")]
        zoom: Option<String>,
        #[arg(long, help = "Maximum nodes per frame (20-500)")]
        max_nodes: Option<u32>,
    },

    #[command(about = "Describe an element and its surroundings (GET_ACTION_CONTEXT)")]
    Context {
        #[arg(help = "CSS selector")]
        selector: String,
        #[arg(long, help = "Ancestor levels to include (1-6)")]
        radius: Option<u32>,
        #[arg(long, help = "Maximum siblings (2-20)")]
        max_siblings: Option<u32>,
        #[arg(long, help = "Maximum children (4-40)")]
        max_children: Option<u32>,
    },

    #[command(about = "Execute and verify a batch of actions (RUN_ACTIONS)")]
    Run {
        #[arg(help = "JSON file holding an action array, or '-' for stdin")]
        file: PathBuf,
        #[arg(long, help = "Summary recorded with the batch")]
        summary: Option<String>,
    },

    #[command(about = "Record a user demonstration")]
    Capture {
        #[command(subcommand)]
        subcommand: CaptureCommand,
    },

    #[command(about = "Release everything held for a tab")]
    Cleanup,

    #[command(about = "Show session state for the tab, or all sessions")]
    Status,

    #[command(about = "Configuration management")]
    Config {
        #[command(subcommand)]
        subcommand: ConfigCommand,
    },

    #[command(about = "Daemon server management")]
    Server {
        #[command(subcommand)]
        subcommand: ServerCommand,
    },
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum TaskCommand {
    #[command(about = "Attach and take a task reference")]
    Begin {
        #[arg(long, default_value = "cli", help = "Reason logged with the task")]
        reason: String,
    },
    #[command(about = "Drop a task reference")]
    End,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum CaptureCommand {
    #[command(about = "Start recording clicks, input, keys and requests")]
    Start,
    #[command(about = "Stop recording and emit the skill draft")]
    Stop {
        #[arg(long = "segment-end", help = "Transcript segment end timestamp (ms), repeatable")]
        segment_ends: Vec<u64>,
        #[arg(long, help = "Include a page map taken before stopping")]
        page_map: bool,
        #[arg(short, long, help = "Write the draft to a file")]
        output: Option<PathBuf>,
    },
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    #[command(about = "Write a default config file")]
    Init,
    #[command(about = "Show the effective configuration")]
    Show,
    #[command(about = "Show the config file path")]
    Path,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum ServerCommand {
    #[command(about = "Start daemon server")]
    Start {
        #[arg(long, help = "Socket path")]
        socket: Option<PathBuf>,
    },
    #[command(about = "Stop daemon server")]
    Stop,
    #[command(about = "Check daemon status")]
    Status,
}
