use std::process;
use tabpilot::output::text;

#[tokio::main]
async fn main() {
    let verbose = std::env::args().any(|arg| arg == "--verbose" || arg == "-v");
    init_logging(verbose);

    if let Err(e) = tabpilot::cli::run().await {
        eprintln!("{}", text::error(&e.to_string()));
        for suggestion in e.suggestions() {
            eprintln!("{}", text::bullet(&suggestion));
        }
        process::exit(e.exit_code());
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let directives = if verbose {
        "debug,chromiumoxide=info".to_string()
    } else {
        match std::env::var("RUST_LOG") {
            Ok(env) if !env.is_empty() => format!("warn,chromiumoxide=off,{}", env),
            _ => "warn,chromiumoxide=off".to_string(),
        }
    };
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
