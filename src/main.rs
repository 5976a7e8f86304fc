use anyhow::Result;
use clap::Parser;
use face_attendance::cli::{self, Cli};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    cli::run(cli)
}

/// `RUST_LOG` wins; otherwise info, or debug with source locations in dev mode.
fn setup_logging(dev_mode: bool) {
    let default_level = if dev_mode { "debug" } else { "info,ort=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if dev_mode {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
