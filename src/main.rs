use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use ripd::runtime::config::load_config;
use ripd::runtime::daemon::RouterDaemon;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ripd")]
#[command(about = "RIPv2-style distance-vector routing daemon for virtual topologies")]
struct Args {
    /// Router configuration file.
    config: PathBuf,
    #[arg(long, default_value = "INFO")]
    log_level: String,
    /// Validate the configuration, print it as JSON, and exit.
    #[arg(long)]
    check: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let cfg = load_config(&args.config)?;
    if args.check {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
        return Ok(());
    }

    let mut daemon = RouterDaemon::new(cfg)?;
    daemon.run()?;
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let level = level.parse::<Level>()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .compact()
        .init();
    Ok(())
}
