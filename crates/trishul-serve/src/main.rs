// ABOUTME: Entry point for the trishul control server
// ABOUTME: Loads config, applies environment overrides, sets up logging, and serves

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use trishul_core::Config;

#[derive(Parser)]
#[command(name = "trishul", about = "Supervise SNMP workers and relay their events to web clients")]
struct Cli {
    /// Config file (defaults to ~/.config/trishul/config.toml)
    #[arg(long, short = 'c', env = "TRISHUL_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding [server] bind
    #[arg(long, env = "TRISHUL_BIND")]
    bind: Option<String>,

    /// Print a default config file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", Config::default_toml());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("loading config")?;
    config
        .apply_env()
        .context("applying environment overrides")?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    if config.log.file {
        trishul_log::init_file(&config.log_dir(), "app", &config.log.level);
    } else {
        trishul_log::init(&config.log.level);
    }

    trishul_serve::run(config).await
}
