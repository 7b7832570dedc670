mod cache;
mod catalog;
mod commands;
mod config;
mod logging;
mod net;
mod offline;
mod worker;

#[cfg(test)]
mod testutil;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hush")]
#[command(about = "Offline-capable audio session client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/hush/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep stores in memory for this run only
  #[arg(long)]
  ephemeral: bool,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.log_file.as_deref())?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  let ctx = commands::Context::new(&config, args.ephemeral)?;
  commands::run(&ctx, args.command, &mut std::io::stdout()).await?;

  Ok(())
}
