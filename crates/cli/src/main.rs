use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;
mod settings;

/// kiln - dependency-aware incremental builder for apk packages and OCI images
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(flatten)]
  settings: settings::SettingsArgs,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build every package and image once
  Build,

  /// Watch sources and rebuild affected artifacts on change
  Dev,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_filter = if cli.verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
    .without_time()
    .init();

  match cli.command {
    Commands::Build => cmd::cmd_build(&cli.settings),
    Commands::Dev => cmd::cmd_dev(&cli.settings),
  }
}
