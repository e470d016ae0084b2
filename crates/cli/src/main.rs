use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::{ReplayArgs, ShowConfigArgs};
use swing_trade_core::ConfigLoader;

#[derive(Parser)]
#[command(name = "swing-trade")]
#[command(about = "Bullish swing-structure option trading engine", long_about = None)]
struct Cli {
    /// Directory holding Config.toml and profile overlays
    #[arg(long, global = true, env = "SWING_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Profile overlay, loads Config.{profile}.toml on top of Config.toml
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay historical bars through the full pipeline against the paper broker
    Replay(ReplayArgs),
    /// Print the effective configuration
    ShowConfig(ShowConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    if let Some(path) = &cli.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .init();
    }

    let config = ConfigLoader::load_from(&cli.config_dir, cli.profile.as_deref())?;
    tracing::debug!(
        config_dir = %cli.config_dir.display(),
        profile = cli.profile.as_deref().unwrap_or("-"),
        "Configuration loaded"
    );

    match cli.command {
        Commands::Replay(args) => commands::replay::run(args, config).await?,
        Commands::ShowConfig(args) => commands::show_config::run(&args, &config)?,
    }

    Ok(())
}
