//! appletd - applet runtime host

mod cli;
mod init;

use applet_foundation::{Launcher, RuntimeConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// appletd - supervise applet processes and serve their control plane
#[derive(Parser, Debug)]
#[command(name = "appletd")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file to use instead of the global + project merge
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Runtime directory for sockets
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Launcher: an interpreter command line ("bun run", "node") or "direct"
    #[arg(long)]
    launcher: Option<String>,

    /// Register an applet (repeatable)
    #[arg(long = "applet", value_name = "ID=ENTRYPOINT", value_parser = parse_applet)]
    applets: Vec<(String, String)>,

    /// Start an applet right away instead of on first use (repeatable)
    #[arg(long = "start", value_name = "ID")]
    start: Vec<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a project config to .appletd/config.json
    Init {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(Command::Init { force }) = &args.command {
        return init::init_project(*force);
    }

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = load_config(&args)?;

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    cli::serve(config, &args.applets, &args.start).await
}

/// Config file(s), then command-line overrides
fn load_config(args: &Args) -> anyhow::Result<RuntimeConfig> {
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::load_from(path)?,
        None => RuntimeConfig::load()?,
    };

    if let Some(dir) = &args.base_dir {
        config.base_dir = Some(dir.clone());
    }
    if let Some(spec) = &args.launcher {
        config.launcher = Launcher::from_spec(spec);
    }
    Ok(config)
}

fn parse_applet(value: &str) -> Result<(String, String), String> {
    let (id, entry_point) = value
        .split_once('=')
        .ok_or_else(|| format!("expected ID=ENTRYPOINT, got {:?}", value))?;
    let (id, entry_point) = (id.trim(), entry_point.trim());
    if id.is_empty() || entry_point.is_empty() {
        return Err(format!("expected ID=ENTRYPOINT, got {:?}", value));
    }
    Ok((id.to_string(), entry_point.to_string()))
}
