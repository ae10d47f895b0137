use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use relaycode::config::RelayConfig;
use relaycode::relay::chain::GroupBy;

mod cmd;

#[derive(Parser)]
#[command(name = "relaycode")]
#[command(version, about = "Transaction relay with simulated apply and live event streaming")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Config file (defaults to ./relay.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the relay server
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// JSON seed file replacing the built-in demo data
        #[arg(long)]
        seed: Option<PathBuf>,

        /// Enable dev mode (CORS permissive for a local UI dev server)
        #[arg(long)]
        dev: bool,
    },
    /// Follow the event stream and log every change
    Watch {
        /// Relay base URL
        #[arg(long)]
        url: Option<String>,
    },
    /// Print transactions grouped and threaded by parent
    Groups {
        /// Relay base URL
        #[arg(long)]
        url: Option<String>,

        /// prompt, date, author, status, files or none
        #[arg(long, default_value = "prompt")]
        by: GroupBy,

        /// Print the groups as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let default_directive = if verbose {
        "relaycode=debug,tower_http=debug"
    } else {
        "relaycode=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let mut settings = RelayConfig::load_or_default(cli.config.as_deref())?;
    settings.apply_env()?;

    match cli.command {
        Commands::Serve {
            port,
            host,
            seed,
            dev,
        } => {
            cmd::cmd_serve(settings, port, host, seed, dev).await?;
        }
        Commands::Watch { url } => {
            cmd::cmd_watch(settings, url).await?;
        }
        Commands::Groups { url, by, json } => {
            cmd::cmd_groups(settings, url, by, json).await?;
        }
    }

    Ok(())
}
