use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(
    name = "servbase",
    version,
    about = "Service registration, distributed locks and cluster-unique ids on etcd",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    /// TOML config file; SERVBASE_* environment variables are used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register endpoints and keep them alive until ctrl-c
    Serve {
        /// JSON file with the handler map ({"h1": {"type": "thrift", "addr": "ip:port"}})
        #[arg(short, long)]
        servs: PathBuf,

        /// Also register under these regions (cross-DC)
        #[arg(long, default_value = "false")]
        cross_dc: bool,
    },

    /// Hold a distributed lock until ctrl-c
    Lock {
        /// Lock name
        name: String,

        /// Use the global namespace instead of the service-local one
        #[arg(long, default_value = "false")]
        global: bool,
    },

    /// Print cluster-unique ids
    NextId {
        /// Use the low-rate generator of this namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// Number of ids to print
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    setup_tracing(&cli.log_format, cli.verbose)?;

    if let Err(e) = servbase::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { servs, cross_dc } => {
            tracing::info!(servs = %servs.display(), cross_dc = %cross_dc, "Starting serve command");
            commands::serve(config, servs, cross_dc).await?;
        }

        Commands::Lock { name, global } => {
            tracing::info!(name = %name, global = %global, "Starting lock command");
            commands::hold_lock(config, name, global).await?;
        }

        Commands::NextId { namespace, count } => {
            tracing::info!(namespace = ?namespace, count = %count, "Starting next-id command");
            commands::next_id(config, namespace, count).await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("servbase=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("servbase=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
