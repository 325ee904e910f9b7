use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use copyto::config::JobConfig;
use copyto::runtime;

#[derive(Parser)]
#[command(name = "copyto")]
#[command(about = "copyto - Parallel COPY TO sink for Arrow record batches", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a copy job from YAML configuration
    Run {
        /// Path to job YAML file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Validate a job configuration
    Validate {
        /// Path to job YAML file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

/// `RUST_LOG` filtering, defaulting to `info`
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(env_filter)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Run { config } => {
            let job = JobConfig::from_yaml_file(&config)?;
            let summary = runtime::run_job(&job)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Validate { config } => {
            let job = JobConfig::from_yaml_file(&config)?;
            println!(
                "✓ Job '{}' is valid ({:?} output to {})",
                job.name,
                job.copy.mode(),
                job.copy.path
            );
        }
        Commands::Version => {
            println!("copyto version {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
