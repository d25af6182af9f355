use anyhow::Result;
use clap::{Parser, Subcommand};
use conjure::cli::{self, ApplyOptions, CliContext, DownOptions, UpOptions};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "conjure",
    version,
    about = "Conjure short-lived service containers for tests"
)]
struct Cli {
    /// Config file (default: ~/.config/conjure/conjure.toml)
    #[arg(long, env = "CONJURE_CONFIG")]
    config: Option<String>,

    /// Engine CLI to drive (docker, podman)
    #[arg(long, env = "CONJURE_ENGINE")]
    engine: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, start and wait for built-in services
    Up(UpOptions),
    /// Provision a container from a JSON or YAML document
    Apply(ApplyOptions),
    /// Stop and remove containers by id
    Down(DownOptions),
    /// List built-in services
    Services,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = CliContext::load(cli.config.as_deref(), cli.engine.as_deref())?;

    match cli.command {
        Commands::Up(options) => cli::up::run(options, &ctx),
        Commands::Apply(options) => cli::apply::run(options, &ctx),
        Commands::Down(options) => cli::down::run(options, &ctx),
        Commands::Services => cli::services::run(&ctx),
    }
}
