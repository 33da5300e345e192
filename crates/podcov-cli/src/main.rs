mod config;
mod percent_cmd;
mod serve_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::{PodcovConfig, ServeOverrides};

#[derive(Parser)]
#[command(name = "podcov", about = "Cluster-wide runtime coverage endpoints")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a podcov config file
    Init {
        /// Expected replica count, this one included
        #[arg(long, default_value_t = 1)]
        replicas: usize,
        /// Load-balanced base URL peers are polled through
        #[arg(long)]
        entry_url: Option<String>,
        /// Directory the instrumented process writes coverage data into
        #[arg(long)]
        cover_dir: Option<PathBuf>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Serve the /debug/coverage/ endpoints
    Serve {
        /// Address to bind
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
        /// Expected replica count (overrides PODCOV_REPLICAS)
        #[arg(long)]
        replicas: Option<usize>,
        /// Load-balanced base URL (overrides PODCOV_ENTRY_URL)
        #[arg(long)]
        entry_url: Option<String>,
        /// Coverage data directory (overrides PODCOV_COVER_DIR)
        #[arg(long)]
        cover_dir: Option<PathBuf>,
    },
    /// Average a saved percent report (`-` reads stdin)
    Percent {
        /// Report file, or `-` for stdin
        report: String,
    },
}

/// Execute the `podcov init` command: write a config file.
fn cmd_init(
    replicas: usize,
    entry_url: Option<String>,
    cover_dir: Option<PathBuf>,
    force: bool,
) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }
    if replicas == 0 {
        anyhow::bail!("--replicas must be at least 1");
    }

    let cfg = config::ConfigFile {
        coverage: config::CoverageSection {
            replicas,
            entry_url: entry_url.clone(),
            ..config::CoverageSection::default()
        },
        runtime: config::RuntimeSection {
            cover_dir: cover_dir.clone(),
        },
        ..config::ConfigFile::default()
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  coverage.replicas = {replicas}");
    if let Some(url) = entry_url {
        println!("  coverage.entry_url = {url}");
    }
    match cover_dir {
        Some(dir) => println!("  runtime.cover_dir = {}", dir.display()),
        None => {
            println!();
            println!("Set runtime.cover_dir, PODCOV_COVER_DIR or GOCOVERDIR before `podcov serve`.");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            replicas,
            entry_url,
            cover_dir,
            force,
        } => {
            cmd_init(replicas, entry_url, cover_dir, force)?;
        }
        Commands::Serve {
            bind,
            port,
            replicas,
            entry_url,
            cover_dir,
        } => {
            let overrides = ServeOverrides {
                bind,
                port,
                replicas,
                entry_url,
                cover_dir,
            };
            let resolved = PodcovConfig::resolve(&overrides)?;
            serve_cmd::run_serve(resolved).await?;
        }
        Commands::Percent { report } => {
            percent_cmd::run_percent(&report)?;
        }
    }

    Ok(())
}
