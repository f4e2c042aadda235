use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use onedev_mirror::{Config, MirrorProvisioner, OneDevDiscovery, RepoSpec};

#[derive(Parser)]
#[command(name = "onedev-mirror")]
#[command(about = "OneDev connector for repository backup and mirroring")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List repositories discovered from the configured sources
    List {
        /// Show repository details
        #[arg(long)]
        details: bool,
    },

    /// Provision mirror projects for every discovered repository on every
    /// configured destination
    Provision {
        /// Discover only, don't touch the destinations
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    match cli.command {
        Commands::List { details } => list_repositories(&config, details).await,
        Commands::Provision { dry_run } => provision_mirrors(&config, dry_run).await,
    }
}

async fn list_repositories(config: &Config, details: bool) -> Result<()> {
    let (repos, attempted) = discover(config).await;
    if !attempted {
        println!("No OneDev sources configured.");
        return Ok(());
    }

    println!("Found {} repositories", repos.len());
    for repo in &repos {
        println!("  {} ({})", repo.full_name(), repo.clone_url);
        if details {
            println!("    branch: {}  hoster: {}", repo.default_branch, repo.hoster);
            if !repo.description.is_empty() {
                println!("    {}", repo.description);
            }
        }
    }

    Ok(())
}

async fn provision_mirrors(config: &Config, dry_run: bool) -> Result<()> {
    let (repos, attempted) = discover(config).await;
    if !attempted {
        println!("No OneDev sources configured.");
        return Ok(());
    }
    if config.destinations.is_empty() {
        println!("No OneDev destinations configured.");
        return Ok(());
    }

    let provisioner = MirrorProvisioner::new();
    for dest in &config.destinations {
        for repo in &repos {
            if dry_run {
                println!("would provision {} on {}", repo.full_name(), dest.url);
                continue;
            }

            // One failed repository must not stop the rest of the run
            match provisioner.provision(dest, repo).await {
                Ok(clone_url) => println!("provisioned {} -> {}", repo.full_name(), clone_url),
                Err(err) => {
                    error!(repo = %repo.full_name(), "provisioning failed: {:#}", err);
                }
            }
        }
    }

    Ok(())
}

async fn discover(config: &Config) -> (Vec<RepoSpec>, bool) {
    let discovery = OneDevDiscovery::new(config.sources.clone());
    let (repos, attempted) = discovery.discover().await;
    if attempted {
        info!("Discovered {} repositories", repos.len());
    }
    (repos, attempted)
}
