//! Sitelink CLI - redeem claims and inspect received links

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sitelink_cli::{ClaimRedeemer, DirStore};
use sitelink_core::ClaimDescriptor;

/// Sitelink - join a site network
#[derive(Parser)]
#[command(name = "sitelink", version, about)]
struct Cli {
    /// Directory holding this site's links, secrets and claims
    #[arg(long, env = "SITELINK_SITE_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Redeem a claim file handed out by another site
    Redeem {
        /// Claim descriptor (JSON)
        claim: PathBuf,

        /// Name of this site, used the first time the data directory is set up
        #[arg(long, default_value = "default")]
        site: String,
    },

    /// List received links
    Links,

    /// Show the last recorded status of a claim
    Status {
        /// Claim name
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    let result = run(cli).await;

    if let Err(e) = &result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let store = DirStore::open(&data_dir)
        .with_context(|| format!("Failed to open site directory {}", data_dir.display()))?;

    match cli.command {
        Commands::Redeem { claim, site } => cmd_redeem(store, &claim, &site, cli.json).await,
        Commands::Links => cmd_links(&store, cli.json),
        Commands::Status { name } => cmd_status(&store, &name, cli.json),
    }
}

fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "sitelink", "sitelink")
        .context("Could not determine data directory")?;
    Ok(dirs.data_dir().to_path_buf())
}

async fn cmd_redeem(store: DirStore, path: &Path, site: &str, json: bool) -> Result<()> {
    let content = std::fs::read(path)
        .with_context(|| format!("Failed to read claim {}", path.display()))?;
    let mut claim: ClaimDescriptor = serde_json::from_slice(&content)
        .with_context(|| format!("Failed to parse claim {}", path.display()))?;

    let identity = store.load_or_create_identity(site)?;
    let redeemer = ClaimRedeemer::new(store);
    let result = redeemer.redeem(&mut claim, &identity).await;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "claim": claim.name,
                "redeemed": claim.redeemed,
                "status": claim.status,
            })
        );
    }
    result.with_context(|| format!("Failed to redeem claim {}", claim.name))?;

    if !json {
        eprintln!("Redeemed claim: {}", claim.name);
    }
    Ok(())
}

fn cmd_links(store: &DirStore, json: bool) -> Result<()> {
    let links = store.links()?;

    if json {
        println!("{}", serde_json::to_string(&links)?);
        return Ok(());
    }
    if links.is_empty() {
        eprintln!("No links found");
        return Ok(());
    }

    println!("{:<24}  {:<6}  {}", "NAME", "COST", "ENDPOINTS");
    println!("{}", "-".repeat(72));
    for link in links {
        let endpoints: Vec<String> = link
            .endpoints
            .iter()
            .map(|e| format!("{}={}:{}", e.name, e.host, e.port))
            .collect();
        println!("{:<24}  {:<6}  {}", link.meta.name, link.cost, endpoints.join(","));
    }
    Ok(())
}

fn cmd_status(store: &DirStore, name: &str, json: bool) -> Result<()> {
    let claim = store
        .claim(name)?
        .with_context(|| format!("No claim named {name}"))?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "claim": claim.name,
                "redeemed": claim.redeemed,
                "status": claim.status,
            })
        );
    } else {
        println!("Claim: {}", claim.name);
        println!("URL: {}", claim.url);
        println!("Redeemed: {}", claim.redeemed);
        println!("Status: {}", claim.status);
    }
    Ok(())
}
