//! Sitelink Daemon - issues and redeems site grants
//!
//! `serve` runs the redemption endpoint; the `grant` subcommands manage
//! records in the local store directly.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sitelink_core::{ClaimDescriptor, ExternalGrant, GrantRecord, GrantSecret, ObjectMeta};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use sitelink_daemon::config::GrantConfig;
use sitelink_daemon::generator::LinkTokenGenerator;
use sitelink_daemon::manager::Manager;
use sitelink_daemon::registry::Registry;
use sitelink_daemon::resolver::{ClusterLookup, Resolver, StaticLookup};
use sitelink_daemon::store::{ObjectStore, SqliteStore};
use sitelink_daemon::tls::{ReloadableTlsAcceptor, SiteAuthority};
use sitelink_daemon::watch::{Watcher, DEFAULT_POLL_INTERVAL};

type BoxError = Box<dyn std::error::Error>;

/// Sitelink Daemon - grant issuing and redemption
#[derive(Parser)]
#[command(name = "sitelink-daemon", version, about)]
struct Cli {
    /// Directory holding the grant database and site authority
    #[arg(long, env = "SITELINK_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the redemption server (default if no command given)
    Serve {
        #[command(flatten)]
        config: GrantConfig,
    },

    /// Grant management
    Grant {
        #[command(subcommand)]
        action: GrantAction,
    },
}

#[derive(Subcommand)]
enum GrantAction {
    /// Create a grant
    Create {
        name: String,

        #[arg(long, env = "SITELINK_NAMESPACE", default_value = "default")]
        namespace: String,

        /// How long the grant stays redeemable (e.g. "10m", "1h30m")
        #[arg(long, default_value = "10m")]
        validity: String,

        /// How many sites may redeem it
        #[arg(long, default_value_t = 1)]
        redemptions: u32,

        /// Use this secret instead of a generated one
        #[arg(long)]
        secret: Option<String>,
    },

    /// Print the claim a joining site needs, as JSON
    Show {
        name: String,

        #[arg(long, env = "SITELINK_NAMESPACE", default_value = "default")]
        namespace: String,
    },

    /// List grants
    List,

    /// Delete a grant
    Delete {
        name: String,

        #[arg(long, env = "SITELINK_NAMESPACE", default_value = "default")]
        namespace: String,
    },

    /// Import an AccessGrant or legacy claim document
    Import { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sitelink")
    });

    let command = match cli.command {
        Some(command) => command,
        None => Cli::parse_from(["sitelink-daemon", "serve"])
            .command
            .ok_or("no command given")?,
    };

    match command {
        Commands::Serve { config } => cmd_serve(data_dir, config).await,
        Commands::Grant { action } => cmd_grant(data_dir, action).await,
    }
}

async fn open_store(data_dir: &std::path::Path) -> Result<SqliteStore, BoxError> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("grants.db");
    tracing::info!(path = %db_path.display(), "Opening database");
    Ok(SqliteStore::open(&db_path).await?)
}

/// Start the redemption server.
async fn cmd_serve(data_dir: PathBuf, config: GrantConfig) -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let store: Arc<dyn ObjectStore> = Arc::new(open_store(&data_dir).await?);

    let authority = Arc::new(SiteAuthority::load_or_generate(
        &data_dir,
        &format!("sitelink-{}-ca", config.namespace),
    )?);
    let ca = match &config.ca {
        Some(path) => std::fs::read_to_string(path)?,
        None => authority.ca_pem().to_string(),
    };

    let lookup: Arc<dyn ClusterLookup> = match &config.lookup_file {
        Some(path) => Arc::new(StaticLookup::from_file(path)?),
        None => Arc::new(StaticLookup::default()),
    };
    let resolver = Arc::new(Resolver::new(
        config.strategy()?,
        config.resolver_settings(),
        lookup,
    ));
    let generator = Arc::new(LinkTokenGenerator::new(resolver.clone(), authority));

    let registry = Arc::new(Registry::new(store.clone()));
    let manager = Arc::new(Manager::new(
        config.manager_settings(Some(ca)),
        registry,
        resolver,
        generator,
    ));

    let tls = match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => Some(ReloadableTlsAcceptor::load(cert.clone(), key.clone())?),
        _ => {
            tracing::warn!("No TLS certificate configured, serving redemptions over plain HTTP");
            None
        }
    };

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let shutdown_rx_server = shutdown_tx.subscribe();
    let shutdown_rx_watch = shutdown_tx.subscribe();

    let shutdown_tx_clone = shutdown_tx.clone();
    let signal_task = tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown");
            }
        }

        let _ = shutdown_tx_clone.send(());
    });

    // Fill the registry before the first request can arrive.
    let mut watcher = Watcher::new(store, manager.clone());
    let loaded = watcher.poll_once().await?;
    tracing::info!(grants = loaded, "Loaded grants from database");
    let watch_task = tokio::spawn(watcher.run(DEFAULT_POLL_INTERVAL, shutdown_rx_watch));

    let listener = TcpListener::bind(config.listen_addr()).await?;
    tracing::info!(addr = %config.listen_addr(), "Sitelink daemon starting");

    let result = manager.run(listener, tls, shutdown_rx_server).await;
    // Stop the watcher too if the server ended on its own.
    let _ = shutdown_tx.send(());
    let _ = watch_task.await;
    signal_task.abort();

    match result {
        Ok(()) => {
            tracing::info!("Daemon shutdown complete");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Daemon shutdown with error");
            Err(e.into())
        }
    }
}

/// Handle grant subcommands.
async fn cmd_grant(data_dir: PathBuf, action: GrantAction) -> Result<(), BoxError> {
    let store = open_store(&data_dir).await?;

    match action {
        GrantAction::Create {
            name,
            namespace,
            validity,
            redemptions,
            secret,
        } => {
            sitelink_core::duration::parse_validity(&validity)?;
            let mut record = GrantRecord::grant(ObjectMeta::new(namespace, name))
                .with_validity(validity)
                .with_quota(redemptions);
            if let Some(secret) = secret {
                record = record.with_secret(GrantSecret::new(secret));
            }
            let created = store.create(record).await?;

            println!("Grant created");
            println!();
            println!("  Name:        {}", created.identity());
            println!("  Uid:         {}", created.meta.uid);
            println!("  Redemptions: {}", redemptions);
            println!();
            println!("Run `sitelink-daemon grant show {}` once the daemon has processed it.", created.meta.name);
        }

        GrantAction::Show { name, namespace } => {
            let record = store.get(&namespace, &name).await?;
            let Some(claim) = ClaimDescriptor::from_grant(&record) else {
                return Err(format!(
                    "grant {} is not ready yet (status: {:?})",
                    record.identity(),
                    record.status
                )
                .into());
            };
            println!("{}", serde_json::to_string_pretty(&claim)?);
        }

        GrantAction::List => {
            let records = store.list().await?;
            if records.is_empty() {
                println!("No grants");
                return Ok(());
            }
            println!(
                "{:<32} {:<24} {:>10} {:<25}",
                "NAME", "STATUS", "REDEEMED", "EXPIRES"
            );
            for record in records {
                let quota = record
                    .effective_quota()
                    .map(|q| q.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let expiry = record
                    .expiry
                    .map(|e| e.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<32} {:<24} {:>10} {:<25}",
                    record.identity(),
                    record.status,
                    format!("{}/{}", record.claimed, quota),
                    expiry
                );
            }
        }

        GrantAction::Delete { name, namespace } => {
            store.delete(&namespace, &name).await?;
            println!("Grant {}/{} deleted", namespace, name);
        }

        GrantAction::Import { file } => {
            let contents = std::fs::read_to_string(&file)?;
            let external: ExternalGrant = serde_json::from_str(&contents)?;
            let mut record = GrantRecord::try_from(external)?;
            record.meta.resource_version = 0;
            let created = store.create(record).await?;
            println!(
                "Imported {} grant {} ({})",
                created.schema,
                created.identity(),
                created.meta.uid
            );
        }
    }

    Ok(())
}
