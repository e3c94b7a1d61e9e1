//! Operator utility for the kestrel AS2 engine
//!
//! - `check`: load and validate a configuration, list its partnerships
//! - `mic`: compute the Message Integrity Check of a file
//! - `pending`: list messages still waiting for an asynchronous receipt

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use kestrel::{KestrelConfig, config::CONFIG_ENV, find_config_file};
use kestrel_common::{MimeBody, internal, logging, partnership::attrs};
use kestrel_security::{DigestAlgorithm, Mic};
use kestrel_spool::PendingStore;

/// Operator utility for the kestrel AS2 engine
#[derive(Parser, Debug)]
#[command(name = "kestrel")]
#[command(about = "Inspect a kestrel AS2 deployment", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file, overriding `KESTREL_CONFIG` and the default paths
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration and list partnerships
    Check,
    /// Compute the MIC of a file
    Mic {
        file: PathBuf,

        /// Digest algorithm
        #[arg(short, long, default_value = "sha-256")]
        algorithm: String,

        /// Treat the file as a complete MIME entity and digest its headers too
        #[arg(long)]
        entity: bool,

        /// Content type of a bare payload
        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,

        /// Render the algorithm with RFC 3851 names (`sha256`)
        #[arg(long)]
        legacy: bool,
    },
    /// List messages waiting for an asynchronous MDN
    Pending,
}

fn load_config(explicit: Option<PathBuf>) -> anyhow::Result<KestrelConfig> {
    let path = find_config_file(explicit, std::env::var(CONFIG_ENV).ok())?;
    internal!(level = DEBUG, "Loading configuration from {}", path.display());
    KestrelConfig::load(&path)
}

fn check(config: &KestrelConfig) -> anyhow::Result<()> {
    config.validate()?;
    let certificates = config.certificate_store()?;

    println!("Partnerships ({}):", config.partnerships.len());
    for partnership in &config.partnerships {
        println!(
            "  {:<30} {}",
            partnership.label(),
            partnership.attribute(attrs::AS2_URL).unwrap_or("(inbound only)")
        );
    }

    println!("Certificates: {}", certificates.aliases().join(", "));
    for (partnership, alias) in config.unknown_aliases() {
        println!("  warning: {partnership} refers to unknown certificate alias {alias}");
    }

    if let Some(path) = config.pending.path() {
        println!("Pending receipts: {}", path.display());
    }

    println!("Configuration OK");
    Ok(())
}

fn mic(
    file: &Path,
    algorithm: &str,
    entity: bool,
    content_type: &str,
    legacy: bool,
) -> anyhow::Result<()> {
    let algorithm: DigestAlgorithm = algorithm.parse()?;
    let raw = std::fs::read(file)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", file.display()))?;

    let body = if entity {
        MimeBody::parse(&raw)?
    } else {
        MimeBody::new(content_type, raw)
    };

    println!(
        "{}",
        Mic::compute(&body, algorithm, entity).with_legacy_label(legacy)
    );
    Ok(())
}

async fn pending(config: KestrelConfig) -> anyhow::Result<()> {
    let store = config.pending.into_store()?;
    let ids = store.list().await?;

    if ids.is_empty() {
        println!("No messages awaiting a receipt");
        return Ok(());
    }

    for id in ids {
        match store.load(&id).await? {
            Some(record) => println!("{id}\n  mic:  {}\n  body: {}", record.mic, record.body),
            None => println!("{id}\n  (removed while listing)"),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => check(&load_config(cli.config)?),
        Commands::Mic {
            file,
            algorithm,
            entity,
            content_type,
            legacy,
        } => mic(&file, &algorithm, entity, &content_type, legacy),
        Commands::Pending => pending(load_config(cli.config)?).await,
    }
}
