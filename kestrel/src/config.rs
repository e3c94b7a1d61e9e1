//! RON configuration for a kestrel processor.
//!
//! ```ron
//! (
//!     partnerships: [
//!         (
//!             name: "acme-globex",
//!             sender: { "as2_id": "ACME", "x509_alias": "acme" },
//!             receiver: { "as2_id": "GLOBEX", "x509_alias": "globex" },
//!             attributes: {
//!                 "as2_url": "https://globex.example/as2",
//!                 "sign": "sha-256",
//!                 "encrypt": "aes256",
//!             },
//!         ),
//!     ],
//!     pending: File(path: "/var/spool/kestrel/pending"),
//!     resend: (max_retries: 3),
//!     certificates: [
//!         (alias: "acme", path: "/etc/kestrel/acme.pem"),
//!     ],
//! )
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use kestrel_common::{Partnership, audit::AuditConfig, partnership::ids};
use kestrel_delivery::{ResendConfig, SenderConfig};
use kestrel_mdn::MdnConfig;
use kestrel_partnership::PartnershipStore;
use kestrel_security::{MemoryCertificateStore, SecurityDefaults};
use kestrel_spool::{FilePendingStore, PendingConfig};
use serde::Deserialize;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "KESTREL_CONFIG";

/// Locations tried, in order, when neither a flag nor [`CONFIG_ENV`] names
/// a file.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] =
    ["./kestrel.config.ron", "/etc/kestrel/kestrel.config.ron"];

/// A certificate (and optionally its private key) in a PEM file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CertificateEntry {
    pub alias: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KestrelConfig {
    pub partnerships: Vec<Partnership>,
    /// Insert unknown partner pairs on first contact instead of rejecting
    /// them.
    pub self_fill_partnerships: bool,
    pub security: SecurityDefaults,
    pub pending: PendingConfig,
    pub resend: ResendConfig,
    pub mdn: MdnConfig,
    pub sender: SenderConfig,
    pub audit: AuditConfig,
    pub certificates: Vec<CertificateEntry>,
}

impl KestrelConfig {
    /// Parse a configuration document.
    ///
    /// # Errors
    /// If the document is not valid RON for this structure.
    pub fn parse(source: &str) -> anyhow::Result<Self> {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .from_str(source)
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))
    }

    /// Read and parse the configuration at `path`.
    ///
    /// # Errors
    /// If the file cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::parse(&source).with_context(|| format!("In {}", path.display()))
    }

    /// Reject settings that would only fail once traffic flows.
    ///
    /// # Errors
    /// The first problem found.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.partnership_store()?;

        if let Some(path) = self.pending.path() {
            FilePendingStore::validate_path(path).context("Invalid pending directory")?;
        }

        if !(0.0..=1.0).contains(&self.resend.jitter_factor) {
            anyhow::bail!(
                "resend.jitter_factor must be between 0 and 1, got {}",
                self.resend.jitter_factor
            );
        }
        if self.resend.base_delay_secs > self.resend.max_delay_secs {
            anyhow::bail!(
                "resend.base_delay_secs ({}) exceeds resend.max_delay_secs ({})",
                self.resend.base_delay_secs,
                self.resend.max_delay_secs
            );
        }

        let mut aliases: Vec<_> = self.certificates.iter().map(|c| &c.alias).collect();
        aliases.sort();
        if let Some(pair) = aliases.windows(2).find(|pair| pair[0] == pair[1]) {
            anyhow::bail!("Certificate alias {} is configured twice", pair[0]);
        }

        Ok(())
    }

    /// `(partnership, alias)` pairs whose X.509 alias has no configured
    /// certificate.
    #[must_use]
    pub fn unknown_aliases(&self) -> Vec<(String, String)> {
        self.partnerships
            .iter()
            .flat_map(|partnership| {
                [
                    partnership.sender_id(ids::X509_ALIAS),
                    partnership.receiver_id(ids::X509_ALIAS),
                ]
                .into_iter()
                .flatten()
                .filter(move |alias| !self.certificates.iter().any(|c| c.alias == *alias))
                .map(move |alias| (partnership.label(), alias.to_string()))
            })
            .collect()
    }

    /// # Errors
    /// If two partnerships share a name, or one lacks identities.
    pub fn partnership_store(&self) -> anyhow::Result<PartnershipStore> {
        PartnershipStore::with_partnerships(
            self.partnerships.iter().cloned(),
            self.self_fill_partnerships,
        )
        .context("Invalid partnerships")
    }

    /// Load every configured PEM file.
    ///
    /// # Errors
    /// If a file cannot be read or holds no certificate.
    pub fn certificate_store(&self) -> anyhow::Result<MemoryCertificateStore> {
        let store = MemoryCertificateStore::new();
        for entry in &self.certificates {
            store
                .load_pem_file(&entry.alias, &entry.path)
                .with_context(|| format!("Loading {}", entry.path.display()))?;
        }
        Ok(store)
    }
}

/// Find the configuration file using the following precedence:
/// 1. `explicit`, usually a command-line flag
/// 2. `from_env`, the value of [`CONFIG_ENV`]
/// 3. [`DEFAULT_CONFIG_PATHS`]
///
/// # Errors
/// If a named file does not exist, or none of the defaults do.
pub fn find_config_file(
    explicit: Option<PathBuf>,
    from_env: Option<String>,
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("Config file does not exist: {}", path.display());
    }

    if let Some(env_path) = from_env {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
    {
        return Ok(path);
    }

    let paths_tried = DEFAULT_CONFIG_PATHS
        .iter()
        .map(|p| format!("  - {p}"))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}
