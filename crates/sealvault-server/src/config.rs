//! Server configuration.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, environment
//! variables (`SEALVAULT_*`), command-line flags. Nested vault settings are
//! reached from the environment with `__`, as in
//! `SEALVAULT_VAULT__LEDGER__MAX_ATTEMPTS=5`.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use sealvault::VaultConfig;

const ENV_PREFIX: &str = "SEALVAULT_";
const DEFAULT_PORT: u16 = 8730;

/// SealVault HTTP server
///
/// Flags left off the command line fall through to the environment, the
/// config file and finally the defaults.
#[derive(Parser, Serialize, Debug, Clone, Default)]
#[command(name = "sealvault-server", version, about = "SealVault HTTP server")]
pub struct Args {
    /// Address to listen on
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<SocketAddr>,

    /// Directory holding vault.db and vault.key
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Path to a TOML config file
    #[arg(long, env = "SEALVAULT_CONFIG")]
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Keep everything in memory; nothing survives a restart
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<bool>,

    /// Emit JSON log lines
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_logs: Option<bool>,
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    pub memory: bool,
    pub json_logs: bool,
    pub vault: VaultConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            data_dir: PathBuf::from("./data"),
            memory: false,
            json_logs: false,
            vault: VaultConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse the command line and layer it over the other sources.
    pub fn load() -> anyhow::Result<Self> {
        let args = Args::parse();
        if let Some(path) = &args.config {
            if !path.is_file() {
                bail!("config file {} does not exist", path.display());
            }
        }
        Self::figment(&args)
            .extract()
            .context("loading configuration")
    }

    pub fn figment(args: &Args) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(ServerConfig::default()));
        if let Some(path) = &args.config {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__"))
            .merge(Serialized::defaults(args))
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("vault.db")
    }

    pub fn key_path(&self) -> PathBuf {
        self.data_dir.join("vault.key")
    }
}
