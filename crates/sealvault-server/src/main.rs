mod config;
mod error;
mod routes;

use std::path::Path;

use anyhow::{bail, Context};
use tokio::net::TcpListener;

use sealvault::{MasterSecret, Vault};

use config::ServerConfig;
use routes::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load()?;
    init_tracing(config.json_logs);

    tracing::info!("sealvault server v{} starting", env!("CARGO_PKG_VERSION"));

    let vault = if config.memory {
        tracing::warn!("running in memory; nothing will survive a restart");
        Vault::in_memory(config.vault.clone()).await?
    } else {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
        let master = load_or_generate_master(&config.key_path())?;
        Vault::open_sqlite(config.database_path(), master, config.vault.clone()).await?
    };
    tracing::info!(
        events = vault.audit_len().await,
        ledger_key = %vault.ledger_key().to_hex(),
        "vault open"
    );

    let app = build_router(AppState::new(vault));
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!("listening on {}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("sealvault=info,sealvault_server=info,tower_http=info")
    });
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Read the master secret, creating it on first boot.
///
/// The file holds the 32 bytes either raw or hex-encoded.
fn load_or_generate_master(path: &Path) -> anyhow::Result<MasterSecret> {
    if path.exists() {
        let raw = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        return parse_master(&raw).with_context(|| format!("parsing {}", path.display()));
    }
    let master = MasterSecret::generate();
    std::fs::write(path, hex::encode(master.as_bytes()))
        .with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(path = %path.display(), "generated new master secret");
    Ok(master)
}

fn parse_master(raw: &[u8]) -> anyhow::Result<MasterSecret> {
    if let Ok(bytes) = <[u8; 32]>::try_from(raw) {
        return Ok(MasterSecret::from_bytes(bytes));
    }
    let text = std::str::from_utf8(raw).context("master secret is neither 32 raw bytes nor hex")?;
    let decoded = hex::decode(text.trim())?;
    let Ok(bytes) = <[u8; 32]>::try_from(decoded.as_slice()) else {
        bail!("master secret must be 32 bytes, found {}", decoded.len());
    };
    Ok(MasterSecret::from_bytes(bytes))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_key_is_created_then_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.key");
        let first = load_or_generate_master(&path).unwrap();
        let second = load_or_generate_master(&path).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(std::fs::read_to_string(&path).unwrap().len(), 64);
    }

    #[test]
    fn test_master_key_formats() {
        assert_eq!(parse_master(&[3u8; 32]).unwrap().as_bytes(), &[3u8; 32]);
        let hex_form = format!("{}\n", hex::encode([4u8; 32]));
        assert_eq!(parse_master(hex_form.as_bytes()).unwrap().as_bytes(), &[4u8; 32]);
        assert!(parse_master(b"abcd").is_err());
    }
}
