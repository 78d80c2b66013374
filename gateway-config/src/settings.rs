//! Process-wide settings (§6 environment/configuration).
//!
//! The master key, admin database URL, and listen addresses come from the
//! environment only — no per-tenant secret ever lives here. Missing the
//! master key is fatal; the binary must refuse to start rather than run with
//! credential decryption disabled.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("MODELGATE_MASTER_KEY is not set; refusing to start without credential decryption")]
    MissingMasterKey,
    #[error("MODELGATE_DATABASE_URL is not set")]
    MissingDatabaseUrl,
    #[error("invalid listen address {0:?}: {1}")]
    InvalidListenAddr(String, std::net::AddrParseError),
}

/// Process-wide settings loaded once at startup.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Decrypts `ProviderCredential` ciphertext blobs; never logged.
    pub master_key: String,
    pub database_url: String,
    pub chat_listen_addr: std::net::SocketAddr,
    pub metrics_listen_addr: std::net::SocketAddr,
}

impl Settings {
    /// Loads settings from the process environment. Fatal (returns `Err`) if
    /// the master key or database URL is missing — the enforcer's deny-by-default
    /// stance starts at process boot, not just at request time.
    pub fn from_env() -> Result<Self, SettingsError> {
        let master_key = std::env::var("MODELGATE_MASTER_KEY")
            .map_err(|_| SettingsError::MissingMasterKey)?;
        if master_key.trim().is_empty() {
            return Err(SettingsError::MissingMasterKey);
        }
        let database_url = std::env::var("MODELGATE_DATABASE_URL")
            .map_err(|_| SettingsError::MissingDatabaseUrl)?;

        let chat_addr_str =
            std::env::var("MODELGATE_CHAT_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
        let chat_listen_addr = chat_addr_str
            .parse()
            .map_err(|e| SettingsError::InvalidListenAddr(chat_addr_str.clone(), e))?;

        let metrics_addr_str = std::env::var("MODELGATE_METRICS_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:9090".into());
        let metrics_listen_addr = metrics_addr_str
            .parse()
            .map_err(|e| SettingsError::InvalidListenAddr(metrics_addr_str.clone(), e))?;

        Ok(Self {
            master_key,
            database_url,
            chat_listen_addr,
            metrics_listen_addr,
        })
    }
}
