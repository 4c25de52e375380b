//! Loads the connector's TOML config into one `toml::Value` table per
//! service ID, following `bootstrap::config::handle_config_and_init`'s
//! shape: one file, one table per component, read once at startup and once
//! more on every SIGHUP reload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("parsing config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// The node's own signing/decryption identity, not itself a service config
/// table: every service that needs it receives a clone of the `Arc` built
/// from this once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub signing_key_path: PathBuf,
    pub decryption_key_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TraceClientConfigToml {
    pub trace_base: url::Url,
    pub account_base: url::Url,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpEdgeConfigToml {
    pub bind: std::net::SocketAddr,
    pub account_info_url: url::Url,
    #[serde(default)]
    pub allowed_accounts: Vec<String>,
}

pub struct Config {
    pub identity: IdentityConfig,
    pub trace_client: TraceClientConfigToml,
    pub http_edge: Option<HttpEdgeConfigToml>,
    pub service_tables: HashMap<&'static str, toml::Value>,
}

const SERVICE_IDS: &[&str] = &["livesync", "kv-parser", "fulltext-parser"];

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io { path: path.to_path_buf(), source: e })?;
    let root: toml::Value = toml::from_str(&text)?;

    let identity: IdentityConfig = root
        .get("identity")
        .cloned()
        .unwrap_or(toml::Value::Table(Default::default()))
        .try_into()?;
    let trace_client: TraceClientConfigToml = root
        .get("trace-client")
        .cloned()
        .unwrap_or(toml::Value::Table(Default::default()))
        .try_into()?;
    let http_edge = root.get("http-edge").cloned().map(|v| v.try_into()).transpose()?;

    let mut service_tables = HashMap::new();
    for id in SERVICE_IDS {
        let table = root.get(id).cloned().unwrap_or(toml::Value::Table(Default::default()));
        service_tables.insert(*id, table);
    }

    Ok(Config { identity, trace_client, http_edge, service_tables })
}
