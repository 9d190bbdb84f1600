//! Daemon configuration: a TOML file mapped onto the core config plus
//! daemon-only settings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use depotgate_core::DepotConfig;

/// Default per-request deadline in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

fn default_host() -> String {
    "127.0.0.1".into()
}

const fn default_port() -> u16 {
    8000
}

fn default_tenant() -> String {
    "default".into()
}

fn default_storage_scheme() -> String {
    "fs".into()
}

fn default_storage_base() -> PathBuf {
    PathBuf::from("./data/staging")
}

fn default_sink_bases() -> BTreeMap<String, PathBuf> {
    BTreeMap::from([("fs".to_string(), PathBuf::from("./data/shipped"))])
}

fn default_enabled_sinks() -> Vec<String> {
    vec!["fs".into()]
}

fn default_metadata_db() -> PathBuf {
    PathBuf::from("./data/metadata.sqlite")
}

fn default_receipts_db() -> PathBuf {
    PathBuf::from("./data/receipts.sqlite")
}

const fn default_http_sink_timeout() -> u64 {
    30
}

const fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// File-backed daemon configuration. Unknown keys are rejected so typos
/// fail loudly at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DaemonConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Tenant all operations run under.
    pub tenant_id: String,
    /// Maximum artifact size in bytes; 0 means unlimited.
    pub max_artifact_bytes: u64,
    /// Active storage backend scheme.
    pub storage_scheme: String,
    /// Root directory for staged artifact bytes.
    pub storage_base_path: PathBuf,
    /// Base directory per sink scheme.
    pub sink_bases_by_scheme: BTreeMap<String, PathBuf>,
    /// Sinks to register.
    pub enabled_sinks: Vec<String>,
    /// Metadata database path.
    pub metadata_db_path: PathBuf,
    /// Receipts database path.
    pub receipts_db_path: PathBuf,
    /// HTTP sink timeout in seconds.
    pub http_sink_timeout_secs: u64,
    /// API key for the HTTP surface. With no key configured, requests are
    /// refused unless `allow_insecure_dev` is set.
    pub api_key: Option<String>,
    /// Disables authentication for local development.
    pub allow_insecure_dev: bool,
    /// Per-request deadline in seconds.
    pub request_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tenant_id: default_tenant(),
            max_artifact_bytes: 0,
            storage_scheme: default_storage_scheme(),
            storage_base_path: default_storage_base(),
            sink_bases_by_scheme: default_sink_bases(),
            enabled_sinks: default_enabled_sinks(),
            metadata_db_path: default_metadata_db(),
            receipts_db_path: default_receipts_db(),
            http_sink_timeout_secs: default_http_sink_timeout(),
            api_key: None,
            allow_insecure_dev: false,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl DaemonConfig {
    /// Loads the configuration from a TOML file. A missing file yields the
    /// defaults.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Projects the daemon configuration onto the core config struct.
    #[must_use]
    pub fn depot_config(&self) -> DepotConfig {
        DepotConfig {
            host: self.host.clone(),
            port: self.port,
            tenant_id: self.tenant_id.clone(),
            max_artifact_bytes: self.max_artifact_bytes,
            storage_scheme: self.storage_scheme.clone(),
            storage_base_path: self.storage_base_path.clone(),
            sink_bases_by_scheme: self.sink_bases_by_scheme.clone(),
            enabled_sinks: self.enabled_sinks.clone(),
            metadata_db_path: self.metadata_db_path.clone(),
            receipts_db_path: self.receipts_db_path.clone(),
            http_sink_timeout_secs: self.http_sink_timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.tenant_id, "default");
        assert!(!config.allow_insecure_dev);
    }

    #[test]
    fn partial_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depotgate.toml");
        std::fs::write(
            &path,
            "port = 9001\ntenant_id = \"acme\"\nmax_artifact_bytes = 1048576\n",
        )
        .unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(config.tenant_id, "acme");
        assert_eq!(config.max_artifact_bytes, 1_048_576);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn unknown_keys_fail_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depotgate.toml");
        std::fs::write(&path, "prot = 9001\n").unwrap();
        assert!(DaemonConfig::load(&path).is_err());
    }
}
