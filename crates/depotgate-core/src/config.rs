//! Validated configuration consumed by the composition root.
//!
//! Environment and CLI concerns live in the daemon; the core only sees this
//! struct, already parsed. [`DepotConfig::validate`] runs once at
//! construction time so the components themselves never re-check.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DepotError, DepotResult};
use crate::sanitize::validate_identifier;

/// Default HTTP sink timeout in seconds.
pub const DEFAULT_HTTP_SINK_TIMEOUT_SECS: u64 = 30;

/// Configuration for a DepotGate process. Single-tenant: every operation
/// runs under `tenant_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepotConfig {
    /// Bind host for the service surface.
    pub host: String,
    /// Bind port for the service surface.
    pub port: u16,
    /// The tenant all operations run under.
    pub tenant_id: String,
    /// Maximum artifact size in bytes; 0 means unlimited.
    pub max_artifact_bytes: u64,
    /// Scheme of the active storage backend (`fs` or `mem`).
    pub storage_scheme: String,
    /// Root directory for staged artifact bytes.
    pub storage_base_path: PathBuf,
    /// Base directory per sink scheme (currently only `fs`).
    pub sink_bases_by_scheme: BTreeMap<String, PathBuf>,
    /// Sink schemes to register (`fs`, `http`).
    pub enabled_sinks: Vec<String>,
    /// Path of the metadata SQLite database (`:memory:` for tests).
    pub metadata_db_path: PathBuf,
    /// Path of the receipts SQLite database (`:memory:` for tests).
    pub receipts_db_path: PathBuf,
    /// Timeout applied to HTTP sink transfers, in seconds.
    pub http_sink_timeout_secs: u64,
}

impl Default for DepotConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            tenant_id: "default".into(),
            max_artifact_bytes: 0,
            storage_scheme: "fs".into(),
            storage_base_path: PathBuf::from("./data/staging"),
            sink_bases_by_scheme: BTreeMap::from([("fs".into(), PathBuf::from("./data/shipped"))]),
            enabled_sinks: vec!["fs".into()],
            metadata_db_path: PathBuf::from("./data/metadata.sqlite"),
            receipts_db_path: PathBuf::from("./data/receipts.sqlite"),
            http_sink_timeout_secs: DEFAULT_HTTP_SINK_TIMEOUT_SECS,
        }
    }
}

impl DepotConfig {
    /// Checks the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`DepotError::InvalidIdentifier`] for a malformed tenant id
    /// and [`DepotError::InvalidConfig`] for everything else.
    pub fn validate(&self) -> DepotResult<()> {
        validate_identifier(&self.tenant_id, "tenant id")?;

        match self.storage_scheme.as_str() {
            "fs" | "mem" => {}
            other => {
                return Err(DepotError::InvalidConfig {
                    detail: format!("unknown storage scheme {other:?}"),
                });
            }
        }

        for sink in &self.enabled_sinks {
            match sink.as_str() {
                "fs" => {
                    if !self.sink_bases_by_scheme.contains_key("fs") {
                        return Err(DepotError::InvalidConfig {
                            detail: "fs sink enabled but no base directory configured".into(),
                        });
                    }
                }
                "http" => {}
                other => {
                    return Err(DepotError::InvalidConfig {
                        detail: format!("unknown sink {other:?}"),
                    });
                }
            }
        }

        Ok(())
    }

    /// The HTTP sink timeout as a [`Duration`].
    #[must_use]
    pub const fn http_sink_timeout(&self) -> Duration {
        Duration::from_secs(self.http_sink_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        DepotConfig::default().validate().unwrap();
    }

    #[test]
    fn hostile_tenant_id_is_rejected() {
        let config = DepotConfig {
            tenant_id: "../../etc".into(),
            ..DepotConfig::default()
        };
        assert_eq!(
            config.validate().unwrap_err().kind(),
            "invalid_identifier"
        );
    }

    #[test]
    fn fs_sink_requires_a_base() {
        let config = DepotConfig {
            sink_bases_by_scheme: BTreeMap::new(),
            ..DepotConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().kind(), "invalid_config");
    }

    #[test]
    fn unknown_schemes_are_rejected() {
        let config = DepotConfig {
            storage_scheme: "s3".into(),
            ..DepotConfig::default()
        };
        assert!(config.validate().is_err());

        let config = DepotConfig {
            enabled_sinks: vec!["ftp".into()],
            ..DepotConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
