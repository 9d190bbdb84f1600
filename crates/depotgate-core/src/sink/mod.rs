//! Outbound sinks: pluggable transports for shipped artifact bundles.
//!
//! A sink transfers a frozen set of artifact pointers plus their manifest to
//! an external destination. Content is fetched lazily through a
//! [`ContentGetter`] so sinks can stream. Sinks never retry; a transient
//! failure surfaces as `SinkTransportFailure` and the shipping state machine
//! decides what that means.
//!
//! The destination URI's scheme selects the sink through [`SinkRegistry`],
//! which is built once at startup from the configuration. Unknown schemes
//! fail with `UnknownSink`.

mod filesystem;
mod http;

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::config::DepotConfig;
use crate::error::{DepotError, DepotResult};
use crate::model::{ArtifactPointer, ShipmentManifest};
use crate::sanitize::parse_location;
use crate::storage::BoxFuture;

pub use filesystem::FilesystemSink;
pub use http::HttpSink;

/// Lazy per-artifact content fetch used by sinks during a shipment. The
/// returned future owns everything it needs, so it is `'static`.
pub type ContentGetter<'a> =
    &'a (dyn Fn(Uuid) -> BoxFuture<'static, DepotResult<Vec<u8>>> + Send + Sync);

/// Object-safe async interface to an outbound transport.
pub trait OutboundSink: Send + Sync + std::fmt::Debug {
    /// Transfers `pointers` and `manifest` to `destination`.
    ///
    /// For the filesystem sink `destination` is the body of the destination
    /// URI (a relative subpath under the sink base); for HTTP sinks it is
    /// the full URL.
    ///
    /// # Errors
    ///
    /// - `PathViolation` if a filesystem destination escapes the sink base.
    /// - `SinkTransportFailure` if the transfer fails; the sink does not
    ///   retry.
    /// - Errors from the content getter propagate unchanged.
    fn ship<'a>(
        &'a self,
        pointers: &'a [ArtifactPointer],
        destination: &'a str,
        manifest: &'a ShipmentManifest,
        content: ContentGetter<'a>,
    ) -> BoxFuture<'a, DepotResult<()>>;
}

/// Scheme-to-sink table built once at startup. `http` and `https` share the
/// HTTP sink.
#[derive(Debug)]
pub struct SinkRegistry {
    sinks: HashMap<&'static str, Arc<dyn OutboundSink>>,
}

impl SinkRegistry {
    /// Builds the registry from the enabled sinks in `config`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when an enabled sink is missing its
    /// configuration (already caught by [`DepotConfig::validate`]) or when
    /// the HTTP client cannot be constructed.
    pub fn from_config(config: &DepotConfig) -> DepotResult<Self> {
        let mut sinks: HashMap<&'static str, Arc<dyn OutboundSink>> = HashMap::new();
        for name in &config.enabled_sinks {
            match name.as_str() {
                "fs" => {
                    let base = config.sink_bases_by_scheme.get("fs").ok_or_else(|| {
                        DepotError::InvalidConfig {
                            detail: "fs sink enabled but no base directory configured".into(),
                        }
                    })?;
                    sinks.insert("fs", Arc::new(FilesystemSink::new(base.clone())));
                }
                "http" => {
                    let sink: Arc<dyn OutboundSink> =
                        Arc::new(HttpSink::new(config.http_sink_timeout())?);
                    sinks.insert("http", Arc::clone(&sink));
                    sinks.insert("https", sink);
                }
                other => {
                    return Err(DepotError::InvalidConfig {
                        detail: format!("unknown sink {other:?}"),
                    });
                }
            }
        }
        Ok(Self { sinks })
    }

    /// Resolves a destination URI to its sink and the destination string
    /// that sink expects.
    ///
    /// # Errors
    ///
    /// - `InvalidLocation` for a destination with no scheme.
    /// - `UnknownSink` for a scheme with no registered sink.
    pub fn resolve(&self, destination: &str) -> DepotResult<(Arc<dyn OutboundSink>, String)> {
        let (scheme, body) = parse_location(destination)?;
        let sink = self
            .sinks
            .get(scheme)
            .cloned()
            .ok_or_else(|| DepotError::UnknownSink {
                scheme: scheme.to_string(),
            })?;
        // URL schemes keep the scheme; path schemes ship the body.
        let sink_destination = match scheme {
            "http" | "https" => destination.to_string(),
            _ => body.to_string(),
        };
        Ok((sink, sink_destination))
    }
}
