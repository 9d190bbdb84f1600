//! Shared application state for the HTTP surface.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use depotgate_core::{Depot, DepotError, DepotResult};

/// Authentication settings derived from the daemon config.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Expected API key, if configured.
    pub api_key: Option<String>,
    /// Skip authentication entirely (local development only).
    pub allow_insecure_dev: bool,
}

/// State cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    /// The composed core instance.
    pub depot: Arc<Depot>,
    /// Authentication settings.
    pub auth: Arc<AuthSettings>,
    /// Per-request deadline.
    pub request_timeout: Duration,
}

impl AppState {
    /// Builds the state shared by all routes.
    #[must_use]
    pub fn new(depot: Arc<Depot>, auth: AuthSettings, request_timeout: Duration) -> Self {
        Self {
            depot,
            auth: Arc::new(auth),
            request_timeout,
        }
    }

    /// Runs a core operation under the per-request deadline, surfacing
    /// `DeadlineExceeded` when it elapses.
    pub async fn with_deadline<T>(
        &self,
        op: impl Future<Output = DepotResult<T>>,
    ) -> DepotResult<T> {
        match tokio::time::timeout(self.request_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(DepotError::DeadlineExceeded),
        }
    }
}
