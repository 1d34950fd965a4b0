//! Scrape entry point tying connection, collectors and registry together.

use std::time::Instant;

use tracing::{debug, warn};

use crate::collector::CollectorRegistry;
use crate::collectors;
use crate::connection::{ConnectionManager, Connector};
use crate::encoding::text::{encode, encode_family};
use crate::error::RegistryError;
use crate::metrics::family::Family;
use crate::registry::Registry;
use crate::scrape;

/// Body of a `/metrics` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exposition {
    /// The scrape reached the server: every instrument, serialized.
    Complete(String),
    /// The server could not be reached: only the liveness instrument.
    Degraded {
        /// Serialized `mssql_up`, reporting `0`.
        body: String,
        /// Why the connection failed.
        error: String,
    },
}

impl Exposition {
    /// The serialized metrics.
    pub fn body(&self) -> &str {
        match self {
            Exposition::Complete(body) | Exposition::Degraded { body, .. } => body,
        }
    }
}

/// Owns the metric registry, the collectors and the connection manager.
#[derive(Debug)]
pub struct Exporter {
    registry: Registry,
    collectors: CollectorRegistry,
    liveness: Family,
    connections: ConnectionManager,
}

impl Exporter {
    /// Build an exporter running every built-in collector over sessions from
    /// `connector`.
    pub fn new(connector: Box<dyn Connector>) -> Result<Self, RegistryError> {
        let mut registry = Registry::default();
        let mut collectors = CollectorRegistry::default();
        let liveness = collectors::register_all(&mut registry, &mut collectors)?;
        Ok(Self::with_collectors(connector, registry, collectors, liveness))
    }

    /// Build an exporter from an already populated pair of registries.
    /// `liveness` must be registered in `registry`.
    pub fn with_collectors(
        connector: Box<dyn Connector>,
        registry: Registry,
        collectors: CollectorRegistry,
        liveness: Family,
    ) -> Self {
        Self {
            registry,
            collectors,
            liveness,
            connections: ConnectionManager::new(connector),
        }
    }

    /// The metric registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The collectors, in execution order.
    pub fn collectors(&self) -> &CollectorRegistry {
        &self.collectors
    }

    /// Run one scrape and serialize the result.
    ///
    /// Only a connection failure degrades the response. Failing collectors
    /// are logged and leave their instruments as they were.
    pub async fn scrape(&self) -> Result<Exposition, std::fmt::Error> {
        let start = Instant::now();

        let session = match self.connections.acquire().await {
            Ok(session) => session,
            Err(error) => {
                if let Err(e) = self.liveness.set(&[], 0.0) {
                    warn!(error = %e, "failed to reset liveness");
                }
                let mut body = String::new();
                encode_family(&mut body, &self.liveness)?;
                return Ok(Exposition::Degraded {
                    body,
                    error: error.to_string(),
                });
            }
        };

        let outcome = scrape::run(session, &self.connections, &self.collectors).await;

        let failed = outcome.failures().count();
        if failed > 0 {
            warn!(
                failed,
                reconnects = outcome.reconnects(),
                collectors = self.collectors.len(),
                "scrape completed with failures"
            );
        } else {
            debug!(collectors = self.collectors.len(), "scrape completed");
        }
        debug!(elapsed_ms = start.elapsed().as_millis() as u64, "processed metrics request");

        let mut body = String::new();
        encode(&mut body, &self.registry)?;
        Ok(Exposition::Complete(body))
    }
}
