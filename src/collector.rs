//! Metric collector implementation.
//!
//! See [`Collector`] and [`CollectorRegistry`] for details.

use crate::error::{MappingError, RegistryError};
use crate::metrics::family::Family;
use crate::row::Row;

/// The [`Collector`] abstraction couples one diagnostic query with the
/// instruments its result rows populate.
///
/// A collector registers its instruments with the
/// [`Registry`](crate::registry::Registry) when it is constructed and is
/// immutable afterwards. On each scrape the orchestrator runs
/// [`Collector::query`] and, if at least one row came back, hands the rows to
/// [`Collector::collect`].
///
/// ```
/// # use mssql_exporter::collector::Collector;
/// # use mssql_exporter::error::{MappingError, RegistryError};
/// # use mssql_exporter::metrics::family::Family;
/// # use mssql_exporter::registry::Registry;
/// # use mssql_exporter::row::{self, Row};
/// #
/// #[derive(Debug)]
/// struct UserConnections {
///     connections: Family,
/// }
///
/// impl UserConnections {
///     fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
///         let connections = registry.register("user_connections", "Open user connections", &[])?;
///         Ok(Self { connections })
///     }
/// }
///
/// impl Collector for UserConnections {
///     fn name(&self) -> &str {
///         "user_connections"
///     }
///
///     fn query(&self) -> &str {
///         "SELECT COUNT(*) FROM sys.dm_exec_sessions WHERE is_user_process = 1"
///     }
///
///     fn instruments(&self) -> Vec<&Family> {
///         vec![&self.connections]
///     }
///
///     fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
///         let value = row::first(rows)?.value(0)?;
///         self.connections.set(&[], value)?;
///         Ok(())
///     }
/// }
/// ```
pub trait Collector: std::fmt::Debug + Send + Sync + 'static {
    /// Unique name, used to tag log lines.
    fn name(&self) -> &str;

    /// SQL batch executed on each scrape.
    fn query(&self) -> &str;

    /// The instruments this collector owns. Never empty.
    fn instruments(&self) -> Vec<&Family>;

    /// Map a non-empty result into the owned instruments.
    ///
    /// Instruments may be partially updated when this fails part way through.
    fn collect(&self, rows: &[Row]) -> Result<(), MappingError>;
}

/// Ordered set of uniquely named collectors.
///
/// Registration order is execution order.
#[derive(Debug, Default)]
pub struct CollectorRegistry {
    collectors: Vec<Box<dyn Collector>>,
}

impl CollectorRegistry {
    /// Add a collector at the end of the execution order.
    pub fn register(&mut self, collector: Box<dyn Collector>) -> Result<(), RegistryError> {
        if self.get(collector.name()).is_some() {
            return Err(RegistryError::DuplicateCollector(collector.name().to_string()));
        }
        if collector.instruments().is_empty() {
            return Err(RegistryError::NoInstruments(collector.name().to_string()));
        }
        self.collectors.push(collector);
        Ok(())
    }

    /// Iterate `(name, collector)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn Collector)> {
        self.collectors.iter().map(|c| (c.name(), c.as_ref()))
    }

    /// Look up a collector by name.
    pub fn get(&self, name: &str) -> Option<&dyn Collector> {
        self.collectors
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
    }

    /// Number of registered collectors.
    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    /// Whether no collector has been registered.
    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    #[derive(Debug)]
    struct Fixed {
        name: &'static str,
        families: Vec<Family>,
    }

    impl Collector for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn query(&self) -> &str {
            "SELECT 1"
        }

        fn instruments(&self) -> Vec<&Family> {
            self.families.iter().collect()
        }

        fn collect(&self, _rows: &[Row]) -> Result<(), MappingError> {
            Ok(())
        }
    }

    fn fixed(registry: &mut Registry, name: &'static str) -> Box<Fixed> {
        let family = registry.register(name, "help", &[]).unwrap();
        Box::new(Fixed {
            name,
            families: vec![family],
        })
    }

    #[test]
    fn preserves_insertion_order() {
        let mut metrics = Registry::default();
        let mut collectors = CollectorRegistry::default();
        for name in ["mssql_up", "mssql_deadlocks", "mssql_batch_requests"] {
            collectors.register(fixed(&mut metrics, name)).unwrap();
        }

        let names: Vec<&str> = collectors.iter().map(|(name, _)| name).collect();
        assert_eq!(vec!["mssql_up", "mssql_deadlocks", "mssql_batch_requests"], names);
        // Restartable.
        assert_eq!(3, collectors.iter().count());
        assert_eq!(3, collectors.len());
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut metrics = Registry::default();
        let mut collectors = CollectorRegistry::default();
        collectors.register(fixed(&mut metrics, "mssql_up")).unwrap();

        let duplicate = Box::new(Fixed {
            name: "mssql_up",
            families: vec![metrics.register("other", "help", &[]).unwrap()],
        });
        assert_eq!(
            Err(RegistryError::DuplicateCollector("mssql_up".to_string())),
            collectors.register(duplicate)
        );
        assert_eq!(1, collectors.len());
    }

    #[test]
    fn rejects_collectors_without_instruments() {
        let mut collectors = CollectorRegistry::default();
        let empty = Box::new(Fixed {
            name: "empty",
            families: vec![],
        });
        assert_eq!(
            Err(RegistryError::NoInstruments("empty".to_string())),
            collectors.register(empty)
        );
        assert!(collectors.is_empty());
        assert!(collectors.get("empty").is_none());
    }
}
