//! The diagnostic collectors shipped with the exporter.
//!
//! [`register_all`] builds every collector, registering its instruments with
//! the metric registry, and adds them to the collector registry in the order
//! they run on each scrape.

use tracing::trace;

use crate::collector::{Collector, CollectorRegistry};
use crate::error::{MappingError, RegistryError};
use crate::metrics::family::Family;
use crate::registry::Registry;
use crate::row::{self, Row};

mod agent;
mod availability;
mod database;
mod instance;
mod queries;
mod security;
mod sessions;
mod tempdb;
mod waits;

pub use instance::Up;

/// Register every collector and return the liveness instrument, `mssql_up`.
///
/// `mssql_up` runs first, the remaining collectors follow in a fixed order.
pub fn register_all(
    metrics: &mut Registry,
    collectors: &mut CollectorRegistry,
) -> Result<Family, RegistryError> {
    let up = Up::new(metrics)?;
    let liveness = up.liveness().clone();
    collectors.register(Box::new(up))?;

    let all: Vec<Box<dyn Collector>> = vec![
        Box::new(instance::ProductVersion::new(metrics)?),
        Box::new(instance::InstanceLocalTime::new(metrics)?),
        Box::new(sessions::Connections::new(metrics)?),
        Box::new(sessions::ClientConnections::new(metrics)?),
        Box::new(PerfCounter::new(
            metrics,
            "mssql_deadlocks",
            "Number of lock requests per second that resulted in a deadlock since last restart",
            "SELECT cntr_value
FROM sys.dm_os_performance_counters
WHERE counter_name = 'Number of Deadlocks/sec' AND instance_name = '_Total'",
        )?),
        Box::new(PerfCounter::new(
            metrics,
            "mssql_user_errors",
            "Number of user errors/sec since last restart",
            "SELECT cntr_value
FROM sys.dm_os_performance_counters
WHERE counter_name = 'Errors/sec' AND instance_name = 'User Errors'",
        )?),
        Box::new(PerfCounter::new(
            metrics,
            "mssql_kill_connection_errors",
            "Number of kill connection errors/sec since last restart",
            "SELECT cntr_value
FROM sys.dm_os_performance_counters
WHERE counter_name = 'Errors/sec' AND instance_name = 'Kill Connection Errors'",
        )?),
        Box::new(database::DatabaseState::new(metrics)?),
        Box::new(DatabaseCounter::new(
            metrics,
            "mssql_log_growths",
            "Total number of times the transaction log for the database has been expanded last restart",
            "SELECT rtrim(instance_name), cntr_value
FROM sys.dm_os_performance_counters
WHERE counter_name = 'Log Growths' and instance_name <> '_Total'",
        )?),
        Box::new(database::DatabaseFilesize::new(metrics)?),
        Box::new(instance::BufferManager::new(metrics)?),
        Box::new(database::IoStall::new(metrics)?),
        Box::new(PerfCounter::new(
            metrics,
            "mssql_batch_requests",
            "Number of Transact-SQL command batches received per second. This statistic is affected by all constraints (such as I/O, number of users, cachesize, complexity of requests, and so on). High batch requests mean good throughput",
            "SELECT TOP 1 cntr_value
FROM sys.dm_os_performance_counters
WHERE counter_name = 'Batch Requests/sec'",
        )?),
        Box::new(DatabaseCounter::new(
            metrics,
            "mssql_transactions",
            "Number of transactions started for the database per second. Transactions/sec does not count XTP-only transactions (transactions started by a natively compiled stored procedure.)",
            "SELECT rtrim(instance_name), cntr_value
FROM sys.dm_os_performance_counters
WHERE counter_name = 'Transactions/sec' AND instance_name <> '_Total'",
        )?),
        Box::new(instance::OsProcessMemory::new(metrics)?),
        Box::new(instance::OsSysMemory::new(metrics)?),
        Box::new(agent::SqlAgentJobs::new(metrics)?),
        Box::new(database::DatabaseBackups::new(metrics)?),
        Box::new(availability::AvailabilityGroups::new(metrics)?),
        Box::new(sessions::BlockingSessions::new(metrics)?),
        Box::new(waits::WaitStats::new(metrics)?),
        Box::new(database::DatabaseProperties::new(metrics)?),
        Box::new(tempdb::TempdbStats::new(metrics)?),
        Box::new(database::TransactionLogStats::new(metrics)?),
        Box::new(security::SecurityStats::new(metrics)?),
        Box::new(instance::CpuSchedulerStats::new(metrics)?),
        Box::new(database::DatabaseSizeGrowth::new(metrics)?),
        Box::new(queries::TopQueries::new(metrics)?),
        Box::new(queries::MissingIndexes::new(metrics)?),
        Box::new(queries::IndexFragmentation::new(metrics)?),
        Box::new(sessions::LongRunningSessions::new(metrics)?),
        Box::new(database::DiskLatency::new(metrics)?),
        Box::new(instance::BufferCacheHitRatio::new(metrics)?),
        Box::new(sessions::BlockingDetails::new(metrics)?),
        Box::new(queries::StatisticsAge::new(metrics)?),
    ];

    for collector in all {
        collectors.register(collector)?;
    }

    Ok(liveness)
}

/// A single instance-wide performance counter read from the first column of
/// the first row. The collector and its gauge share a name.
#[derive(Debug)]
pub(crate) struct PerfCounter {
    name: &'static str,
    query: &'static str,
    gauge: Family,
}

impl PerfCounter {
    pub(crate) fn new(
        registry: &mut Registry,
        name: &'static str,
        help: &'static str,
        query: &'static str,
    ) -> Result<Self, RegistryError> {
        let gauge = registry.register(name, help, &[])?;
        Ok(Self { name, query, gauge })
    }
}

impl Collector for PerfCounter {
    fn name(&self) -> &str {
        self.name
    }

    fn query(&self) -> &str {
        self.query
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.gauge]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        let value = row::first(rows)?.value(0)?;
        trace!(collector = self.name, value, "fetched");
        self.gauge.set(&[], value)?;
        Ok(())
    }
}

/// A per-database performance counter: database name in the first column,
/// value in the second.
#[derive(Debug)]
pub(crate) struct DatabaseCounter {
    name: &'static str,
    query: &'static str,
    gauge: Family,
}

impl DatabaseCounter {
    pub(crate) fn new(
        registry: &mut Registry,
        name: &'static str,
        help: &'static str,
        query: &'static str,
    ) -> Result<Self, RegistryError> {
        let gauge = registry.register(name, help, &["database"])?;
        Ok(Self { name, query, gauge })
    }
}

impl Collector for DatabaseCounter {
    fn name(&self) -> &str {
        self.name
    }

    fn query(&self) -> &str {
        self.query
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.gauge]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        for row in rows {
            let database = row.label(0)?;
            self.gauge.set(&[database.as_str()], row.value(1)?)?;
        }
        Ok(())
    }
}
