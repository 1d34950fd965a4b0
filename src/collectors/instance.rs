//! Instance-wide health, memory and CPU collectors.

use tracing::trace;

use crate::collector::Collector;
use crate::error::{MappingError, RegistryError};
use crate::metrics::family::Family;
use crate::registry::Registry;
use crate::row::{self, Row};

/// Liveness: `1` after every scrape that reached the server, `0` after one
/// that could not connect.
#[derive(Debug)]
pub struct Up {
    up: Family,
}

impl Up {
    /// Register `mssql_up`.
    pub fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            up: registry.register("mssql_up", "UP Status", &[])?,
        })
    }

    /// The `mssql_up` instrument.
    pub fn liveness(&self) -> &Family {
        &self.up
    }
}

impl Collector for Up {
    fn name(&self) -> &str {
        "mssql_up"
    }

    fn query(&self) -> &str {
        "SELECT 1"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.up]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        let up = row::first(rows)?.value(0)?;
        trace!(up, "fetched status of instance");
        self.up.set(&[], up)?;
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct ProductVersion {
    version: Family,
}

impl ProductVersion {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            version: registry.register(
                "mssql_product_version",
                "Instance version (Major.Minor)",
                &[],
            )?,
        })
    }
}

/// `major.minor` of a `major.minor.build.revision` version string, as a
/// number with a two digit minor: `15.0.2000.5` is `15`, `16.1.1` is `16.01`
/// and `16.10.1` is `16.1`.
fn major_minor(version: &str) -> Option<f64> {
    let mut parts = version.trim().split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next().map_or(Some(0), |m| m.parse().ok())?;
    if minor >= 100 {
        return None;
    }
    format!("{major}.{minor:02}").parse().ok()
}

impl Collector for ProductVersion {
    fn name(&self) -> &str {
        "mssql_product_version"
    }

    fn query(&self) -> &str {
        "SELECT CONVERT(VARCHAR(128), SERVERPROPERTY('ProductVersion')) AS ProductVersion"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.version]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        let raw = row::first(rows)?.label(0)?;
        let version = major_minor(&raw).ok_or(MappingError::Unparsable {
            index: 0,
            value: raw,
        })?;
        trace!(version, "fetched version of instance");
        self.version.set(&[], version)?;
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct InstanceLocalTime {
    time: Family,
}

impl InstanceLocalTime {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            time: registry.register(
                "mssql_instance_local_time",
                "Number of seconds since epoch on local instance",
                &[],
            )?,
        })
    }
}

impl Collector for InstanceLocalTime {
    fn name(&self) -> &str {
        "mssql_instance_local_time"
    }

    fn query(&self) -> &str {
        "SELECT DATEDIFF(second, '19700101', GETUTCDATE())"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.time]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        self.time.set(&[], row::first(rows)?.value(0)?)?;
        Ok(())
    }
}

/// Buffer pool counters, pivoted into a single row.
#[derive(Debug)]
pub(crate) struct BufferManager {
    page_read: Family,
    page_write: Family,
    page_life_expectancy: Family,
    lazy_write: Family,
    page_checkpoint: Family,
}

impl BufferManager {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            page_read: registry.register("mssql_page_read_total", "Page reads/sec", &[])?,
            page_write: registry.register("mssql_page_write_total", "Page writes/sec", &[])?,
            page_life_expectancy: registry.register(
                "mssql_page_life_expectancy",
                "Indicates the minimum number of seconds a page will stay in the buffer pool on this node without references. The traditional advice from Microsoft used to be that the PLE should remain above 300 seconds",
                &[],
            )?,
            lazy_write: registry.register("mssql_lazy_write_total", "Lazy writes/sec", &[])?,
            page_checkpoint: registry.register(
                "mssql_page_checkpoint_total",
                "Checkpoint pages/sec",
                &[],
            )?,
        })
    }
}

impl Collector for BufferManager {
    fn name(&self) -> &str {
        "mssql_buffer_manager"
    }

    fn query(&self) -> &str {
        "SELECT * FROM
        (
            SELECT rtrim(counter_name) as counter_name, cntr_value
            FROM sys.dm_os_performance_counters
            WHERE counter_name in ('Page reads/sec', 'Page writes/sec', 'Page life expectancy', 'Lazy writes/sec', 'Checkpoint pages/sec')
            AND object_name = 'SQLServer:Buffer Manager'
        ) d
        PIVOT
        (
        MAX(cntr_value)
        FOR counter_name IN ([Page reads/sec], [Page writes/sec], [Page life expectancy], [Lazy writes/sec], [Checkpoint pages/sec])
        ) piv"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![
            &self.page_read,
            &self.page_write,
            &self.page_life_expectancy,
            &self.lazy_write,
            &self.page_checkpoint,
        ]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        let row = row::first(rows)?;
        self.page_read.set(&[], row.value(0)?)?;
        self.page_write.set(&[], row.value(1)?)?;
        self.page_life_expectancy.set(&[], row.value(2)?)?;
        self.lazy_write.set(&[], row.value(3)?)?;
        self.page_checkpoint.set(&[], row.value(4)?)?;
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct OsProcessMemory {
    page_fault_count: Family,
    memory_utilization: Family,
}

impl OsProcessMemory {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            page_fault_count: registry.register(
                "mssql_page_fault_count",
                "Number of page faults since last restart",
                &[],
            )?,
            memory_utilization: registry.register(
                "mssql_memory_utilization_percentage",
                "Percentage of memory utilization",
                &[],
            )?,
        })
    }
}

impl Collector for OsProcessMemory {
    fn name(&self) -> &str {
        "mssql_os_process_memory"
    }

    fn query(&self) -> &str {
        "SELECT page_fault_count, memory_utilization_percentage
FROM sys.dm_os_process_memory"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.page_fault_count, &self.memory_utilization]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        let row = row::first(rows)?;
        self.page_fault_count.set(&[], row.value(0)?)?;
        self.memory_utilization.set(&[], row.value(1)?)?;
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct OsSysMemory {
    total_physical: Family,
    available_physical: Family,
    total_page_file: Family,
    available_page_file: Family,
}

impl OsSysMemory {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            total_physical: registry.register(
                "mssql_total_physical_memory_kb",
                "Total physical memory in KB",
                &[],
            )?,
            available_physical: registry.register(
                "mssql_available_physical_memory_kb",
                "Available physical memory in KB",
                &[],
            )?,
            total_page_file: registry.register(
                "mssql_total_page_file_kb",
                "Total page file in KB",
                &[],
            )?,
            available_page_file: registry.register(
                "mssql_available_page_file_kb",
                "Available page file in KB",
                &[],
            )?,
        })
    }
}

impl Collector for OsSysMemory {
    fn name(&self) -> &str {
        "mssql_os_sys_memory"
    }

    fn query(&self) -> &str {
        "SELECT total_physical_memory_kb, available_physical_memory_kb, total_page_file_kb, available_page_file_kb
FROM sys.dm_os_sys_memory"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![
            &self.total_physical,
            &self.available_physical,
            &self.total_page_file,
            &self.available_page_file,
        ]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        let row = row::first(rows)?;
        self.total_physical.set(&[], row.value(0)?)?;
        self.available_physical.set(&[], row.value(1)?)?;
        self.total_page_file.set(&[], row.value(2)?)?;
        self.available_page_file.set(&[], row.value(3)?)?;
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct CpuSchedulerStats {
    cpu_usage: Family,
    runnable_tasks: Family,
    context_switches: Family,
}

impl CpuSchedulerStats {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            cpu_usage: registry.register(
                "mssql_cpu_usage_percent",
                "SQL Server CPU usage percentage",
                &[],
            )?,
            runnable_tasks: registry.register(
                "mssql_scheduler_runnable_tasks_count",
                "Number of runnable tasks waiting on schedulers",
                &[],
            )?,
            context_switches: registry.register(
                "mssql_context_switches_count",
                "Number of context switches since last restart",
                &[],
            )?,
        })
    }
}

impl Collector for CpuSchedulerStats {
    fn name(&self) -> &str {
        "mssql_cpu_scheduler_stats"
    }

    fn query(&self) -> &str {
        "SELECT TOP 1
    record.value('(./Record/SchedulerMonitorEvent/SystemHealth/ProcessUtilization)[1]', 'int') AS sql_cpu_usage,
    (SELECT SUM(runnable_tasks_count) FROM sys.dm_os_schedulers WHERE status = 'VISIBLE ONLINE') AS runnable_tasks,
    (SELECT SUM(context_switches_count) FROM sys.dm_os_schedulers WHERE status = 'VISIBLE ONLINE') AS context_switches
FROM (
    SELECT CAST(record AS XML) AS record, timestamp
    FROM sys.dm_os_ring_buffers
    WHERE ring_buffer_type = N'RING_BUFFER_SCHEDULER_MONITOR'
    AND record LIKE '%<SystemHealth>%'
) AS x
ORDER BY timestamp DESC"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.cpu_usage, &self.runnable_tasks, &self.context_switches]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        let row = row::first(rows)?;
        let cpu = row.value(0)?;
        let runnable = row.value(1)?;
        let switches = row.value(2)?;
        trace!(cpu, runnable, switches, "fetched cpu and scheduler stats");
        self.cpu_usage.set(&[], cpu)?;
        self.runnable_tasks.set(&[], runnable)?;
        self.context_switches.set(&[], switches)?;
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct BufferCacheHitRatio {
    ratio: Family,
}

impl BufferCacheHitRatio {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            ratio: registry.register(
                "mssql_buffer_cache_hit_ratio_percent",
                "Buffer cache hit ratio percentage",
                &[],
            )?,
        })
    }
}

impl Collector for BufferCacheHitRatio {
    fn name(&self) -> &str {
        "mssql_buffer_cache_hit_ratio"
    }

    fn query(&self) -> &str {
        "SELECT
    (CAST(cntr_value AS DECIMAL(16,2)) /
     (SELECT cntr_value FROM sys.dm_os_performance_counters
      WHERE counter_name = 'Buffer cache hit ratio base'
      AND object_name LIKE '%Buffer Manager%')) * 100 AS hit_ratio_percent
FROM sys.dm_os_performance_counters
WHERE counter_name = 'Buffer cache hit ratio'
AND object_name LIKE '%Buffer Manager%'"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.ratio]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        self.ratio.set(&[], row::first(rows)?.value(0)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn version_numbers() {
        assert_eq!(Some(15.0), major_minor("15.0.2000.5"));
        assert_eq!(Some(16.12), major_minor("16.12.1000.2"));
        assert_eq!(Some(14.0), major_minor("14"));
        assert_eq!(None, major_minor("unknown"));
        assert_eq!(None, major_minor("16.100.1"));
    }

    #[test]
    fn one_and_two_digit_minors_differ() {
        assert_eq!(Some(16.01), major_minor("16.1.1000.0"));
        assert_eq!(Some(16.1), major_minor("16.10.1000.0"));
        assert_ne!(major_minor("16.1.1000.0"), major_minor("16.10.1000.0"));
    }

    #[test]
    fn product_version_from_row() {
        let mut registry = Registry::default();
        let collector = ProductVersion::new(&mut registry).unwrap();
        collector
            .collect(&[row!["15.0.2000.5"]])
            .unwrap();
        assert_eq!(Some(15.0), collector.version.get(&[]));

        assert!(matches!(
            collector.collect(&[row!["garbage"]]),
            Err(MappingError::Unparsable { .. })
        ));
        assert_eq!(Some(15.0), collector.version.get(&[]));
    }

    #[test]
    fn buffer_manager_maps_pivot_columns() {
        let mut registry = Registry::default();
        let collector = BufferManager::new(&mut registry).unwrap();
        collector.collect(&[row![100, 200, 3600, 4, 50]]).unwrap();

        let get = |name: &str| registry.get(name).unwrap().get(&[]);
        assert_eq!(Some(100.0), get("mssql_page_read_total"));
        assert_eq!(Some(200.0), get("mssql_page_write_total"));
        assert_eq!(Some(3600.0), get("mssql_page_life_expectancy"));
        assert_eq!(Some(4.0), get("mssql_lazy_write_total"));
        assert_eq!(Some(50.0), get("mssql_page_checkpoint_total"));
    }

    #[test]
    fn short_row_is_a_mapping_error() {
        let mut registry = Registry::default();
        let collector = OsSysMemory::new(&mut registry).unwrap();
        assert_eq!(
            Err(MappingError::MissingColumn { index: 2, len: 2 }),
            collector.collect(&[row![16_000_000, 8_000_000]])
        );
    }

    #[test]
    fn up_reports_one() {
        let mut registry = Registry::default();
        let up = Up::new(&mut registry).unwrap();
        assert_eq!(Some(0.0), up.liveness().get(&[]));
        up.collect(&[row![1]]).unwrap();
        assert_eq!(Some(1.0), up.liveness().get(&[]));
    }
}
