use crate::collector::Collector;
use crate::error::{MappingError, RegistryError};
use crate::metrics::family::Family;
use crate::registry::Registry;
use crate::row::Row;

/// Top 20 wait types by accumulated wait time, excluding benign idle waits,
/// each tagged with a coarse category.
#[derive(Debug)]
pub(crate) struct WaitStats {
    wait_time: Family,
    wait_count: Family,
}

impl WaitStats {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            wait_time: registry.register(
                "mssql_wait_time_ms",
                "Wait time in milliseconds by wait type since last restart",
                &["wait_type", "category"],
            )?,
            wait_count: registry.register(
                "mssql_wait_count",
                "Number of waits by wait type since last restart",
                &["wait_type", "category"],
            )?,
        })
    }
}

impl Collector for WaitStats {
    fn name(&self) -> &str {
        "mssql_wait_stats"
    }

    fn query(&self) -> &str {
        "SELECT TOP 20
    wait_type,
    wait_time_ms,
    waiting_tasks_count,
    CASE
        WHEN wait_type LIKE 'LCK%' THEN 'Lock'
        WHEN wait_type LIKE 'PAGEIO%' OR wait_type LIKE 'WRITELOG' OR wait_type LIKE 'IO_%' THEN 'IO'
        WHEN wait_type LIKE 'RESOURCE_SEMAPHORE%' THEN 'Memory'
        WHEN wait_type LIKE 'SOS_SCHEDULER_YIELD' OR wait_type LIKE 'THREADPOOL' OR wait_type LIKE 'CX%' THEN 'CPU'
        WHEN wait_type LIKE 'ASYNC_NETWORK_IO' THEN 'Network'
        ELSE 'Other'
    END AS wait_category
FROM sys.dm_os_wait_stats
WHERE wait_type NOT IN (
    'CLR_SEMAPHORE', 'LAZYWRITER_SLEEP', 'RESOURCE_QUEUE', 'SLEEP_TASK',
    'SLEEP_SYSTEMTASK', 'SQLTRACE_BUFFER_FLUSH', 'WAITFOR', 'LOGMGR_QUEUE',
    'CHECKPOINT_QUEUE', 'REQUEST_FOR_DEADLOCK_SEARCH', 'XE_TIMER_EVENT', 'BROKER_TO_FLUSH',
    'BROKER_TASK_STOP', 'CLR_MANUAL_EVENT', 'CLR_AUTO_EVENT', 'DISPATCHER_QUEUE_SEMAPHORE',
    'FT_IFTS_SCHEDULER_IDLE_WAIT', 'XE_DISPATCHER_WAIT', 'XE_DISPATCHER_JOIN', 'SQLTRACE_INCREMENTAL_FLUSH_SLEEP',
    'ONDEMAND_TASK_QUEUE', 'BROKER_EVENTHANDLER', 'SLEEP_BPOOL_FLUSH', 'DIRTY_PAGE_POLL', 'HADR_FILESTREAM_IOMGR_IOCOMPLETION'
)
ORDER BY wait_time_ms DESC"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.wait_time, &self.wait_count]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        for row in rows {
            let wait_type = row.label(0)?;
            let category = row.label(3)?;
            let labels = [wait_type.as_str(), category.as_str()];
            self.wait_time.set(&labels, row.value(1)?)?;
            self.wait_count.set(&labels, row.value(2)?)?;
        }
        Ok(())
    }
}
