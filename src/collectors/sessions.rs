//! Connection, session and blocking collectors.

use tracing::trace;

use crate::collector::Collector;
use crate::error::{MappingError, RegistryError};
use crate::metrics::family::Family;
use crate::registry::Registry;
use crate::row::Row;

#[derive(Debug)]
pub(crate) struct Connections {
    connections: Family,
}

impl Connections {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            connections: registry.register(
                "mssql_connections",
                "Number of active connections",
                &["database", "state"],
            )?,
        })
    }
}

impl Collector for Connections {
    fn name(&self) -> &str {
        "mssql_connections"
    }

    fn query(&self) -> &str {
        "SELECT DB_NAME(sP.dbid)
        , COUNT(sP.spid)
FROM sys.sysprocesses sP
GROUP BY DB_NAME(sP.dbid)"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.connections]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        for row in rows {
            let database = row.label(0)?;
            self.connections
                .set(&[database.as_str(), "current"], row.value(1)?)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct ClientConnections {
    connections: Family,
}

impl ClientConnections {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            connections: registry.register(
                "mssql_client_connections",
                "Number of active client connections",
                &["client", "database"],
            )?,
        })
    }
}

impl Collector for ClientConnections {
    fn name(&self) -> &str {
        "mssql_client_connections"
    }

    fn query(&self) -> &str {
        "SELECT host_name, DB_NAME(dbid) dbname, COUNT(*) session_count
FROM sys.dm_exec_sessions a
LEFT JOIN sysprocesses b on a.session_id=b.spid
WHERE is_user_process=1
GROUP BY host_name, dbid"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.connections]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        for row in rows {
            let client = row.label(0)?;
            let database = row.label(1)?;
            self.connections
                .set(&[client.as_str(), database.as_str()], row.value(2)?)?;
        }
        Ok(())
    }
}

/// Blocked requests grouped by database and wait type. The unlabeled count
/// is the sum over all groups.
#[derive(Debug)]
pub(crate) struct BlockingSessions {
    blocked_count: Family,
    wait_time: Family,
}

impl BlockingSessions {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            blocked_count: registry.register(
                "mssql_blocked_session_count",
                "Number of currently blocked sessions",
                &[],
            )?,
            wait_time: registry.register(
                "mssql_blocking_session_wait_time_ms",
                "Wait time in milliseconds for blocked sessions",
                &["database", "wait_type"],
            )?,
        })
    }
}

impl Collector for BlockingSessions {
    fn name(&self) -> &str {
        "mssql_blocking_sessions"
    }

    fn query(&self) -> &str {
        "SELECT
    COUNT(*) AS blocked_count,
    ISNULL(DB_NAME(er.database_id), 'N/A') AS database_name,
    er.wait_type,
    SUM(er.wait_time) AS total_wait_time_ms
FROM sys.dm_exec_requests er
WHERE er.blocking_session_id <> 0
GROUP BY DB_NAME(er.database_id), er.wait_type"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.blocked_count, &self.wait_time]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        let mut total = 0.0;
        for row in rows {
            total += row.value(0)?;
            let database = row.label(1)?;
            let wait_type = row.label(2)?;
            self.wait_time
                .set(&[database.as_str(), wait_type.as_str()], row.value(3)?)?;
        }
        trace!(total, "total blocked sessions");
        self.blocked_count.set(&[], total)?;
        Ok(())
    }
}

/// User requests running for more than five minutes.
#[derive(Debug)]
pub(crate) struct LongRunningSessions {
    count: Family,
    duration: Family,
}

impl LongRunningSessions {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            count: registry.register(
                "mssql_long_running_session_count",
                "Number of sessions running longer than threshold",
                &[],
            )?,
            duration: registry.register(
                "mssql_long_running_session_duration_seconds",
                "Duration of long running sessions in seconds",
                &["session_id", "database", "status"],
            )?,
        })
    }
}

impl Collector for LongRunningSessions {
    fn name(&self) -> &str {
        "mssql_long_running_sessions"
    }

    fn query(&self) -> &str {
        "SELECT
    COUNT(*) AS long_session_count,
    s.session_id,
    ISNULL(DB_NAME(r.database_id), 'N/A') AS database_name,
    r.status,
    DATEDIFF(SECOND, r.start_time, GETDATE()) AS duration_seconds
FROM sys.dm_exec_sessions s
LEFT JOIN sys.dm_exec_requests r ON s.session_id = r.session_id
WHERE s.is_user_process = 1
AND r.start_time IS NOT NULL
AND DATEDIFF(MINUTE, r.start_time, GETDATE()) > 5
GROUP BY s.session_id, r.database_id, r.status, r.start_time"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.count, &self.duration]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        self.count.set(&[], rows.len() as f64)?;
        for row in rows {
            let session_id = row.label(1)?;
            let database = row.label(2)?;
            let status = row.label(3)?;
            self.duration.set(
                &[session_id.as_str(), database.as_str(), status.as_str()],
                row.value(4)?,
            )?;
        }
        Ok(())
    }
}

/// One sample per blocked request, valued with its current wait time.
#[derive(Debug)]
pub(crate) struct BlockingDetails {
    blocking: Family,
}

impl BlockingDetails {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            blocking: registry.register(
                "mssql_blocking_session_id",
                "Blocking session ID information",
                &["blocked_session_id", "blocking_session_id", "database", "wait_type"],
            )?,
        })
    }
}

impl Collector for BlockingDetails {
    fn name(&self) -> &str {
        "mssql_blocking_details"
    }

    fn query(&self) -> &str {
        "SELECT
    r.session_id AS blocked_session_id,
    r.blocking_session_id,
    ISNULL(DB_NAME(r.database_id), 'N/A') AS database_name,
    r.wait_type,
    r.wait_time
FROM sys.dm_exec_requests r
WHERE r.blocking_session_id <> 0"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.blocking]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        for row in rows {
            let blocked = row.label(0)?;
            let blocking = row.label(1)?;
            let database = row.label(2)?;
            let wait_type = row.label(3)?;
            self.blocking.set(
                &[
                    blocked.as_str(),
                    blocking.as_str(),
                    database.as_str(),
                    wait_type.as_str(),
                ],
                row.value(4)?,
            )?;
        }
        Ok(())
    }
}
