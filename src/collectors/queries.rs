//! Query workload and index maintenance collectors.

use crate::collector::Collector;
use crate::error::{MappingError, RegistryError};
use crate::metrics::family::Family;
use crate::registry::Registry;
use crate::row::Row;

/// The 20 cached plans with the highest total elapsed time.
#[derive(Debug)]
pub(crate) struct TopQueries {
    execution_count: Family,
    total_cpu: Family,
    total_elapsed: Family,
    avg_elapsed: Family,
}

impl TopQueries {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        let labels = &["query_hash", "database"];
        Ok(Self {
            execution_count: registry.register(
                "mssql_query_execution_count",
                "Query execution count since last restart",
                labels,
            )?,
            total_cpu: registry.register(
                "mssql_query_total_cpu_ms",
                "Total CPU time for query in milliseconds",
                labels,
            )?,
            total_elapsed: registry.register(
                "mssql_query_total_elapsed_ms",
                "Total elapsed time for query in milliseconds",
                labels,
            )?,
            avg_elapsed: registry.register(
                "mssql_query_avg_elapsed_ms",
                "Average elapsed time per execution in milliseconds",
                labels,
            )?,
        })
    }
}

impl Collector for TopQueries {
    fn name(&self) -> &str {
        "mssql_top_queries"
    }

    fn query(&self) -> &str {
        "SELECT TOP 20
    CONVERT(VARCHAR(50), qs.query_hash, 1) AS query_hash,
    ISNULL(DB_NAME(qt.dbid), 'N/A') AS database_name,
    qs.execution_count,
    qs.total_worker_time / 1000 AS total_cpu_ms,
    qs.total_elapsed_time / 1000 AS total_elapsed_ms,
    (qs.total_elapsed_time / qs.execution_count) / 1000 AS avg_elapsed_ms
FROM sys.dm_exec_query_stats qs
CROSS APPLY sys.dm_exec_sql_text(qs.sql_handle) AS qt
WHERE qs.query_hash IS NOT NULL
ORDER BY qs.total_elapsed_time DESC"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![
            &self.execution_count,
            &self.total_cpu,
            &self.total_elapsed,
            &self.avg_elapsed,
        ]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        for row in rows {
            let query_hash = row.label(0)?;
            let database = row.label(1)?;
            let labels = [query_hash.as_str(), database.as_str()];
            self.execution_count.set(&labels, row.value(2)?)?;
            self.total_cpu.set(&labels, row.value(3)?)?;
            self.total_elapsed.set(&labels, row.value(4)?)?;
            self.avg_elapsed.set(&labels, row.value(5)?)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct MissingIndexes {
    impact: Family,
}

impl MissingIndexes {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            impact: registry.register(
                "mssql_missing_index_impact",
                "Missing index improvement measure",
                &["database", "table", "index_handle"],
            )?,
        })
    }
}

impl Collector for MissingIndexes {
    fn name(&self) -> &str {
        "mssql_missing_indexes"
    }

    fn query(&self) -> &str {
        "SELECT TOP 20
    DB_NAME(d.database_id) AS database_name,
    OBJECT_NAME(d.object_id, d.database_id) AS table_name,
    CONVERT(VARCHAR(50), d.index_handle) AS index_handle,
    (s.avg_total_user_cost * s.avg_user_impact * (s.user_seeks + s.user_scans)) AS improvement_measure
FROM sys.dm_db_missing_index_details d
INNER JOIN sys.dm_db_missing_index_groups g ON d.index_handle = g.index_handle
INNER JOIN sys.dm_db_missing_index_group_stats s ON g.index_group_handle = s.group_handle
WHERE d.database_id > 4
ORDER BY improvement_measure DESC"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.impact]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        for row in rows {
            let database = row.label(0)?;
            let table = row.label(1)?;
            let index_handle = row.label(2)?;
            self.impact.set(
                &[database.as_str(), table.as_str(), index_handle.as_str()],
                row.value(3)?,
            )?;
        }
        Ok(())
    }
}

/// Indexes over 100 pages and 10% fragmentation, top 20 per online user
/// database. Databases that cannot be inspected are skipped server side.
#[derive(Debug)]
pub(crate) struct IndexFragmentation {
    fragmentation: Family,
    page_count: Family,
}

impl IndexFragmentation {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        let labels = &["database", "table", "index_name"];
        Ok(Self {
            fragmentation: registry.register(
                "mssql_index_fragmentation_percent",
                "Index fragmentation percentage",
                labels,
            )?,
            page_count: registry.register(
                "mssql_index_page_count",
                "Number of pages in index",
                labels,
            )?,
        })
    }
}

impl Collector for IndexFragmentation {
    fn name(&self) -> &str {
        "mssql_index_fragmentation"
    }

    fn query(&self) -> &str {
        "DECLARE @results TABLE (
    database_name NVARCHAR(128),
    table_name NVARCHAR(128),
    index_name NVARCHAR(128),
    fragmentation_percent DECIMAL(5,2),
    page_count BIGINT
);

DECLARE @db_name NVARCHAR(128);
DECLARE @sql NVARCHAR(MAX);

DECLARE db_cursor CURSOR FOR
SELECT name FROM sys.databases WHERE database_id > 4 AND state = 0;

OPEN db_cursor;
FETCH NEXT FROM db_cursor INTO @db_name;

WHILE @@FETCH_STATUS = 0
BEGIN
    BEGIN TRY
        SET @sql = N'USE [' + @db_name + N'];
        INSERT INTO @results
        SELECT TOP 20
            DB_NAME() AS database_name,
            OBJECT_NAME(ips.object_id) AS table_name,
            i.name AS index_name,
            ips.avg_fragmentation_in_percent,
            ips.page_count
        FROM sys.dm_db_index_physical_stats(DB_ID(), NULL, NULL, NULL, ''LIMITED'') ips
        INNER JOIN sys.indexes i ON ips.object_id = i.object_id AND ips.index_id = i.index_id
        WHERE ips.avg_fragmentation_in_percent > 10
        AND ips.page_count > 100
        AND i.name IS NOT NULL
        ORDER BY ips.avg_fragmentation_in_percent DESC';

        EXEC sp_executesql @sql;
    END TRY
    BEGIN CATCH
    END CATCH

    FETCH NEXT FROM db_cursor INTO @db_name;
END

CLOSE db_cursor;
DEALLOCATE db_cursor;

SELECT * FROM @results;"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.fragmentation, &self.page_count]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        for row in rows {
            let database = row.label(0)?;
            let table = row.label(1)?;
            let index_name = row.label(2)?;
            let labels = [database.as_str(), table.as_str(), index_name.as_str()];
            self.fragmentation.set(&labels, row.value(3)?)?;
            self.page_count.set(&labels, row.value(4)?)?;
        }
        Ok(())
    }
}

/// Statistics not updated for over a week, top 50 per online user database.
#[derive(Debug)]
pub(crate) struct StatisticsAge {
    days_old: Family,
}

impl StatisticsAge {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            days_old: registry.register(
                "mssql_statistics_days_old",
                "Days since statistics were last updated",
                &["database", "table", "stats_name"],
            )?,
        })
    }
}

impl Collector for StatisticsAge {
    fn name(&self) -> &str {
        "mssql_statistics_age"
    }

    fn query(&self) -> &str {
        "DECLARE @results TABLE (
    database_name NVARCHAR(128),
    table_name NVARCHAR(128),
    stats_name NVARCHAR(128),
    days_old INT
);

DECLARE @db_name NVARCHAR(128);
DECLARE @sql NVARCHAR(MAX);

DECLARE db_cursor CURSOR FOR
SELECT name FROM sys.databases WHERE database_id > 4 AND state = 0;

OPEN db_cursor;
FETCH NEXT FROM db_cursor INTO @db_name;

WHILE @@FETCH_STATUS = 0
BEGIN
    BEGIN TRY
        SET @sql = N'USE [' + @db_name + N'];
        INSERT INTO @results
        SELECT TOP 50
            DB_NAME() AS database_name,
            OBJECT_NAME(s.object_id) AS table_name,
            s.name AS stats_name,
            DATEDIFF(DAY, sp.last_updated, GETDATE()) AS days_old
        FROM sys.stats s
        CROSS APPLY sys.dm_db_stats_properties(s.object_id, s.stats_id) sp
        WHERE DATEDIFF(DAY, sp.last_updated, GETDATE()) > 7
        ORDER BY days_old DESC';

        EXEC sp_executesql @sql;
    END TRY
    BEGIN CATCH
    END CATCH

    FETCH NEXT FROM db_cursor INTO @db_name;
END

CLOSE db_cursor;
DEALLOCATE db_cursor;

SELECT * FROM @results;"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.days_old]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        for row in rows {
            let database = row.label(0)?;
            let table = row.label(1)?;
            let stats_name = row.label(2)?;
            self.days_old.set(
                &[database.as_str(), table.as_str(), stats_name.as_str()],
                row.value(3)?,
            )?;
        }
        Ok(())
    }
}
