//! Per-database state, storage, backup and I/O collectors.

use tracing::trace;

use crate::collector::Collector;
use crate::error::{MappingError, RegistryError};
use crate::metrics::family::Family;
use crate::registry::Registry;
use crate::row::Row;

fn per_database(
    registry: &mut Registry,
    name: &str,
    help: &str,
) -> Result<Family, RegistryError> {
    registry.register(name, help, &["database"])
}

#[derive(Debug)]
pub(crate) struct DatabaseState {
    state: Family,
}

impl DatabaseState {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            state: per_database(
                registry,
                "mssql_database_state",
                "Databases states: 0=ONLINE 1=RESTORING 2=RECOVERING 3=RECOVERY_PENDING 4=SUSPECT 5=EMERGENCY 6=OFFLINE 7=COPYING 10=OFFLINE_SECONDARY",
            )?,
        })
    }
}

impl Collector for DatabaseState {
    fn name(&self) -> &str {
        "mssql_database_state"
    }

    fn query(&self) -> &str {
        "SELECT name,state FROM master.sys.databases"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.state]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        for row in rows {
            let database = row.label(0)?;
            self.state.set(&[database.as_str()], row.value(1)?)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct DatabaseFilesize {
    filesize: Family,
}

impl DatabaseFilesize {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            filesize: registry.register(
                "mssql_database_filesize",
                "Physical sizes of files used by database in KB, their names and types (0=rows, 1=log, 2=filestream,3=n/a 4=fulltext(before v2008 of MSSQL))",
                &["database", "logicalname", "type", "filename"],
            )?,
        })
    }
}

impl Collector for DatabaseFilesize {
    fn name(&self) -> &str {
        "mssql_database_filesize"
    }

    fn query(&self) -> &str {
        "SELECT DB_NAME(database_id) AS database_name, name AS logical_name, type, physical_name, (size * CAST(8 AS BIGINT)) size_kb FROM sys.master_files"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.filesize]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        for row in rows {
            let database = row.label(0)?;
            let logical_name = row.label(1)?;
            let file_type = row.label(2)?;
            let file_name = row.label(3)?;
            self.filesize.set(
                &[
                    database.as_str(),
                    logical_name.as_str(),
                    file_type.as_str(),
                    file_name.as_str(),
                ],
                row.value(4)?,
            )?;
        }
        Ok(())
    }
}

/// Cumulative I/O stall per database, split by kind and in total.
#[derive(Debug)]
pub(crate) struct IoStall {
    stall: Family,
    total: Family,
}

impl IoStall {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            stall: registry.register(
                "mssql_io_stall",
                "Wait time (ms) of stall since last restart",
                &["database", "type"],
            )?,
            total: per_database(
                registry,
                "mssql_io_stall_total",
                "Wait time (ms) of stall since last restart",
            )?,
        })
    }
}

impl Collector for IoStall {
    fn name(&self) -> &str {
        "mssql_io_stall"
    }

    fn query(&self) -> &str {
        "SELECT
cast(DB_Name(a.database_id) as varchar) as name,
    max(io_stall_read_ms),
    max(io_stall_write_ms),
    max(io_stall),
    max(io_stall_queued_read_ms),
    max(io_stall_queued_write_ms)
FROM
sys.dm_io_virtual_file_stats(null, null) a
INNER JOIN sys.master_files b ON a.database_id = b.database_id and a.file_id = b.file_id
GROUP BY a.database_id"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.stall, &self.total]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        for row in rows {
            let database = row.label(0)?;
            let database = database.as_str();
            self.total.set(&[database], row.value(3)?)?;
            self.stall.set(&[database, "read"], row.value(1)?)?;
            self.stall.set(&[database, "write"], row.value(2)?)?;
            self.stall.set(&[database, "queued_read"], row.value(4)?)?;
            self.stall.set(&[database, "queued_write"], row.value(5)?)?;
        }
        Ok(())
    }
}

/// Last backup times, ages and sizes of user databases. Databases that were
/// never backed up report `0` seconds and `-1` hours.
#[derive(Debug)]
pub(crate) struct DatabaseBackups {
    last_full: Family,
    last_diff: Family,
    last_log: Family,
    age_full: Family,
    age_diff: Family,
    age_log: Family,
    size: Family,
}

impl DatabaseBackups {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            last_full: per_database(
                registry,
                "mssql_database_backup_last_full_seconds",
                "Last full backup time in seconds since epoch",
            )?,
            last_diff: per_database(
                registry,
                "mssql_database_backup_last_diff_seconds",
                "Last differential backup time in seconds since epoch",
            )?,
            last_log: per_database(
                registry,
                "mssql_database_backup_last_log_seconds",
                "Last transaction log backup time in seconds since epoch",
            )?,
            age_full: per_database(
                registry,
                "mssql_database_backup_age_full_hours",
                "Hours since last full backup",
            )?,
            age_diff: per_database(
                registry,
                "mssql_database_backup_age_diff_hours",
                "Hours since last differential backup",
            )?,
            age_log: per_database(
                registry,
                "mssql_database_backup_age_log_hours",
                "Hours since last transaction log backup",
            )?,
            size: registry.register(
                "mssql_database_backup_size_mb",
                "Last backup size in MB",
                &["database", "type"],
            )?,
        })
    }
}

impl Collector for DatabaseBackups {
    fn name(&self) -> &str {
        "mssql_database_backups"
    }

    fn query(&self) -> &str {
        "SELECT
    d.name AS database_name,
    ISNULL(DATEDIFF(SECOND, '19700101', MAX(CASE WHEN b.type = 'D' THEN b.backup_finish_date END)), 0) AS last_full_backup_seconds,
    ISNULL(DATEDIFF(SECOND, '19700101', MAX(CASE WHEN b.type = 'I' THEN b.backup_finish_date END)), 0) AS last_diff_backup_seconds,
    ISNULL(DATEDIFF(SECOND, '19700101', MAX(CASE WHEN b.type = 'L' THEN b.backup_finish_date END)), 0) AS last_log_backup_seconds,
    ISNULL(DATEDIFF(HOUR, MAX(CASE WHEN b.type = 'D' THEN b.backup_finish_date END), GETDATE()), -1) AS age_full_hours,
    ISNULL(DATEDIFF(HOUR, MAX(CASE WHEN b.type = 'I' THEN b.backup_finish_date END), GETDATE()), -1) AS age_diff_hours,
    ISNULL(DATEDIFF(HOUR, MAX(CASE WHEN b.type = 'L' THEN b.backup_finish_date END), GETDATE()), -1) AS age_log_hours,
    ISNULL(MAX(CASE WHEN b.type = 'D' THEN b.backup_size END) / 1024.0 / 1024.0, 0) AS last_full_size_mb,
    ISNULL(MAX(CASE WHEN b.type = 'I' THEN b.backup_size END) / 1024.0 / 1024.0, 0) AS last_diff_size_mb,
    ISNULL(MAX(CASE WHEN b.type = 'L' THEN b.backup_size END) / 1024.0 / 1024.0, 0) AS last_log_size_mb
FROM sys.databases d
LEFT JOIN msdb.dbo.backupset b ON d.name = b.database_name
WHERE d.database_id > 4
GROUP BY d.name"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![
            &self.last_full,
            &self.last_diff,
            &self.last_log,
            &self.age_full,
            &self.age_diff,
            &self.age_log,
            &self.size,
        ]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        for row in rows {
            let database = row.label(0)?;
            let database = database.as_str();
            self.last_full.set(&[database], row.value(1)?)?;
            self.last_diff.set(&[database], row.value(2)?)?;
            self.last_log.set(&[database], row.value(3)?)?;
            self.age_full.set(&[database], row.value(4)?)?;
            self.age_diff.set(&[database], row.value(5)?)?;
            self.age_log.set(&[database], row.value(6)?)?;
            self.size.set(&[database, "full"], row.value(7)?)?;
            self.size.set(&[database, "diff"], row.value(8)?)?;
            self.size.set(&[database, "log"], row.value(9)?)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct DatabaseProperties {
    recovery_model: Family,
    compatibility_level: Family,
    auto_close: Family,
    auto_shrink: Family,
    page_verify: Family,
}

impl DatabaseProperties {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            recovery_model: per_database(
                registry,
                "mssql_database_recovery_model",
                "Database recovery model (1=FULL, 2=BULK_LOGGED, 3=SIMPLE)",
            )?,
            compatibility_level: per_database(
                registry,
                "mssql_database_compatibility_level",
                "Database compatibility level",
            )?,
            auto_close: per_database(
                registry,
                "mssql_database_auto_close",
                "Database auto close setting (0=OFF, 1=ON)",
            )?,
            auto_shrink: per_database(
                registry,
                "mssql_database_auto_shrink",
                "Database auto shrink setting (0=OFF, 1=ON)",
            )?,
            page_verify: per_database(
                registry,
                "mssql_database_page_verify",
                "Database page verify option (0=NONE, 1=TORN_PAGE_DETECTION, 2=CHECKSUM)",
            )?,
        })
    }
}

impl Collector for DatabaseProperties {
    fn name(&self) -> &str {
        "mssql_database_properties"
    }

    fn query(&self) -> &str {
        "SELECT
    name,
    recovery_model,
    compatibility_level,
    is_auto_close_on,
    is_auto_shrink_on,
    page_verify_option
FROM sys.databases
WHERE database_id > 4"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![
            &self.recovery_model,
            &self.compatibility_level,
            &self.auto_close,
            &self.auto_shrink,
            &self.page_verify,
        ]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        for row in rows {
            let database = row.label(0)?;
            let database = database.as_str();
            self.recovery_model.set(&[database], row.value(1)?)?;
            self.compatibility_level.set(&[database], row.value(2)?)?;
            self.auto_close.set(&[database], row.flag(3)?)?;
            self.auto_shrink.set(&[database], row.flag(4)?)?;
            self.page_verify.set(&[database], row.value(5)?)?;
        }
        Ok(())
    }
}

/// Log space from `DBCC SQLPERF(LOGSPACE)` joined with reuse wait reasons and
/// virtual log file counts of online user databases.
#[derive(Debug)]
pub(crate) struct TransactionLogStats {
    used_percent: Family,
    used_mb: Family,
    total_mb: Family,
    reuse_wait: Family,
    vlf_count: Family,
}

impl TransactionLogStats {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            used_percent: per_database(
                registry,
                "mssql_log_space_used_percent",
                "Transaction log space used percentage",
            )?,
            used_mb: per_database(
                registry,
                "mssql_log_space_used_mb",
                "Transaction log space used in MB",
            )?,
            total_mb: per_database(
                registry,
                "mssql_log_space_total_mb",
                "Transaction log total space in MB",
            )?,
            reuse_wait: per_database(
                registry,
                "mssql_log_reuse_wait",
                "Transaction log reuse wait reason (0=NOTHING, 1=CHECKPOINT, 2=LOG_BACKUP, 3=ACTIVE_BACKUP_OR_RESTORE, 4=ACTIVE_TRANSACTION, 5=DATABASE_MIRRORING, 6=REPLICATION, 7=DATABASE_SNAPSHOT_CREATION, 8=LOG_SCAN, 9=AVAILABILITY_REPLICA, 10=OLDEST_PAGE, 11=XTP_CHECKPOINT, 12=SLOG_SCAN, 13=OTHER_TRANSIENT)",
            )?,
            vlf_count: per_database(registry, "mssql_log_vlf_count", "Virtual log file count")?,
        })
    }
}

impl Collector for TransactionLogStats {
    fn name(&self) -> &str {
        "mssql_transaction_log_stats"
    }

    fn query(&self) -> &str {
        "CREATE TABLE #logspace (
    database_name NVARCHAR(128),
    log_size_mb DECIMAL(18,2),
    log_space_used_percent DECIMAL(5,2),
    status INT
);

INSERT INTO #logspace
EXEC('DBCC SQLPERF(LOGSPACE) WITH NO_INFOMSGS');

DECLARE @vlf_counts TABLE (database_id INT, vlf_count INT);
DECLARE @db_id INT;
DECLARE db_cursor CURSOR FOR
    SELECT database_id FROM sys.databases WHERE database_id > 4 AND state = 0;

OPEN db_cursor;
FETCH NEXT FROM db_cursor INTO @db_id;

WHILE @@FETCH_STATUS = 0
BEGIN
    BEGIN TRY
        INSERT INTO @vlf_counts (database_id, vlf_count)
        SELECT @db_id, COUNT(*) FROM sys.dm_db_log_info(@db_id);
    END TRY
    BEGIN CATCH
        INSERT INTO @vlf_counts (database_id, vlf_count) VALUES (@db_id, 0);
    END CATCH

    FETCH NEXT FROM db_cursor INTO @db_id;
END

CLOSE db_cursor;
DEALLOCATE db_cursor;

SELECT
    ls.database_name,
    CAST(ls.log_size_mb * (ls.log_space_used_percent / 100.0) AS DECIMAL(18,2)) AS log_space_used_mb,
    ls.log_size_mb AS log_space_total_mb,
    ls.log_space_used_percent,
    d.log_reuse_wait,
    ISNULL(v.vlf_count, 0) AS vlf_count
FROM #logspace ls
INNER JOIN sys.databases d ON ls.database_name = d.name
LEFT JOIN @vlf_counts v ON d.database_id = v.database_id
WHERE d.database_id > 4
  AND d.state = 0;

DROP TABLE #logspace;"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![
            &self.used_percent,
            &self.used_mb,
            &self.total_mb,
            &self.reuse_wait,
            &self.vlf_count,
        ]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        for row in rows {
            let database = row.label(0)?;
            let database = database.as_str();
            self.used_mb.set(&[database], row.value(1)?)?;
            self.total_mb.set(&[database], row.value(2)?)?;
            self.used_percent.set(&[database], row.value(3)?)?;
            self.reuse_wait.set(&[database], row.value(4)?)?;
            self.vlf_count.set(&[database], row.value(5)?)?;
        }
        Ok(())
    }
}

/// Data and log file sizes of online user databases, gathered by switching
/// into each database in turn.
#[derive(Debug)]
pub(crate) struct DatabaseSizeGrowth {
    data_size: Family,
    log_size: Family,
    data_used: Family,
    data_free: Family,
}

impl DatabaseSizeGrowth {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            data_size: per_database(
                registry,
                "mssql_database_data_size_mb",
                "Database data file size in MB",
            )?,
            log_size: per_database(
                registry,
                "mssql_database_log_size_mb",
                "Database log file size in MB",
            )?,
            data_used: per_database(
                registry,
                "mssql_database_data_used_mb",
                "Database data space used in MB",
            )?,
            data_free: per_database(
                registry,
                "mssql_database_data_free_mb",
                "Database data free space in MB",
            )?,
        })
    }
}

impl Collector for DatabaseSizeGrowth {
    fn name(&self) -> &str {
        "mssql_database_size_growth"
    }

    fn query(&self) -> &str {
        "IF OBJECT_ID('tempdb..#Results') IS NOT NULL DROP TABLE #Results;

CREATE TABLE #Results (
    database_name NVARCHAR(128),
    data_size_mb DECIMAL(18,2),
    log_size_mb DECIMAL(18,2),
    data_used_mb DECIMAL(18,2),
    data_free_mb DECIMAL(18,2)
);

DECLARE @dbname NVARCHAR(128);
DECLARE @sql NVARCHAR(MAX);

DECLARE db_cursor CURSOR FOR
SELECT name FROM sys.databases WHERE database_id > 4 AND state = 0;

OPEN db_cursor;
FETCH NEXT FROM db_cursor INTO @dbname;

WHILE @@FETCH_STATUS = 0
BEGIN
    SET @sql = N'USE [' + @dbname + N'];
    INSERT INTO #Results
    SELECT
        ''' + @dbname + N''' AS database_name,
        CAST(SUM(CASE WHEN type = 0 THEN size * 8 / 1024.0 ELSE 0 END) AS DECIMAL(18,2)) AS data_size_mb,
        CAST(SUM(CASE WHEN type = 1 THEN size * 8 / 1024.0 ELSE 0 END) AS DECIMAL(18,2)) AS log_size_mb,
        CAST(SUM(CASE WHEN type = 0 THEN CAST(FILEPROPERTY(name, ''SpaceUsed'') AS BIGINT) * 8 / 1024.0 ELSE 0 END) AS DECIMAL(18,2)) AS data_used_mb,
        CAST(SUM(CASE WHEN type = 0 THEN (size - CAST(FILEPROPERTY(name, ''SpaceUsed'') AS BIGINT)) * 8 / 1024.0 ELSE 0 END) AS DECIMAL(18,2)) AS data_free_mb
    FROM sys.database_files;';

    EXEC sp_executesql @sql;
    FETCH NEXT FROM db_cursor INTO @dbname;
END;

CLOSE db_cursor;
DEALLOCATE db_cursor;

SELECT * FROM #Results;

DROP TABLE #Results;"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.data_size, &self.log_size, &self.data_used, &self.data_free]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        for row in rows {
            let database = row.label(0)?;
            let database = database.as_str();
            let data_size = row.value(1)?;
            trace!(database, data_size, "fetched database size");
            self.data_size.set(&[database], data_size)?;
            self.log_size.set(&[database], row.value(2)?)?;
            self.data_used.set(&[database], row.value(3)?)?;
            self.data_free.set(&[database], row.value(4)?)?;
        }
        Ok(())
    }
}

/// Average read and write latency per data or log file of user databases.
#[derive(Debug)]
pub(crate) struct DiskLatency {
    read: Family,
    write: Family,
}

impl DiskLatency {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            read: registry.register(
                "mssql_disk_read_latency_ms",
                "Average disk read latency in milliseconds",
                &["database", "file_type"],
            )?,
            write: registry.register(
                "mssql_disk_write_latency_ms",
                "Average disk write latency in milliseconds",
                &["database", "file_type"],
            )?,
        })
    }
}

impl Collector for DiskLatency {
    fn name(&self) -> &str {
        "mssql_disk_latency"
    }

    fn query(&self) -> &str {
        "SELECT
    DB_NAME(vfs.database_id) AS database_name,
    CASE WHEN mf.type = 0 THEN 'DATA' ELSE 'LOG' END AS file_type,
    CASE WHEN vfs.num_of_reads = 0 THEN 0 ELSE (vfs.io_stall_read_ms / vfs.num_of_reads) END AS read_latency_ms,
    CASE WHEN vfs.num_of_writes = 0 THEN 0 ELSE (vfs.io_stall_write_ms / vfs.num_of_writes) END AS write_latency_ms
FROM sys.dm_io_virtual_file_stats(NULL, NULL) vfs
INNER JOIN sys.master_files mf ON vfs.database_id = mf.database_id AND vfs.file_id = mf.file_id
WHERE vfs.database_id > 4"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.read, &self.write]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        for row in rows {
            let database = row.label(0)?;
            let file_type = row.label(1)?;
            let labels = [database.as_str(), file_type.as_str()];
            self.read.set(&labels, row.value(2)?)?;
            self.write.set(&labels, row.value(3)?)?;
        }
        Ok(())
    }
}
