use tracing::trace;

use crate::collector::Collector;
use crate::error::{MappingError, RegistryError};
use crate::metrics::family::Family;
use crate::registry::Registry;
use crate::row::Row;

// Name of the pseudo-row carrying the version store reservation.
const VERSION_STORE: &str = "VersionStore";

/// TempDB files plus the version store.
///
/// Every file row repeats the data file count. The trailing version store
/// row reports its reservation in KB in the space-used column.
#[derive(Debug)]
pub(crate) struct TempdbStats {
    file_count: Family,
    file_size: Family,
    space_used: Family,
    version_store: Family,
}

impl TempdbStats {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            file_count: registry.register(
                "mssql_tempdb_file_count",
                "Number of TempDB data files",
                &[],
            )?,
            file_size: registry.register(
                "mssql_tempdb_file_size_kb",
                "TempDB file size in KB",
                &["file_name", "file_type"],
            )?,
            space_used: registry.register(
                "mssql_tempdb_space_used_kb",
                "TempDB space used in KB",
                &["file_name"],
            )?,
            version_store: registry.register(
                "mssql_tempdb_version_store_mb",
                "TempDB version store size in MB",
                &[],
            )?,
        })
    }
}

impl Collector for TempdbStats {
    fn name(&self) -> &str {
        "mssql_tempdb_stats"
    }

    fn query(&self) -> &str {
        "SELECT
    (SELECT COUNT(*) FROM tempdb.sys.database_files WHERE type = 0) AS data_file_count,
    name AS file_name,
    type_desc AS file_type,
    (size * CAST(8 AS BIGINT)) AS size_kb,
    (FILEPROPERTY(name, 'SpaceUsed') * CAST(8 AS BIGINT)) AS space_used_kb
FROM tempdb.sys.database_files
UNION ALL
SELECT
    0,
    'VersionStore',
    'VersionStore',
    0,
    (SELECT SUM(version_store_reserved_page_count) * 8 FROM sys.dm_db_file_space_usage WHERE database_id = 2)"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![
            &self.file_count,
            &self.file_size,
            &self.space_used,
            &self.version_store,
        ]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        let mut file_count = 0.0;
        let mut version_store_kb = 0.0;

        for row in rows {
            let file_name = row.label(1)?;
            if file_name == VERSION_STORE {
                version_store_kb = row.value_or(4, 0.0)?;
                continue;
            }

            let data_files = row.value(0)?;
            if data_files > 0.0 {
                file_count = data_files;
            }
            let file_type = row.label(2)?;
            self.file_size
                .set(&[file_name.as_str(), file_type.as_str()], row.value(3)?)?;
            self.space_used
                .set(&[file_name.as_str()], row.value_or(4, 0.0)?)?;
        }

        trace!(file_count, version_store_kb, "fetched tempdb stats");
        self.file_count.set(&[], file_count)?;
        self.version_store.set(&[], version_store_kb / 1024.0)?;
        Ok(())
    }
}
