use crate::collector::Collector;
use crate::error::{MappingError, RegistryError};
use crate::metrics::family::Family;
use crate::registry::Registry;
use crate::row::Row;

// Database column value of replicas without database replica state.
const NO_DATABASE: &str = "N/A";

/// Always On availability group replicas. Instances without the feature
/// return no rows.
#[derive(Debug)]
pub(crate) struct AvailabilityGroups {
    role: Family,
    sync_state: Family,
    sync_health: Family,
    log_send_queue: Family,
    redo_queue: Family,
}

impl AvailabilityGroups {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        let replica = &["ag_name", "replica_server"];
        let database = &["ag_name", "replica_server", "database"];
        Ok(Self {
            role: registry.register(
                "mssql_ag_replica_role",
                "Availability group replica role (0=Resolving, 1=Primary, 2=Secondary)",
                replica,
            )?,
            sync_state: registry.register(
                "mssql_ag_replica_sync_state",
                "Availability group replica synchronization state (0=NotSynchronizing, 1=Synchronizing, 2=Synchronized, 3=Reverting, 4=Initializing)",
                database,
            )?,
            sync_health: registry.register(
                "mssql_ag_replica_sync_health",
                "Availability group replica synchronization health (0=NotHealthy, 1=PartiallyHealthy, 2=Healthy)",
                replica,
            )?,
            log_send_queue: registry.register(
                "mssql_ag_log_send_queue_size_kb",
                "Availability group log send queue size in KB",
                database,
            )?,
            redo_queue: registry.register(
                "mssql_ag_redo_queue_size_kb",
                "Availability group redo queue size in KB",
                database,
            )?,
        })
    }
}

impl Collector for AvailabilityGroups {
    fn name(&self) -> &str {
        "mssql_availability_groups"
    }

    fn query(&self) -> &str {
        "IF EXISTS (SELECT 1 FROM sys.dm_hadr_availability_replica_states)
BEGIN
    SELECT
        ag.name AS ag_name,
        ar.replica_server_name,
        rs.role,
        rs.synchronization_health,
        ISNULL(DB_NAME(drs.database_id), 'N/A') AS database_name,
        ISNULL(drs.synchronization_state, 0) AS sync_state,
        ISNULL(drs.log_send_queue_size, 0) AS log_send_queue_size,
        ISNULL(drs.redo_queue_size, 0) AS redo_queue_size
    FROM sys.dm_hadr_availability_replica_states rs
    INNER JOIN sys.availability_replicas ar ON rs.replica_id = ar.replica_id
    INNER JOIN sys.availability_groups ag ON ar.group_id = ag.group_id
    LEFT JOIN sys.dm_hadr_database_replica_states drs ON rs.replica_id = drs.replica_id
END
ELSE
BEGIN
    SELECT NULL, NULL, NULL, NULL, NULL, NULL, NULL, NULL WHERE 1=0
END"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![
            &self.role,
            &self.sync_state,
            &self.sync_health,
            &self.log_send_queue,
            &self.redo_queue,
        ]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        for row in rows {
            let ag_name = row.label(0)?;
            let replica_server = row.label(1)?;
            let replica = [ag_name.as_str(), replica_server.as_str()];
            self.role.set(&replica, row.value(2)?)?;
            self.sync_health.set(&replica, row.value(3)?)?;

            let database = row.label(4)?;
            if database == NO_DATABASE {
                continue;
            }
            let labels = [ag_name.as_str(), replica_server.as_str(), database.as_str()];
            self.sync_state.set(&labels, row.value(5)?)?;
            self.log_send_queue.set(&labels, row.value(6)?)?;
            self.redo_queue.set(&labels, row.value(7)?)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn replicas_without_database_only_report_role_and_health() {
        let mut registry = Registry::default();
        let collector = AvailabilityGroups::new(&mut registry).unwrap();
        collector
            .collect(&[
                row!["ag1", "sql01", 1, 2, "sales", 2, 0, 0],
                row!["ag1", "sql02", 2, 1, "N/A", 0, 0, 0],
            ])
            .unwrap();

        assert_eq!(Some(1.0), collector.role.get(&["ag1", "sql01"]));
        assert_eq!(Some(2.0), collector.role.get(&["ag1", "sql02"]));
        assert_eq!(Some(1.0), collector.sync_health.get(&["ag1", "sql02"]));
        assert_eq!(Some(2.0), collector.sync_state.get(&["ag1", "sql01", "sales"]));
        assert_eq!(1, collector.sync_state.len());
        assert_eq!(1, collector.redo_queue.len());
    }
}
