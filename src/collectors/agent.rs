use tracing::trace;

use crate::collector::Collector;
use crate::error::{MappingError, RegistryError};
use crate::metrics::family::Family;
use crate::registry::Registry;
use crate::row::Row;

const LABELS: &[&str] = &["job_name", "job_id"];

/// SQL Agent jobs with their latest outcome and schedule.
///
/// Jobs that never ran report status `-1` and zero timestamps, so every job
/// shows up.
#[derive(Debug)]
pub(crate) struct SqlAgentJobs {
    status: Family,
    enabled: Family,
    last_run: Family,
    next_run: Family,
    last_duration: Family,
}

impl SqlAgentJobs {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            status: registry.register(
                "mssql_sql_agent_job_status",
                "SQL Agent job last run status (-1=Never Run, 0=Failed, 1=Succeeded, 2=Retry, 3=Canceled, 4=In Progress)",
                LABELS,
            )?,
            enabled: registry.register(
                "mssql_sql_agent_job_enabled",
                "SQL Agent job enabled status (0=Disabled, 1=Enabled)",
                LABELS,
            )?,
            last_run: registry.register(
                "mssql_sql_agent_job_last_run_seconds",
                "SQL Agent job last run time in seconds since epoch",
                LABELS,
            )?,
            next_run: registry.register(
                "mssql_sql_agent_job_next_run_seconds",
                "SQL Agent job next scheduled run time in seconds since epoch",
                LABELS,
            )?,
            last_duration: registry.register(
                "mssql_sql_agent_job_last_duration_seconds",
                "SQL Agent job last run duration in seconds",
                LABELS,
            )?,
        })
    }
}

impl Collector for SqlAgentJobs {
    fn name(&self) -> &str {
        "mssql_sql_agent_jobs"
    }

    fn query(&self) -> &str {
        "SELECT
    j.name AS job_name,
    CAST(j.job_id AS VARCHAR(50)) AS job_id,
    j.enabled,
    CASE
        WHEN h.run_status IS NULL THEN -1
        ELSE h.run_status
    END AS last_run_status,
    CASE
        WHEN h.run_date IS NULL THEN 0
        ELSE DATEDIFF(SECOND, '19700101',
            CAST(
                CAST(h.run_date AS CHAR(8)) + ' ' +
                STUFF(STUFF(RIGHT('000000' + CAST(h.run_time AS VARCHAR(6)), 6), 5, 0, ':'), 3, 0, ':')
                AS DATETIME
            ))
    END AS last_run_seconds,
    CASE
        WHEN ja.next_scheduled_run_date IS NULL OR ja.next_scheduled_run_date = 0 THEN 0
        ELSE DATEDIFF(SECOND, '19700101',
            CAST(
                CAST(ja.next_scheduled_run_date AS CHAR(8)) + ' ' +
                STUFF(STUFF(RIGHT('000000' + CAST(ja.next_scheduled_run_time AS VARCHAR(6)), 6), 5, 0, ':'), 3, 0, ':')
                AS DATETIME
            ))
    END AS next_run_seconds,
    CASE
        WHEN h.run_duration IS NULL THEN 0
        ELSE (h.run_duration / 10000 * 3600) + ((h.run_duration % 10000) / 100 * 60) + (h.run_duration % 100)
    END AS last_duration_seconds
FROM msdb.dbo.sysjobs j
LEFT JOIN (
    SELECT job_id, run_status, run_date, run_time, run_duration,
           ROW_NUMBER() OVER (PARTITION BY job_id ORDER BY run_date DESC, run_time DESC) AS rn
    FROM msdb.dbo.sysjobhistory
    WHERE step_id = 0
) h ON j.job_id = h.job_id AND h.rn = 1
LEFT JOIN (
    SELECT job_id,
           MIN(next_run_date) AS next_scheduled_run_date,
           MIN(next_run_time) AS next_scheduled_run_time
    FROM msdb.dbo.sysjobschedules js
    INNER JOIN msdb.dbo.sysschedules s ON js.schedule_id = s.schedule_id
    WHERE next_run_date > 0
    GROUP BY job_id
) ja ON j.job_id = ja.job_id"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![
            &self.status,
            &self.enabled,
            &self.last_run,
            &self.next_run,
            &self.last_duration,
        ]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        for row in rows {
            let job_name = row.label(0)?;
            let job_id = row.label(1)?;
            let labels = [job_name.as_str(), job_id.as_str()];

            let status = row.value(3)?;
            trace!(job = %job_name, status, "fetched sql agent job");
            self.status.set(&labels, status)?;
            self.enabled.set(&labels, row.flag(2)?)?;
            self.last_run.set(&labels, row.value(4)?)?;
            self.next_run.set(&labels, row.value(5)?)?;
            self.last_duration.set(&labels, row.value(6)?)?;
        }
        Ok(())
    }
}
