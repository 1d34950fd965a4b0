use crate::collector::Collector;
use crate::error::{MappingError, RegistryError};
use crate::metrics::family::Family;
use crate::registry::Registry;
use crate::row::{self, Row};

/// Failed logins in the current error log over the last five minutes, `-1`
/// when the login lacks permission to read the error log.
#[derive(Debug)]
pub(crate) struct SecurityStats {
    failed_logins: Family,
}

impl SecurityStats {
    pub(crate) fn new(registry: &mut Registry) -> Result<Self, RegistryError> {
        Ok(Self {
            failed_logins: registry.register(
                "mssql_failed_login_count",
                "Number of failed login attempts in the error log (last 5 minutes)",
                &[],
            )?,
        })
    }
}

impl Collector for SecurityStats {
    fn name(&self) -> &str {
        "mssql_security_stats"
    }

    fn query(&self) -> &str {
        "CREATE TABLE #ErrorLog (
    LogDate DATETIME,
    ProcessInfo NVARCHAR(100),
    [Text] NVARCHAR(4000)
);

BEGIN TRY
    INSERT INTO #ErrorLog
    EXEC xp_readerrorlog 0, 1, N'Login failed';
END TRY
BEGIN CATCH
    SELECT -1 AS failed_login_count;
    RETURN;
END CATCH;

SELECT COUNT(*) AS failed_login_count
FROM #ErrorLog
WHERE LogDate >= DATEADD(MINUTE, -5, GETDATE());"
    }

    fn instruments(&self) -> Vec<&Family> {
        vec![&self.failed_logins]
    }

    fn collect(&self, rows: &[Row]) -> Result<(), MappingError> {
        self.failed_logins.set(&[], row::first(rows)?.value(0)?)?;
        Ok(())
    }
}
