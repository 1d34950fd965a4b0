//! SQL Server sessions over TDS, backed by `tiberius`.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::trace;

use super::{ConnectOptions, Connector, Session};
use crate::error::{ConnectionError, QueryError};
use crate::row::{Cell, Row};

/// [`Connector`] opening a TCP connection per session.
#[derive(Debug, Clone)]
pub struct TdsConnector {
    options: ConnectOptions,
}

impl TdsConnector {
    /// Create a connector for the given target.
    pub fn new(options: ConnectOptions) -> Self {
        Self { options }
    }

    fn config(&self) -> Config {
        let options = &self.options;
        let mut config = Config::new();
        config.host(&options.host);
        config.port(options.port);
        config.authentication(AuthMethod::sql_server(&options.username, &options.password));
        if let Some(database) = &options.database {
            config.database(database);
        }
        config.encryption(if options.encrypt {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::Off
        });
        if options.trust_server_certificate {
            config.trust_cert();
        }
        config
    }

    async fn open(&self) -> Result<TdsSession, ConnectionError> {
        let config = self.config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| ConnectionError::Failed(e.to_string()))?;
        tcp.set_nodelay(true)
            .map_err(|e| ConnectionError::Failed(e.to_string()))?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| ConnectionError::Failed(e.to_string()))?;

        Ok(TdsSession {
            client,
            query_timeout: self.options.query_timeout,
        })
    }
}

impl Connector for TdsConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Session>, ConnectionError>> {
        async move {
            let limit = self.options.connect_timeout;
            let session = timeout(limit, self.open())
                .await
                .map_err(|_| ConnectionError::Timeout(limit))??;
            Ok(Box::new(session) as Box<dyn Session>)
        }
        .boxed()
    }

    fn target(&self) -> String {
        format!(
            "{} (encrypt={}, trust_server_certificate={})",
            self.options.target(),
            self.options.encrypt,
            self.options.trust_server_certificate
        )
    }
}

/// A tiberius client. A session whose query timed out is dropped by the
/// caller rather than reused: the abandoned batch keeps running on the
/// server, and dropping the client closes the socket, which makes the
/// server abort it.
struct TdsSession {
    client: Client<Compat<TcpStream>>,
    query_timeout: Duration,
}

impl fmt::Debug for TdsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TdsSession")
            .field("query_timeout", &self.query_timeout)
            .finish_non_exhaustive()
    }
}

impl TdsSession {
    async fn run(&mut self, query: &str) -> Result<Vec<Row>, QueryError> {
        let results = self
            .client
            .simple_query(query)
            .await
            .map_err(|e| QueryError::Failed(e.to_string()))?
            .into_results()
            .await
            .map_err(|e| QueryError::Failed(e.to_string()))?;

        // Multi-statement batches report one result set per statement.
        let rows: Vec<Row> = results
            .into_iter()
            .flatten()
            .map(|row| row.into_iter().map(cell).collect())
            .collect();
        trace!(rows = rows.len(), "fetched");
        Ok(rows)
    }
}

impl Session for TdsSession {
    fn execute<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, Result<Vec<Row>, QueryError>> {
        async move {
            let limit = self.query_timeout;
            timeout(limit, self.run(query))
                .await
                .map_err(|_| QueryError::Timeout(limit))?
        }
        .boxed()
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), QueryError>> {
        async move {
            self.client
                .close()
                .await
                .map_err(|e| QueryError::Failed(e.to_string()))
        }
        .boxed()
    }
}

fn cell(data: ColumnData<'static>) -> Cell {
    match data {
        ColumnData::U8(v) => v.map(i64::from).into(),
        ColumnData::I16(v) => v.map(i64::from).into(),
        ColumnData::I32(v) => v.map(i64::from).into(),
        ColumnData::I64(v) => v.into(),
        ColumnData::F32(v) => v.map(f64::from).into(),
        ColumnData::F64(v) => v.into(),
        ColumnData::Bit(v) => v.into(),
        ColumnData::String(v) => v.map(|s| s.into_owned()).into(),
        ColumnData::Guid(v) => v.map(|g| g.to_string()).into(),
        ColumnData::Numeric(v) => v
            .map(|n| n.value() as f64 / 10f64.powi(i32::from(n.scale())))
            .into(),
        ColumnData::Binary(None) | ColumnData::Xml(None) => Cell::Null,
        ColumnData::Binary(Some(_)) => Cell::Unsupported("binary"),
        ColumnData::Xml(Some(_)) => Cell::Unsupported("xml"),
        ColumnData::DateTime(None) | ColumnData::SmallDateTime(None) => Cell::Null,
        _ => Cell::Unsupported("datetime"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn converts_column_data() {
        assert_eq!(Cell::Int(7), cell(ColumnData::U8(Some(7))));
        assert_eq!(Cell::Int(-2), cell(ColumnData::I16(Some(-2))));
        assert_eq!(Cell::Int(1_000_000), cell(ColumnData::I32(Some(1_000_000))));
        assert_eq!(Cell::Int(i64::MAX), cell(ColumnData::I64(Some(i64::MAX))));
        assert_eq!(Cell::Decimal(0.5), cell(ColumnData::F32(Some(0.5))));
        assert_eq!(Cell::Decimal(99.25), cell(ColumnData::F64(Some(99.25))));
        assert_eq!(Cell::Bool(true), cell(ColumnData::Bit(Some(true))));
        assert_eq!(
            Cell::Text("master".to_string()),
            cell(ColumnData::String(Some(Cow::Borrowed("master"))))
        );
        assert_eq!(Cell::Null, cell(ColumnData::I32(None)));
        assert_eq!(Cell::Null, cell(ColumnData::String(None)));
    }

    #[test]
    fn converts_numeric() {
        let n = tiberius::numeric::Numeric::new_with_scale(12345, 2);
        assert_eq!(Cell::Decimal(123.45), cell(ColumnData::Numeric(Some(n))));
    }

    fn options(host: &str, port: u16, connect_timeout: Duration) -> ConnectOptions {
        ConnectOptions {
            host: host.to_string(),
            port,
            username: "monitor".to_string(),
            password: "secret".to_string(),
            database: Some("master".to_string()),
            encrypt: false,
            trust_server_certificate: true,
            connect_timeout,
            query_timeout: Duration::from_secs(15),
        }
    }

    #[test]
    fn target_includes_security_flags() {
        let connector = TdsConnector::new(options("sql01", 1433, Duration::from_secs(15)));
        assert_eq!(
            "monitor@sql01:1433 (encrypt=false, trust_server_certificate=true)",
            connector.target()
        );
    }

    #[tokio::test]
    async fn refused_connection() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let connector = TdsConnector::new(options("127.0.0.1", port, Duration::from_secs(1)));
        let error = connector.connect().await.unwrap_err();
        assert!(!error.to_string().is_empty());
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        // Accepts the TCP handshake through the backlog, never answers the
        // prelogin.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let limit = Duration::from_millis(200);
        let connector = TdsConnector::new(options("127.0.0.1", port, limit));
        match connector.connect().await {
            Err(ConnectionError::Timeout(elapsed)) => assert_eq!(limit, elapsed),
            other => panic!("expected a timeout, got {other:?}"),
        }
        drop(listener);
    }
}
