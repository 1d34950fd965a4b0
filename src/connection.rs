//! Per-scrape database session management.
//!
//! A [`Connector`] opens a fresh [`Session`] for every scrape. The
//! [`ConnectionManager`] wraps it with the logging and error reporting the
//! exposition endpoint relies on. There is no pooling and a failed connect is
//! not retried.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::error::{ConnectionError, QueryError};
use crate::row::Row;

pub mod tds;

/// Everything needed to reach and authenticate against one SQL Server
/// instance.
#[derive(Clone)]
pub struct ConnectOptions {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// SQL authentication user.
    pub username: String,
    /// SQL authentication password.
    pub password: String,
    /// Initial database context, the login's default when `None`.
    pub database: Option<String>,
    /// Encrypt the whole session. When off only the login is encrypted.
    pub encrypt: bool,
    /// Accept any server certificate.
    pub trust_server_certificate: bool,
    /// Bound on establishing the session.
    pub connect_timeout: Duration,
    /// Bound on each query.
    pub query_timeout: Duration,
}

impl ConnectOptions {
    /// `user@host:port`, used in log lines.
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("connect_timeout", &self.connect_timeout)
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

/// A live database session.
pub trait Session: fmt::Debug + Send {
    /// Run a batch and return every row of every result set it produced, in
    /// order.
    fn execute<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, Result<Vec<Row>, QueryError>>;

    /// Close the session.
    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), QueryError>>;
}

/// Opens sessions.
pub trait Connector: fmt::Debug + Send + Sync + 'static {
    /// Establish a new session. Either fully usable or an error.
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Session>, ConnectionError>>;

    /// Human readable description of the target, for logging.
    fn target(&self) -> String {
        String::from("<unknown>")
    }
}

/// Acquires and releases one session per scrape.
#[derive(Debug)]
pub struct ConnectionManager {
    connector: Box<dyn Connector>,
}

impl ConnectionManager {
    /// Wrap a connector.
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self { connector }
    }

    /// Open a session for a scrape.
    pub async fn acquire(&self) -> Result<Box<dyn Session>, ConnectionError> {
        let target = self.connector.target();
        debug!(%target, "connecting");
        match self.connector.connect().await {
            Ok(session) => {
                debug!(%target, "connected");
                Ok(session)
            }
            Err(error) => {
                warn!(%target, %error, "connection failed");
                Err(error)
            }
        }
    }

    /// Close a session after a scrape. Close failures are logged, not
    /// returned.
    pub async fn release(&self, session: Box<dyn Session>) {
        if let Err(error) = session.close().await {
            warn!(%error, "failed to close connection");
        }
    }
}
