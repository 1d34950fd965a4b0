//! Error types of the collection pipeline.
//!
//! Only [`ConnectionError`] ever reaches the exposition endpoint. Query and
//! mapping failures are caught by the orchestrator and logged against the
//! collector that produced them, and [`RegistryError`] can only happen while
//! the process is starting up.

use std::time::Duration;

/// Failure to establish a database session for a scrape.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// TCP connect, TLS negotiation, login or any other driver level failure
    /// before the session was confirmed.
    #[error("{0}")]
    Failed(String),
    /// The server did not confirm the session in time.
    #[error("connection not established within {0:?}")]
    Timeout(Duration),
}

/// Failure of a single collector query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The server rejected the query or the transport failed mid-query.
    #[error("{0}")]
    Failed(String),
    /// The query did not complete in time.
    #[error("query did not complete within {0:?}")]
    Timeout(Duration),
    /// The driver panicked while running the query.
    #[error("driver panicked: {0}")]
    Panicked(String),
}

impl QueryError {
    /// Whether the session can no longer be trusted after this error.
    ///
    /// A timed out batch keeps running on the server and the next query on
    /// the same session would wait for it. After a panic the driver state is
    /// unknown.
    pub fn breaks_session(&self) -> bool {
        matches!(self, QueryError::Timeout(_) | QueryError::Panicked(_))
    }
}

/// A label-value tuple did not match the label keys of its instrument.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("metric {metric} expects {expected} label values, got {found}")]
pub struct LabelError {
    /// Name of the instrument.
    pub metric: String,
    /// Number of label keys the instrument was registered with.
    pub expected: usize,
    /// Number of label values passed.
    pub found: usize,
}

/// Failure of a collector's mapping function while interpreting rows.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MappingError {
    /// The result set did not contain the row the mapping expects.
    #[error("row {0} missing from result set")]
    MissingRow(usize),
    /// The row is shorter than the mapping expects.
    #[error("column {index} missing from row of {len} cells")]
    MissingColumn {
        /// Requested column.
        index: usize,
        /// Number of cells in the row.
        len: usize,
    },
    /// A numeric value was required but the cell was null.
    #[error("column {0} is null")]
    Null(usize),
    /// The cell holds a value of the wrong kind.
    #[error("column {index}: expected {expected}, found {found}")]
    UnexpectedType {
        /// Offending column.
        index: usize,
        /// What the mapping asked for.
        expected: &'static str,
        /// What the cell holds.
        found: String,
    },
    /// A text value could not be interpreted.
    #[error("column {index}: cannot parse {value:?}")]
    Unparsable {
        /// Offending column.
        index: usize,
        /// The raw text.
        value: String,
    },
    /// See [`LabelError`].
    #[error(transparent)]
    Labels(#[from] LabelError),
}

/// Invalid metric or collector registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
    #[error("invalid metric name {0:?}")]
    InvalidMetricName(String),
    /// Label names must match `[a-zA-Z_][a-zA-Z0-9_]*` and not start with `__`.
    #[error("invalid label name {label:?} on metric {metric}")]
    InvalidLabelName {
        /// Metric being registered.
        metric: String,
        /// Offending label name.
        label: String,
    },
    /// A label name was listed twice.
    #[error("duplicate label name {label:?} on metric {metric}")]
    DuplicateLabelName {
        /// Metric being registered.
        metric: String,
        /// Repeated label name.
        label: String,
    },
    /// A metric with this name is already registered.
    #[error("metric {0} already registered")]
    DuplicateMetric(String),
    /// A collector with this name is already registered.
    #[error("collector {0} already registered")]
    DuplicateCollector(String),
    /// A collector must own at least one instrument.
    #[error("collector {0} owns no instruments")]
    NoInstruments(String),
}
