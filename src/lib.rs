#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

//! Prometheus exporter for Microsoft SQL Server.
//!
//! Every request to `/metrics` opens one session against the configured
//! instance, runs each registered [`collector::Collector`] in order, and
//! serializes the shared [`registry::Registry`] in the Prometheus text format.
//! A collector whose query or mapping fails is logged and skipped; its
//! instruments keep the values of the last successful scrape. When no session
//! can be established only `mssql_up 0` is served.
//!
//! # Examples
//!
//! ```
//! use mssql_exporter::encoding::text::encode;
//! use mssql_exporter::registry::Registry;
//!
//! let mut registry = Registry::default();
//!
//! // Every instrument is a gauge family with a fixed set of label names.
//! let connections = registry
//!     .register(
//!         "mssql_connections",
//!         "Number of active connections",
//!         &["database", "state"],
//!     )
//!     .unwrap();
//!
//! // Label values are passed in the order the label names were declared.
//! connections.set(&["master", "current"], 12.0).unwrap();
//!
//! let mut buffer = String::new();
//! encode(&mut buffer, &registry).unwrap();
//!
//! let expected = "# HELP mssql_connections Number of active connections\n".to_owned() +
//!                "# TYPE mssql_connections gauge\n" +
//!                "mssql_connections{database=\"master\",state=\"current\"} 12\n";
//! assert_eq!(expected, buffer);
//! ```

pub mod collector;
pub mod collectors;
pub mod config;
pub mod connection;
pub mod encoding;
pub mod error;
pub mod exporter;
pub mod metrics;
pub mod registry;
pub mod row;
pub mod scrape;
pub mod server;
