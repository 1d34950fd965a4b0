//! Metric type implementations.
//!
//! Every instrument the exporter exposes is a gauge: a [`family::Family`] of
//! [`gauge::Gauge`] samples keyed by label values.

pub mod family;
pub mod gauge;
