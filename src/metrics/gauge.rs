//! Module implementing a gauge sample.
//!
//! See [`Gauge`] for details.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Current value of a single time series.
///
/// The value is stored as the bit pattern of an [`f64`] in an [`AtomicU64`],
/// so concurrent scrapes overwrite it without taking a lock. Cloning a
/// [`Gauge`] yields another handle to the same value.
///
/// ```
/// # use mssql_exporter::metrics::gauge::Gauge;
/// let gauge = Gauge::default();
/// gauge.set(42.5);
/// assert_eq!(42.5, gauge.get());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Gauge {
    value: Arc<AtomicU64>,
}

impl Gauge {
    /// Sets the [`Gauge`] to `v`, returning the previous value.
    pub fn set(&self, v: f64) -> f64 {
        f64::from_bits(self.value.swap(v.to_bits(), Ordering::Relaxed))
    }

    /// Get the current value of the [`Gauge`].
    pub fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let gauge = Gauge::default();
        assert_eq!(0.0, gauge.get());

        assert_eq!(0.0, gauge.set(10.0));
        assert_eq!(10.0, gauge.get());

        assert_eq!(10.0, gauge.set(-1.5));
        assert_eq!(-1.5, gauge.get());
    }

    #[test]
    fn clones_share_value() {
        let gauge = Gauge::default();
        let other = gauge.clone();
        other.set(3.0);
        assert_eq!(3.0, gauge.get());
    }
}
