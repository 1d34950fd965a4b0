//! Module implementing a labeled gauge instrument.
//!
//! See [`Family`] for details.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};

use super::gauge::Gauge;
use crate::error::LabelError;
use crate::registry::Descriptor;

/// A gauge instrument: a set of [`Gauge`] samples sharing name, help text
/// and label keys, differentiated by their label values.
///
/// Label-value tuples are unique. Setting a tuple that already exists
/// overwrites its sample, it never adds a second time series. An instrument
/// without label keys holds exactly one sample from the moment it is created.
///
/// Samples are never removed: a series that stops being reported keeps its
/// last value until it is overwritten.
///
/// Cloning a [`Family`] yields another handle to the same samples, which is
/// how collectors and the [`Registry`](crate::registry::Registry) share it.
///
/// ```
/// # use mssql_exporter::metrics::family::Family;
/// # use mssql_exporter::registry::Descriptor;
/// let descriptor = Descriptor::new("mssql_io_stall", "Wait time (ms) of stall", &["database", "type"]).unwrap();
/// let family = Family::new(descriptor);
///
/// family.set(&["master", "read"], 12.0).unwrap();
/// family.set(&["master", "read"], 15.0).unwrap();
///
/// assert_eq!(Some(15.0), family.get(&["master", "read"]));
/// assert_eq!(1, family.len());
/// ```
#[derive(Debug, Clone)]
pub struct Family {
    descriptor: Arc<Descriptor>,
    samples: Arc<RwLock<BTreeMap<Vec<String>, Gauge>>>,
}

impl Family {
    /// Create an instrument for the given [`Descriptor`].
    pub fn new(descriptor: Descriptor) -> Self {
        let mut samples = BTreeMap::new();
        if descriptor.label_names().is_empty() {
            samples.insert(Vec::new(), Gauge::default());
        }

        Self {
            descriptor: Arc::new(descriptor),
            samples: Arc::new(RwLock::new(samples)),
        }
    }

    /// The instrument's name, help text and label keys.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Set the sample identified by `label_values` to `value`.
    ///
    /// `label_values` must be given in the order of the label keys the
    /// instrument was registered with. Unlabeled instruments take `&[]`.
    pub fn set(&self, label_values: &[&str], value: f64) -> Result<(), LabelError> {
        self.get_or_create(label_values)?.set(value);
        Ok(())
    }

    /// Access the sample with the given label values, creating it if one does
    /// not yet exist.
    pub fn get_or_create(&self, label_values: &[&str]) -> Result<Gauge, LabelError> {
        self.check_arity(label_values)?;
        let key: Vec<String> = label_values.iter().map(|v| v.to_string()).collect();

        if let Some(gauge) = self.samples.read().get(&key) {
            return Ok(gauge.clone());
        }

        Ok(self.samples.write().entry(key).or_default().clone())
    }

    /// Current value of the sample with the given label values, if any.
    pub fn get(&self, label_values: &[&str]) -> Option<f64> {
        let samples = self.samples.read();
        samples
            .iter()
            .find(|(key, _)| key.iter().map(String::as_str).eq(label_values.iter().copied()))
            .map(|(_, gauge)| gauge.get())
    }

    /// Number of samples, i.e. distinct label-value tuples.
    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    /// Whether the instrument holds no samples yet.
    pub fn is_empty(&self) -> bool {
        self.samples.read().is_empty()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, BTreeMap<Vec<String>, Gauge>> {
        self.samples.read()
    }

    fn check_arity(&self, label_values: &[&str]) -> Result<(), LabelError> {
        let expected = self.descriptor.label_names().len();
        if label_values.len() != expected {
            return Err(LabelError {
                metric: self.descriptor.name().to_string(),
                expected,
                found: label_values.len(),
            });
        }
        Ok(())
    }
}
