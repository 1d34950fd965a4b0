//! Metric registry implementation.
//!
//! See [`Registry`] for details.

use crate::error::RegistryError;
use crate::metrics::family::Family;

/// A metric registry.
///
/// Collectors register their instruments via [`Registry::register`] while the
/// process starts up and keep the returned [`Family`] handles to set samples
/// on every scrape. Later on the [`Registry`] is passed to
/// [`encode`](crate::encoding::text::encode) which serializes every instrument
/// in registration order.
///
/// ```
/// # use mssql_exporter::encoding::text::encode;
/// # use mssql_exporter::registry::Registry;
/// #
/// let mut registry = Registry::default();
///
/// let up = registry.register("mssql_up", "UP Status", &[]).unwrap();
/// let state = registry
///     .register("mssql_database_state", "Databases states", &["database"])
///     .unwrap();
///
/// up.set(&[], 1.0).unwrap();
/// state.set(&["master"], 0.0).unwrap();
///
/// let mut buffer = String::new();
/// encode(&mut buffer, &registry).unwrap();
///
/// let expected = "# HELP mssql_up UP Status\n".to_owned()
///     + "# TYPE mssql_up gauge\n"
///     + "mssql_up 1\n"
///     + "# HELP mssql_database_state Databases states\n"
///     + "# TYPE mssql_database_state gauge\n"
///     + "mssql_database_state{database=\"master\"} 0\n";
/// assert_eq!(expected, buffer);
/// ```
#[derive(Debug, Default)]
pub struct Registry {
    metrics: Vec<Family>,
}

impl Registry {
    /// Register a gauge instrument with the [`Registry`] and return a handle
    /// to it.
    ///
    /// Fails if the name or a label name is not a valid Prometheus identifier,
    /// or if an instrument of the same name is already registered.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        help: impl Into<String>,
        label_names: &[&str],
    ) -> Result<Family, RegistryError> {
        let descriptor = Descriptor::new(name, help, label_names)?;
        if self.get(descriptor.name()).is_some() {
            return Err(RegistryError::DuplicateMetric(descriptor.name().to_string()));
        }

        let family = Family::new(descriptor);
        self.metrics.push(family.clone());
        Ok(family)
    }

    /// Look up a registered instrument by name.
    pub fn get(&self, name: &str) -> Option<&Family> {
        self.metrics.iter().find(|f| f.descriptor().name() == name)
    }

    /// Iterate all instruments in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Family> {
        self.metrics.iter()
    }

    /// Number of registered instruments.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Whether no instrument has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// Metric descriptor: name, help text and ordered label keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    name: String,
    help: String,
    label_names: Vec<String>,
}

impl Descriptor {
    /// Create new [`Descriptor`], validating the metric and label names.
    pub fn new<N: Into<String>, H: Into<String>>(
        name: N,
        help: H,
        label_names: &[&str],
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        if !is_valid_metric_name(&name) {
            return Err(RegistryError::InvalidMetricName(name));
        }

        let mut labels: Vec<String> = Vec::with_capacity(label_names.len());
        for label in label_names {
            if !is_valid_label_name(label) {
                return Err(RegistryError::InvalidLabelName {
                    metric: name,
                    label: label.to_string(),
                });
            }
            if labels.iter().any(|l| l == label) {
                return Err(RegistryError::DuplicateLabelName {
                    metric: name,
                    label: label.to_string(),
                });
            }
            labels.push(label.to_string());
        }

        Ok(Descriptor {
            name,
            help: help.into(),
            label_names: labels,
        })
    }

    /// Returns the name of the metric.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the help text of the metric.
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Returns the label keys in declaration order.
    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }
}

fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn is_valid_label_name(name: &str) -> bool {
    if name.starts_with("__") {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
