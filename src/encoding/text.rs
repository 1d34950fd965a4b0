//! Prometheus text format (version 0.0.4) implementation.
//!
//! ```
//! # use mssql_exporter::encoding::text::encode;
//! # use mssql_exporter::registry::Registry;
//! #
//! # let mut registry = Registry::default();
//! let io_stall = registry
//!     .register("mssql_io_stall", "Wait time (ms) of stall since last restart", &["database", "type"])
//!     .unwrap();
//! io_stall.set(&["master", "read"], 42.0).unwrap();
//!
//! let mut buffer = String::new();
//! encode(&mut buffer, &registry).unwrap();
//!
//! let expected = "# HELP mssql_io_stall Wait time (ms) of stall since last restart\n".to_owned()
//!     + "# TYPE mssql_io_stall gauge\n"
//!     + "mssql_io_stall{database=\"master\",type=\"read\"} 42\n";
//! assert_eq!(expected, buffer);
//! ```

use std::fmt::Write;

use super::{encode_help, encode_label_value, encode_value};
use crate::metrics::family::Family;
use crate::registry::Registry;

/// Content type of the exposition served over HTTP.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Encode every instrument in the [`Registry`], in registration order.
///
/// Samples within an instrument are ordered by their label values, so two
/// encodings of an unchanged registry are byte-identical.
pub fn encode<W>(writer: &mut W, registry: &Registry) -> Result<(), std::fmt::Error>
where
    W: Write,
{
    for family in registry.iter() {
        encode_family(writer, family)?;
    }
    Ok(())
}

/// Encode a single instrument: its `HELP` and `TYPE` lines followed by one
/// line per sample.
pub fn encode_family<W>(writer: &mut W, family: &Family) -> Result<(), std::fmt::Error>
where
    W: Write,
{
    let descriptor = family.descriptor();

    writer.write_str("# HELP ")?;
    writer.write_str(descriptor.name())?;
    writer.write_str(" ")?;
    encode_help(writer, descriptor.help())?;
    writer.write_str("\n")?;

    writer.write_str("# TYPE ")?;
    writer.write_str(descriptor.name())?;
    writer.write_str(" gauge\n")?;

    let samples = family.read();
    for (label_values, gauge) in samples.iter() {
        writer.write_str(descriptor.name())?;
        if !label_values.is_empty() {
            writer.write_char('{')?;
            for (i, (key, value)) in descriptor.label_names().iter().zip(label_values).enumerate() {
                if i > 0 {
                    writer.write_char(',')?;
                }
                writer.write_str(key)?;
                writer.write_str("=\"")?;
                encode_label_value(writer, value)?;
                writer.write_char('"')?;
            }
            writer.write_char('}')?;
        }
        writer.write_char(' ')?;
        encode_value(writer, gauge.get())?;
        writer.write_char('\n')?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn encode_unlabeled() {
        let mut registry = Registry::default();
        registry.register("mssql_up", "UP Status", &[]).unwrap();

        let mut encoded = String::new();
        encode(&mut encoded, &registry).unwrap();

        assert_eq!(
            "# HELP mssql_up UP Status\n# TYPE mssql_up gauge\nmssql_up 0\n",
            encoded
        );
    }

    #[test]
    fn labeled_without_samples_has_only_header() {
        let mut registry = Registry::default();
        registry
            .register("mssql_database_state", "Databases states", &["database"])
            .unwrap();

        let mut encoded = String::new();
        encode(&mut encoded, &registry).unwrap();

        assert_eq!(
            "# HELP mssql_database_state Databases states\n# TYPE mssql_database_state gauge\n",
            encoded
        );
    }

    #[test]
    fn label_values_are_escaped() {
        let mut registry = Registry::default();
        let family = registry
            .register("mssql_database_filesize", "Physical sizes", &["database", "filename"])
            .unwrap();
        family
            .set(&["master", "C:\\data\\master.mdf"], 4096.0)
            .unwrap();

        let mut encoded = String::new();
        encode(&mut encoded, &registry).unwrap();

        assert!(encoded.ends_with(
            "mssql_database_filesize{database=\"master\",filename=\"C:\\\\data\\\\master.mdf\"} 4096\n"
        ));
    }

    #[test]
    fn samples_are_sorted_by_label_values() {
        let mut registry = Registry::default();
        let family = registry.register("m", "h", &["database"]).unwrap();
        family.set(&["tempdb"], 2.0).unwrap();
        family.set(&["master"], 1.0).unwrap();

        let mut encoded = String::new();
        encode_family(&mut encoded, &family).unwrap();

        assert_eq!(
            "# HELP m h\n# TYPE m gauge\nm{database=\"master\"} 1\nm{database=\"tempdb\"} 2\n",
            encoded
        );
    }

    quickcheck! {
        fn encoding_unchanged_registry_is_stable(samples: Vec<(String, f64)>) -> bool {
            let mut registry = Registry::default();
            let family = registry.register("m", "h", &["key"]).unwrap();
            for (key, value) in &samples {
                family.set(&[key.as_str()], *value).unwrap();
            }

            let mut first = String::new();
            let mut second = String::new();
            encode(&mut first, &registry).unwrap();
            encode(&mut second, &registry).unwrap();
            first == second
        }
    }
}
