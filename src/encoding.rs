//! Exposition format implementations.
//!
//! Only the Prometheus text format (version 0.0.4) is supported, see
//! [`text`]. The helpers in this module format sample values and escape
//! free-form strings for it.

use std::fmt::Write;

pub mod text;

// Integral values below 2^53 are exactly representable and printed without a
// fractional part, which is what Prometheus client libraries emit for gauges.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Write a sample value.
pub(crate) fn encode_value<W: Write>(writer: &mut W, v: f64) -> Result<(), std::fmt::Error> {
    if v.is_nan() {
        writer.write_str("NaN")
    } else if v.is_infinite() {
        writer.write_str(if v > 0.0 { "+Inf" } else { "-Inf" })
    } else if v.fract() == 0.0 && v.abs() < MAX_EXACT_INTEGER {
        writer.write_str(itoa::Buffer::new().format(v as i64))
    } else {
        writer.write_str(dtoa::Buffer::new().format(v))
    }
}

/// Write a help text, escaping backslashes and line feeds.
pub(crate) fn encode_help<W: Write>(writer: &mut W, help: &str) -> Result<(), std::fmt::Error> {
    for c in help.chars() {
        match c {
            '\\' => writer.write_str("\\\\")?,
            '\n' => writer.write_str("\\n")?,
            c => writer.write_char(c)?,
        }
    }
    Ok(())
}

/// Write a label value, escaping backslashes, double quotes and line feeds.
pub(crate) fn encode_label_value<W: Write>(
    writer: &mut W,
    value: &str,
) -> Result<(), std::fmt::Error> {
    for c in value.chars() {
        match c {
            '\\' => writer.write_str("\\\\")?,
            '"' => writer.write_str("\\\"")?,
            '\n' => writer.write_str("\\n")?,
            c => writer.write_char(c)?,
        }
    }
    Ok(())
}
