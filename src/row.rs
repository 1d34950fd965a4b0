//! Driver independent view of a result row.
//!
//! Mapping functions only ever see [`Row`]s. The typed accessors turn the
//! loosely typed cells SQL Server returns into sample values and label
//! values, failing with a [`MappingError`] when a row is not shaped the way
//! the mapping expects.

use std::fmt;

use crate::error::MappingError;

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// SQL `NULL`.
    Null,
    /// Any integer type.
    Int(i64),
    /// `float`, `real`, `decimal`, `numeric` and `money`.
    Decimal(f64),
    /// Character data and unique identifiers.
    Text(String),
    /// `bit`.
    Bool(bool),
    /// A driver type no collector reads, by name.
    Unsupported(&'static str),
}

impl Cell {
    fn kind(&self) -> String {
        match self {
            Cell::Null => "null".to_string(),
            Cell::Int(_) => "int".to_string(),
            Cell::Decimal(_) => "decimal".to_string(),
            Cell::Text(t) => format!("text {t:?}"),
            Cell::Bool(_) => "bool".to_string(),
            Cell::Unsupported(name) => name.to_string(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Int(v) => write!(f, "{v}"),
            Cell::Decimal(v) => write!(f, "{v}"),
            Cell::Text(t) => f.write_str(t),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Unsupported(name) => write!(f, "<{name}>"),
        }
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<i32> for Cell {
    fn from(v: i32) -> Self {
        Cell::Int(v.into())
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Decimal(v)
    }
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::Bool(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Text(v)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map_or(Cell::Null, Into::into)
    }
}

/// An ordered sequence of cells, one per result column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: Vec<Cell>,
}

impl Row {
    /// Create a row from its cells.
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Raw access to a column.
    pub fn cell(&self, index: usize) -> Result<&Cell, MappingError> {
        self.cells.get(index).ok_or(MappingError::MissingColumn {
            index,
            len: self.cells.len(),
        })
    }

    /// Numeric value of a column. Integers, decimals, bits and numeric text
    /// are accepted, anything else fails.
    pub fn value(&self, index: usize) -> Result<f64, MappingError> {
        match self.cell(index)? {
            Cell::Null => Err(MappingError::Null(index)),
            Cell::Int(v) => Ok(*v as f64),
            Cell::Decimal(v) => Ok(*v),
            Cell::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Cell::Text(t) => t.trim().parse().map_err(|_| MappingError::Unparsable {
                index,
                value: t.clone(),
            }),
            other => Err(MappingError::UnexpectedType {
                index,
                expected: "number",
                found: other.kind(),
            }),
        }
    }

    /// Like [`Row::value`], with `NULL` mapped to `default`.
    pub fn value_or(&self, index: usize, default: f64) -> Result<f64, MappingError> {
        match self.cell(index)? {
            Cell::Null => Ok(default),
            _ => self.value(index),
        }
    }

    /// Label value of a column. `NULL` becomes the empty string.
    pub fn label(&self, index: usize) -> Result<String, MappingError> {
        self.cell(index).map(ToString::to_string)
    }

    /// Truthiness of a column as `0` or `1`. `NULL`, zero, `false` and empty
    /// text are false.
    pub fn flag(&self, index: usize) -> Result<f64, MappingError> {
        let truthy = match self.cell(index)? {
            Cell::Null => false,
            Cell::Int(v) => *v != 0,
            Cell::Decimal(v) => *v != 0.0,
            Cell::Bool(b) => *b,
            Cell::Text(t) => !t.is_empty(),
            other => {
                return Err(MappingError::UnexpectedType {
                    index,
                    expected: "flag",
                    found: other.kind(),
                })
            }
        };
        Ok(if truthy { 1.0 } else { 0.0 })
    }
}

impl From<Vec<Cell>> for Row {
    fn from(cells: Vec<Cell>) -> Self {
        Row::new(cells)
    }
}

impl FromIterator<Cell> for Row {
    fn from_iter<I: IntoIterator<Item = Cell>>(iter: I) -> Self {
        Row::new(iter.into_iter().collect())
    }
}

/// Build a [`Row`] from values convertible into [`Cell`]s.
///
/// ```
/// # use mssql_exporter::row;
/// # use mssql_exporter::row::Cell;
/// let r = row!["master", 7, None::<i64>];
/// assert_eq!(&Cell::Null, r.cell(2).unwrap());
/// ```
#[macro_export]
macro_rules! row {
    ($($cell:expr),* $(,)?) => {
        $crate::row::Row::new(vec![$($crate::row::Cell::from($cell)),*])
    };
}

/// The first row of a result set, for single-row queries.
pub fn first(rows: &[Row]) -> Result<&Row, MappingError> {
    rows.first().ok_or(MappingError::MissingRow(0))
}
