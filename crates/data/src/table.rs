// In-memory table: ordered typed columns plus rows of scalar values.

use chrono::NaiveDate;
use serde::ser::{Serialize, Serializer};

use crate::error::ShapeError;

/// Declared type of a column, inferred from its values at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Numeric,
    Currency,
    Date,
}

impl ColumnType {
    /// Numeric or currency.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Numeric | ColumnType::Currency)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Numeric => "numeric",
            ColumnType::Currency => "currency",
            ColumnType::Date => "date",
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Column {
    /// Trimmed name used for lookups
    pub name: String,
    pub kind: ColumnType,
    /// Source header text, when it differs from `name`
    #[serde(skip)]
    header: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
            header: None,
        }
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    /// Header text as written in the source file.
    pub fn header(&self) -> &str {
        self.header.as_deref().unwrap_or(&self.name)
    }
}

/// A single cell.
///
/// Typed variants keep the exact source text in `raw` so that export
/// reproduces what was loaded byte for byte.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Number { value: f64, raw: String },
    Date { value: NaiveDate, raw: String },
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Source text of the cell; `None` for null.
    pub fn raw(&self) -> Option<&str> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s),
            Value::Number { raw, .. } | Value::Date { raw, .. } => Some(raw),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Case-insensitive substring test. `needle_lower` must already be lowercased.
    /// Nulls never match.
    pub(crate) fn contains_lowercase(&self, needle_lower: &str) -> bool {
        match self.raw() {
            Some(raw) => raw.to_lowercase().contains(needle_lower),
            None => false,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Number { value, .. } => serializer.serialize_f64(*value),
            Value::Date { raw, .. } => serializer.serialize_str(raw),
        }
    }
}

/// Positional row, aligned with [`Table::columns`].
pub type Row = Vec<Value>;

/// Column-headered table. Every row has exactly one value per column.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Row>,
}

impl Table {
    /// Build a table, rejecting any row whose width differs from the header.
    pub fn new(columns: Vec<Column>, rows: Vec<Row>) -> Result<Self, ShapeError> {
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
            return Err(ShapeError {
                row: idx,
                expected: columns.len(),
                found: row.len(),
            });
        }
        Ok(Self { columns, rows })
    }

    pub fn empty(columns: Vec<Column>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Cell lookup by row index and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    pub fn numeric_column_count(&self) -> usize {
        self.columns.iter().filter(|c| c.kind.is_numeric()).count()
    }

    /// Non-null numeric values of a column, in row order.
    /// Empty when the column is missing or not numeric.
    pub fn numeric_values<'a>(&'a self, column: &str) -> impl Iterator<Item = f64> + 'a {
        let idx = self
            .column_index(column)
            .filter(|&i| self.columns[i].kind.is_numeric());
        self.rows
            .iter()
            .filter_map(move |r| idx.and_then(|i| r.get(i)).and_then(Value::as_f64))
    }

    /// The first `n` rows as a new table.
    pub fn head(&self, n: usize) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Rows at the given source indices, in the given order.
    pub(crate) fn select(&self, indices: &[usize]) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: indices.iter().filter_map(|&i| self.rows.get(i).cloned()).collect(),
        }
    }
}
