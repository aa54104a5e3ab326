//! Schema discovery: infer a [`ColumnType`] per column from raw text and
//! coerce cells accordingly.
//!
//! A column is typed only when *every* non-empty cell agrees. Anything
//! ambiguous (numbers mixed with words, half-parsable dates) falls back to
//! [`ColumnType::Text`] with the cells kept verbatim, so a messy column never
//! fails the load.

use chrono::NaiveDate;

use crate::table::{Column, ColumnType, Row, Value};

/// Name fragments that mark a numeric column as money.
const CURRENCY_KEYWORDS: &[&str] = &["price", "cost", "total", "subtotal", "tax", "tip", "value", "sales"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

pub(crate) fn parse_number(raw: &str) -> Option<f64> {
    let s = raw.trim();
    let first = s.chars().next()?;
    // Rejects "inf", "NaN" and friends, which f64::from_str accepts.
    if !(first.is_ascii_digit() || matches!(first, '-' | '+' | '.')) {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

fn is_currency_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    CURRENCY_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Infer the type of one column from its non-empty raw cells.
pub fn infer_column_type<'a>(name: &str, cells: impl Iterator<Item = &'a str>) -> ColumnType {
    let all: Vec<&str> = cells.filter(|c| !c.is_empty()).collect();
    if all.is_empty() {
        return ColumnType::Text;
    }

    if all.iter().all(|c| parse_number(c).is_some()) {
        if is_currency_name(name) {
            ColumnType::Currency
        } else {
            ColumnType::Numeric
        }
    } else if all.iter().all(|c| parse_date(c).is_some()) {
        ColumnType::Date
    } else {
        ColumnType::Text
    }
}

/// Convert one raw cell to a typed value. Empty text is null.
pub(crate) fn coerce(raw: String, kind: ColumnType) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    match kind {
        ColumnType::Numeric | ColumnType::Currency => match parse_number(&raw) {
            Some(value) => Value::Number { value, raw },
            None => Value::Text(raw),
        },
        ColumnType::Date => match parse_date(&raw) {
            Some(value) => Value::Date { value, raw },
            None => Value::Text(raw),
        },
        ColumnType::Text => Value::Text(raw),
    }
}

/// Infer every column and coerce the raw grid into typed rows.
/// `headers` is the raw header text; `raw_rows` must already be padded to
/// its width.
pub(crate) fn build_columns(headers: Vec<String>, raw_rows: Vec<Vec<String>>) -> (Vec<Column>, Vec<Row>) {
    let columns: Vec<Column> = headers
        .into_iter()
        .enumerate()
        .map(|(idx, header)| {
            let name = header.trim().to_string();
            let kind = infer_column_type(&name, raw_rows.iter().map(|r| r[idx].as_str()));
            if kind == ColumnType::Text {
                let mixed = raw_rows.iter().any(|r| parse_number(&r[idx]).is_some());
                if mixed {
                    log::debug!("column '{}' has mixed values, keeping as text", name);
                }
            }
            let column = Column::new(name, kind);
            if column.name == header {
                column
            } else {
                column.with_header(header)
            }
        })
        .collect();

    let rows = raw_rows
        .into_iter()
        .map(|raw| {
            raw.into_iter()
                .zip(columns.iter())
                .map(|(cell, col)| coerce(cell, col.kind))
                .collect()
        })
        .collect();

    (columns, rows)
}
