// Case-insensitive substring search across every column of a table.

use serde::Serialize;

use crate::table::{Column, Row, Table};

/// Which columns of a source row matched the query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowMatch {
    /// Index of the row in the searched table.
    pub source_row: usize,
    /// Indices of matching columns, ascending. Empty for an empty query.
    pub columns: Vec<usize>,
}

/// Filtered view of a table: same columns, matching rows in source order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub query: String,
    table: Table,
    matches: Vec<RowMatch>,
}

impl SearchResult {
    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn columns(&self) -> &[Column] {
        self.table.columns()
    }

    pub fn rows(&self) -> &[Row] {
        self.table.rows()
    }

    /// One entry per result row, aligned with [`SearchResult::rows`].
    pub fn matches(&self) -> &[RowMatch] {
        &self.matches
    }

    pub fn len(&self) -> usize {
        self.table.row_count()
    }

    pub fn is_empty(&self) -> bool {
        self.table.row_count() == 0
    }

    /// Names of the matching columns for result row `idx`.
    pub fn matched_column_names(&self, idx: usize) -> Vec<&str> {
        self.matches
            .get(idx)
            .map(|m| {
                m.columns
                    .iter()
                    .filter_map(|&c| self.table.columns().get(c).map(|col| col.name.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn into_table(self) -> Table {
        self.table
    }
}

/// Filter `table` to the rows where any cell contains `query`, ignoring case.
///
/// Only the exact empty string is an empty query; it returns every row.
/// Whitespace is significant. Null cells never match.
pub fn search(table: &Table, query: &str) -> SearchResult {
    if query.is_empty() {
        return SearchResult {
            query: String::new(),
            table: table.clone(),
            matches: (0..table.row_count())
                .map(|source_row| RowMatch { source_row, columns: Vec::new() })
                .collect(),
        };
    }

    let needle = query.to_lowercase();
    let matches: Vec<RowMatch> = table
        .rows()
        .iter()
        .enumerate()
        .filter_map(|(source_row, row)| {
            let columns: Vec<usize> = row
                .iter()
                .enumerate()
                .filter(|(_, v)| v.contains_lowercase(&needle))
                .map(|(c, _)| c)
                .collect();
            (!columns.is_empty()).then_some(RowMatch { source_row, columns })
        })
        .collect();

    let indices: Vec<usize> = matches.iter().map(|m| m.source_row).collect();
    SearchResult {
        query: query.to_string(),
        table: table.select(&indices),
        matches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{ColumnType, Value};

    fn menu() -> Table {
        Table::new(
            vec![
                Column::new("name", ColumnType::Text),
                Column::new("price", ColumnType::Currency),
                Column::new("notes", ColumnType::Text),
            ],
            vec![
                vec![
                    Value::Text("Cheeseburger".into()),
                    Value::Number { value: 9.5, raw: "9.5".into() },
                    Value::Null,
                ],
                vec![
                    Value::Text("Fries".into()),
                    Value::Number { value: 3.0, raw: "3.0".into() },
                    Value::Text("goes with a burger".into()),
                ],
                vec![
                    Value::Text("Salad".into()),
                    Value::Number { value: 7.0, raw: "7".into() },
                    Value::Null,
                ],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_matches_any_column_in_source_order() {
        let result = search(&menu(), "BURGER");
        assert_eq!(result.len(), 2);
        assert_eq!(result.matches()[0], RowMatch { source_row: 0, columns: vec![0] });
        assert_eq!(result.matches()[1], RowMatch { source_row: 1, columns: vec![2] });
        assert_eq!(result.matched_column_names(1), vec!["notes"]);
    }

    #[test]
    fn test_numbers_match_on_raw_text() {
        let result = search(&menu(), "3.0");
        assert_eq!(result.len(), 1);
        assert_eq!(result.matched_column_names(0), vec!["price"]);
    }

    #[test]
    fn test_empty_query_is_identity() {
        let table = menu();
        let result = search(&table, "");
        assert_eq!(result.table(), &table);
        assert!(result.matches().iter().all(|m| m.columns.is_empty()));
    }

    #[test]
    fn test_whitespace_query_is_not_empty() {
        assert_eq!(search(&menu(), " ").len(), 1);
        assert!(search(&menu(), "   ").is_empty());
    }

    #[test]
    fn test_no_match() {
        let result = search(&menu(), "pizza");
        assert!(result.is_empty());
        assert_eq!(result.columns().len(), 3);
    }
}
