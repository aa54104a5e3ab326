// CSV/TSV import into typed tables

use std::path::Path;

use crate::error::LoadReason;
use crate::schema;
use crate::table::Table;

/// Read and parse one delimiter-separated file.
pub fn read_table(path: &Path) -> Result<Table, LoadReason> {
    let content = read_file_as_utf8(path)?;
    parse_table(&content)
}

/// Parse delimiter-separated text whose first record is the header.
/// A leading byte-order mark is dropped and the delimiter is sniffed.
pub fn parse_table(content: &str) -> Result<Table, LoadReason> {
    let content = content.trim_start_matches('\u{feff}');
    parse_table_with_delimiter(content, sniff_delimiter(content))
}

/// Delimiters tried, in tie-break order.
const DELIMITERS: [u8; 4] = [b',', b'\t', b';', b'|'];

const SNIFF_LINES: usize = 10;

/// Pick the delimiter under which the first lines agree on one record width.
///
/// Every candidate reads the sample with a real CSV reader, so a quoted field
/// holding another candidate does not count for it. A candidate that leaves
/// the header as a single field never wins; ties go to the comma.
pub(crate) fn sniff_delimiter(content: &str) -> u8 {
    let sample = content.lines().take(SNIFF_LINES).collect::<Vec<_>>().join("\n");
    DELIMITERS
        .iter()
        .map(|&d| (d, delimiter_score(&sample, d)))
        .fold((b',', 0), |best, candidate| if candidate.1 > best.1 { candidate } else { best })
        .0
}

/// Records matching the header's width, weighted by that width.
fn delimiter_score(sample: &str, delimiter: u8) -> usize {
    let widths: Vec<usize> = ::csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(sample.as_bytes())
        .records()
        .map_while(Result::ok)
        .map(|record| record.len())
        .collect();
    match widths.first() {
        Some(&width) if width > 1 => width * widths.iter().filter(|&&w| w == width).count(),
        _ => 0,
    }
}

/// Read file and convert to UTF-8 if needed (handles Windows-1252, Latin-1, etc.)
pub fn read_file_as_utf8(path: &Path) -> Result<String, LoadReason> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => LoadReason::Missing(path.to_path_buf()),
        _ => LoadReason::Io(format!("{}: {}", path.display(), e)),
    })?;

    match String::from_utf8(bytes) {
        Ok(s) => Ok(s),
        Err(e) => {
            let bytes = e.into_bytes();
            // Excel on Windows exports CP-1252
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            Ok(decoded.into_owned())
        }
    }
}

fn parse_table_with_delimiter(content: &str, delimiter: u8) -> Result<Table, LoadReason> {
    let mut reader = ::csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut records = reader.records();

    let header = match records.next() {
        Some(result) => result.map_err(malformed)?,
        None => return Err(LoadReason::Empty),
    };
    // Raw header text is kept for export; names are compared trimmed.
    let headers: Vec<String> = header.iter().map(str::to_string).collect();
    validate_headers(&headers)?;

    let width = headers.len();
    let mut raw_rows: Vec<Vec<String>> = Vec::new();

    for result in records {
        let record = result.map_err(malformed)?;
        if record.len() > width {
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            return Err(LoadReason::Malformed {
                line,
                message: format!("expected {} field(s), found {}", width, record.len()),
            });
        }
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        // Short rows are padded with nulls
        row.resize(width, String::new());
        raw_rows.push(row);
    }

    let (columns, rows) = schema::build_columns(headers, raw_rows);
    Table::new(columns, rows).map_err(|e| LoadReason::Malformed {
        line: e.row as u64 + 2,
        message: e.to_string(),
    })
}

fn validate_headers(headers: &[String]) -> Result<(), LoadReason> {
    let names: Vec<&str> = headers.iter().map(|h| h.trim()).collect();
    if names.iter().all(|n| n.is_empty()) {
        return Err(LoadReason::Empty);
    }
    for (idx, name) in names.iter().enumerate() {
        if name.is_empty() {
            return Err(LoadReason::Malformed {
                line: 1,
                message: format!("column {} has no name", idx + 1),
            });
        }
        if names[..idx].contains(name) {
            return Err(LoadReason::Malformed {
                line: 1,
                message: format!("duplicate column '{}'", name),
            });
        }
    }
    Ok(())
}

fn malformed(err: ::csv::Error) -> LoadReason {
    let line = err.position().map(|p| p.line()).unwrap_or(0);
    LoadReason::Malformed {
        line,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    use crate::table::{ColumnType, Value};

    #[test]
    fn test_sniff_semicolon_delimiter() {
        let content = "Name;Age;City\nAlice;30;Paris\nBob;25;London\n";
        assert_eq!(sniff_delimiter(content), b';');
    }

    #[test]
    fn test_sniff_comma_delimiter() {
        let content = "Name,Age,City\nAlice,30,Paris\nBob,25,London\n";
        assert_eq!(sniff_delimiter(content), b',');
    }

    #[test]
    fn test_sniff_tab_delimiter() {
        let content = "Name\tAge\tCity\nAlice\t30\tParis\nBob\t25\tLondon\n";
        assert_eq!(sniff_delimiter(content), b'\t');
    }

    #[test]
    fn test_sniff_semicolon_with_commas_in_values() {
        let content = "Name;Address;City\n\"Doe, Jane\";\"123 Main St, Apt 4\";Paris\nBob;\"456 Elm\";London\n";
        assert_eq!(sniff_delimiter(content), b';');
    }

    #[test]
    fn test_parse_menu_types() {
        let table = parse_table("Item_Name,Price,Menu_Category\nCheeseburger,9.50,Mains\nFries,3.0,Sides\n").unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.column("Item_Name").unwrap().kind, ColumnType::Text);
        assert_eq!(table.column("Price").unwrap().kind, ColumnType::Currency);
        assert_eq!(table.get(0, "Price").and_then(Value::as_f64), Some(9.5));
        assert_eq!(table.get(1, "Price").and_then(Value::raw), Some("3.0"));
    }

    #[test]
    fn test_short_rows_padded_with_nulls() {
        let table = parse_table("a,b,c\n1,2\n4,5,6\n").unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.get(0, "c"), Some(&Value::Null));
    }

    #[test]
    fn test_long_row_is_malformed() {
        let err = parse_table("a,b\n1,2\n3,4,5\n").unwrap_err();
        match err {
            LoadReason::Malformed { line, .. } => assert_eq!(line, 3),
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_content() {
        assert_eq!(parse_table("").unwrap_err(), LoadReason::Empty);
    }

    #[test]
    fn test_duplicate_header_rejected() {
        assert!(matches!(
            parse_table("a,a\n1,2\n").unwrap_err(),
            LoadReason::Malformed { line: 1, .. }
        ));
    }

    #[test]
    fn test_header_only_gives_empty_table() {
        let table = parse_table("Name,Rating\n").unwrap();
        assert_eq!(table.row_count(), 0);
        assert_eq!(table.column_count(), 2);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.csv");
        assert_eq!(read_table(&path).unwrap_err(), LoadReason::Missing(path));
    }

    #[test]
    fn test_windows_1252_fallback() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reviews.csv");
        // "Café" with 0xE9 (é in CP-1252), invalid as UTF-8
        fs::write(&path, b"Name,Note\nCaf\xe9,ok\n").unwrap();

        let table = read_table(&path).unwrap();
        assert_eq!(table.get(0, "Name").and_then(Value::raw), Some("Café"));
    }

    #[test]
    fn test_sniff_pipe_and_single_column() {
        assert_eq!(sniff_delimiter("a|b\n1|2\n"), b'|');
        assert_eq!(sniff_delimiter("Name\nAlice\n"), b',');
        assert_eq!(sniff_delimiter(""), b',');
    }

    #[test]
    fn test_sniff_quoted_newline_in_sample() {
        let content = "Item;Note\nSoup;\"hot, fresh\nand salty\"\nTea;plain\n";
        assert_eq!(sniff_delimiter(content), b';');
    }

    #[test]
    fn test_padded_header_names() {
        let table = parse_table(" Item , Price\nSoup,4.00\n").unwrap();
        assert_eq!(table.column("Price").unwrap().kind, ColumnType::Currency);
        assert_eq!(table.column("Item").unwrap().header(), " Item ");
        assert!(matches!(
            parse_table("a, a\n1,2\n").unwrap_err(),
            LoadReason::Malformed { line: 1, .. }
        ));
    }

    #[test]
    fn test_bom_stripped() {
        let table = parse_table("\u{feff}Name,Qty\nSalt,2\n").unwrap();
        assert!(table.column("Name").is_some());
    }
}
