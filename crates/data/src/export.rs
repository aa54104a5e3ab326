// CSV export for tables and search results

use std::io::Write;
use std::path::Path;

use crate::error::ExportError;
use crate::search::SearchResult;
use crate::table::{Column, Row, Table};

/// Anything with a header and positional rows.
pub trait Tabular {
    fn columns(&self) -> &[Column];
    fn rows(&self) -> &[Row];
}

impl Tabular for Table {
    fn columns(&self) -> &[Column] {
        Table::columns(self)
    }

    fn rows(&self) -> &[Row] {
        Table::rows(self)
    }
}

impl Tabular for SearchResult {
    fn columns(&self) -> &[Column] {
        SearchResult::columns(self)
    }

    fn rows(&self) -> &[Row] {
        SearchResult::rows(self)
    }
}

/// Write `data` as comma-separated CSV with `\n` line endings.
///
/// The header is always written, even with zero rows. Cells are written from
/// their source text; null becomes an empty field.
pub fn write_csv<T: Tabular + ?Sized, W: Write>(data: &T, out: W) -> Result<(), ExportError> {
    let mut writer = ::csv::WriterBuilder::new()
        .terminator(::csv::Terminator::Any(b'\n'))
        .from_writer(out);

    writer.write_record(data.columns().iter().map(Column::header))?;
    for row in data.rows() {
        writer.write_record(row.iter().map(|v| v.raw().unwrap_or("")))?;
    }
    writer.flush()?;
    Ok(())
}

/// Serialize to an in-memory CSV byte stream.
pub fn export<T: Tabular + ?Sized>(data: &T) -> Result<Vec<u8>, ExportError> {
    let mut buf = Vec::new();
    write_csv(data, &mut buf)?;
    Ok(buf)
}

/// Write CSV to `path`, creating or truncating it.
pub fn export_to_path<T: Tabular + ?Sized>(data: &T, path: &Path) -> Result<(), ExportError> {
    let file = std::fs::File::create(path)?;
    write_csv(data, std::io::BufWriter::new(file))?;
    log::debug!("exported {} rows to {}", data.rows().len(), path.display());
    Ok(())
}
