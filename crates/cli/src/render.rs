// Plain-text rendering of tables and reports for the terminal.

use std::io::{self, Write};

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use restops_data::{Table, Tabular, Value};

/// Cells wider than this are truncated with an ellipsis.
const MAX_CELL_WIDTH: usize = 32;

fn cell_text(value: &Value) -> &str {
    value.raw().unwrap_or("")
}

fn truncate(s: &str, max: usize) -> String {
    if s.width() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for c in s.chars() {
        let w = c.width().unwrap_or(0);
        if used + w + 1 > max {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push('…');
    out
}

fn pad(s: &str, width: usize) -> String {
    let fill = width.saturating_sub(s.width());
    format!("{}{}", s, " ".repeat(fill))
}

/// Write `data` as an aligned text grid: header, rule, then rows.
pub fn write_grid<T: Tabular + ?Sized, W: Write>(data: &T, limit: Option<usize>, out: &mut W) -> io::Result<()> {
    let headers: Vec<String> = data
        .columns()
        .iter()
        .map(|c| truncate(&c.name, MAX_CELL_WIDTH))
        .collect();
    let shown = limit.unwrap_or(usize::MAX).min(data.rows().len());
    let rows: Vec<Vec<String>> = data.rows()[..shown]
        .iter()
        .map(|row| row.iter().map(|v| truncate(cell_text(v), MAX_CELL_WIDTH)).collect())
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.width()).collect();
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.width());
        }
    }

    let line = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| pad(c, *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    writeln!(out, "{}", line(&headers))?;
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    writeln!(out, "{}", line(&rule))?;
    for row in &rows {
        writeln!(out, "{}", line(row))?;
    }
    if shown < data.rows().len() {
        writeln!(out, "... {} more row(s)", data.rows().len() - shown)?;
    }
    Ok(())
}

/// `1234.5` -> `"1,234.50"`.
pub fn money(amount: f64) -> String {
    let cents = (amount * 100.0).round() as i64;
    let (sign, cents) = if cents < 0 { ("-", -cents) } else { ("", cents) };
    let whole = (cents / 100).to_string();
    let mut grouped = String::new();
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{}{}.{:02}", sign, grouped, cents % 100)
}

/// Short summary line for a loaded table.
pub fn stats_line(table: &Table) -> String {
    format!(
        "{} records, {} columns ({} numeric)",
        table.row_count(),
        table.column_count(),
        table.numeric_column_count()
    )
}
