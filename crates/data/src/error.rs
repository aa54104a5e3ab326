use std::fmt;
use std::path::PathBuf;

use crate::module::TableModule;

/// Why one module could not be loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadReason {
    /// Backing file does not exist.
    Missing(PathBuf),
    /// File exists but could not be read.
    Io(String),
    /// No header row.
    Empty,
    /// Structurally invalid content (ragged row, bad header, CSV syntax).
    Malformed { line: u64, message: String },
}

impl fmt::Display for LoadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(path) => write!(f, "file not found: {}", path.display()),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
            Self::Empty => write!(f, "no header row"),
            Self::Malformed { line, message } => write!(f, "line {line}: {message}"),
        }
    }
}

/// A module-level load failure. Never affects other modules.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadError {
    pub module: TableModule,
    pub reason: LoadReason,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot load {}: {}", self.module.display_name(), self.reason)
    }
}

impl std::error::Error for LoadError {}

#[derive(Debug)]
pub enum ExportError {
    Csv(String),
    Io(std::io::Error),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csv(msg) => write!(f, "CSV write error: {msg}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ExportError {}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for ExportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err.to_string())
    }
}

/// Row width does not match the column count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeError {
    pub row: usize,
    pub expected: usize,
    pub found: usize,
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row {} has {} field(s), expected {}",
            self.row, self.found, self.expected
        )
    }
}

impl std::error::Error for ShapeError {}
