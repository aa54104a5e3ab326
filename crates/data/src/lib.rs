//! Data access for the restaurant operations datasets.
//!
//! Loads the ten fixed modules from delimiter-separated files into
//! [`Table`]s, keeps them in an atomically swappable [`Registry`], and
//! provides the stateless search and export operations the browsing UI and
//! the analysis session build on.
//!
//! No GUI concepts. No persistence. Tables are read-only once loaded.

pub mod csv;
pub mod error;
pub mod export;
pub mod module;
pub mod registry;
pub mod schema;
pub mod search;
pub mod summary;
pub mod table;

pub use error::{ExportError, LoadError, LoadReason, ShapeError};
pub use export::{export, export_to_path, write_csv, Tabular};
pub use module::{ParseModuleError, TableModule};
pub use registry::{DataSource, Registry, RegistryHandle};
pub use search::{search, RowMatch, SearchResult};
pub use summary::{
    dashboard_metrics, module_overview, DashboardMetrics, FinancialSummary, ModuleOverview, TableStats,
};
pub use table::{Column, ColumnType, Row, Table, Value};
