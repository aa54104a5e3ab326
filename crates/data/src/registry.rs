//! Module registry: one load result per [`TableModule`].
//!
//! A [`Registry`] is built in one pass over all ten modules and is immutable
//! afterwards. Failures are stored next to successes, so one unreadable file
//! never hides the other nine tables. [`RegistryHandle`] owns the current
//! snapshot and replaces it wholesale on reload; readers holding an older
//! `Arc<Registry>` keep seeing a consistent set of tables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::csv::read_table;
use crate::error::{LoadError, LoadReason};
use crate::module::TableModule;
use crate::table::Table;

/// Where each module's backing file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSource {
    dir: PathBuf,
    overrides: BTreeMap<TableModule, PathBuf>,
}

impl DataSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            overrides: BTreeMap::new(),
        }
    }

    /// Use a different file for one module. Relative paths resolve against the data dir.
    pub fn with_override(mut self, module: TableModule, path: impl Into<PathBuf>) -> Self {
        self.overrides.insert(module, path.into());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, module: TableModule) -> PathBuf {
        match self.overrides.get(&module) {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => self.dir.join(p),
            None => self.dir.join(module.file_name()),
        }
    }

    /// Load a single module. Never panics on bad input; every failure is a [`LoadError`].
    pub fn load(&self, module: TableModule) -> Result<Table, LoadError> {
        let path = self.path_for(module);
        match read_table(&path) {
            Ok(table) => {
                log::info!(
                    "loaded {}: {} rows, {} columns",
                    module,
                    table.row_count(),
                    table.column_count()
                );
                Ok(table)
            }
            Err(reason) => {
                log::warn!("failed to load {} from {}: {}", module, path.display(), reason);
                Err(LoadError { module, reason })
            }
        }
    }

    /// Load all modules in parallel, one thread per module.
    pub fn load_all(&self) -> Registry {
        let results: Vec<(TableModule, Result<Table, LoadError>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = TableModule::ALL
                .into_iter()
                .map(|module| (module, scope.spawn(move || self.load(module))))
                .collect();

            handles
                .into_iter()
                .map(|(module, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        Err(LoadError {
                            module,
                            reason: LoadReason::Io("loader thread panicked".to_string()),
                        })
                    });
                    (module, result)
                })
                .collect()
        });

        Registry::from_results(results)
    }
}

/// Immutable snapshot of every module's load outcome.
#[derive(Debug, Clone)]
pub struct Registry {
    entries: BTreeMap<TableModule, Result<Arc<Table>, LoadError>>,
    loaded_at: SystemTime,
}

impl Registry {
    pub fn from_results(results: impl IntoIterator<Item = (TableModule, Result<Table, LoadError>)>) -> Self {
        let entries = results
            .into_iter()
            .map(|(module, result)| (module, result.map(Arc::new)))
            .collect();
        Self {
            entries,
            loaded_at: SystemTime::now(),
        }
    }

    /// Successful table for `module`, if it loaded.
    pub fn table(&self, module: TableModule) -> Option<&Arc<Table>> {
        self.entries.get(&module).and_then(|r| r.as_ref().ok())
    }

    pub fn get(&self, module: TableModule) -> Option<&Result<Arc<Table>, LoadError>> {
        self.entries.get(&module)
    }

    pub fn error(&self, module: TableModule) -> Option<&LoadError> {
        self.entries.get(&module).and_then(|r| r.as_ref().err())
    }

    pub fn tables(&self) -> impl Iterator<Item = (TableModule, &Arc<Table>)> {
        self.entries
            .iter()
            .filter_map(|(m, r)| r.as_ref().ok().map(|t| (*m, t)))
    }

    pub fn errors(&self) -> impl Iterator<Item = &LoadError> {
        self.entries.values().filter_map(|r| r.as_ref().err())
    }

    pub fn iter(&self) -> impl Iterator<Item = (TableModule, &Result<Arc<Table>, LoadError>)> {
        self.entries.iter().map(|(m, r)| (*m, r))
    }

    pub fn loaded_count(&self) -> usize {
        self.tables().count()
    }

    pub fn loaded_at(&self) -> SystemTime {
        self.loaded_at
    }
}

/// Shared owner of the current [`Registry`] snapshot.
#[derive(Debug)]
pub struct RegistryHandle {
    source: DataSource,
    current: RwLock<Arc<Registry>>,
}

impl RegistryHandle {
    /// Load every module and wrap the result.
    pub fn open(source: DataSource) -> Self {
        let registry = source.load_all();
        Self {
            source,
            current: RwLock::new(Arc::new(registry)),
        }
    }

    /// Wrap a registry that was loaded elsewhere. `reload` reads from `source`.
    pub fn with_snapshot(source: DataSource, registry: Registry) -> Self {
        Self {
            source,
            current: RwLock::new(Arc::new(registry)),
        }
    }

    pub fn source(&self) -> &DataSource {
        &self.source
    }

    /// The current snapshot. Cheap; holds no lock after returning.
    pub fn snapshot(&self) -> Arc<Registry> {
        self.current.read().clone()
    }

    /// Reload everything from disk and swap it in. The lock is only held for the swap.
    pub fn reload(&self) -> Arc<Registry> {
        let fresh = Arc::new(self.source.load_all());
        *self.current.write() = Arc::clone(&fresh);
        log::info!(
            "registry reloaded: {} of {} modules available",
            fresh.loaded_count(),
            TableModule::ALL.len()
        );
        fresh
    }
}
