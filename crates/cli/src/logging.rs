// Logger setup for the restops binary.
//
// Libraries log through the `log` facade; only this module decides where the
// records go. RUST_LOG always wins over the default filter.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use env_logger::{Builder, Env, Target};

/// Daily log file name, e.g. `restaurant_app_20240131.log`.
pub fn log_file_name(day: NaiveDate) -> String {
    format!("restaurant_app_{}.log", day.format("%Y%m%d"))
}

/// Install the global logger. With `log_dir`, records are appended to today's
/// file in that directory instead of stderr.
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Result<Option<PathBuf>, String> {
    let default_filter = if verbose { "debug" } else { "info" };
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_filter));

    let path = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;
            let path = dir.join(log_file_name(Local::now().date_naive()));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
            builder.target(Target::Pipe(Box::new(file)));
            Some(path)
        }
        None => None,
    };

    builder.try_init().map_err(|e| e.to_string())?;
    Ok(path)
}
