// restops CLI - browse, export and analyze the restaurant operations datasets

mod exit_codes;
mod logging;
mod render;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use restops_config::credentials::{self, CredentialChain, CredentialError};
use restops_config::{Settings, SettingsError};
use restops_data::{
    dashboard_metrics, export_to_path, module_overview, search, write_csv, DataSource, ExportError,
    LoadError, RegistryHandle, TableModule, Tabular,
};
use restops_gateway::{AnalysisGateway, ArtifactKind, CancelToken, OpenAiBackend, RetryPolicy, SessionId};
use restops_session::{SessionController, SessionError};

use exit_codes::{
    session_exit_code, EXIT_CONFIG_KEYCHAIN_ERR, EXIT_CONFIG_MISSING_KEY, EXIT_DATA_EXPORT,
    EXIT_DATA_LOAD, EXIT_ERROR, EXIT_SESSION_CREATE, EXIT_SESSION_NOT_READY, EXIT_SUCCESS,
    EXIT_USAGE,
};

/// Rows shown by `show` when --limit is not given.
const DEFAULT_SHOW_LIMIT: usize = 20;

#[derive(Parser)]
#[command(name = "restops")]
#[command(about = "Browse, search, export and analyze restaurant operations data")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Directory holding the module CSV files (overrides settings)
    #[arg(long, global = true, env = "RESTOPS_DATA_DIR", value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Settings file (default: <config dir>/restops/settings.json)
    #[arg(long, global = true, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Analysis backend API key (overrides environment and keychain)
    #[arg(long, global = true, env = "RESTOPS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Write logs to a daily restaurant_app_YYYYMMDD.log in this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Debug-level logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every module and report record/column counts or the load error
    Tables {
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },

    /// Print a module's rows, optionally filtered by a search term
    #[command(after_help = "\
Examples:
  restops show menu
  restops show pos_sales --search burger --limit 50
  restops show \"Finance & Accounting\"")]
    Show {
        /// Module name, e.g. menu, pos_sales, \"HR & Staff\"
        module: TableModule,

        /// Case-insensitive substring to match in any column
        #[arg(long, short = 's')]
        search: Option<String>,

        /// Maximum rows to print
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },

    /// Write a module (or the rows matching a search) as CSV
    #[command(after_help = "\
Examples:
  restops export menu > menu.csv
  restops export reviews --search cold --out ./downloads/")]
    Export {
        module: TableModule,

        #[arg(long, short = 's')]
        search: Option<String>,

        /// Output file, or a directory to write <module>.csv into (default: stdout)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Dashboard metrics and a short preview of every module
    Summary {
        #[arg(long)]
        json: bool,
    },

    /// Upload modules to the analysis backend and ask questions about them
    #[command(after_help = "\
Examples:
  restops ask --module menu --module pos_sales --query \"Which item sells best?\"
  echo \"What is the average ticket?\" | restops ask --module pos_sales
  restops ask --deadline-secs 120 < questions.txt")]
    Ask {
        /// Modules to upload (repeatable; default: every loaded module)
        #[arg(long, short = 'm')]
        module: Vec<TableModule>,

        /// Question to ask (repeatable; default: one question per stdin line)
        #[arg(long, short = 'q')]
        query: Vec<String>,

        /// Cancel any single question still unanswered after this many seconds
        #[arg(long, value_name = "SECS")]
        deadline_secs: Option<u64>,
    },

    /// Check data files and credential configuration
    Doctor {
        #[arg(long)]
        json: bool,
    },

    /// Manage the API key stored in the system keychain
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Store the API key read from stdin
    Set,
    /// Remove the stored API key
    Delete,
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\ntarget:  ", env!("TARGET"),
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose, cli.log_dir.as_deref()) {
        eprintln!("warning: logging disabled: {}", e);
    }

    let result = load_settings(&cli).and_then(|settings| match cli.command {
        Commands::Tables { json } => cmd_tables(&settings, json),
        Commands::Show { module, search, limit } => cmd_show(&settings, module, search, limit),
        Commands::Export { module, search, out } => cmd_export(&settings, module, search, out),
        Commands::Summary { json } => cmd_summary(&settings, json),
        Commands::Ask { module, query, deadline_secs } => cmd_ask(&settings, module, query, deadline_secs),
        Commands::Doctor { json } => cmd_doctor(&settings, json),
        Commands::Key { command } => cmd_key(&settings, command),
    });

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    pub fn load(err: LoadError) -> Self {
        Self {
            code: EXIT_DATA_LOAD,
            message: err.to_string(),
            hint: Some("run `restops doctor` to check the data directory".to_string()),
        }
    }

    pub fn export(err: ExportError) -> Self {
        Self { code: EXIT_DATA_EXPORT, message: err.to_string(), hint: None }
    }

    pub fn settings(err: SettingsError) -> Self {
        Self { code: EXIT_CONFIG_KEYCHAIN_ERR, message: err.to_string(), hint: None }
    }

    pub fn credential(err: CredentialError) -> Self {
        match err {
            CredentialError::Missing { .. } => Self {
                code: EXIT_CONFIG_MISSING_KEY,
                message: err.to_string(),
                hint: Some("pass --api-key, set OPENAI_API_KEY, or run `restops key set`".to_string()),
            },
            CredentialError::Keychain(_) => Self {
                code: EXIT_CONFIG_KEYCHAIN_ERR,
                message: err.to_string(),
                hint: None,
            },
        }
    }

    /// Create error from session error with proper exit code.
    pub fn session(err: SessionError) -> Self {
        if let SessionError::Configuration(e) = err {
            return Self::credential(e);
        }
        let code = session_exit_code(&err);
        let hint = match &err {
            SessionError::Transient(_) => Some("the backend is busy; try again shortly".to_string()),
            SessionError::Cancelled => Some("raise --deadline-secs to wait longer".to_string()),
            SessionError::FatalSession { .. } | SessionError::UploadAborted { .. } => {
                Some("the session expired; run the command again for a new one".to_string())
            }
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

// ============================================================================
// Settings and data source
// ============================================================================

fn load_settings(cli: &Cli) -> Result<Settings, CliError> {
    let mut settings = match &cli.settings {
        Some(path) => Settings::load_from(path).map_err(CliError::settings)?,
        None => Settings::load(),
    };
    if let Some(dir) = &cli.data_dir {
        settings.data.dir = dir.clone();
    }
    if let Some(key) = &cli.api_key {
        settings.backend.api_key = Some(key.clone());
    }
    Ok(settings)
}

fn data_source(settings: &Settings) -> Result<DataSource, CliError> {
    let mut source = DataSource::new(&settings.data.dir);
    for (name, path) in &settings.data.files {
        let module: TableModule = name.parse().map_err(|e| {
            CliError::usage(format!("settings data.files: {}", e))
                .with_hint("keys are module names such as menu, pos_sales, finance")
        })?;
        source = source.with_override(module, path);
    }
    Ok(source)
}

fn stdout_error(e: io::Error) -> CliError {
    CliError::io(format!("cannot write output: {}", e))
}

// ============================================================================
// tables
// ============================================================================

fn cmd_tables(settings: &Settings, json: bool) -> Result<(), CliError> {
    let registry = data_source(settings)?.load_all();

    if json {
        let entries: Vec<serde_json::Value> = registry
            .iter()
            .map(|(module, entry)| match entry {
                Ok(table) => serde_json::json!({
                    "module": module.slug(),
                    "name": module.display_name(),
                    "records": table.row_count(),
                    "columns": table.column_count(),
                    "numeric_columns": table.numeric_column_count(),
                }),
                Err(e) => serde_json::json!({
                    "module": module.slug(),
                    "name": module.display_name(),
                    "error": e.reason.to_string(),
                }),
            })
            .collect();
        let text = serde_json::to_string_pretty(&entries).map_err(|e| CliError::io(e.to_string()))?;
        println!("{}", text);
        return Ok(());
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (module, entry) in registry.iter() {
        let line = match entry {
            Ok(table) => render::stats_line(table),
            Err(e) => format!("unavailable: {}", e.reason),
        };
        writeln!(out, "{:<24} {}", module.display_name(), line).map_err(stdout_error)?;
    }
    writeln!(
        out,
        "\n{} of {} modules loaded from {}",
        registry.loaded_count(),
        TableModule::ALL.len(),
        settings.data.dir.display()
    )
    .map_err(stdout_error)?;
    Ok(())
}

// ============================================================================
// show / export
// ============================================================================

fn cmd_show(
    settings: &Settings,
    module: TableModule,
    query: Option<String>,
    limit: Option<usize>,
) -> Result<(), CliError> {
    let table = data_source(settings)?.load(module).map_err(CliError::load)?;
    let limit = Some(limit.unwrap_or(DEFAULT_SHOW_LIMIT));

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{} - {}\n", module.display_name(), render::stats_line(&table)).map_err(stdout_error)?;

    match query {
        Some(q) => {
            let result = search(&table, &q);
            writeln!(out, "{} row(s) match \"{}\"\n", result.len(), q).map_err(stdout_error)?;
            render::write_grid(&result, limit, &mut out).map_err(stdout_error)?;
        }
        None => render::write_grid(&table, limit, &mut out).map_err(stdout_error)?,
    }
    Ok(())
}

fn cmd_export(
    settings: &Settings,
    module: TableModule,
    query: Option<String>,
    out: Option<PathBuf>,
) -> Result<(), CliError> {
    let table = data_source(settings)?.load(module).map_err(CliError::load)?;
    let result = query.map(|q| search(&table, &q));
    let data: &dyn Tabular = match &result {
        Some(r) => r,
        None => &table,
    };

    match out {
        Some(path) => {
            let path = if path.is_dir() {
                path.join(format!("{}.csv", module.download_stem()))
            } else {
                path
            };
            export_to_path(data, &path).map_err(CliError::export)?;
            eprintln!("wrote {} row(s) to {}", data.rows().len(), path.display());
        }
        None => {
            let stdout = io::stdout();
            write_csv(data, stdout.lock()).map_err(CliError::export)?;
        }
    }
    Ok(())
}

// ============================================================================
// summary
// ============================================================================

fn cmd_summary(settings: &Settings, json: bool) -> Result<(), CliError> {
    let registry = data_source(settings)?.load_all();
    let metrics = dashboard_metrics(&registry);

    if json {
        let modules: Vec<serde_json::Value> = TableModule::ALL
            .into_iter()
            .filter_map(|m| module_overview(&registry, m))
            .map(|overview| match overview {
                Ok(o) => serde_json::json!({
                    "module": o.module.slug(),
                    "stats": o.stats,
                    "preview": o.preview,
                }),
                Err(e) => serde_json::json!({
                    "module": e.module.slug(),
                    "error": e.reason.to_string(),
                }),
            })
            .collect();
        let doc = serde_json::json!({ "metrics": metrics, "modules": modules });
        let text = serde_json::to_string_pretty(&doc).map_err(|e| CliError::io(e.to_string()))?;
        println!("{}", text);
        return Ok(());
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let na = || "n/a".to_string();
    writeln!(out, "Dashboard").map_err(stdout_error)?;
    writeln!(out, "---------").map_err(stdout_error)?;
    writeln!(out, "total orders:    {}", metrics.total_orders.map(|n| n.to_string()).unwrap_or_else(na))
        .map_err(stdout_error)?;
    writeln!(out, "total sales:     {}", metrics.total_sales.map(render::money).unwrap_or_else(na))
        .map_err(stdout_error)?;
    writeln!(out, "average ticket:  {}", metrics.average_ticket.map(render::money).unwrap_or_else(na))
        .map_err(stdout_error)?;
    writeln!(out, "total COGS:      {}", metrics.total_cogs.map(render::money).unwrap_or_else(na))
        .map_err(stdout_error)?;
    if let Some(f) = &metrics.financials {
        let pct = |v: Option<f64>| v.map(|p| format!("{:.1}%", p)).unwrap_or_else(na);
        writeln!(out, "gross sales:     {}", render::money(f.gross_sales)).map_err(stdout_error)?;
        writeln!(out, "labor cost:      {}", render::money(f.labor_cost)).map_err(stdout_error)?;
        writeln!(out, "net profit:      {}", render::money(f.net_profit)).map_err(stdout_error)?;
        writeln!(out, "food cost %:     {}", pct(f.food_cost_pct)).map_err(stdout_error)?;
        writeln!(out, "labor cost %:    {}", pct(f.labor_cost_pct)).map_err(stdout_error)?;
        writeln!(out, "profit margin:   {}", pct(f.profit_margin_pct)).map_err(stdout_error)?;
    }

    for module in TableModule::ALL {
        writeln!(out, "\n== {} ==", module.display_name()).map_err(stdout_error)?;
        match module_overview(&registry, module) {
            Some(Ok(o)) => {
                writeln!(
                    out,
                    "{} records, {} columns ({} numeric)",
                    o.stats.records, o.stats.columns, o.stats.numeric_columns
                )
                .map_err(stdout_error)?;
                render::write_grid(&o.preview, None, &mut out).map_err(stdout_error)?;
            }
            Some(Err(e)) => writeln!(out, "unavailable: {}", e.reason).map_err(stdout_error)?,
            None => {}
        }
    }
    Ok(())
}

// ============================================================================
// ask
// ============================================================================

fn read_questions(given: Vec<String>) -> Result<Vec<String>, CliError> {
    if !given.is_empty() {
        return Ok(given);
    }
    let stdin = io::stdin();
    let mut questions = Vec::new();
    for line in stdin.lock().lines() {
        let line = line.map_err(|e| CliError::io(format!("cannot read stdin: {}", e)))?;
        if !line.trim().is_empty() {
            questions.push(line);
        }
    }
    Ok(questions)
}

fn cmd_ask(
    settings: &Settings,
    modules: Vec<TableModule>,
    queries: Vec<String>,
    deadline_secs: Option<u64>,
) -> Result<(), CliError> {
    let questions = read_questions(queries)?;
    if questions.is_empty() {
        return Err(CliError::usage("no questions given")
            .with_hint("pass --query or pipe one question per line on stdin"));
    }

    let registry = Arc::new(RegistryHandle::open(data_source(settings)?));
    let snapshot = registry.snapshot();
    let modules: Vec<TableModule> = if modules.is_empty() {
        snapshot.tables().map(|(m, _)| m).collect()
    } else {
        modules
    };

    let backend = OpenAiBackend::new(&settings.backend).map_err(|e| CliError {
        code: EXIT_SESSION_CREATE,
        message: format!("cannot initialize analysis backend: {}", e),
        hint: None,
    })?;
    let gateway = AnalysisGateway::new(
        backend,
        CredentialChain::from_settings(&settings.backend),
        RetryPolicy::from_settings(&settings.retry),
    );
    let mut controller = SessionController::new(gateway, registry, settings.session.clone());

    let id = controller.create().map_err(CliError::session)?;
    let result = ask_in_session(&mut controller, &id, &modules, &questions, deadline_secs);
    if let Err(e) = controller.close(&id) {
        log::warn!("closing session {}: {}", id, e);
    }
    result
}

fn ask_in_session(
    controller: &mut SessionController<OpenAiBackend>,
    id: &SessionId,
    modules: &[TableModule],
    questions: &[String],
    deadline_secs: Option<u64>,
) -> Result<(), CliError> {
    let report = match controller.upload(id, modules) {
        Ok(report) => report,
        Err(err) => {
            if let SessionError::UploadAborted { partial, .. } = &err {
                for failure in &partial.failed {
                    eprintln!("warning: {}", failure);
                }
            }
            return Err(CliError::session(err));
        }
    };
    for failure in &report.failed {
        eprintln!("warning: {}", failure);
    }
    if report.uploaded.is_empty() {
        return Err(CliError {
            code: EXIT_SESSION_NOT_READY,
            message: "no module could be uploaded".to_string(),
            hint: Some("run `restops tables` to see which modules loaded".to_string()),
        });
    }
    let names: Vec<&str> = report.uploaded.iter().map(|m| m.display_name()).collect();
    eprintln!("uploaded: {}", names.join(", "));

    let stdout = io::stdout();
    let mut last_error = None;
    for question in questions {
        let cancel = match deadline_secs {
            Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
            None => CancelToken::new(),
        };

        match controller.query(id, question, &cancel) {
            Ok(exchange) => {
                let mut out = stdout.lock();
                writeln!(out, "Q: {}", exchange.query).map_err(stdout_error)?;
                writeln!(out, "{}", exchange.response.text).map_err(stdout_error)?;
                for artifact in &exchange.response.artifacts {
                    let kind = match artifact.kind {
                        ArtifactKind::Image => "image",
                        ArtifactKind::File => "file",
                    };
                    let name = artifact.name.as_deref().unwrap_or("");
                    writeln!(out, "  [{} {}] {}", kind, artifact.file_id, name).map_err(stdout_error)?;
                }
                if !exchange.response.success {
                    writeln!(out, "  (analysis did not complete)").map_err(stdout_error)?;
                }
                writeln!(out).map_err(stdout_error)?;
            }
            Err(err @ SessionError::FatalSession { .. }) => return Err(CliError::session(err)),
            Err(err) => {
                eprintln!("error: {}: {}", question.trim(), err);
                last_error = Some(err);
            }
        }
    }

    match last_error {
        Some(err) => Err(CliError::session(err)),
        None => Ok(()),
    }
}

// ============================================================================
// doctor
// ============================================================================

fn cmd_doctor(settings: &Settings, json: bool) -> Result<(), CliError> {
    let source = data_source(settings)?;
    let files: Vec<(TableModule, PathBuf, bool)> = TableModule::ALL
        .into_iter()
        .map(|m| {
            let path = source.path_for(m);
            let present = path.is_file();
            (m, path, present)
        })
        .collect();

    let chain = CredentialChain::from_settings(&settings.backend);
    let resolved = chain.resolve();
    let keychain = credentials::keychain_available();

    if json {
        let doc = serde_json::json!({
            "schema_version": 1,
            "data_dir": settings.data.dir,
            "files": files.iter().map(|(m, path, present)| serde_json::json!({
                "module": m.slug(),
                "path": path,
                "present": present,
            })).collect::<Vec<_>>(),
            "key": if resolved.is_ok() { "present" } else { "missing" },
            "key_source": resolved.as_ref().ok().map(|k| k.source.as_str()),
            "key_lookup_order": chain.describe(),
            "keychain": if keychain { "ok" } else { "unavailable" },
            "api_base": settings.backend.api_base,
            "model": settings.backend.model,
        });
        let text = serde_json::to_string_pretty(&doc).map_err(|e| CliError::io(e.to_string()))?;
        println!("{}", text);
    } else {
        println!("restops doctor");
        println!("--------------");
        println!("data_dir:   {}", settings.data.dir.display());
        for (module, path, present) in &files {
            let state = if *present { "ok" } else { "missing" };
            println!("  {:<24} {:<8} {}", module.display_name(), state, path.display());
        }
        println!("api_base:   {}", settings.backend.api_base);
        println!("model:      {}", settings.backend.model);
        println!("key_lookup: {}", chain.describe().join(" -> "));
        match &resolved {
            Ok(key) => println!("key:        present ({})", key.source.as_str()),
            Err(e) => println!("key:        missing ({})", e),
        }
        println!("keychain:   {}", if keychain { "ok" } else { "unavailable" });
    }

    resolved.map(|_| ()).map_err(CliError::credential)
}

// ============================================================================
// key
// ============================================================================

fn cmd_key(settings: &Settings, command: KeyCommands) -> Result<(), CliError> {
    let service = &settings.backend.keychain_service;
    let account = &settings.backend.keychain_account;
    let keychain_err = |msg: String| CliError { code: EXIT_CONFIG_KEYCHAIN_ERR, message: msg, hint: None };

    match command {
        KeyCommands::Set => {
            let mut key = String::new();
            io::stdin()
                .lock()
                .read_line(&mut key)
                .map_err(|e| CliError::io(format!("cannot read stdin: {}", e)))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(CliError::usage("no key on stdin"));
            }
            credentials::set_api_key(service, account, key).map_err(keychain_err)?;
            eprintln!("stored API key in keychain {}/{}", service, account);
        }
        KeyCommands::Delete => {
            credentials::delete_api_key(service, account).map_err(keychain_err)?;
            eprintln!("removed API key from keychain {}/{}", service, account);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_cli_parses_global_flags_after_command() {
        let cli = Cli::try_parse_from([
            "restops", "show", "pos_sales", "--search", "burger", "--data-dir", "/tmp/db", "-v",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/db")));
        assert!(cli.verbose);
        match cli.command {
            Commands::Show { module, search, limit } => {
                assert_eq!(module, TableModule::PosSales);
                assert_eq!(search.as_deref(), Some("burger"));
                assert_eq!(limit, None);
            }
            _ => panic!("expected show"),
        }
    }

    #[test]
    fn test_unknown_module_is_usage_error() {
        let err = Cli::try_parse_from(["restops", "show", "payroll"]).err().unwrap();
        assert_eq!(err.exit_code(), i32::from(EXIT_USAGE));
    }

    #[test]
    fn test_data_file_override_must_name_module() {
        let mut settings = Settings::default();
        settings.data.files.insert("payroll".into(), PathBuf::from("p.csv"));
        let err = data_source(&settings).err().unwrap();
        assert_eq!(err.code, EXIT_USAGE);

        settings.data.files.clear();
        settings.data.files.insert("menu".into(), PathBuf::from("carte.tsv"));
        let source = data_source(&settings).unwrap();
        assert_eq!(source.path_for(TableModule::Menu), Path::new("database").join("carte.tsv"));
    }

    #[test]
    fn test_missing_credential_maps_to_config_code() {
        let err = CliError::session(SessionError::Configuration(CredentialError::Missing { tried: vec![] }));
        assert_eq!(err.code, EXIT_CONFIG_MISSING_KEY);
        assert!(err.hint.is_some());
    }
}
