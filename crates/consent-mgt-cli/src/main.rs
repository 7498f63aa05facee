// crates/consent-mgt-cli/src/main.rs
// ============================================================================
// Module: Consent Management CLI Entry Point
// Description: Command dispatcher for consent store administration.
// Purpose: Wire config, backend, clock, and event sink into admin commands.
// Dependencies: clap, consent-mgt-config, consent-mgt-core, consent-mgt-store-*, serde_json, time
// ============================================================================

//! ## Overview
//! `consent-mgt` is the composition root of the consent engine. It loads
//! [`ConsentMgtConfig`], opens the configured backend (which creates or
//! validates the schema), and runs one administrative command. Results are
//! JSON on stdout; failures go to stderr with a non-zero exit code. Transient
//! store failures exit with `75` so schedulers can retry.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use consent_mgt_config::ConsentMgtConfig;
use consent_mgt_config::EventSinkType;
use consent_mgt_config::StoreType;
use consent_mgt_core::AuditSource;
use consent_mgt_core::BoundQuery;
use consent_mgt_core::Clock;
use consent_mgt_core::ConsentError;
use consent_mgt_core::ConsentEventSink;
use consent_mgt_core::ConsentId;
use consent_mgt_core::ConsentSearchQuery;
use consent_mgt_core::ConsentStatus;
use consent_mgt_core::ConsentStore;
use consent_mgt_core::Dialect;
use consent_mgt_core::FileEventSink;
use consent_mgt_core::NoopEventSink;
use consent_mgt_core::SqlBackend;
use consent_mgt_core::SqlValue;
use consent_mgt_core::StatusAuditQuery;
use consent_mgt_core::StderrEventSink;
use consent_mgt_core::SystemClock;
use consent_mgt_core::TableSet;
use consent_mgt_core::query::statements;
use consent_mgt_store_postgres::PostgresConsentBackend;
use consent_mgt_store_sqlite::SqliteConsentBackend;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Exit code for failures a retry may clear (`EX_TEMPFAIL`).
const EXIT_TEMPFAIL: u8 = 75;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "consent-mgt", version, about = "Consent store administration")]
struct Cli {
    /// Config file (overrides `CONSENT_MGT_CONFIG`).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or validate the schema and report readiness.
    Init,
    /// Show one consent.
    Show(ShowCommand),
    /// Search consents.
    Search(SearchCommand),
    /// Read status audit ledger rows.
    Audit(AuditCommand),
    /// Read history snapshots of one consent.
    History(HistoryCommand),
    /// Revoke a consent and deactivate its mappings.
    Revoke(RevokeCommand),
    /// Persist `EXPIRED` for consents past their validity time.
    ExpireSweep,
    /// Move ledger and history rows past the retention horizon.
    PurgeRetention(PurgeCommand),
    /// Render a statement for a dialect without executing it.
    Sql(SqlCommand),
}

/// Arguments for `show`.
#[derive(Args, Debug)]
struct ShowCommand {
    /// Consent identifier.
    consent_id: String,
    /// Include authorizations and mappings.
    #[arg(long)]
    detailed: bool,
    /// Include attributes (implied by `--detailed`).
    #[arg(long)]
    attributes: bool,
}

/// Arguments for `search`.
#[derive(Args, Debug, Default)]
struct SearchCommand {
    /// Consent ids to match.
    #[arg(long = "consent-id", value_name = "ID")]
    consent_ids: Vec<String>,
    /// Client ids to match.
    #[arg(long = "client-id", value_name = "ID")]
    client_ids: Vec<String>,
    /// Consent types to match.
    #[arg(long = "consent-type", value_name = "TYPE")]
    consent_types: Vec<String>,
    /// Statuses to match as reads report them (e.g. `AUTHORIZED`, `EXPIRED`).
    #[arg(long = "status", value_name = "STATUS")]
    statuses: Vec<String>,
    /// Only consents with an authorization for this user.
    #[arg(long)]
    user_id: Option<String>,
    /// Lower bound on update time (RFC 3339 or unix seconds).
    #[arg(long, value_name = "TIME")]
    from: Option<String>,
    /// Upper bound on update time (RFC 3339 or unix seconds).
    #[arg(long, value_name = "TIME")]
    to: Option<String>,
    /// Page size.
    #[arg(long)]
    limit: Option<u64>,
    /// Consents to skip.
    #[arg(long)]
    offset: Option<u64>,
}

/// Ledger table selector.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
enum SourceArg {
    /// Live tables.
    #[default]
    Active,
    /// Retention tables.
    Retention,
    /// Both.
    All,
}

impl From<SourceArg> for AuditSource {
    fn from(value: SourceArg) -> Self {
        match value {
            SourceArg::Active => Self::Active,
            SourceArg::Retention => Self::Retention,
            SourceArg::All => Self::All,
        }
    }
}

/// Arguments for `audit`.
#[derive(Args, Debug)]
struct AuditCommand {
    /// Consents to read; none reads all.
    consent_ids: Vec<String>,
    /// Tables to read.
    #[arg(long, value_enum, default_value_t = SourceArg::Active)]
    source: SourceArg,
    /// Page size.
    #[arg(long)]
    limit: Option<u64>,
    /// Rows to skip.
    #[arg(long)]
    offset: Option<u64>,
}

/// Arguments for `history`.
#[derive(Args, Debug)]
struct HistoryCommand {
    /// Consent identifier.
    consent_id: String,
    /// Tables to read.
    #[arg(long, value_enum, default_value_t = SourceArg::Active)]
    source: SourceArg,
}

/// Arguments for `revoke`.
#[derive(Args, Debug)]
struct RevokeCommand {
    /// Consent identifier.
    consent_id: String,
    /// Actor recorded in the ledger.
    #[arg(long)]
    actor: String,
    /// Reason recorded in the ledger.
    #[arg(long)]
    reason: Option<String>,
}

/// Arguments for `purge-retention`.
#[derive(Args, Debug)]
struct PurgeCommand {
    /// Horizon override in seconds.
    #[arg(long)]
    horizon_seconds: Option<u64>,
}

/// Statements the `sql` command can render.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum SqlOperation {
    /// Paginated aggregation search.
    Search,
    /// Aggregation select for one consent.
    Detailed,
    /// Delete every mapping of one consent.
    DeleteMappings,
    /// Status audit ledger read.
    Audit,
    /// History snapshot read.
    History,
    /// Retention copy and delete statements.
    Purge,
}

/// Arguments for `sql`.
#[derive(Args, Debug)]
struct SqlCommand {
    /// Statement to render.
    #[arg(long, value_enum)]
    operation: SqlOperation,
    /// Dialect label; defaults to `query.dialect`, then the store's dialect.
    #[arg(long)]
    dialect: Option<String>,
    /// Target the retention tables.
    #[arg(long)]
    retention: bool,
    /// Consent identifier for single-consent statements.
    #[arg(long)]
    consent_id: Option<String>,
    /// Page size for paginated statements.
    #[arg(long)]
    limit: Option<u64>,
    /// Rows to skip for paginated statements.
    #[arg(long)]
    offset: Option<u64>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper carrying the exit code.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
    /// True when a retry may succeed.
    retryable: bool,
}

impl CliError {
    /// Constructs a non-retryable [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
            retryable: false,
        }
    }
}

impl From<ConsentError> for CliError {
    fn from(error: ConsentError) -> Self {
        Self {
            message: format!("{}: {error}", error.kind()),
            retryable: error.is_retryable(),
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => emit_error(&err),
    }
}

/// Executes the CLI command dispatcher.
fn run(cli: Cli) -> CliResult<()> {
    let config = ConsentMgtConfig::load(cli.config.as_deref())
        .map_err(|err| CliError::new(err.to_string()))?;
    match cli.command {
        Commands::Sql(command) => command_sql(&config, &command),
        command => {
            let clock: Arc<dyn Clock> = Arc::new(SystemClock);
            let backend = open_backend(&config)?;
            let sink = open_sink(&config)?;
            let store = ConsentStore::new(backend, Arc::clone(&clock), sink, config.store_options());
            dispatch(&config, &store, clock.as_ref(), command)
        }
    }
}

/// Runs a store-backed command.
fn dispatch(
    config: &ConsentMgtConfig,
    store: &ConsentStore,
    clock: &dyn Clock,
    command: Commands,
) -> CliResult<()> {
    match command {
        Commands::Init => write_json(&json!({
            "status": "ready",
            "store": store_label(config.store.store_type),
            "dialect": config.store.dialect().as_str(),
        })),
        Commands::Show(command) => {
            let consent_id = ConsentId::new(command.consent_id);
            if command.detailed {
                write_json(&store.get_detailed_consent(&consent_id)?)
            } else {
                write_json(&store.get_consent(&consent_id, command.attributes)?)
            }
        }
        Commands::Search(command) => {
            let query = search_query(command)?;
            write_json(&store.search_consents(&query)?)
        }
        Commands::Audit(command) => {
            let query = StatusAuditQuery {
                consent_ids: command.consent_ids.into_iter().map(ConsentId::new).collect(),
                source: command.source.into(),
                limit: command.limit,
                offset: command.offset,
            };
            write_json(&store.get_status_audit_records(&query)?)
        }
        Commands::History(command) => {
            let consent_id = ConsentId::new(command.consent_id);
            write_json(&store.get_consent_history(&consent_id, command.source.into())?)
        }
        Commands::Revoke(command) => {
            let consent_id = ConsentId::new(command.consent_id);
            let consent =
                store.revoke_consent(&consent_id, &command.actor, command.reason.as_deref())?;
            write_json(&consent)
        }
        Commands::ExpireSweep => write_json(&store.expire_overdue_consents()?),
        Commands::PurgeRetention(command) => {
            let cutoff = purge_cutoff(config, &command, clock.now())?;
            write_json(&store.purge_retention(cutoff)?)
        }
        Commands::Sql(command) => command_sql(config, &command),
    }
}

// ============================================================================
// SECTION: Composition
// ============================================================================

/// Opens the configured backend.
fn open_backend(config: &ConsentMgtConfig) -> CliResult<Arc<dyn SqlBackend>> {
    match config.store.store_type {
        StoreType::Sqlite => {
            let sqlite = config.store.sqlite_config().map_err(|err| CliError::new(err.to_string()))?;
            let backend = SqliteConsentBackend::open(sqlite)
                .map_err(|err| CliError::new(err.to_string()))?;
            Ok(Arc::new(backend))
        }
        StoreType::Postgres => {
            let postgres =
                config.store.postgres_config().map_err(|err| CliError::new(err.to_string()))?;
            let backend = PostgresConsentBackend::open(&postgres)
                .map_err(|err| CliError::new(err.to_string()))?;
            Ok(Arc::new(backend))
        }
    }
}

/// Opens the configured event sink.
fn open_sink(config: &ConsentMgtConfig) -> CliResult<Arc<dyn ConsentEventSink>> {
    match (config.audit.sink, &config.audit.path) {
        (EventSinkType::Stderr, _) => Ok(Arc::new(StderrEventSink)),
        (EventSinkType::None, _) => Ok(Arc::new(NoopEventSink)),
        (EventSinkType::File, Some(path)) => {
            let sink = FileEventSink::new(path).map_err(|err| {
                CliError::new(format!("failed to open event log {}: {err}", path.display()))
            })?;
            Ok(Arc::new(sink))
        }
        (EventSinkType::File, None) => {
            Err(CliError::new("audit.path is required for the file sink".to_string()))
        }
    }
}

/// Returns the config label of a store type.
const fn store_label(store_type: StoreType) -> &'static str {
    match store_type {
        StoreType::Sqlite => "sqlite",
        StoreType::Postgres => "postgres",
    }
}

// ============================================================================
// SECTION: Argument Parsing
// ============================================================================

/// Builds a search query from command arguments.
fn search_query(command: SearchCommand) -> CliResult<ConsentSearchQuery> {
    let consent_statuses = command
        .statuses
        .iter()
        .map(|label| {
            ConsentStatus::from_label(&label.to_ascii_uppercase())
                .ok_or_else(|| CliError::new(format!("unknown consent status: {label}")))
        })
        .collect::<CliResult<Vec<_>>>()?;
    Ok(ConsentSearchQuery {
        consent_ids: command.consent_ids.into_iter().map(ConsentId::new).collect(),
        client_ids: command.client_ids,
        consent_types: command.consent_types,
        consent_statuses,
        user_id: command.user_id,
        from_time: command.from.as_deref().map(parse_time).transpose()?,
        to_time: command.to.as_deref().map(parse_time).transpose()?,
        limit: command.limit,
        offset: command.offset,
    })
}

/// Parses an RFC 3339 timestamp or unix seconds.
fn parse_time(value: &str) -> CliResult<i64> {
    if let Ok(seconds) = value.parse::<i64>() {
        return Ok(seconds);
    }
    OffsetDateTime::parse(value, &Rfc3339)
        .map(OffsetDateTime::unix_timestamp)
        .map_err(|err| CliError::new(format!("invalid time {value}: {err}")))
}

/// Resolves the dialect for `sql`.
fn resolve_dialect(config: &ConsentMgtConfig, label: Option<&str>) -> CliResult<Dialect> {
    match label {
        Some(label) => Dialect::from_label(&label.to_ascii_lowercase())
            .ok_or_else(|| CliError::new(format!("unknown dialect: {label}"))),
        None => Ok(config.query.dialect.unwrap_or_else(|| config.store.dialect())),
    }
}

/// Computes the retention cutoff for `purge-retention`.
fn purge_cutoff(config: &ConsentMgtConfig, command: &PurgeCommand, now: i64) -> CliResult<i64> {
    match command.horizon_seconds {
        None => Ok(config.retention.cutoff(now)),
        Some(0) => Err(CliError::new("horizon must be greater than zero".to_string())),
        Some(horizon) => {
            let horizon = i64::try_from(horizon)
                .map_err(|_| CliError::new("horizon is too large".to_string()))?;
            Ok(now.saturating_sub(horizon))
        }
    }
}

// ============================================================================
// SECTION: SQL Rendering
// ============================================================================

/// Executes `sql`.
fn command_sql(config: &ConsentMgtConfig, command: &SqlCommand) -> CliResult<()> {
    let dialect = resolve_dialect(config, command.dialect.as_deref())?;
    let queries = render_statements(config, command, dialect, SystemClock.now())?;
    let rendered: Vec<Value> = queries.iter().map(bound_query_json).collect();
    write_json(&json!({
        "dialect": dialect.as_str(),
        "statements": rendered,
    }))
}

/// Renders the statements for one `sql` operation.
fn render_statements(
    config: &ConsentMgtConfig,
    command: &SqlCommand,
    dialect: Dialect,
    now: i64,
) -> CliResult<Vec<BoundQuery>> {
    let tables = if command.retention { TableSet::Retention } else { TableSet::Active };
    let source = if command.retention { AuditSource::Retention } else { AuditSource::Active };
    let consent_id = || {
        command
            .consent_id
            .as_deref()
            .map(ConsentId::new)
            .ok_or_else(|| CliError::new("--consent-id is required for this operation".to_string()))
    };
    let queries = match command.operation {
        SqlOperation::Search => {
            let query = ConsentSearchQuery {
                consent_ids: command.consent_id.iter().map(ConsentId::new).collect(),
                limit: command.limit,
                offset: command.offset,
                ..ConsentSearchQuery::default()
            };
            vec![statements::search_consents(dialect, &query, now)]
        }
        SqlOperation::Detailed => vec![statements::detailed_consent(dialect, &consent_id()?)],
        SqlOperation::DeleteMappings => {
            vec![statements::delete_mappings_for_consent(dialect, &consent_id()?, tables)]
        }
        SqlOperation::Audit => {
            let query = StatusAuditQuery {
                consent_ids: command.consent_id.iter().map(ConsentId::new).collect(),
                source,
                limit: command.limit,
                offset: command.offset,
            };
            vec![statements::select_status_audit(dialect, &query)]
        }
        SqlOperation::History => vec![statements::select_history(dialect, &consent_id()?, source)],
        SqlOperation::Purge => {
            let cutoff = config.retention.cutoff(now);
            vec![
                statements::copy_audit_to_retention(dialect, cutoff),
                statements::delete_purged_audit(dialect, cutoff),
                statements::copy_history_to_retention(dialect, cutoff),
                statements::delete_purged_history(dialect, cutoff),
            ]
        }
    };
    Ok(queries)
}

/// Converts a bound query to JSON output.
fn bound_query_json(query: &BoundQuery) -> Value {
    let params: Vec<Value> = query
        .params
        .iter()
        .map(|param| match param {
            SqlValue::Integer(value) => value.map_or(Value::Null, Value::from),
            SqlValue::Text(value) => value.clone().map_or(Value::Null, Value::from),
        })
        .collect();
    json!({
        "sql": query.sql,
        "params": params,
    })
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a JSON document and trailing newline to stdout.
fn write_json<T: Serialize>(value: &T) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::new(format!("failed to serialize output: {err}")))?;
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{text}")
        .map_err(|err| CliError::new(format!("failed to write stdout: {err}")))
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(error: &CliError) -> ExitCode {
    let _ = write_stderr_line(&format!("consent-mgt: {error}"));
    if error.retryable { ExitCode::from(EXIT_TEMPFAIL) } else { ExitCode::FAILURE }
}
