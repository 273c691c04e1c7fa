pub mod duckdb_source;
pub mod mssql_source;
pub mod mysql_source;
pub mod oracle_source;
pub mod postgres_source;
pub mod sqlite_source;

use crate::config::DatabaseConfig;
use crate::error::{SpecError, SpecResult};
use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use std::fmt;
use tracing::info;

/// The database products a descriptor can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Postgres,
    MySql,
    Sqlite,
    SqlServer,
    DuckDb,
    Oracle,
}

impl DatabaseKind {
    /// Picks the dialect from the descriptor's scheme.
    pub fn from_url(url: &str) -> SpecResult<Self> {
        let scheme = url
            .split_once(':')
            .map(|(scheme, _)| scheme.to_lowercase())
            .ok_or_else(|| SpecError::Connection(format!("No scheme in database url: {}", redact(url))))?;

        match scheme.as_str() {
            "postgres" | "postgresql" => Ok(DatabaseKind::Postgres),
            "mysql" | "mariadb" => Ok(DatabaseKind::MySql),
            "sqlite" => Ok(DatabaseKind::Sqlite),
            "mssql" | "sqlserver" => Ok(DatabaseKind::SqlServer),
            "duckdb" => Ok(DatabaseKind::DuckDb),
            "oracle" => Ok(DatabaseKind::Oracle),
            other => Err(SpecError::Connection(format!(
                "Unsupported database scheme: {}",
                other
            ))),
        }
    }

    /// Only Oracle exposes table and column comments through this tool.
    pub fn supports_comments(&self) -> bool {
        matches!(self, DatabaseKind::Oracle)
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DatabaseKind::Postgres => "PostgreSQL",
            DatabaseKind::MySql => "MySQL",
            DatabaseKind::Sqlite => "SQLite",
            DatabaseKind::SqlServer => "SQL Server",
            DatabaseKind::DuckDb => "DuckDB",
            DatabaseKind::Oracle => "Oracle",
        };
        f.write_str(name)
    }
}

/// A column as the catalog reports it, before key resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

impl RawColumn {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
        }
    }
}

/// One foreign key constraint. Local and referenced columns are listed
/// independently, each in constraint ordinal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub referred_table: String,
    pub referred_columns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableComments {
    pub table: Option<String>,
    pub columns: HashMap<String, String>,
}

/// The metadata capability every dialect provides.
///
/// Sources hold a single open connection and are driven strictly one call at
/// a time, so the futures are not required to be `Send`.
#[async_trait(?Send)]
pub trait SchemaSource {
    fn kind(&self) -> DatabaseKind;

    async fn list_tables(&mut self) -> SpecResult<Vec<String>>;

    async fn describe_columns(&mut self, table: &str) -> SpecResult<Vec<RawColumn>>;

    async fn describe_primary_key(&mut self, table: &str) -> SpecResult<Vec<String>>;

    async fn describe_foreign_keys(&mut self, table: &str) -> SpecResult<Vec<RawForeignKey>>;

    /// `None` when the dialect has no comment support.
    async fn describe_comments(&mut self, _table: &str) -> SpecResult<Option<TableComments>> {
        Ok(None)
    }

    /// Releases the connection. Later calls are no-ops.
    async fn close(&mut self) -> SpecResult<()>;
}

/// Opens the source named by the descriptor's scheme.
pub async fn connect(config: &DatabaseConfig) -> SpecResult<Box<dyn SchemaSource>> {
    let kind = DatabaseKind::from_url(&config.url)?;
    info!("Connecting to {} database at {}", kind, redact(&config.url));

    let schema = config.schema.as_deref();
    let source: Box<dyn SchemaSource> = match kind {
        DatabaseKind::Postgres => Box::new(postgres_source::PostgresSource::connect(&config.url, schema).await?),
        DatabaseKind::MySql => Box::new(mysql_source::MySqlSource::connect(&config.url, schema).await?),
        DatabaseKind::Sqlite => Box::new(sqlite_source::SqliteSource::connect(&config.url).await?),
        DatabaseKind::SqlServer => Box::new(mssql_source::MssqlSource::connect(&config.url, schema).await?),
        DatabaseKind::DuckDb => Box::new(duckdb_source::DuckDbSource::open(&config.url, schema)?),
        DatabaseKind::Oracle => {
            let owner = schema.ok_or_else(|| {
                SpecError::Connection("Oracle requires database.schema (the owning schema)".to_string())
            })?;
            Box::new(oracle_source::OracleSource::connect(&config.url, owner)?)
        }
    };

    Ok(source)
}

/// Builds `TYPE`, `TYPE(len)`, `TYPE(p)` or `TYPE(p,s)` from catalog parts.
pub fn normalize_type(
    base: &str,
    length: Option<i64>,
    precision: Option<i64>,
    scale: Option<i64>,
) -> String {
    let base = base.trim();
    if base.is_empty() || base.contains('(') {
        return base.to_string();
    }

    match (length, precision, scale) {
        (Some(len), _, _) if len > 0 => format!("{}({})", base, len),
        (_, Some(p), Some(s)) => format!("{}({},{})", base, p, s),
        (_, Some(p), None) => format!("{}({})", base, p),
        _ => base.to_string(),
    }
}

/// Hides the password part of a descriptor for logging.
pub fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

/// User name and password of a parsed descriptor, percent-decoded.
pub(crate) fn credentials(url: &url::Url) -> (String, String) {
    let decode = |raw: &str| percent_decode_str(raw).decode_utf8_lossy().into_owned();
    (decode(url.username()), decode(url.password().unwrap_or_default()))
}

/// Groups `(constraint, local column, referenced table, referenced column)`
/// rows into constraints, keeping first-seen constraint order and row order
/// within each constraint.
pub(crate) fn group_foreign_keys<I>(pairs: I) -> Vec<RawForeignKey>
where
    I: IntoIterator<Item = (String, String, String, String)>,
{
    let mut keys: Vec<RawForeignKey> = Vec::new();
    for (name, column, referred_table, referred_column) in pairs {
        match keys.iter_mut().find(|fk| fk.name == name) {
            Some(fk) => {
                fk.columns.push(column);
                fk.referred_columns.push(referred_column);
            }
            None => keys.push(RawForeignKey {
                name,
                columns: vec![column],
                referred_table,
                referred_columns: vec![referred_column],
            }),
        }
    }
    keys
}
