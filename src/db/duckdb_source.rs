use crate::db::{DatabaseKind, RawColumn, RawForeignKey, SchemaSource};
use crate::error::{SpecError, SpecResult};
use async_trait::async_trait;
use duckdb::{Connection, params};
use tracing::debug;

/// Separator used to flatten DuckDB list columns into a single string.
const LIST_SEPARATOR: char = '\u{1f}';

pub struct DuckDbSource {
    conn: Option<Connection>,
    schema: String,
}

impl DuckDbSource {
    /// Opens `duckdb:<path>`, `duckdb://<path>` or an in-memory database when
    /// the path is empty or `:memory:`.
    pub fn open(url: &str, schema: Option<&str>) -> SpecResult<Self> {
        let path = url
            .strip_prefix("duckdb://")
            .or_else(|| url.strip_prefix("duckdb:"))
            .unwrap_or(url);

        let conn = if path.is_empty() || path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(|e| SpecError::Connection(e.to_string()))?;

        conn.query_row("SELECT 1", [], |row| row.get::<_, i32>(0))
            .map_err(|e| SpecError::Connection(e.to_string()))?;

        Ok(Self::from_connection(conn, schema))
    }

    pub fn from_connection(conn: Connection, schema: Option<&str>) -> Self {
        Self {
            conn: Some(conn),
            schema: schema.unwrap_or("main").to_string(),
        }
    }

    fn conn(&self) -> SpecResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| SpecError::Connection("DuckDB connection already closed".to_string()))
    }

    fn constraints(
        conn: &Connection,
        schema: &str,
        table: &str,
        constraint_type: &str,
    ) -> duckdb::Result<Vec<ConstraintRow>> {
        let query = format!(
            "SELECT constraint_index,
                    list_aggregate(constraint_column_names, 'string_agg', '{sep}'),
                    referenced_table,
                    list_aggregate(referenced_column_names, 'string_agg', '{sep}')
             FROM duckdb_constraints()
             WHERE database_name = current_database()
               AND schema_name = ?
               AND table_name = ?
               AND constraint_type = ?
             ORDER BY constraint_index",
            sep = LIST_SEPARATOR
        );

        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(params![schema, table, constraint_type], |row| {
            Ok(ConstraintRow {
                index: row.get(0)?,
                columns: split_list(row.get::<_, Option<String>>(1)?),
                referenced_table: row.get(2)?,
                referenced_columns: split_list(row.get::<_, Option<String>>(3)?),
            })
        })?;

        rows.collect()
    }
}

struct ConstraintRow {
    index: i64,
    columns: Vec<String>,
    referenced_table: Option<String>,
    referenced_columns: Vec<String>,
}

fn split_list(joined: Option<String>) -> Vec<String> {
    match joined {
        Some(s) if !s.is_empty() => s.split(LIST_SEPARATOR).map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

#[async_trait(?Send)]
impl SchemaSource for DuckDbSource {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::DuckDb
    }

    async fn list_tables(&mut self) -> SpecResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT table_name FROM information_schema.tables
                 WHERE table_catalog = current_database()
                   AND table_schema = ?
                   AND table_type = 'BASE TABLE'
                 ORDER BY table_name",
            )
            .map_err(|e| SpecError::Enumeration(e.to_string()))?;

        let rows = stmt
            .query_map(params![self.schema], |row| row.get::<_, String>(0))
            .map_err(|e| SpecError::Enumeration(e.to_string()))?;

        let tables: Result<Vec<String>, _> = rows.collect();
        let tables = tables.map_err(|e| SpecError::Enumeration(e.to_string()))?;
        debug!("Found {} tables in DuckDB schema {}", tables.len(), self.schema);
        Ok(tables)
    }

    async fn describe_columns(&mut self, table: &str) -> SpecResult<Vec<RawColumn>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT column_name, data_type, is_nullable
                 FROM information_schema.columns
                 WHERE table_catalog = current_database()
                   AND table_schema = ?
                   AND table_name = ?
                 ORDER BY ordinal_position",
            )
            .map_err(|e| SpecError::table(table, e))?;

        let rows = stmt
            .query_map(params![self.schema, table], |row| {
                Ok(RawColumn {
                    name: row.get(0)?,
                    data_type: row.get(1)?,
                    nullable: row.get::<_, String>(2)? == "YES",
                })
            })
            .map_err(|e| SpecError::table(table, e))?;

        let columns: Result<Vec<RawColumn>, _> = rows.collect();
        columns.map_err(|e| SpecError::table(table, e))
    }

    async fn describe_primary_key(&mut self, table: &str) -> SpecResult<Vec<String>> {
        let rows = Self::constraints(self.conn()?, &self.schema, table, "PRIMARY KEY")
            .map_err(|e| SpecError::table(table, e))?;

        Ok(rows.into_iter().next().map(|r| r.columns).unwrap_or_default())
    }

    async fn describe_foreign_keys(&mut self, table: &str) -> SpecResult<Vec<RawForeignKey>> {
        let rows = Self::constraints(self.conn()?, &self.schema, table, "FOREIGN KEY")
            .map_err(|e| SpecError::table(table, e))?;

        rows.into_iter()
            .map(|row| {
                let referred_table = row.referenced_table.ok_or_else(|| {
                    SpecError::table(table, format!("foreign key {} has no referenced table", row.index))
                })?;
                Ok(RawForeignKey {
                    name: format!("{}_fk_{}", table, row.index),
                    columns: row.columns,
                    referred_table,
                    referred_columns: row.referenced_columns,
                })
            })
            .collect()
    }

    async fn close(&mut self) -> SpecResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .map_err(|(_, e)| SpecError::Connection(format!("Failed to close DuckDB: {}", e)))?;
        }
        Ok(())
    }
}
