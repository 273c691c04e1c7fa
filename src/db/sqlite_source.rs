use crate::db::{DatabaseKind, RawColumn, RawForeignKey, SchemaSource};
use crate::error::{SpecError, SpecResult};
use async_trait::async_trait;
use sqlx::sqlite::SqliteConnection;
use sqlx::{Connection, Row};
use tracing::debug;

const TABLES_QUERY: &str = "
    SELECT name FROM sqlite_master
    WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
    ORDER BY name";

const COLUMNS_QUERY: &str = "
    SELECT name, type, \"notnull\", pk FROM pragma_table_info(?) ORDER BY cid";

const FOREIGN_KEYS_QUERY: &str = "
    SELECT id, \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?) ORDER BY id, seq";

/// SQLite has no schema namespace to scope by, so every user table in the
/// main database is listed.
pub struct SqliteSource {
    conn: Option<SqliteConnection>,
}

struct TableInfoRow {
    name: String,
    data_type: String,
    not_null: bool,
    pk_position: i64,
}

impl SqliteSource {
    pub async fn connect(url: &str) -> SpecResult<Self> {
        let conn = SqliteConnection::connect(url)
            .await
            .map_err(|e| SpecError::Connection(format!("Failed to open SQLite database: {}", e)))?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: SqliteConnection) -> Self {
        Self { conn: Some(conn) }
    }

    fn conn(&mut self) -> SpecResult<&mut SqliteConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| SpecError::Connection("SQLite connection already closed".to_string()))
    }

    async fn table_info(&mut self, table: &str) -> SpecResult<Vec<TableInfoRow>> {
        let rows = sqlx::query(COLUMNS_QUERY)
            .bind(table)
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| SpecError::table(table, e))?;

        rows.iter()
            .map(|row| {
                Ok(TableInfoRow {
                    name: row.try_get(0)?,
                    data_type: row.try_get::<Option<String>, _>(1)?.unwrap_or_default(),
                    not_null: row.try_get::<i64, _>(2)? != 0,
                    pk_position: row.try_get(3)?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| SpecError::table(table, e))
    }

    /// Primary key columns ordered by their position in the key.
    async fn key_columns(&mut self, table: &str) -> SpecResult<Vec<String>> {
        let mut info: Vec<TableInfoRow> = self
            .table_info(table)
            .await?
            .into_iter()
            .filter(|c| c.pk_position > 0)
            .collect();
        info.sort_by_key(|c| c.pk_position);
        Ok(info.into_iter().map(|c| c.name).collect())
    }
}

#[async_trait(?Send)]
impl SchemaSource for SqliteSource {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    async fn list_tables(&mut self) -> SpecResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(TABLES_QUERY)
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| SpecError::Enumeration(e.to_string()))
    }

    async fn describe_columns(&mut self, table: &str) -> SpecResult<Vec<RawColumn>> {
        let info = self.table_info(table).await?;

        Ok(info
            .into_iter()
            .map(|c| RawColumn {
                name: c.name,
                data_type: c.data_type,
                nullable: !c.not_null,
            })
            .collect())
    }

    async fn describe_primary_key(&mut self, table: &str) -> SpecResult<Vec<String>> {
        self.key_columns(table).await
    }

    async fn describe_foreign_keys(&mut self, table: &str) -> SpecResult<Vec<RawForeignKey>> {
        let rows = sqlx::query(FOREIGN_KEYS_QUERY)
            .bind(table)
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| SpecError::table(table, e))?;

        let mut keys: Vec<(i64, RawForeignKey, bool)> = Vec::new();
        for row in &rows {
            let id: i64 = row.try_get(0).map_err(|e| SpecError::table(table, e))?;
            let referred_table: String = row.try_get(1).map_err(|e| SpecError::table(table, e))?;
            let column: String = row.try_get(2).map_err(|e| SpecError::table(table, e))?;
            let referred_column: Option<String> =
                row.try_get(3).map_err(|e| SpecError::table(table, e))?;

            let idx = match keys.iter().position(|(key_id, _, _)| *key_id == id) {
                Some(idx) => idx,
                None => {
                    keys.push((
                        id,
                        RawForeignKey {
                            name: format!("{}_fk_{}", table, id),
                            columns: Vec::new(),
                            referred_table,
                            referred_columns: Vec::new(),
                        },
                        false,
                    ));
                    keys.len() - 1
                }
            };

            let (_, fk, implicit) = &mut keys[idx];
            fk.columns.push(column);
            match referred_column {
                Some(col) => fk.referred_columns.push(col),
                None => *implicit = true,
            }
        }

        let mut resolved = Vec::with_capacity(keys.len());
        for (_, mut fk, implicit) in keys {
            // `REFERENCES parent` without a column list targets the parent's primary key
            if implicit {
                fk.referred_columns = self
                    .key_columns(&fk.referred_table)
                    .await
                    .map_err(|e| match e {
                        SpecError::TableReflection { message, .. } => SpecError::table(table, message),
                        other => other,
                    })?;
                debug!(
                    "Resolved implicit reference {} -> {}({})",
                    fk.name,
                    fk.referred_table,
                    fk.referred_columns.join(", ")
                );
            }
            resolved.push(fk);
        }

        Ok(resolved)
    }

    async fn close(&mut self) -> SpecResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .await
                .map_err(|e| SpecError::Connection(format!("Failed to close SQLite database: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn source(statements: &[&str]) -> SqliteSource {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        for statement in statements {
            sqlx::query(statement).execute(&mut conn).await.unwrap();
        }
        SqliteSource::from_connection(conn)
    }

    #[tokio::test]
    async fn reads_columns_and_keys() {
        let mut src = source(&[
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name VARCHAR(80) NOT NULL)",
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id), note)",
        ])
        .await;

        assert_eq!(src.list_tables().await.unwrap(), vec!["orders", "users"]);

        let columns = src.describe_columns("orders").await.unwrap();
        assert_eq!(columns[0], RawColumn::new("id", "INTEGER", true));
        assert_eq!(columns[2], RawColumn::new("note", "", true));

        let users = src.describe_columns("users").await.unwrap();
        assert!(!users[1].nullable);
        assert_eq!(users[1].data_type, "VARCHAR(80)");

        let fks = src.describe_foreign_keys("orders").await.unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].columns, vec!["user_id"]);
        assert_eq!(fks[0].referred_table, "users");
        assert_eq!(fks[0].referred_columns, vec!["id"]);
    }

    #[tokio::test]
    async fn closed_connection_is_a_connection_error() {
        let mut src = source(&["CREATE TABLE t (id INTEGER PRIMARY KEY)"]).await;
        src.close().await.unwrap();
        src.close().await.unwrap();

        assert!(matches!(src.describe_columns("t").await, Err(SpecError::Connection(_))));
        assert!(matches!(src.describe_primary_key("t").await, Err(SpecError::Connection(_))));
        assert!(matches!(src.list_tables().await, Err(SpecError::Connection(_))));
    }

    #[tokio::test]
    async fn composite_primary_key_follows_key_order() {
        let mut src = source(&["CREATE TABLE pairs (a INTEGER, b INTEGER, PRIMARY KEY (b, a))"]).await;
        assert_eq!(src.describe_primary_key("pairs").await.unwrap(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn implicit_reference_targets_parent_primary_key() {
        let mut src = source(&[
            "CREATE TABLE parent (a INTEGER, b INTEGER, PRIMARY KEY (a, b))",
            "CREATE TABLE child (x INTEGER, y INTEGER, FOREIGN KEY (x, y) REFERENCES parent)",
        ])
        .await;

        let fks = src.describe_foreign_keys("child").await.unwrap();
        assert_eq!(fks[0].columns, vec!["x", "y"]);
        assert_eq!(fks[0].referred_columns, vec!["a", "b"]);
    }
}
