use crate::db::{DatabaseKind, RawColumn, RawForeignKey, SchemaSource};
use crate::error::{SpecError, SpecResult};
use async_trait::async_trait;
use sqlx::postgres::PgConnection;
use sqlx::{Connection, Row};

const TABLES_QUERY: &str = "
    SELECT c.relname::text
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1 AND c.relkind IN ('r', 'p') AND NOT c.relispartition
    ORDER BY c.relname";

const COLUMNS_QUERY: &str = "
    SELECT a.attname::text, format_type(a.atttypid, a.atttypmod), NOT a.attnotnull
    FROM pg_attribute a
    JOIN pg_class c ON c.oid = a.attrelid
    JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1 AND c.relname = $2 AND a.attnum > 0 AND NOT a.attisdropped
    ORDER BY a.attnum";

const PRIMARY_KEY_QUERY: &str = "
    SELECT a.attname::text
    FROM pg_constraint con
    JOIN pg_class c ON c.oid = con.conrelid
    JOIN pg_namespace n ON n.oid = c.relnamespace
    CROSS JOIN LATERAL unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
    JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
    WHERE con.contype = 'p' AND n.nspname = $1 AND c.relname = $2
    ORDER BY k.ord";

const FOREIGN_KEYS_QUERY: &str = "
    SELECT con.conname::text,
           rc.relname::text,
           ARRAY(SELECT a.attname::text
                 FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
                 JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
                 ORDER BY k.ord),
           ARRAY(SELECT a.attname::text
                 FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
                 JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
                 ORDER BY k.ord)
    FROM pg_constraint con
    JOIN pg_class c ON c.oid = con.conrelid
    JOIN pg_namespace n ON n.oid = c.relnamespace
    JOIN pg_class rc ON rc.oid = con.confrelid
    WHERE con.contype = 'f' AND n.nspname = $1 AND c.relname = $2
    ORDER BY con.conname";

/// PostgreSQL through the system catalogs. `format_type` already renders
/// lengths and precision, e.g. `character varying(255)` or `numeric(10,2)`.
pub struct PostgresSource {
    conn: Option<PgConnection>,
    schema: String,
}

impl PostgresSource {
    pub async fn connect(url: &str, schema: Option<&str>) -> SpecResult<Self> {
        let mut conn = PgConnection::connect(url)
            .await
            .map_err(|e| SpecError::Connection(format!("Failed to connect to PostgreSQL: {}", e)))?;

        let schema = match schema {
            Some(schema) => schema.to_string(),
            None => sqlx::query_scalar::<_, String>("SELECT current_schema()::text")
                .fetch_one(&mut conn)
                .await
                .map_err(|e| SpecError::Connection(format!("Failed to read current schema: {}", e)))?,
        };

        Ok(Self {
            conn: Some(conn),
            schema,
        })
    }

    fn conn(&mut self) -> SpecResult<&mut PgConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| SpecError::Connection("PostgreSQL connection already closed".to_string()))
    }
}

#[async_trait(?Send)]
impl SchemaSource for PostgresSource {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    async fn list_tables(&mut self) -> SpecResult<Vec<String>> {
        let schema = self.schema.clone();
        sqlx::query_scalar::<_, String>(TABLES_QUERY)
            .bind(schema)
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| SpecError::Enumeration(e.to_string()))
    }

    async fn describe_columns(&mut self, table: &str) -> SpecResult<Vec<RawColumn>> {
        let schema = self.schema.clone();
        let rows = sqlx::query(COLUMNS_QUERY)
            .bind(schema)
            .bind(table)
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| SpecError::table(table, e))?;

        rows.iter()
            .map(|row| {
                Ok(RawColumn {
                    name: row.try_get(0)?,
                    data_type: row.try_get(1)?,
                    nullable: row.try_get(2)?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| SpecError::table(table, e))
    }

    async fn describe_primary_key(&mut self, table: &str) -> SpecResult<Vec<String>> {
        let schema = self.schema.clone();
        sqlx::query_scalar::<_, String>(PRIMARY_KEY_QUERY)
            .bind(schema)
            .bind(table)
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| SpecError::table(table, e))
    }

    async fn describe_foreign_keys(&mut self, table: &str) -> SpecResult<Vec<RawForeignKey>> {
        let schema = self.schema.clone();
        let rows = sqlx::query(FOREIGN_KEYS_QUERY)
            .bind(schema)
            .bind(table)
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| SpecError::table(table, e))?;

        rows.iter()
            .map(|row| {
                Ok(RawForeignKey {
                    name: row.try_get(0)?,
                    referred_table: row.try_get(1)?,
                    columns: row.try_get(2)?,
                    referred_columns: row.try_get(3)?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| SpecError::table(table, e))
    }

    async fn close(&mut self) -> SpecResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .await
                .map_err(|e| SpecError::Connection(format!("Failed to close PostgreSQL connection: {}", e)))?;
        }
        Ok(())
    }
}
