use crate::db::{DatabaseKind, RawColumn, RawForeignKey, SchemaSource, group_foreign_keys};
use crate::error::{SpecError, SpecResult};
use async_trait::async_trait;
use sqlx::mysql::MySqlConnection;
use sqlx::{Connection, Row};

// information_schema columns are cast to CHAR so they decode as strings on
// servers that report them with a binary collation.
const TABLES_QUERY: &str = "
    SELECT CAST(TABLE_NAME AS CHAR)
    FROM information_schema.TABLES
    WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
    ORDER BY TABLE_NAME";

const COLUMNS_QUERY: &str = "
    SELECT CAST(COLUMN_NAME AS CHAR), CAST(COLUMN_TYPE AS CHAR), CAST(IS_NULLABLE AS CHAR)
    FROM information_schema.COLUMNS
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
    ORDER BY ORDINAL_POSITION";

const PRIMARY_KEY_QUERY: &str = "
    SELECT CAST(COLUMN_NAME AS CHAR)
    FROM information_schema.KEY_COLUMN_USAGE
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY'
    ORDER BY ORDINAL_POSITION";

const FOREIGN_KEYS_QUERY: &str = "
    SELECT CAST(CONSTRAINT_NAME AS CHAR),
           CAST(COLUMN_NAME AS CHAR),
           CAST(REFERENCED_TABLE_NAME AS CHAR),
           CAST(REFERENCED_COLUMN_NAME AS CHAR)
    FROM information_schema.KEY_COLUMN_USAGE
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND REFERENCED_TABLE_NAME IS NOT NULL
    ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION";

pub struct MySqlSource {
    conn: Option<MySqlConnection>,
    database: String,
}

impl MySqlSource {
    pub async fn connect(url: &str, schema: Option<&str>) -> SpecResult<Self> {
        let mut conn = MySqlConnection::connect(url)
            .await
            .map_err(|e| SpecError::Connection(format!("Failed to connect to MySQL: {}", e)))?;

        let database = match schema {
            Some(schema) => schema.to_string(),
            None => sqlx::query_scalar::<_, Option<String>>("SELECT CAST(DATABASE() AS CHAR)")
                .fetch_one(&mut conn)
                .await
                .map_err(|e| SpecError::Connection(format!("Failed to read current database: {}", e)))?
                .ok_or_else(|| {
                    SpecError::Connection("No database selected in the MySQL url".to_string())
                })?,
        };

        Ok(Self {
            conn: Some(conn),
            database,
        })
    }

    fn conn(&mut self) -> SpecResult<&mut MySqlConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| SpecError::Connection("MySQL connection already closed".to_string()))
    }
}

#[async_trait(?Send)]
impl SchemaSource for MySqlSource {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::MySql
    }

    async fn list_tables(&mut self) -> SpecResult<Vec<String>> {
        let database = self.database.clone();
        sqlx::query_scalar::<_, String>(TABLES_QUERY)
            .bind(database)
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| SpecError::Enumeration(e.to_string()))
    }

    async fn describe_columns(&mut self, table: &str) -> SpecResult<Vec<RawColumn>> {
        let database = self.database.clone();
        let rows = sqlx::query(COLUMNS_QUERY)
            .bind(database)
            .bind(table)
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| SpecError::table(table, e))?;

        rows.iter()
            .map(|row| {
                Ok(RawColumn {
                    name: row.try_get(0)?,
                    data_type: row.try_get(1)?,
                    nullable: row.try_get::<String, _>(2)? == "YES",
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| SpecError::table(table, e))
    }

    async fn describe_primary_key(&mut self, table: &str) -> SpecResult<Vec<String>> {
        let database = self.database.clone();
        sqlx::query_scalar::<_, String>(PRIMARY_KEY_QUERY)
            .bind(database)
            .bind(table)
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| SpecError::table(table, e))
    }

    async fn describe_foreign_keys(&mut self, table: &str) -> SpecResult<Vec<RawForeignKey>> {
        let database = self.database.clone();
        let rows = sqlx::query(FOREIGN_KEYS_QUERY)
            .bind(database)
            .bind(table)
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| SpecError::table(table, e))?;

        let pairs = rows
            .iter()
            .map(|row| Ok((row.try_get(0)?, row.try_get(1)?, row.try_get(2)?, row.try_get(3)?)))
            .collect::<Result<Vec<(String, String, String, String)>, sqlx::Error>>()
            .map_err(|e| SpecError::table(table, e))?;

        Ok(group_foreign_keys(pairs))
    }

    async fn close(&mut self) -> SpecResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .await
                .map_err(|e| SpecError::Connection(format!("Failed to close MySQL connection: {}", e)))?;
        }
        Ok(())
    }
}
