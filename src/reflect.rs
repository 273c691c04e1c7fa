use crate::config::DatabaseConfig;
use crate::db::{RawColumn, RawForeignKey, SchemaSource, TableComments};
use crate::error::{SpecError, SpecResult};
use crate::schema::{ColumnSpec, ForeignKeyRef, TableSpec};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Result of reflecting one table. A failure never escapes the reflection
/// loop; it is carried here and reported by the caller.
#[derive(Debug)]
pub enum TableOutcome {
    Reflected(TableSpec),
    Failed { table: String, cause: SpecError },
    Empty(String),
}

/// Include/exclude lists applied to table names before reflection.
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    include: Option<HashSet<String>>,
    exclude: HashSet<String>,
}

impl TableFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        Self {
            include: (!include.is_empty()).then(|| include.iter().cloned().collect()),
            exclude: exclude.iter().cloned().collect(),
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::new(&config.include_tables, &config.exclude_tables)
    }

    pub fn allows(&self, table: &str) -> bool {
        if self.exclude.contains(table) {
            return false;
        }
        match &self.include {
            Some(include) => include.contains(table),
            None => true,
        }
    }
}

/// Reflects every table visible through `source`, one at a time, in
/// ascending name order.
///
/// Only a failure to list the tables is returned as an error.
pub async fn reflect_schema(
    source: &mut dyn SchemaSource,
    filter: &TableFilter,
) -> SpecResult<Vec<TableOutcome>> {
    let mut tables = source.list_tables().await?;
    tables.retain(|t| filter.allows(t));
    tables.sort();
    tables.dedup();
    info!("Reflecting {} tables from {}", tables.len(), source.kind());

    let mut outcomes = Vec::with_capacity(tables.len());
    for table in tables {
        let outcome = match reflect_table(source, &table).await {
            Ok(Some(spec)) => {
                debug!(
                    "Reflected {} with {} columns, primary key [{}]",
                    spec.name,
                    spec.columns.len(),
                    spec.primary_key().join(", ")
                );
                TableOutcome::Reflected(spec)
            }
            Ok(None) => {
                debug!("Skipping {}: no columns", table);
                TableOutcome::Empty(table)
            }
            Err(cause) => {
                warn!("Skipping table {}: {}", table, cause);
                TableOutcome::Failed { table, cause }
            }
        };
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

/// `Ok(None)` for a table without reflectable columns.
pub async fn reflect_table(source: &mut dyn SchemaSource, table: &str) -> SpecResult<Option<TableSpec>> {
    let columns = source.describe_columns(table).await?;
    if columns.is_empty() {
        return Ok(None);
    }

    let mut spec = build_table(table, columns)?;

    let primary_key = source.describe_primary_key(table).await?;
    apply_primary_key(&mut spec, &primary_key)?;

    let foreign_keys = source.describe_foreign_keys(table).await?;
    apply_foreign_keys(&mut spec, &foreign_keys)?;

    if let Some(comments) = source.describe_comments(table).await? {
        apply_comments(&mut spec, comments);
    }

    Ok(Some(spec))
}

pub fn build_table(table: &str, columns: Vec<RawColumn>) -> SpecResult<TableSpec> {
    let mut spec = TableSpec::new(table);
    let mut seen = HashSet::new();
    for column in columns {
        if !seen.insert(column.name.clone()) {
            return Err(SpecError::table(table, format!("duplicate column {}", column.name)));
        }
        spec.columns
            .push(ColumnSpec::new(column.name, column.data_type, column.nullable));
    }
    Ok(spec)
}

pub fn apply_primary_key(spec: &mut TableSpec, key_columns: &[String]) -> SpecResult<()> {
    for name in key_columns {
        let table = spec.name.clone();
        let column = spec.column_mut(name).ok_or_else(|| {
            SpecError::table(&table, format!("primary key names unknown column {}", name))
        })?;
        column.is_primary_key = true;
    }
    Ok(())
}

/// Pairs local and referenced columns by ordinal position. A constraint whose
/// column counts differ is malformed and fails the whole table.
pub fn apply_foreign_keys(spec: &mut TableSpec, keys: &[RawForeignKey]) -> SpecResult<()> {
    let table = spec.name.clone();
    for fk in keys {
        if fk.columns.len() != fk.referred_columns.len() || fk.columns.is_empty() {
            return Err(SpecError::table(
                &table,
                format!(
                    "foreign key {} maps {} local columns to {} referenced columns",
                    fk.name,
                    fk.columns.len(),
                    fk.referred_columns.len()
                ),
            ));
        }

        for (local, referred) in fk.columns.iter().zip(&fk.referred_columns) {
            let column = spec.column_mut(local).ok_or_else(|| {
                SpecError::table(&table, format!("foreign key {} names unknown column {}", fk.name, local))
            })?;

            if let Some(existing) = &column.foreign_key {
                debug!(
                    "{}.{} already references {}; ignoring {}",
                    table,
                    local,
                    existing.label(),
                    fk.name
                );
                continue;
            }
            column.foreign_key = Some(ForeignKeyRef::new(&fk.referred_table, referred));
        }
    }
    Ok(())
}

/// Missing or empty comments stay `None`.
pub fn apply_comments(spec: &mut TableSpec, mut comments: TableComments) {
    spec.comment = comments.table.filter(|c| !c.trim().is_empty());
    for column in &mut spec.columns {
        column.comment = comments
            .columns
            .remove(&column.name)
            .filter(|c| !c.trim().is_empty());
    }
}

/// Splits outcomes into reflected tables and skipped ones.
#[derive(Debug, Default)]
pub struct ReflectionReport {
    pub tables: Vec<TableSpec>,
    pub skipped: Vec<(String, SpecError)>,
    pub empty: Vec<String>,
}

impl ReflectionReport {
    pub fn from_outcomes(outcomes: Vec<TableOutcome>) -> Self {
        let mut report = Self::default();
        for outcome in outcomes {
            match outcome {
                TableOutcome::Reflected(spec) => report.tables.push(spec),
                TableOutcome::Failed { table, cause } => report.skipped.push((table, cause)),
                TableOutcome::Empty(table) => report.empty.push(table),
            }
        }
        report
    }

    pub fn log_summary(&self) {
        info!(
            "Reflected {} tables ({} skipped, {} without columns)",
            self.tables.len(),
            self.skipped.len(),
            self.empty.len()
        );
        for (table, cause) in &self.skipped {
            warn!("Table {} was left out of the document: {}", table, cause);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseKind;
    use crate::db::duckdb_source::DuckDbSource;
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn s(v: &str) -> String {
        v.to_string()
    }

    fn duck(ddl: &str) -> DuckDbSource {
        let conn = duckdb::Connection::open_in_memory().unwrap();
        conn.execute_batch(ddl).unwrap();
        DuckDbSource::from_connection(conn, None)
    }

    /// In-memory source with scripted metadata and per-table failures.
    #[derive(Default)]
    struct FakeSource {
        tables: Vec<String>,
        columns: HashMap<String, Vec<RawColumn>>,
        primary_keys: HashMap<String, Vec<String>>,
        foreign_keys: HashMap<String, Vec<RawForeignKey>>,
        comments: HashMap<String, TableComments>,
        broken: HashSet<String>,
        fail_listing: bool,
        with_comments: bool,
    }

    impl FakeSource {
        fn table(mut self, name: &str, columns: &[(&str, &str, bool)]) -> Self {
            self.tables.push(s(name));
            self.columns.insert(
                s(name),
                columns
                    .iter()
                    .map(|(n, t, nullable)| RawColumn::new(*n, *t, *nullable))
                    .collect(),
            );
            self
        }
    }

    #[async_trait(?Send)]
    impl SchemaSource for FakeSource {
        fn kind(&self) -> DatabaseKind {
            if self.with_comments {
                DatabaseKind::Oracle
            } else {
                DatabaseKind::Sqlite
            }
        }

        async fn list_tables(&mut self) -> SpecResult<Vec<String>> {
            if self.fail_listing {
                return Err(SpecError::Enumeration(s("permission denied")));
            }
            Ok(self.tables.clone())
        }

        async fn describe_columns(&mut self, table: &str) -> SpecResult<Vec<RawColumn>> {
            if self.broken.contains(table) {
                return Err(SpecError::table(table, "insufficient privileges"));
            }
            Ok(self.columns.get(table).cloned().unwrap_or_default())
        }

        async fn describe_primary_key(&mut self, table: &str) -> SpecResult<Vec<String>> {
            Ok(self.primary_keys.get(table).cloned().unwrap_or_default())
        }

        async fn describe_foreign_keys(&mut self, table: &str) -> SpecResult<Vec<RawForeignKey>> {
            Ok(self.foreign_keys.get(table).cloned().unwrap_or_default())
        }

        async fn describe_comments(&mut self, table: &str) -> SpecResult<Option<TableComments>> {
            if !self.with_comments {
                return Ok(None);
            }
            Ok(Some(self.comments.get(table).cloned().unwrap_or_default()))
        }

        async fn close(&mut self) -> SpecResult<()> {
            Ok(())
        }
    }

    fn reflected(outcomes: Vec<TableOutcome>) -> Vec<TableSpec> {
        ReflectionReport::from_outcomes(outcomes).tables
    }

    #[tokio::test]
    async fn users_and_orders_resolve_keys() {
        let mut src = duck(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name VARCHAR);
             CREATE TABLE orders (
                 id INTEGER PRIMARY KEY,
                 user_id INTEGER,
                 FOREIGN KEY (user_id) REFERENCES users (id)
             );",
        );

        let tables = reflected(reflect_schema(&mut src, &TableFilter::default()).await.unwrap());
        let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["orders", "users"]);

        let user_id = &tables[0].columns[1];
        assert_eq!(user_id.name, "user_id");
        assert!(!user_id.is_primary_key);
        assert_eq!(user_id.foreign_key, Some(ForeignKeyRef::new("users", "id")));

        assert!(tables[1].columns[0].is_primary_key);
        assert!(!tables[1].columns[1].is_primary_key);
        assert!(tables.iter().all(|t| t.comment.is_none()));
    }

    #[tokio::test]
    async fn composite_primary_key_flags_each_member() {
        let mut src = duck("CREATE TABLE link (a INTEGER, b INTEGER, note VARCHAR, PRIMARY KEY (a, b));");
        let tables = reflected(reflect_schema(&mut src, &TableFilter::default()).await.unwrap());

        let flags: Vec<_> = tables[0].columns.iter().map(|c| c.is_primary_key).collect();
        assert_eq!(flags, vec![true, true, false]);
    }

    #[tokio::test]
    async fn column_can_be_both_key_and_reference() {
        let mut src = duck(
            "CREATE TABLE users (id INTEGER PRIMARY KEY);
             CREATE TABLE profiles (
                 user_id INTEGER PRIMARY KEY,
                 bio VARCHAR,
                 FOREIGN KEY (user_id) REFERENCES users (id)
             );",
        );
        let tables = reflected(reflect_schema(&mut src, &TableFilter::default()).await.unwrap());

        let user_id = &tables[0].columns[0];
        assert!(user_id.is_primary_key);
        assert_eq!(user_id.foreign_key.as_ref().map(|fk| fk.label()), Some(s("users.id")));
    }

    #[tokio::test]
    async fn empty_schema_yields_no_tables() {
        let mut src = duck("CREATE SCHEMA other; CREATE TABLE other.hidden (id INTEGER);");
        let outcomes = reflect_schema(&mut src, &TableFilter::default()).await.unwrap();
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn failing_table_is_skipped_and_the_rest_survive() {
        let mut src = FakeSource::default()
            .table("alpha", &[("id", "INTEGER", false)])
            .table("broken", &[("id", "INTEGER", false)])
            .table("gamma", &[("id", "INTEGER", false)]);
        src.broken.insert(s("broken"));

        let report = ReflectionReport::from_outcomes(
            reflect_schema(&mut src, &TableFilter::default()).await.unwrap(),
        );

        let names: Vec<_> = report.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "gamma"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "broken");
        assert!(matches!(report.skipped[0].1, SpecError::TableReflection { .. }));
    }

    #[tokio::test]
    async fn listing_failure_is_fatal() {
        let mut src = FakeSource {
            fail_listing: true,
            ..Default::default()
        };
        let result = reflect_schema(&mut src, &TableFilter::default()).await;
        assert!(matches!(result, Err(SpecError::Enumeration(_))));
    }

    #[tokio::test]
    async fn tables_are_sorted_by_name() {
        let mut src = FakeSource::default()
            .table("zeta", &[("id", "INTEGER", false)])
            .table("alpha", &[("id", "INTEGER", false)])
            .table("mid", &[("id", "INTEGER", false)]);

        let tables = reflected(reflect_schema(&mut src, &TableFilter::default()).await.unwrap());
        let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn tables_without_columns_are_left_out() {
        let mut src = FakeSource::default()
            .table("hollow", &[])
            .table("solid", &[("id", "INTEGER", false)]);

        let report = ReflectionReport::from_outcomes(
            reflect_schema(&mut src, &TableFilter::default()).await.unwrap(),
        );
        assert_eq!(report.tables.len(), 1);
        assert_eq!(report.empty, vec!["hollow"]);
        assert!(report.skipped.is_empty());
    }

    #[tokio::test]
    async fn mismatched_composite_foreign_key_fails_the_table() {
        let mut src = FakeSource::default()
            .table("child", &[("pa", "INTEGER", true), ("pb", "INTEGER", true)])
            .table("other", &[("id", "INTEGER", false)]);
        src.foreign_keys.insert(
            s("child"),
            vec![RawForeignKey {
                name: s("fk_parent"),
                columns: vec![s("pa"), s("pb")],
                referred_table: s("parent"),
                referred_columns: vec![s("a")],
            }],
        );

        let report = ReflectionReport::from_outcomes(
            reflect_schema(&mut src, &TableFilter::default()).await.unwrap(),
        );
        assert_eq!(report.tables.len(), 1);
        assert_eq!(report.tables[0].name, "other");
        assert_eq!(report.skipped[0].0, "child");
    }

    #[tokio::test]
    async fn composite_foreign_key_pairs_by_position() {
        let mut src = FakeSource::default().table(
            "child",
            &[("id", "INTEGER", false), ("pb", "INTEGER", true), ("pa", "INTEGER", true)],
        );
        src.foreign_keys.insert(
            s("child"),
            vec![RawForeignKey {
                name: s("fk_parent"),
                columns: vec![s("pa"), s("pb")],
                referred_table: s("parent"),
                referred_columns: vec![s("a"), s("b")],
            }],
        );

        let tables = reflected(reflect_schema(&mut src, &TableFilter::default()).await.unwrap());
        let labels: Vec<_> = tables[0]
            .columns
            .iter()
            .map(|c| c.foreign_key.as_ref().map(|fk| fk.label()))
            .collect();
        assert_eq!(labels, vec![None, Some(s("parent.b")), Some(s("parent.a"))]);
    }

    #[tokio::test]
    async fn unknown_primary_key_column_fails_the_table() {
        let mut src = FakeSource::default().table("t", &[("id", "INTEGER", false)]);
        src.primary_keys.insert(s("t"), vec![s("ghost")]);

        let report = ReflectionReport::from_outcomes(
            reflect_schema(&mut src, &TableFilter::default()).await.unwrap(),
        );
        assert!(report.tables.is_empty());
        assert_eq!(report.skipped.len(), 1);
    }

    #[tokio::test]
    async fn comments_are_attached_when_supported() {
        let mut src = FakeSource {
            with_comments: true,
            ..Default::default()
        }
        .table("EMP", &[("EMPNO", "NUMBER(4,0)", false), ("ENAME", "VARCHAR2(10)", true)]);

        let mut columns = HashMap::new();
        columns.insert(s("EMPNO"), s("Employee number"));
        columns.insert(s("ENAME"), s("  "));
        src.comments.insert(
            s("EMP"),
            TableComments {
                table: Some(s("Employees")),
                columns,
            },
        );

        let tables = reflected(reflect_schema(&mut src, &TableFilter::default()).await.unwrap());
        assert_eq!(tables[0].comment.as_deref(), Some("Employees"));
        assert_eq!(tables[0].columns[0].comment.as_deref(), Some("Employee number"));
        assert_eq!(tables[0].columns[1].comment, None);
    }

    #[tokio::test]
    async fn filter_limits_reflected_tables() {
        let mut src = FakeSource::default()
            .table("audit", &[("id", "INTEGER", false)])
            .table("orders", &[("id", "INTEGER", false)])
            .table("users", &[("id", "INTEGER", false)]);

        let filter = TableFilter::new(&[s("orders"), s("users")], &[s("users")]);
        let tables = reflected(reflect_schema(&mut src, &filter).await.unwrap());
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "orders");
    }

    #[tokio::test]
    async fn reflection_is_repeatable() {
        let ddl = "CREATE TABLE users (id INTEGER PRIMARY KEY, name VARCHAR NOT NULL);
                   CREATE TABLE orders (
                       id INTEGER PRIMARY KEY,
                       user_id INTEGER,
                       FOREIGN KEY (user_id) REFERENCES users (id)
                   );";
        let mut src = duck(ddl);

        let first = reflected(reflect_schema(&mut src, &TableFilter::default()).await.unwrap());
        let second = reflected(reflect_schema(&mut src, &TableFilter::default()).await.unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn duplicate_column_names_are_rejected() {
        let result = build_table(
            "t",
            vec![RawColumn::new("a", "INT", true), RawColumn::new("a", "INT", true)],
        );
        assert!(result.is_err());
    }

    #[test]
    fn first_foreign_key_wins_for_a_column() {
        let mut spec = build_table("t", vec![RawColumn::new("ref_id", "INT", true)]).unwrap();
        let fk = |name: &str, target: &str| RawForeignKey {
            name: s(name),
            columns: vec![s("ref_id")],
            referred_table: s(target),
            referred_columns: vec![s("id")],
        };
        apply_foreign_keys(&mut spec, &[fk("fk_1", "first"), fk("fk_2", "second")]).unwrap();
        assert_eq!(spec.columns[0].foreign_key, Some(ForeignKeyRef::new("first", "id")));
    }
}
