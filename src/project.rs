use crate::schema::{ForeignKeyRef, TableSpec};
use serde::Serialize;

/// One output row: a column together with its owning table's name and
/// comment, so each row stands on its own when rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnRow {
    pub table_name: String,
    pub table_comment: Option<String>,
    pub column_name: String,
    pub column_comment: Option<String>,
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub foreign_key: Option<ForeignKeyRef>,
    pub has_foreign_key: bool,
    /// `table.column` of the referenced column, empty without a foreign key.
    pub foreign_key_label: String,
}

/// Flattens tables into rows: tables in the given order, then columns in
/// their physical order. Nothing is sorted or grouped here.
pub fn project(tables: &[TableSpec]) -> Vec<ColumnRow> {
    tables
        .iter()
        .flat_map(|table| {
            table.columns.iter().map(move |column| ColumnRow {
                table_name: table.name.clone(),
                table_comment: table.comment.clone(),
                column_name: column.name.clone(),
                column_comment: column.comment.clone(),
                data_type: column.data_type.clone(),
                nullable: column.nullable,
                is_primary_key: column.is_primary_key,
                foreign_key: column.foreign_key.clone(),
                has_foreign_key: column.foreign_key.is_some(),
                foreign_key_label: column
                    .foreign_key
                    .as_ref()
                    .map(ForeignKeyRef::label)
                    .unwrap_or_default(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSpec;

    fn users_and_orders() -> Vec<TableSpec> {
        let mut orders = TableSpec::new("orders");
        let mut id = ColumnSpec::new("id", "INTEGER", false);
        id.is_primary_key = true;
        let mut user_id = ColumnSpec::new("user_id", "INTEGER", true);
        user_id.foreign_key = Some(ForeignKeyRef::new("users", "id"));
        orders.columns = vec![id.clone(), user_id];

        let mut users = TableSpec::new("users");
        users.comment = Some("People who order things".to_string());
        users.columns = vec![id, ColumnSpec::new("name", "VARCHAR", true)];

        vec![orders, users]
    }

    #[test]
    fn users_and_orders_yield_three_rows() {
        let mut tables = users_and_orders();
        tables[1].columns.truncate(1);
        let rows = project(&tables);

        assert_eq!(rows.len(), 3);
        let user_id = &rows[1];
        assert_eq!(user_id.table_name, "orders");
        assert_eq!(user_id.column_name, "user_id");
        assert_eq!(user_id.foreign_key_label, "users.id");
        assert!(user_id.has_foreign_key);
        assert!(!user_id.is_primary_key);
    }

    #[test]
    fn rows_are_contiguous_per_table_and_carry_table_metadata() {
        let rows = project(&users_and_orders());
        let owners: Vec<_> = rows.iter().map(|r| r.table_name.as_str()).collect();
        assert_eq!(owners, vec!["orders", "orders", "users", "users"]);

        assert!(rows[..2].iter().all(|r| r.table_comment.is_none()));
        assert!(rows[2..]
            .iter()
            .all(|r| r.table_comment.as_deref() == Some("People who order things")));
    }

    #[test]
    fn reordering_columns_reorders_rows() {
        let mut tables = users_and_orders();
        tables[0].columns.reverse();
        let rows = project(&tables);
        assert_eq!(rows[0].column_name, "user_id");
        assert_eq!(rows[1].column_name, "id");
    }

    #[test]
    fn label_is_empty_exactly_when_no_foreign_key() {
        for row in project(&users_and_orders()) {
            assert_eq!(row.foreign_key_label.is_empty(), row.foreign_key.is_none());
            assert_eq!(row.has_foreign_key, row.foreign_key.is_some());
        }
    }

    #[test]
    fn key_and_reference_can_coexist() {
        let mut table = TableSpec::new("profiles");
        let mut user_id = ColumnSpec::new("user_id", "INTEGER", false);
        user_id.is_primary_key = true;
        user_id.foreign_key = Some(ForeignKeyRef::new("users", "id"));
        table.columns.push(user_id);

        let rows = project(&[table]);
        assert!(rows[0].is_primary_key);
        assert_eq!(rows[0].foreign_key_label, "users.id");
    }

    #[test]
    fn empty_input_projects_to_nothing() {
        assert!(project(&[]).is_empty());
    }

    #[test]
    fn projection_is_deterministic() {
        let tables = users_and_orders();
        assert_eq!(project(&tables), project(&tables));
    }
}
