//! SchemaManager - Provides methods for schema operations in migrations

use may_postgres::types::ToSql;
use sea_query::{
    ColumnDef, IndexCreateStatement, IndexDropStatement, PostgresQueryBuilder, Table,
    TableAlterStatement, TableCreateStatement, TableDropStatement,
};
use std::fmt::Display;

use crate::executor::{DbError, Executor};

/// SchemaManager provides methods for performing schema operations in migrations
///
/// It borrows the executor of the migrator's per-unit transaction, so every
/// statement issued through it commits or rolls back together with the unit's
/// ledger record.
pub struct SchemaManager<'a> {
    executor: &'a dyn Executor,
}

impl<'a> SchemaManager<'a> {
    /// Create a new SchemaManager with the given executor
    pub fn new(executor: &'a dyn Executor) -> Self {
        Self { executor }
    }

    /// Create a table
    ///
    /// # Example
    /// ```rust,no_run
    /// # use shoreline::migration::SchemaManager;
    /// # fn up(manager: &SchemaManager<'_>) -> Result<(), shoreline::DbError> {
    /// use sea_query::{Table, ColumnDef};
    ///
    /// let table = Table::create()
    ///     .table("users")
    ///     .col(ColumnDef::new("id").integer().not_null().auto_increment().primary_key())
    ///     .col(ColumnDef::new("email").string().not_null().unique_key())
    ///     .to_owned();
    ///
    /// manager.create_table(table)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn create_table(&self, table: TableCreateStatement) -> Result<(), DbError> {
        let sql = table.build(PostgresQueryBuilder);
        self.execute(&sql, &[])
    }

    /// Drop a table
    pub fn drop_table(&self, table: TableDropStatement) -> Result<(), DbError> {
        let sql = table.build(PostgresQueryBuilder);
        self.execute(&sql, &[])
    }

    /// Alter a table
    pub fn alter_table(&self, alter: TableAlterStatement) -> Result<(), DbError> {
        let sql = alter.build(PostgresQueryBuilder);
        self.execute(&sql, &[])
    }

    /// Create an index
    pub fn create_index(&self, index: IndexCreateStatement) -> Result<(), DbError> {
        let sql = index.build(PostgresQueryBuilder);
        self.execute(&sql, &[])
    }

    /// Drop an index
    pub fn drop_index(&self, index: IndexDropStatement) -> Result<(), DbError> {
        let sql = index.build(PostgresQueryBuilder);
        self.execute(&sql, &[])
    }

    /// Add a column to an existing table
    pub fn add_column<T: Display>(&self, table: T, column: ColumnDef) -> Result<(), DbError> {
        let alter = Table::alter()
            .table(table.to_string())
            .add_column(column)
            .to_owned();
        self.alter_table(alter)
    }

    /// Drop a column from an existing table
    pub fn drop_column<T: Display>(&self, table: T, column: &str) -> Result<(), DbError> {
        let alter = Table::alter()
            .table(table.to_string())
            .drop_column(column.to_string())
            .to_owned();
        self.alter_table(alter)
    }

    /// Execute a single statement
    ///
    /// # Example
    /// ```rust,no_run
    /// # fn up(manager: &shoreline::migration::SchemaManager<'_>) -> Result<(), shoreline::DbError> {
    /// manager.execute("CREATE EXTENSION IF NOT EXISTS \"uuid-ossp\"", &[])?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn execute(&self, sql: &str, params: &[&dyn ToSql]) -> Result<(), DbError> {
        self.executor.execute(sql, params).map(|_| ())
    }

    /// Execute a script of `;`-separated statements, as read from a SQL migration file
    pub fn batch_execute(&self, sql: &str) -> Result<(), DbError> {
        self.executor.batch_execute(sql)
    }

    /// Get a reference to the underlying executor
    pub fn executor(&self) -> &dyn Executor {
        self.executor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MemoryDatabase;
    use sea_query::{Expr, Index};

    #[test]
    fn test_create_table_renders_postgres_ddl() {
        let db = MemoryDatabase::new();
        let manager = SchemaManager::new(&db);

        let table = Table::create()
            .table("users")
            .col(ColumnDef::new("id").big_integer().not_null().primary_key())
            .to_owned();
        manager.create_table(table).unwrap();

        let statements = db.committed_statements();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].starts_with("CREATE TABLE \"users\""), "{}", statements[0]);
    }

    #[test]
    fn test_index_and_column_helpers() {
        let db = MemoryDatabase::new();
        let manager = SchemaManager::new(&db);

        let index = Index::create()
            .name("idx_users_email")
            .table("users")
            .col(Expr::col("email"))
            .to_owned();
        manager.create_index(index).unwrap();
        manager.drop_column("users", "nickname").unwrap();

        let statements = db.committed_statements();
        assert!(statements[0].contains("\"idx_users_email\""));
        assert!(statements[1].starts_with("ALTER TABLE \"users\""));
        assert!(statements[1].contains("DROP COLUMN \"nickname\""));
    }
}
