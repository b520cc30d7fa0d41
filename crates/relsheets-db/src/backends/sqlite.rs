//! SQLite backend (bundled). Schemas are SQLite databases: `main` plus
//! anything attached with [`SqliteBackend::attach`].

use std::hash::{Hash, Hasher};
use std::path::Path;
use std::time::Duration;

use relsheets_common::{Column, ConstraintId, ForeignKey, Result, SheetError, TableName};
use relsheets_sql::{Dialect, SafeSql};
use rusqlite::functions::{Aggregate, Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, Statement, params};
use rustc_hash::FxHasher;
use tracing::{debug, info};

use super::catalog_rows;
use crate::traits::{Database, Executor, Params, Row};

const LIST_TABLES: &str = "SELECT schema, name FROM pragma_table_list \
     WHERE type = 'table' AND schema <> 'temp' AND substr(name, 1, 7) <> 'sqlite_' \
     ORDER BY schema, name";

const TABLE_COLUMNS: &str = "SELECT name, \
     CASE WHEN \"notnull\" = 0 AND pk = 0 THEN 'YES' ELSE 'NO' END, \
     type, \
     CASE WHEN pk > 0 THEN 'YES' ELSE 'NO' END, \
     cid + 1 \
     FROM pragma_table_info($2, $1) ORDER BY cid";

const PRIMARY_KEY: &str = "SELECT name FROM pragma_table_info($2, $1) WHERE pk > 0 ORDER BY pk";

// Keys declared on the table plus keys on sibling tables that point at it.
const FOREIGN_KEYS: &str = "SELECT fk.id, t.schema, t.name, fk.\"from\", t.schema, fk.\"table\", fk.\"to\" \
     FROM pragma_table_list AS t, pragma_foreign_key_list(t.name, t.schema) AS fk \
     WHERE t.type = 'table' AND t.schema = $1 AND (t.name = $2 OR fk.\"table\" = $2) \
     ORDER BY t.name, fk.id, fk.seq";

/// `mul(x)`: product of the non-null inputs, NULL when there are none.
struct Mul;

impl Aggregate<Option<f64>, Option<f64>> for Mul {
    fn init(&self, _: &mut Context<'_>) -> rusqlite::Result<Option<f64>> {
        Ok(None)
    }

    fn step(&self, ctx: &mut Context<'_>, acc: &mut Option<f64>) -> rusqlite::Result<()> {
        if let Some(v) = ctx.get::<Option<f64>>(0)? {
            *acc = Some(acc.unwrap_or(1.0) * v);
        }
        Ok(())
    }

    fn finalize(&self, _: &mut Context<'_>, acc: Option<Option<f64>>) -> rusqlite::Result<Option<f64>> {
        Ok(acc.flatten())
    }
}

fn text_of(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn bind(stmt: &mut Statement<'_>, params: &Params) -> Result<()> {
    let mut bind_one = |name: &str, value: Option<&str>| -> Result<()> {
        if let Some(index) = stmt.parameter_index(name).map_err(SheetError::database)? {
            stmt.raw_bind_parameter(index, value)
                .map_err(SheetError::database)?;
        }
        Ok(())
    };
    match params {
        Params::None => Ok(()),
        Params::Positional(values) => values
            .iter()
            .enumerate()
            .try_for_each(|(i, v)| bind_one(&format!("${}", i + 1), v.as_text())),
        Params::Named(values) => values
            .iter()
            .try_for_each(|(name, v)| bind_one(&format!(":{name}"), v.as_text())),
    }
}

/// Statement execution over a borrowed connection or transaction.
struct ConnExecutor<'c>(&'c Connection);

impl Executor for ConnExecutor<'_> {
    fn query(&mut self, sql: &SafeSql, params: &Params) -> Result<Vec<Row>> {
        debug!(%sql, %params, "query");
        let mut stmt = self.0.prepare(sql.as_str()).map_err(SheetError::database)?;
        bind(&mut stmt, params)?;
        let width = stmt.column_count();
        let mut rows = stmt.raw_query();
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(SheetError::database)? {
            let values = (0..width)
                .map(|i| row.get_ref(i).map(text_of))
                .collect::<rusqlite::Result<Row>>()
                .map_err(SheetError::database)?;
            out.push(values);
        }
        Ok(out)
    }

    fn execute(&mut self, sql: &SafeSql, params: &Params) -> Result<u64> {
        debug!(%sql, %params, "execute");
        let mut stmt = self.0.prepare(sql.as_str()).map_err(SheetError::database)?;
        bind(&mut stmt, params)?;
        let affected = stmt.raw_execute().map_err(SheetError::database)?;
        Ok(affected as u64)
    }
}

pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path).map_err(SheetError::database)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory().map_err(SheetError::database)?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(SheetError::database)?;
        conn.execute_batch("PRAGMA foreign_keys = ON")
            .map_err(SheetError::database)?;
        Ok(Self { conn })
    }

    /// Attach another database file (or `:memory:`) as schema `schema`.
    pub fn attach(&mut self, path: &str, schema: &str) -> Result<()> {
        self.conn
            .execute("ATTACH DATABASE ?1 AS ?2", params![path, schema])
            .map_err(SheetError::database)?;
        info!(schema, path, "attached database");
        Ok(())
    }

    /// The underlying connection, for setup scripts.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn primary_key(&mut self, table: &TableName) -> Result<Vec<String>> {
        let rows = self.query(
            &SafeSql::from_static(PRIMARY_KEY),
            &Params::positional([table.schema.as_str(), table.table.as_str()]),
        )?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect())
    }
}

/// SQLite has no catalog-wide constraint numbering; hash the owning table
/// with the key's per-table ordinal.
fn constraint_id(row: &Row) -> Result<ConstraintId> {
    let ordinal = catalog_rows::leading_id(row)?;
    let mut hasher = FxHasher::default();
    row.get(1).hash(&mut hasher);
    row.get(2).hash(&mut hasher);
    ordinal.hash(&mut hasher);
    Ok(ConstraintId((hasher.finish() >> 1) as i64))
}

impl Executor for SqliteBackend {
    fn query(&mut self, sql: &SafeSql, params: &Params) -> Result<Vec<Row>> {
        ConnExecutor(&self.conn).query(sql, params)
    }

    fn execute(&mut self, sql: &SafeSql, params: &Params) -> Result<u64> {
        ConnExecutor(&self.conn).execute(sql, params)
    }
}

impl Database for SqliteBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn list_tables(&mut self) -> Result<Vec<TableName>> {
        let rows = self.query(&SafeSql::from_static(LIST_TABLES), &Params::None)?;
        catalog_rows::tables(rows)
    }

    fn load_columns(&mut self, table: &TableName) -> Result<Vec<Column>> {
        let rows = self.query(
            &SafeSql::from_static(TABLE_COLUMNS),
            &Params::positional([table.schema.as_str(), table.table.as_str()]),
        )?;
        catalog_rows::columns(rows)
    }

    fn load_foreign_keys(&mut self, table: &TableName) -> Result<Vec<(ConstraintId, ForeignKey)>> {
        let rows = self.query(
            &SafeSql::from_static(FOREIGN_KEYS),
            &Params::positional([table.schema.as_str(), table.table.as_str()]),
        )?;
        let mut keys = catalog_rows::foreign_keys(rows, constraint_id)?;
        for (_, fkey) in &mut keys {
            if fkey.target_columns.is_empty() {
                fkey.target_columns = self.primary_key(&fkey.target_table)?;
            }
        }
        Ok(keys)
    }

    fn install_aggregates(&mut self) -> Result<()> {
        self.conn
            .create_aggregate_function(
                "mul",
                1,
                FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
                Mul,
            )
            .map_err(SheetError::database)
    }

    fn with_transaction(
        &mut self,
        f: &mut dyn FnMut(&mut dyn Executor) -> Result<()>,
    ) -> Result<()> {
        let tx = self.conn.transaction().map_err(SheetError::database)?;
        match f(&mut ConnExecutor(&tx)) {
            Ok(()) => tx.commit().map_err(SheetError::database),
            Err(err) => {
                tx.rollback().map_err(SheetError::database)?;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> SqliteBackend {
        let mut db = SqliteBackend::open_in_memory().unwrap();
        db.attach(":memory:", "test").unwrap();
        db.connection()
            .execute_batch(
                "CREATE TABLE test.customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
                 CREATE TABLE test.orders (id INTEGER PRIMARY KEY, customer_id INTEGER REFERENCES customers);",
            )
            .unwrap();
        db
    }

    #[test]
    fn lists_attached_tables() {
        let mut db = backend();
        let tables = db.list_tables().unwrap();
        assert_eq!(
            tables,
            vec![
                TableName::new("test", "customers"),
                TableName::new("test", "orders")
            ]
        );
    }

    #[test]
    fn columns_carry_key_flags() {
        let mut db = backend();
        let cols = db.load_columns(&TableName::new("test", "customers")).unwrap();
        assert_eq!(cols.len(), 2);
        assert!(cols[0].is_primary_key);
        assert_eq!(cols[1].name, "name");
        assert!(!cols[1].is_nullable);
        assert_eq!(cols[1].index, 2);
    }

    #[test]
    fn foreign_keys_seen_from_both_ends() {
        let mut db = backend();
        let from_orders = db.load_foreign_keys(&TableName::new("test", "orders")).unwrap();
        let from_customers = db.load_foreign_keys(&TableName::new("test", "customers")).unwrap();
        assert_eq!(from_orders.len(), 1);
        assert_eq!(from_orders, from_customers);
        let fkey = &from_orders[0].1;
        assert_eq!(fkey.target_columns, vec!["id"]);
        assert_eq!(fkey.to_string(), "test.orders.customer_id->test.customers.id");
    }

    #[test]
    fn mul_aggregate() {
        let mut db = backend();
        db.install_aggregates().unwrap();
        let rows = db
            .query(
                &SafeSql::from_static("SELECT CAST(mul(x) AS text) FROM (SELECT 3 AS x UNION ALL SELECT 5 UNION ALL SELECT NULL)"),
                &Params::None,
            )
            .unwrap();
        assert_eq!(rows, vec![vec![Some("15.0".to_string())]]);
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let mut db = backend();
        let result = db.with_transaction(&mut |exec: &mut dyn Executor| {
            exec.execute(
                &SafeSql::from_static("INSERT INTO test.customers (name) VALUES ('ann')"),
                &Params::None,
            )?;
            Err(SheetError::write("abort"))
        });
        assert!(result.is_err());
        let rows = db
            .query(&SafeSql::from_static("SELECT COUNT(*) FROM test.customers"), &Params::None)
            .unwrap();
        assert_eq!(rows, vec![vec![Some("0".to_string())]]);
    }
}
