//! PostgreSQL backend over the blocking `postgres` client.
//!
//! Every parameter is sent in text format and every result column is cast
//! to text by the statement builders, so values cross the wire as strings
//! in both directions and the server does all type conversion.

use std::collections::HashMap;
use std::error::Error;

use bytes::BytesMut;
use postgres::types::{Format, IsNull, ToSql, Type, to_sql_checked};
use postgres::{Client, GenericClient, NoTls};
use relsheets_common::{
    Column, ConstraintId, ErrorKind, ForeignKey, Result, SheetError, TableName, ValueMap,
};
use relsheets_sql::{Dialect, SafeSql};
use tracing::{debug, info};

use super::catalog_rows;
use crate::traits::{Database, Executor, Params, Row};

const LIST_TABLES: &str = "SELECT schemaname::text, tablename::text FROM pg_catalog.pg_tables \
     WHERE schemaname NOT IN ('pg_catalog', 'information_schema') ORDER BY 1, 2";

const TABLE_COLUMNS: &str = "SELECT c.column_name::text, c.is_nullable::text, c.data_type::text, \
     CASE WHEN EXISTS ( \
         SELECT 1 FROM pg_catalog.pg_constraint k \
         JOIN pg_catalog.pg_class t ON t.oid = k.conrelid \
         JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace \
         JOIN pg_catalog.pg_attribute a ON a.attrelid = k.conrelid AND a.attnum = ANY (k.conkey) \
         WHERE k.contype = 'p' AND n.nspname = c.table_schema \
           AND t.relname = c.table_name AND a.attname = c.column_name \
     ) THEN 'YES' ELSE 'NO' END, \
     c.ordinal_position::text \
     FROM information_schema.columns c \
     WHERE c.table_schema = $1 AND c.table_name = $2 \
     ORDER BY c.ordinal_position";

const FOREIGN_KEYS: &str = "SELECT c.oid::bigint::text, sn.nspname::text, sc.relname::text, sa.attname::text, \
     tn.nspname::text, tc.relname::text, ta.attname::text \
     FROM pg_catalog.pg_constraint c \
     JOIN pg_catalog.pg_class sc ON sc.oid = c.conrelid \
     JOIN pg_catalog.pg_namespace sn ON sn.oid = sc.relnamespace \
     JOIN pg_catalog.pg_class tc ON tc.oid = c.confrelid \
     JOIN pg_catalog.pg_namespace tn ON tn.oid = tc.relnamespace \
     CROSS JOIN LATERAL unnest(c.conkey, c.confkey) WITH ORDINALITY AS k(src, tgt, ord) \
     JOIN pg_catalog.pg_attribute sa ON sa.attrelid = c.conrelid AND sa.attnum = k.src \
     JOIN pg_catalog.pg_attribute ta ON ta.attrelid = c.confrelid AND ta.attnum = k.tgt \
     WHERE c.contype = 'f' \
       AND ((sn.nspname = $1 AND sc.relname = $2) OR (tn.nspname = $1 AND tc.relname = $2)) \
     ORDER BY c.oid, k.ord";

const INSTALL_AGGREGATES: &str = "CREATE SCHEMA IF NOT EXISTS db_interface; \
     CREATE OR REPLACE AGGREGATE db_interface.mul(numeric) (SFUNC = numeric_mul, STYPE = numeric);";

/// A parameter sent as text; the server parses it as whatever type the
/// statement expects.
#[derive(Debug)]
struct TextParam<'a>(Option<&'a str>);

impl ToSql for TextParam<'_> {
    fn to_sql(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self.0 {
            Some(text) => {
                out.extend_from_slice(text.as_bytes());
                Ok(IsNull::No)
            }
            None => Ok(IsNull::Yes),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}

/// Rewrite `:name` placeholders to `$n`, returning the values in `$n` order.
/// Quoted identifiers, string literals and `::` casts are left alone.
fn rewrite_named<'v>(sql: &str, values: &'v ValueMap) -> (String, Vec<Option<&'v str>>) {
    let mut out = String::with_capacity(sql.len());
    let mut order: HashMap<&str, usize> = HashMap::new();
    let mut bound = Vec::new();
    let mut quote: Option<char> = None;
    let mut prev = '\0';
    let mut chars = sql.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == ':' && prev != ':' => {
                let starts_name = chars
                    .peek()
                    .is_some_and(|(_, n)| n.is_ascii_alphabetic() || *n == '_');
                if starts_name {
                    let start = i + 1;
                    let mut end = start;
                    while let Some(&(j, n)) = chars.peek() {
                        if n.is_ascii_alphabetic() || n == '_' {
                            end = j + n.len_utf8();
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    let name = &sql[start..end];
                    let next = order.len() + 1;
                    let index = *order.entry(name).or_insert_with(|| {
                        bound.push(values.get(name).and_then(|v| v.as_text()));
                        next
                    });
                    out.push('$');
                    out.push_str(&index.to_string());
                    prev = 'a';
                    continue;
                }
            }
            None => {}
        }
        out.push(c);
        prev = c;
    }
    (out, bound)
}

fn prepare<'p>(sql: &SafeSql, params: &'p Params) -> (String, Vec<TextParam<'p>>) {
    match params {
        Params::None => (sql.to_string(), Vec::new()),
        Params::Positional(values) => (
            sql.to_string(),
            values.iter().map(|v| TextParam(v.as_text())).collect(),
        ),
        Params::Named(values) => {
            let (text, bound) = rewrite_named(sql.as_str(), values);
            (text, bound.into_iter().map(TextParam).collect())
        }
    }
}

struct PgExecutor<'c, C: GenericClient>(&'c mut C);

impl<C: GenericClient> Executor for PgExecutor<'_, C> {
    fn query(&mut self, sql: &SafeSql, params: &Params) -> Result<Vec<Row>> {
        debug!(%sql, %params, "query");
        let (text, bound) = prepare(sql, params);
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = self.0.query(text.as_str(), &refs).map_err(SheetError::database)?;
        rows.iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| row.try_get::<_, Option<String>>(i))
                    .collect::<std::result::Result<Row, _>>()
                    .map_err(SheetError::database)
            })
            .collect()
    }

    fn execute(&mut self, sql: &SafeSql, params: &Params) -> Result<u64> {
        debug!(%sql, %params, "execute");
        let (text, bound) = prepare(sql, params);
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        self.0.execute(text.as_str(), &refs).map_err(SheetError::database)
    }
}

pub struct PostgresBackend {
    client: Client,
}

impl PostgresBackend {
    pub fn connect(url: &str) -> Result<Self> {
        let client = Client::connect(url, NoTls).map_err(SheetError::database)?;
        info!("connected to postgres");
        Ok(Self { client })
    }

    /// Connect using the `DATABASE_URL` environment variable.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("DATABASE_URL").map_err(|_| {
            SheetError::new(ErrorKind::Database).with_message("DATABASE_URL is not set")
        })?;
        Self::connect(&url)
    }

    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }
}

impl Executor for PostgresBackend {
    fn query(&mut self, sql: &SafeSql, params: &Params) -> Result<Vec<Row>> {
        PgExecutor(&mut self.client).query(sql, params)
    }

    fn execute(&mut self, sql: &SafeSql, params: &Params) -> Result<u64> {
        PgExecutor(&mut self.client).execute(sql, params)
    }
}

impl Database for PostgresBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
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
        catalog_rows::foreign_keys(rows, catalog_rows::leading_id)
    }

    fn install_aggregates(&mut self) -> Result<()> {
        self.client
            .batch_execute(INSTALL_AGGREGATES)
            .map_err(SheetError::database)
    }

    fn with_transaction(
        &mut self,
        f: &mut dyn FnMut(&mut dyn Executor) -> Result<()>,
    ) -> Result<()> {
        let mut tx = self.client.transaction().map_err(SheetError::database)?;
        match f(&mut PgExecutor(&mut tx)) {
            Ok(()) => tx.commit().map_err(SheetError::database),
            Err(err) => {
                tx.rollback().map_err(SheetError::database)?;
                Err(err)
            }
        }
    }
}
