use std::fmt;

use relsheets_common::{Column, ConstraintId, ForeignKey, Result, TableName, Value, ValueMap};
use relsheets_sql::{Dialect, SafeSql};

/// One result row. Every column is read back as text; `None` is SQL NULL.
pub type Row = Vec<Option<String>>;

/// Values bound to a statement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Params {
    #[default]
    None,
    /// Bound to `$1`, `$2`, ... in order.
    Positional(Vec<Value>),
    /// Bound to `:name` placeholders.
    Named(ValueMap),
}

impl Params {
    /// `LIMIT $1 OFFSET $2`.
    pub fn page(limit: u32, offset: u32) -> Self {
        Params::Positional(vec![
            Value::Text(limit.to_string()),
            Value::Text(offset.to_string()),
        ])
    }

    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Params::Positional(values.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::Positional(values) => values.is_empty(),
            Params::Named(values) => values.is_empty(),
        }
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Params::None => f.write_str("[]"),
            Params::Positional(values) => {
                f.write_str("[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "${}={v}", i + 1)?;
                }
                f.write_str("]")
            }
            Params::Named(values) => {
                f.write_str("[")?;
                for (i, (k, v)) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, ":{k}={v}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Runs statements. Implemented by connections and by open transactions.
pub trait Executor {
    fn query(&mut self, sql: &SafeSql, params: &Params) -> Result<Vec<Row>>;

    /// Returns the number of affected rows.
    fn execute(&mut self, sql: &SafeSql, params: &Params) -> Result<u64>;
}

/// A connection plus the catalog queries the engine needs.
pub trait Database: Executor {
    fn dialect(&self) -> Dialect;

    /// User tables in every visible schema.
    fn list_tables(&mut self) -> Result<Vec<TableName>>;

    /// Columns in declared order, with primary-key flags.
    fn load_columns(&mut self, table: &TableName) -> Result<Vec<Column>>;

    /// Foreign keys where `table` is either the source or the target.
    fn load_foreign_keys(&mut self, table: &TableName) -> Result<Vec<(ConstraintId, ForeignKey)>>;

    /// Define the multiplicative aggregate used by `PRODUCT` pushdown.
    fn install_aggregates(&mut self) -> Result<()>;

    /// Run `f` inside one transaction: commit when it returns `Ok`, roll
    /// back otherwise.
    fn with_transaction(
        &mut self,
        f: &mut dyn FnMut(&mut dyn Executor) -> Result<()>,
    ) -> Result<()>;
}
