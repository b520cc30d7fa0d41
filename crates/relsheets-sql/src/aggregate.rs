//! Aggregate pushdown.
//!
//! The caller builds the row window as an ordinary paginated [`Select`]
//! projecting `"val"` (and `"cond"` for the `*IF` family); this module
//! wraps it in the aggregate. The criterion operand is bound as the third
//! positional parameter, after `LIMIT $1 OFFSET $2`.
//!
//! [`Select`]: crate::Select

use std::fmt::{self, Display};

use relsheets_common::SheetError;

use crate::safe::{Comparison, SafeSql};

/// Placeholder holding the criterion operand.
pub const CRITERION_PARAM: &str = "$3";

/// Alias of the value column in the windowed subquery.
pub const VALUE_ALIAS: &str = "val";

/// Alias of the condition column in the windowed subquery.
pub const CONDITION_ALIAS: &str = "cond";

/// SQL flavour, where statement text differs between backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// The user-defined multiplicative aggregate installed by the backend.
    pub fn product_function(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "mul",
            Dialect::Postgres => "\"db_interface\".\"mul\"",
        }
    }
}

impl Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregate {
    Sum,
    Max,
    Min,
    Product,
    /// Non-null values.
    Count,
    /// Rows, null or not.
    CountRows,
}

impl Aggregate {
    fn render(&self, dialect: Dialect) -> String {
        let val = format!("\"sq\".\"{VALUE_ALIAS}\"");
        let expr = match self {
            Aggregate::Sum => format!("SUM({val})"),
            Aggregate::Max => format!("MAX({val})"),
            Aggregate::Min => format!("MIN({val})"),
            Aggregate::Product => format!("{}({val})", dialect.product_function()),
            Aggregate::Count => format!("COUNT({val})"),
            Aggregate::CountRows => "COUNT(*)".to_string(),
        };
        format!("CAST({expr} AS text)")
    }
}

/// Condition applied to `"cond"` after the window is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Criterion {
    pub op: Comparison,
    /// Compare as numbers rather than text.
    pub numeric: bool,
}

impl Criterion {
    fn render(&self) -> String {
        let cast = if self.numeric && self.op != Comparison::Like {
            "numeric"
        } else {
            "text"
        };
        format!(
            "CAST(\"sq\".\"{CONDITION_ALIAS}\" AS {cast}) {} CAST({CRITERION_PARAM} AS {cast})",
            self.op.as_sql()
        )
    }
}

/// `SELECT CAST(SUM("sq"."val") AS text), ... FROM (<window>) AS "sq"`.
/// One result column per requested aggregate, in order.
pub fn aggregate_query(
    window: &SafeSql,
    aggregates: &[Aggregate],
    criterion: Option<Criterion>,
    dialect: Dialect,
) -> Result<SafeSql, SheetError> {
    if aggregates.is_empty() {
        return Err(SheetError::unsafe_sql("no aggregate requested"));
    }
    let projections: Vec<String> = aggregates.iter().map(|a| a.render(dialect)).collect();
    let mut sql = format!(
        "SELECT {} FROM ({window}) AS \"sq\"",
        projections.join(", ")
    );
    if let Some(criterion) = criterion {
        sql.push_str(" WHERE ");
        sql.push_str(&criterion.render());
    }
    Ok(SafeSql::trusted(sql))
}
