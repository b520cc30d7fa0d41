//! SQL text is only ever produced here. Everything that reaches a database
//! driver is a [`SafeSql`], built from escaped identifiers, whitelisted
//! operators and casts, and placeholders for values.

pub mod aggregate;
pub mod safe;
pub mod statement;

pub use aggregate::{
    Aggregate, CONDITION_ALIAS, CRITERION_PARAM, Criterion, Dialect, VALUE_ALIAS, aggregate_query,
};
pub use safe::{
    CAST_TYPES, Comparison, SafeSql, escape_identifier, escape_operand, is_constant, make_cast,
    make_clause, make_filter_clause, make_order_expr,
};
pub use statement::{Join, Select, insert, update};
