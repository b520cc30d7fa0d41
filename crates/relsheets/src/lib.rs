//! Meta crate that re-exports the Relational Sheets building blocks.
//!
//! Most users need [`Sheet`], a [`Catalog`] and a backend. The layer crates
//! stay reachable as modules for deeper integration.

pub use relsheets_common as common;
pub use relsheets_db as db;
pub use relsheets_eval as eval;
pub use relsheets_parse as parse;
pub use relsheets_sql as sql;

pub use relsheets_common::{
    Cell, Column, ConstraintId, ErrorKind, ForeignKey, Result, SheetError, TableName,
    TableValues, Value, ValueMap,
};
pub use relsheets_db::{Catalog, Database, JoinPath, available_joins, insert_rows, update_rows};
pub use relsheets_eval::{ColumnPref, EvalConfig, Sheet, SheetCell, SheetColumn};
pub use relsheets_parse::{FORMULA_MARKER, RangeRef, Tokenizer};

#[cfg(feature = "sqlite")]
pub use relsheets_db::SqliteBackend;

#[cfg(feature = "postgres")]
pub use relsheets_db::PostgresBackend;

pub mod doc_examples;
