//! Formula evaluation for Relational Sheets.
//!
//! A [`Sheet`] joins database tables along foreign keys and adds formula
//! columns of its own. Formulas read single cells from the loaded rows or
//! from other formula columns; set functions over database ranges run as
//! aggregate queries against the same rows the sheet displays.

pub mod aggregate;
pub mod config;
pub mod interpreter;
pub mod resolver;
pub mod sheet;

pub use aggregate::{Fold, criteria_match, parse_criteria};
pub use config::EvalConfig;
pub use interpreter::{Args, Interpreter};
pub use resolver::Target;
pub use sheet::{ColumnPref, DbColumn, Sheet, SheetCell, SheetColumn, default_column_name};
