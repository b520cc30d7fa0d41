//! Database access for Relational Sheets.
//!
//! Backends implement [`Database`]; everything above them (the table
//! [`Catalog`], join paths, dependency-ordered inserts) is written against
//! the trait and never sees a driver type.

pub mod backends;
pub mod catalog;
pub mod join;
pub mod traits;
pub mod write;

pub use catalog::Catalog;
pub use join::{JoinPath, available_joins};
pub use traits::{Database, Executor, Params, Row};
pub use write::{InsertOutcome, dependency_order, insert_row, insert_rows, update_rows};

#[cfg(feature = "sqlite")]
pub use backends::SqliteBackend;

#[cfg(feature = "postgres")]
pub use backends::PostgresBackend;
