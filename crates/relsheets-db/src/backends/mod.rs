#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;

#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) mod catalog_rows;
