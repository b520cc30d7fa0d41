//! One error type for every layer of the engine.
//!
//! - **`ErrorKind`** : which class of failure occurred (parse, resolution, SQL safety, ...)
//! - **`SheetError`**: the kind plus a human readable message
//!
//! Errors are values: nothing in the formula, SQL, or graph layers aborts the
//! process. `ErrorKind::Internal` marks schema-introspection invariants that
//! should never fail for well-formed catalogs.

use std::fmt;

use thiserror::Error;

/// Classes of failure, grouped the way callers react to them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed range, unmatched parentheses, unknown function, bad row index.
    Parse,
    /// Non-numeric operand, misplaced logical operator, division by zero.
    Eval,
    /// Unknown column or table, row out of the loaded bounds, misaligned ranges.
    Resolution,
    /// Identifier with a quote, operator or cast outside the whitelist, empty value set.
    Unsafe,
    /// Unknown foreign key on a join path, dependency cycle.
    Graph,
    /// Insert/update preconditions (no primary key, all fields empty).
    Write,
    /// Failure reported by the database driver.
    Database,
    /// The catalog produced something the registry cannot map.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parse => "parse error",
            Self::Eval => "evaluation error",
            Self::Resolution => "resolution error",
            Self::Unsafe => "unsafe SQL",
            Self::Graph => "join graph error",
            Self::Write => "write error",
            Self::Database => "database error",
            Self::Internal => "internal error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("{kind}: {message}")]
pub struct SheetError {
    pub kind: ErrorKind,
    pub message: String,
}

pub type Result<T, E = SheetError> = std::result::Result<T, E>;

/* ───────────────────── Constructors & helpers ─────────────────────── */

impl From<ErrorKind> for SheetError {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: String::new(),
        }
    }
}

impl SheetError {
    pub fn new(kind: ErrorKind) -> Self {
        kind.into()
    }

    pub fn with_message<S: Into<String>>(mut self, msg: S) -> Self {
        self.message = msg.into();
        self
    }

    /// Prefix the message with where the failure happened, keeping the kind.
    pub fn context<S: AsRef<str>>(mut self, ctx: S) -> Self {
        self.message = format!("{}: {}", ctx.as_ref(), self.message);
        self
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::Parse).with_message(msg)
    }

    pub fn eval<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::Eval).with_message(msg)
    }

    pub fn resolution<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::Resolution).with_message(msg)
    }

    pub fn unsafe_sql<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::Unsafe).with_message(msg)
    }

    pub fn graph<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::Graph).with_message(msg)
    }

    pub fn write<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::Write).with_message(msg)
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::Internal).with_message(msg)
    }

    /// Wrap a driver error, keeping its rendered message.
    pub fn database<E: std::error::Error>(err: E) -> Self {
        Self::new(ErrorKind::Database).with_message(err.to_string())
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl From<SheetError> for String {
    fn from(error: SheetError) -> Self {
        error.to_string()
    }
}
