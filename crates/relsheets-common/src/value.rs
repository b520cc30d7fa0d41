use std::collections::BTreeMap;
use std::fmt::{self, Display};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One database or computed value. Absence (`present == false`) is distinct
/// from the empty string.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Cell {
    pub value: String,
    pub present: bool,
}

impl Cell {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self {
            value: value.into(),
            present: true,
        }
    }

    pub fn absent() -> Self {
        Self::default()
    }

    /// Text as read back from the database, `None` for SQL NULL.
    pub fn from_sql(value: Option<String>) -> Self {
        match value {
            Some(value) => Self::new(value),
            None => Self::absent(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.present.then_some(self.value.as_str())
    }
}

impl Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// A bound parameter for INSERT/UPDATE payloads.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Text(String),
    Null,
}

impl Value {
    /// Form input convention: an empty field means "no value".
    pub fn from_input(raw: &str) -> Self {
        if raw.is_empty() {
            Value::Null
        } else {
            Value::Text(raw.to_string())
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Null => f.write_str("NULL"),
        }
    }
}

/// Column name to value, for one table row.
pub type ValueMap = BTreeMap<String, Value>;

/// Qualified table name to the row values written to it.
pub type TableValues = BTreeMap<String, ValueMap>;

/// True when every value is `Null`.
pub fn is_all_null(values: &ValueMap) -> bool {
    values.values().all(Value::is_null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_cell_differs_from_empty_text() {
        assert_ne!(Cell::absent(), Cell::new(""));
        assert_eq!(Cell::new("").as_str(), Some(""));
        assert_eq!(Cell::absent().as_str(), None);
    }

    #[test]
    fn empty_input_becomes_null() {
        assert_eq!(Value::from_input(""), Value::Null);
        assert_eq!(Value::from_input("bob"), Value::Text("bob".into()));
    }
}
