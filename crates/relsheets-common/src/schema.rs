use std::fmt::{self, Display};
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::SheetError;

/// `<schema>.<table>`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableName {
    pub schema: String,
    pub table: String,
}

impl TableName {
    pub fn new<S: Into<String>, T: Into<String>>(schema: S, table: T) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// `<schema>.<table>.<column>`.
    pub fn column(&self, column: &str) -> String {
        format!("{}.{}.{}", self.schema, self.table, column)
    }
}

impl Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

impl FromStr for TableName {
    type Err = SheetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((schema, table)) if !schema.is_empty() && !table.is_empty() => {
                Ok(TableName::new(schema, table))
            }
            _ => Err(SheetError::resolution(format!(
                "tables must be specified as <schema>.<table>, got {s}"
            ))),
        }
    }
}

/// Stable identifier of a constraint in the database catalog.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstraintId(pub i64);

impl Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    pub name: String,
    pub is_nullable: bool,
    pub data_type: String,
    pub is_primary_key: bool,
    /// Declared ordinal position, 1-based.
    pub index: i64,
}

/// Source columns reference target columns. Stored without a direction:
/// which side is "the other table" depends on who asks.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKey {
    pub source_table: TableName,
    pub target_table: TableName,
    pub source_columns: Vec<String>,
    pub target_columns: Vec<String>,
}

impl ForeignKey {
    pub fn touches(&self, table: &TableName) -> bool {
        &self.source_table == table || &self.target_table == table
    }

    /// The table on the far side of this key, seen from `table`.
    pub fn other_side(&self, table: &TableName) -> Option<&TableName> {
        if &self.source_table == table {
            Some(&self.target_table)
        } else if &self.target_table == table {
            Some(&self.source_table)
        } else {
            None
        }
    }

    /// `(source column, target column)` pairs.
    pub fn column_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.source_columns
            .iter()
            .zip(self.target_columns.iter())
            .map(|(s, t)| (s.as_str(), t.as_str()))
    }
}

impl Display for ForeignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}->{}.{}",
            self.source_table,
            self.source_columns.join(","),
            self.target_table,
            self.target_columns.join(",")
        )
    }
}
