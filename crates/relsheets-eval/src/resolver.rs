//! Range resolution: which column a formula name refers to, and the cells
//! behind a reference.
//!
//! Unqualified names are looked up among the joined tables' visible columns
//! in join-path order, then among the sheet's extra columns. Qualified
//! `<schema>.<table>.<column>` names only ever resolve to the database.

use relsheets_common::{Cell, Result, SheetError};
use relsheets_parse::RangeRef;

use crate::sheet::{DbColumn, Sheet};

/// Where a column name points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'s> {
    /// Visible column `index` of the loaded rows.
    Database { index: usize, column: &'s DbColumn },
    /// Extra column `index`.
    Extra { index: usize },
}

impl Target<'_> {
    pub fn is_database(&self) -> bool {
        matches!(self, Target::Database { .. })
    }
}

impl Sheet {
    pub fn resolve_column(&self, name: &str) -> Result<Target<'_>> {
        let parts: Vec<&str> = name.split('.').collect();
        match parts.as_slice() {
            [bare] => self
                .columns()
                .iter()
                .position(|c| c.column.name == *bare)
                .map(|index| Target::Database {
                    index,
                    column: &self.columns()[index],
                })
                .or_else(|| {
                    self.extra_columns()
                        .iter()
                        .position(|c| c.name == *bare)
                        .map(|index| Target::Extra { index })
                })
                .ok_or_else(|| SheetError::resolution(format!("no such column {bare}"))),
            [schema, table, column] => {
                let joined = self
                    .path()
                    .tables
                    .iter()
                    .find(|t| t.schema == *schema && t.table == *table)
                    .ok_or_else(|| {
                        SheetError::resolution(format!("no such table {schema}.{table}"))
                    })?;
                self.columns()
                    .iter()
                    .position(|c| &c.table == joined && c.column.name == *column)
                    .map(|index| Target::Database {
                        index,
                        column: &self.columns()[index],
                    })
                    .ok_or_else(|| {
                        SheetError::resolution(format!("no column {column} on table {joined}"))
                    })
            }
            _ => Err(SheetError::resolution(format!(
                "columns must be specified as <col> or <schema>.<table>.<col>, got {name}"
            ))),
        }
    }

    /// One cell, `row` 1-based. Database rows must be loaded; extra columns
    /// read past their end as absent.
    pub fn resolve_cell(&self, column: &str, row: u32) -> Result<Cell> {
        if row == 0 {
            return Err(SheetError::parse(format!("invalid row index in {column}{row}")));
        }
        let i = (row - 1) as usize;
        match self.resolve_column(column)? {
            Target::Database { index, .. } => self
                .rows()
                .get(i)
                .map(|r| r[index].clone())
                .ok_or_else(|| {
                    SheetError::resolution(format!(
                        "row index out of range: {row} (loaded {})",
                        self.row_count()
                    ))
                }),
            Target::Extra { index } => Ok(self.extra_columns()[index]
                .cells
                .get(i)
                .map(|c| c.cell.clone())
                .unwrap_or_default()),
        }
    }

    /// Populated cells of an extra-column range, with their 0-based rows.
    /// Absent cells are skipped.
    pub(crate) fn extra_cells(&self, index: usize, range: &RangeRef) -> Vec<(usize, &str)> {
        let cells = &self.extra_columns()[index].cells;
        let first = range.first_row() as usize - 1;
        let last = (range.last_row(u32::MAX) as usize).min(cells.len());
        (first..last)
            .filter_map(|i| cells[i].cell.as_str().map(|v| (i, v)))
            .collect()
    }
}
