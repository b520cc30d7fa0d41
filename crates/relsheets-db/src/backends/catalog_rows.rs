//! Row-to-record mapping for the catalog queries. Both backends shape their
//! catalog SQL to return the same columns, so the mapping lives here once.

use relsheets_common::{Column, ConstraintId, ForeignKey, Result, SheetError, TableName};

use crate::traits::Row;

fn field(row: &Row, i: usize) -> Result<&str> {
    row.get(i)
        .and_then(|v| v.as_deref())
        .ok_or_else(|| SheetError::internal(format!("catalog row is missing field {i}")))
}

fn flag(row: &Row, i: usize) -> Result<bool> {
    match field(row, i)? {
        "YES" => Ok(true),
        "NO" => Ok(false),
        other => Err(SheetError::internal(format!("unexpected catalog flag {other}"))),
    }
}

fn integer(row: &Row, i: usize) -> Result<i64> {
    let raw = field(row, i)?;
    raw.parse()
        .map_err(|_| SheetError::internal(format!("expected an integer in the catalog, got {raw}")))
}

/// `(schema, table)`
pub(crate) fn tables(rows: Vec<Row>) -> Result<Vec<TableName>> {
    rows.iter()
        .map(|row| Ok(TableName::new(field(row, 0)?, field(row, 1)?)))
        .collect()
}

/// `(name, nullable YES/NO, data type, primary key YES/NO, ordinal)`
pub(crate) fn columns(rows: Vec<Row>) -> Result<Vec<Column>> {
    rows.iter()
        .map(|row| {
            Ok(Column {
                name: field(row, 0)?.to_string(),
                is_nullable: flag(row, 1)?,
                data_type: row.get(2).cloned().flatten().unwrap_or_default(),
                is_primary_key: flag(row, 3)?,
                index: integer(row, 4)?,
            })
        })
        .collect()
}

/// One row per column pair, ordered by constraint then key position:
/// `(constraint, source schema, source table, source column, target schema,
/// target table, target column)`. The target column may be NULL when the
/// key implicitly references the target's primary key; such keys come back
/// with empty `target_columns` for the backend to fill in.
pub(crate) fn foreign_keys(
    rows: Vec<Row>,
    constraint_id: impl Fn(&Row) -> Result<ConstraintId>,
) -> Result<Vec<(ConstraintId, ForeignKey)>> {
    let mut keys: Vec<(ConstraintId, ForeignKey)> = Vec::new();
    for row in &rows {
        let id = constraint_id(row)?;
        let source_column = field(row, 3)?.to_string();
        let target_column = row.get(6).cloned().flatten();
        match keys.last_mut() {
            Some((last, fkey)) if *last == id => {
                fkey.source_columns.push(source_column);
                fkey.target_columns.extend(target_column);
            }
            _ => keys.push((
                id,
                ForeignKey {
                    source_table: TableName::new(field(row, 1)?, field(row, 2)?),
                    target_table: TableName::new(field(row, 4)?, field(row, 5)?),
                    source_columns: vec![source_column],
                    target_columns: target_column.into_iter().collect(),
                },
            )),
        }
    }
    Ok(keys)
}

/// Constraint id carried as the first field.
pub(crate) fn leading_id(row: &Row) -> Result<ConstraintId> {
    integer(row, 0).map(ConstraintId)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[Option<&str>]) -> Row {
        fields.iter().map(|f| f.map(str::to_string)).collect()
    }

    #[test]
    fn groups_composite_keys() {
        let rows = vec![
            row(&[Some("7"), Some("s"), Some("a"), Some("x1"), Some("s"), Some("b"), Some("y1")]),
            row(&[Some("7"), Some("s"), Some("a"), Some("x2"), Some("s"), Some("b"), Some("y2")]),
            row(&[Some("9"), Some("s"), Some("a"), Some("z"), Some("s"), Some("c"), None]),
        ];
        let keys = foreign_keys(rows, leading_id).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].0, ConstraintId(7));
        assert_eq!(keys[0].1.source_columns, vec!["x1", "x2"]);
        assert_eq!(keys[0].1.target_columns, vec!["y1", "y2"]);
        assert!(keys[1].1.target_columns.is_empty());
    }

    #[test]
    fn malformed_rows_are_internal_errors() {
        let err = columns(vec![row(&[Some("id"), Some("maybe"), None, Some("NO"), Some("1")])])
            .unwrap_err();
        assert!(err.is(relsheets_common::ErrorKind::Internal));
    }
}
