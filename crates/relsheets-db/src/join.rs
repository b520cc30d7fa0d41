use relsheets_common::{ConstraintId, ForeignKey, Result, SheetError, TableName};
use relsheets_sql::{Join, Select};

use crate::catalog::Catalog;
use crate::traits::Database;

/// The tables a sheet displays: the base table followed by one table per
/// chosen foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPath {
    pub tables: Vec<TableName>,
    /// `joins[i]` brings in `tables[i + 1]`.
    pub joins: Vec<ForeignKey>,
}

impl JoinPath {
    pub fn single(base: TableName) -> Self {
        JoinPath {
            tables: vec![base],
            joins: Vec::new(),
        }
    }

    /// Walk `ids` from `base`. Each key is looked up on the most recently
    /// joined table first, then on earlier ones; the table on its far side
    /// joins the path.
    pub fn resolve(
        catalog: &Catalog,
        db: &mut dyn Database,
        base: &TableName,
        ids: &[ConstraintId],
    ) -> Result<Self> {
        let mut path = JoinPath::single(base.clone());
        for &id in ids {
            path.push(catalog, db, id)?;
        }
        Ok(path)
    }

    pub fn push(&mut self, catalog: &Catalog, db: &mut dyn Database, id: ConstraintId) -> Result<()> {
        let mut found = None;
        for table in self.tables.iter().rev() {
            if let Some(fkey) = catalog.foreign_key(db, table, id)? {
                let next = fkey.other_side(table).ok_or_else(|| {
                    SheetError::internal(format!("foreign key {fkey} does not touch {table}"))
                })?;
                found = Some((next.clone(), fkey.clone()));
                break;
            }
        }
        let Some((next, fkey)) = found else {
            return Err(SheetError::graph(format!(
                "foreign key {id} is not attached to any table in the sheet"
            )));
        };
        if self.tables.contains(&next) {
            return Err(SheetError::graph(format!("{next} is already joined")));
        }
        self.tables.push(next);
        self.joins.push(fkey);
        Ok(())
    }

    pub fn base(&self) -> &TableName {
        &self.tables[0]
    }

    pub fn contains(&self, table: &TableName) -> bool {
        self.tables.contains(table)
    }

    /// `SELECT` skeleton with this path's joins and no projection yet.
    pub fn select(&self) -> Select {
        self.joins
            .iter()
            .zip(self.tables.iter().skip(1))
            .fold(Select::from(self.base()), |select, (fkey, table)| {
                select.join(Join::along(fkey, table))
            })
    }
}

/// Foreign keys that could extend `path`: every key touching a table on the
/// path whose far side is not joined yet.
pub fn available_joins(
    catalog: &Catalog,
    db: &mut dyn Database,
    path: &JoinPath,
) -> Result<Vec<(ConstraintId, ForeignKey)>> {
    let mut found: Vec<(ConstraintId, ForeignKey)> = Vec::new();
    for table in &path.tables {
        for (id, fkey) in catalog.foreign_keys(db, table)? {
            let reaches_new = fkey
                .other_side(table)
                .is_some_and(|other| !path.contains(other));
            if reaches_new && !found.iter().any(|(seen, _)| seen == id) {
                found.push((*id, fkey.clone()));
            }
        }
    }
    Ok(found)
}
