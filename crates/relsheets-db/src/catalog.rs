//! Table registry.
//!
//! Built once from [`Database::list_tables`] and never mutated afterwards.
//! Columns and foreign keys are loaded per table on first use and cached in
//! a [`OnceCell`], so concurrent readers may share one `Catalog`.

use std::collections::BTreeMap;

use once_cell::sync::OnceCell;
use relsheets_common::{Column, ConstraintId, ForeignKey, Result, SheetError, TableName};
use tracing::info;

use crate::traits::Database;

pub type ForeignKeys = BTreeMap<ConstraintId, ForeignKey>;

#[derive(Debug, Default)]
struct TableEntry {
    columns: OnceCell<Vec<Column>>,
    foreign_keys: OnceCell<ForeignKeys>,
}

#[derive(Debug, Default)]
pub struct Catalog {
    tables: BTreeMap<TableName, TableEntry>,
}

impl Catalog {
    pub fn load(db: &mut dyn Database) -> Result<Self> {
        let catalog = Self::from_tables(db.list_tables()?);
        info!(tables = catalog.tables.len(), "catalog loaded");
        Ok(catalog)
    }

    pub fn from_tables<I: IntoIterator<Item = TableName>>(tables: I) -> Self {
        Catalog {
            tables: tables
                .into_iter()
                .map(|name| (name, TableEntry::default()))
                .collect(),
        }
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableName> {
        self.tables.keys()
    }

    pub fn contains(&self, table: &TableName) -> bool {
        self.tables.contains_key(table)
    }

    /// Look a table up by `<schema>.<table>`.
    pub fn lookup(&self, qualified: &str) -> Result<&TableName> {
        let name: TableName = qualified.parse()?;
        self.tables
            .get_key_value(&name)
            .map(|(name, _)| name)
            .ok_or_else(|| SheetError::resolution(format!("no such table {qualified}")))
    }

    fn entry(&self, table: &TableName) -> Result<&TableEntry> {
        self.tables
            .get(table)
            .ok_or_else(|| SheetError::resolution(format!("no such table {table}")))
    }

    pub fn columns(&self, db: &mut dyn Database, table: &TableName) -> Result<&[Column]> {
        let entry = self.entry(table)?;
        let columns = entry.columns.get_or_try_init(|| {
            let columns = db.load_columns(table)?;
            info!(%table, columns = columns.len(), "columns loaded");
            Ok::<_, SheetError>(columns)
        })?;
        Ok(columns)
    }

    pub fn primary_key(&self, db: &mut dyn Database, table: &TableName) -> Result<Vec<String>> {
        Ok(self
            .columns(db, table)?
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.clone())
            .collect())
    }

    /// Keys where `table` is the source or the target. Both endpoints of
    /// every key must be tables this catalog knows.
    pub fn foreign_keys(&self, db: &mut dyn Database, table: &TableName) -> Result<&ForeignKeys> {
        let entry = self.entry(table)?;
        entry.foreign_keys.get_or_try_init(|| {
            let mut keys = ForeignKeys::new();
            for (id, fkey) in db.load_foreign_keys(table)? {
                for endpoint in [&fkey.source_table, &fkey.target_table] {
                    if !self.contains(endpoint) {
                        return Err(SheetError::internal(format!(
                            "foreign key {fkey} references unknown table {endpoint}"
                        )));
                    }
                }
                keys.insert(id, fkey);
            }
            info!(%table, foreign_keys = keys.len(), "foreign keys loaded");
            Ok(keys)
        })
    }

    pub fn foreign_key(
        &self,
        db: &mut dyn Database,
        table: &TableName,
        id: ConstraintId,
    ) -> Result<Option<&ForeignKey>> {
        Ok(self.foreign_keys(db, table)?.get(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_qualified_name() {
        let catalog = Catalog::from_tables([
            TableName::new("test", "foo"),
            TableName::new("test", "bar"),
        ]);
        assert_eq!(catalog.lookup("test.foo").unwrap(), &TableName::new("test", "foo"));
        assert!(catalog.lookup("test.nope").is_err());
        assert!(catalog.lookup("foo").is_err());
        assert_eq!(catalog.tables().count(), 2);
    }
}
