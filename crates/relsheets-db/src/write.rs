//! Writes: single-row insert, dependency-ordered multi-table insert, and
//! multi-table update. Multi-table operations run in one transaction.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use relsheets_common::{
    ForeignKey, Result, SheetError, TableName, TableValues, Value, ValueMap, is_all_null,
};
use relsheets_sql::{insert, update};
use tracing::{info, info_span};

use crate::traits::{Database, Executor, Params};

/// What a multi-table insert did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Tables in the order they were inserted.
    pub order: Vec<TableName>,
    /// Columns each insert returned, for the tables that had dependents.
    pub returned: BTreeMap<TableName, ValueMap>,
}

/// Insert one row, reading `returning` back as text.
pub fn insert_row(
    exec: &mut dyn Executor,
    table: &TableName,
    values: &ValueMap,
    returning: &[String],
) -> Result<ValueMap> {
    let sql = insert(table, values, returning)?;
    let params = Params::Named(values.clone());
    if returning.is_empty() {
        exec.execute(&sql, &params)?;
        return Ok(ValueMap::new());
    }
    let row = exec
        .query(&sql, &params)?
        .into_iter()
        .next()
        .ok_or_else(|| SheetError::write(format!("insert into {table} returned no row")))?;
    Ok(returning
        .iter()
        .cloned()
        .zip(row.into_iter().map(|v| v.map_or(Value::Null, Value::Text)))
        .collect())
}

/// Order `tables` so that every foreign-key target among them comes before
/// its sources (Kahn's algorithm). Keys with an endpoint outside `tables`
/// impose no order.
pub fn dependency_order(tables: &BTreeSet<TableName>, joins: &[ForeignKey]) -> Result<Vec<TableName>> {
    let edges: Vec<(&TableName, &TableName)> = joins
        .iter()
        .filter(|f| tables.contains(&f.source_table) && tables.contains(&f.target_table))
        .map(|f| (&f.target_table, &f.source_table))
        .collect();

    let mut indegree: BTreeMap<&TableName, usize> = tables.iter().map(|t| (t, 0)).collect();
    for (_, to) in &edges {
        *indegree.entry(*to).or_default() += 1;
    }

    let mut queue: VecDeque<&TableName> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(t, _)| *t)
        .collect();
    let mut order = Vec::with_capacity(tables.len());
    while let Some(table) = queue.pop_front() {
        order.push(table.clone());
        for (from, to) in &edges {
            if *from != table {
                continue;
            }
            if let Some(d) = indegree.get_mut(to) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(*to);
                }
            }
        }
    }

    if order.len() < tables.len() {
        let stuck: Vec<String> = indegree
            .iter()
            .filter(|(_, d)| **d > 0)
            .map(|(t, _)| t.to_string())
            .collect();
        return Err(SheetError::graph(format!(
            "cycle detected among {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}

fn parse_tables<'v>(values: &'v TableValues) -> Result<BTreeMap<TableName, &'v ValueMap>> {
    values
        .iter()
        .map(|(name, row)| Ok((name.parse::<TableName>()?, row)))
        .collect()
}

/// Insert one row into each table of `values` that has a non-null value.
///
/// Tables are inserted in [`dependency_order`] over `joins`. Before each
/// insert, the key columns it references are copied in from rows inserted
/// earlier in the same call, or else from `references` (keys of existing
/// rows the caller picked). Any failure rolls back every insert.
pub fn insert_rows(
    db: &mut dyn Database,
    joins: &[ForeignKey],
    values: &TableValues,
    references: &TableValues,
) -> Result<InsertOutcome> {
    let rows: BTreeMap<TableName, &ValueMap> = parse_tables(values)?
        .into_iter()
        .filter(|(_, row)| !is_all_null(row))
        .collect();
    if rows.is_empty() {
        return Err(SheetError::write("all fields are empty"));
    }
    let references = parse_tables(references)?;
    let written: BTreeSet<TableName> = rows.keys().cloned().collect();
    let order = dependency_order(&written, joins)?;

    let span = info_span!("insert_rows", tables = order.len());
    let _guard = span.enter();

    let mut returned: BTreeMap<TableName, ValueMap> = BTreeMap::new();
    db.with_transaction(&mut |exec: &mut dyn Executor| {
        returned.clear();
        for table in &order {
            let mut row: ValueMap = rows[table]
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();

            for fkey in joins.iter().filter(|f| &f.source_table == table) {
                let known = returned
                    .get(&fkey.target_table)
                    .or_else(|| references.get(&fkey.target_table).copied());
                let Some(known) = known else { continue };
                for (source, target) in fkey.column_pairs() {
                    if let Some(v) = known.get(target).filter(|v| !v.is_null()) {
                        row.insert(source.to_string(), v.clone());
                    }
                }
            }

            let returning: Vec<String> = joins
                .iter()
                .filter(|f| &f.target_table == table && written.contains(&f.source_table))
                .flat_map(|f| f.target_columns.iter().cloned())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();

            let back = insert_row(exec, table, &row, &returning)?;
            returned.insert(table.clone(), back);
        }
        Ok(())
    })?;

    info!(tables = order.len(), "multi-table insert committed");
    Ok(InsertOutcome { order, returned })
}

/// Update one row per table, identified by `primary_keys[table]`. Empty
/// text is written as NULL. Returns the number of rows changed.
pub fn update_rows(
    db: &mut dyn Database,
    values: &TableValues,
    primary_keys: &TableValues,
) -> Result<u64> {
    let keys = parse_tables(primary_keys)?;
    let mut statements = Vec::with_capacity(values.len());
    for (table, row) in parse_tables(values)? {
        let key = keys
            .get(&table)
            .filter(|k| !k.is_empty() && !k.values().any(Value::is_null))
            .ok_or_else(|| SheetError::write(format!("no primary key values for {table}")))?;
        let set: ValueMap = row
            .iter()
            .filter(|(col, v)| key.get(*col) != Some(*v))
            .map(|(col, v)| {
                let v = match v {
                    Value::Text(s) if s.is_empty() => Value::Null,
                    other => other.clone(),
                };
                (col.clone(), v)
            })
            .collect();
        if set.is_empty() {
            continue;
        }
        let sql = update(&table, &set, key)?;
        let mut params = set;
        params.extend(key.iter().map(|(k, v)| (k.clone(), v.clone())));
        statements.push((sql, Params::Named(params)));
    }

    let span = info_span!("update_rows", tables = statements.len());
    let _guard = span.enter();

    let mut changed = 0;
    db.with_transaction(&mut |exec: &mut dyn Executor| {
        changed = 0;
        for (sql, params) in &statements {
            changed += exec.execute(sql, params)?;
        }
        Ok(())
    })?;
    info!(rows = changed, "update committed");
    Ok(changed)
}
