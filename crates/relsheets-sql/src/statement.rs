use relsheets_common::{ForeignKey, SheetError, TableName, ValueMap};

use crate::safe::{SafeSql, escape_identifier};

/// One `LEFT JOIN <table> ON a = b AND ...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub table: TableName,
    /// Qualified column pairs compared for equality.
    pub on: Vec<(String, String)>,
}

impl Join {
    /// Join `joined` through `fkey`, whichever side of the key it is on.
    pub fn along(fkey: &ForeignKey, joined: &TableName) -> Self {
        Join {
            table: joined.clone(),
            on: fkey
                .column_pairs()
                .map(|(source, target)| {
                    (
                        fkey.source_table.column(source),
                        fkey.target_table.column(target),
                    )
                })
                .collect(),
        }
    }

    fn render(&self) -> Result<String, SheetError> {
        if self.on.is_empty() {
            return Err(SheetError::unsafe_sql(format!(
                "join to {} has no columns",
                self.table
            )));
        }
        let conditions = self
            .on
            .iter()
            .map(|(left, right)| {
                Ok(format!(
                    "{} = {}",
                    escape_identifier(left)?,
                    escape_identifier(right)?
                ))
            })
            .collect::<Result<Vec<_>, SheetError>>()?;
        Ok(format!(
            " LEFT JOIN {} ON {}",
            escape_identifier(&self.table.to_string())?,
            conditions.join(" AND ")
        ))
    }
}

/// SELECT builder. Projections, filters and orderings are already-safe
/// fragments; table names are escaped at build time.
#[derive(Debug, Clone)]
pub struct Select {
    from: TableName,
    joins: Vec<Join>,
    columns: Vec<SafeSql>,
    filters: Vec<SafeSql>,
    order: Vec<SafeSql>,
    paginate: bool,
}

impl Select {
    pub fn from(table: &TableName) -> Self {
        Select {
            from: table.clone(),
            joins: Vec::new(),
            columns: Vec::new(),
            filters: Vec::new(),
            order: Vec::new(),
            paginate: false,
        }
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn column(mut self, expr: SafeSql) -> Self {
        self.columns.push(expr);
        self
    }

    pub fn columns<I: IntoIterator<Item = SafeSql>>(mut self, exprs: I) -> Self {
        self.columns.extend(exprs);
        self
    }

    pub fn filter(mut self, clause: SafeSql) -> Self {
        self.filters.push(clause);
        self
    }

    pub fn order_by(mut self, expr: SafeSql) -> Self {
        self.order.push(expr);
        self
    }

    /// Append `LIMIT $1 OFFSET $2`.
    pub fn paginate(mut self) -> Self {
        self.paginate = true;
        self
    }

    /// Same FROM, joins, filters and order, different projection.
    pub fn with_columns<I: IntoIterator<Item = SafeSql>>(&self, exprs: I) -> Self {
        let mut select = self.clone();
        select.columns = exprs.into_iter().collect();
        select
    }

    pub fn build(&self) -> Result<SafeSql, SheetError> {
        if self.columns.is_empty() {
            return Err(SheetError::unsafe_sql(format!(
                "no columns selected from {}",
                self.from
            )));
        }
        let mut sql = format!(
            "SELECT {} FROM {}",
            SafeSql::join(&self.columns, ", "),
            escape_identifier(&self.from.to_string())?
        );
        for join in &self.joins {
            sql.push_str(&join.render()?);
        }
        if !self.filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(SafeSql::join(&self.filters, " AND ").as_str());
        }
        if !self.order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(SafeSql::join(&self.order, ", ").as_str());
        }
        if self.paginate {
            sql.push_str(" LIMIT $1 OFFSET $2");
        }
        Ok(SafeSql::trusted(sql))
    }
}

fn checked_column(name: &str) -> Result<&str, SheetError> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphabetic() || c == '_') {
        Ok(name)
    } else {
        Err(SheetError::unsafe_sql(format!("invalid column name {name:?}")))
    }
}

/// `INSERT INTO t ("a", "b") VALUES (:a, :b) RETURNING CAST("a" AS text)`.
/// Values are bound by name from the same map.
pub fn insert(
    table: &TableName,
    values: &ValueMap,
    returning: &[String],
) -> Result<SafeSql, SheetError> {
    if values.is_empty() {
        return Err(SheetError::unsafe_sql(format!("no values to insert into {table}")));
    }
    let mut columns = Vec::with_capacity(values.len());
    let mut placeholders = Vec::with_capacity(values.len());
    for name in values.keys() {
        let name = checked_column(name)?;
        columns.push(format!("\"{name}\""));
        placeholders.push(format!(":{name}"));
    }
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        escape_identifier(&table.to_string())?,
        columns.join(", "),
        placeholders.join(", ")
    );
    if !returning.is_empty() {
        let returned = returning
            .iter()
            .map(|name| Ok(format!("CAST(\"{}\" AS text)", checked_column(name)?)))
            .collect::<Result<Vec<_>, SheetError>>()?;
        sql.push_str(" RETURNING ");
        sql.push_str(&returned.join(", "));
    }
    Ok(SafeSql::trusted(sql))
}

/// `UPDATE t SET "a" = :a WHERE "id" = :id`. The two maps share one
/// placeholder namespace, so they must not overlap.
pub fn update(table: &TableName, set: &ValueMap, keys: &ValueMap) -> Result<SafeSql, SheetError> {
    if set.is_empty() {
        return Err(SheetError::unsafe_sql(format!("no values to update in {table}")));
    }
    if keys.is_empty() {
        return Err(SheetError::unsafe_sql(format!("no key to update {table} by")));
    }
    if let Some(shared) = set.keys().find(|k| keys.contains_key(*k)) {
        return Err(SheetError::unsafe_sql(format!(
            "column {shared} is both updated and used as a key"
        )));
    }
    let assign = |map: &ValueMap| {
        map.keys()
            .map(|name| checked_column(name).map(|name| format!("\"{name}\" = :{name}")))
            .collect::<Result<Vec<_>, SheetError>>()
    };
    Ok(SafeSql::trusted(format!(
        "UPDATE {} SET {} WHERE {}",
        escape_identifier(&table.to_string())?,
        assign(set)?.join(", "),
        assign(keys)?.join(" AND ")
    )))
}
