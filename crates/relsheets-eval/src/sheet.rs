//! A user's working view over the database: the join path, the loaded page
//! of rows, column preferences, and the sheet's own formula-backed columns.

use std::collections::BTreeMap;

use relsheets_common::{Cell, Column, ConstraintId, ForeignKey, Result, SheetError, TableName};
use relsheets_db::{Catalog, Database, JoinPath, Params, available_joins};
use relsheets_parse::tokenizer::to_formula_with_marker;
use relsheets_parse::{Token, Tokenizer, translate_tokens};
use relsheets_sql::{Select, make_cast, make_filter_clause, make_order_expr};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::config::EvalConfig;
use crate::interpreter::Interpreter;

/// Display and query preferences for one database column.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnPref {
    pub hide: bool,
    pub editable: bool,
    /// Display position; columns without one keep their declared ordinal.
    pub index: Option<i64>,
    pub sort_on: bool,
    pub ascending: bool,
    /// Operator plus operand, e.g. `">= 3"`.
    pub filter: Option<String>,
}

/// A visible column of one of the joined tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbColumn {
    pub table: TableName,
    pub column: Column,
}

impl DbColumn {
    /// `<schema>.<table>.<column>`.
    pub fn qualified(&self) -> String {
        self.table.column(&self.column.name)
    }
}

/// An evaluated cell together with the text that produced it.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetCell {
    pub cell: Cell,
    pub formula: String,
}

/// A formula-backed column that exists only in the sheet.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetColumn {
    pub name: String,
    pub cells: Vec<SheetCell>,
}

/// Spreadsheet-style name for the `index`-th extra column: A..Z, AA, AB, ...
pub fn default_column_name(index: usize) -> String {
    let mut name = Vec::new();
    let mut n = index + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        name.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    config: EvalConfig,
    path: JoinPath,
    join_ids: Vec<ConstraintId>,
    prefs: BTreeMap<String, ColumnPref>,
    /// Visible columns of the last load, in display order.
    columns: Vec<DbColumn>,
    /// FROM/JOIN/WHERE/ORDER BY of the last load, without a projection.
    window: Option<Select>,
    /// `rows[row][column]`, indexed like `columns`.
    rows: Vec<Vec<Cell>>,
    offset: u32,
    extra_columns: Vec<SheetColumn>,
}

impl Sheet {
    pub fn new(base: TableName) -> Self {
        Self::with_config(base, EvalConfig::default())
    }

    pub fn with_config(base: TableName, config: EvalConfig) -> Self {
        Sheet {
            name: String::new(),
            config,
            path: JoinPath::single(base),
            join_ids: Vec::new(),
            prefs: BTreeMap::new(),
            columns: Vec::new(),
            window: None,
            rows: Vec::new(),
            offset: 0,
            extra_columns: Vec::new(),
        }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub fn base(&self) -> &TableName {
        self.path.base()
    }

    pub fn path(&self) -> &JoinPath {
        &self.path
    }

    pub fn join_ids(&self) -> &[ConstraintId] {
        &self.join_ids
    }

    pub fn columns(&self) -> &[DbColumn] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Rows in the loaded page.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Offset of the loaded page within the sheet's query.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn extra_columns(&self) -> &[SheetColumn] {
        &self.extra_columns
    }

    pub(crate) fn window(&self) -> Result<&Select> {
        self.window.as_ref().ok_or_else(|| {
            SheetError::resolution(format!("rows of {} have not been loaded", self.base()))
        })
    }

    fn forget_rows(&mut self) {
        self.columns.clear();
        self.window = None;
        self.rows.clear();
        self.offset = 0;
    }

    /* ───────────────────────── join path ───────────────────────── */

    /// Switch to another base table, dropping every join.
    pub fn set_table(&mut self, catalog: &Catalog, qualified: &str) -> Result<()> {
        let table = catalog.lookup(qualified)?.clone();
        if &table == self.base() {
            return Ok(());
        }
        self.path = JoinPath::single(table);
        self.join_ids.clear();
        self.forget_rows();
        Ok(())
    }

    /// Use foreign key `id` as join number `index`. Changing a join drops
    /// the ones after it; on error the path is unchanged.
    pub fn set_join(
        &mut self,
        catalog: &Catalog,
        db: &mut dyn Database,
        index: usize,
        id: ConstraintId,
    ) -> Result<()> {
        if index > self.join_ids.len() {
            return Err(SheetError::graph(format!(
                "join {index} would leave a gap after {} joins",
                self.join_ids.len()
            )));
        }
        if self.join_ids.get(index) == Some(&id) {
            return Ok(());
        }
        let mut ids = self.join_ids[..index].to_vec();
        ids.push(id);
        let path = JoinPath::resolve(catalog, db, self.base(), &ids)?;
        self.path = path;
        self.join_ids = ids;
        self.forget_rows();
        Ok(())
    }

    /// Keep only the first `len` joins.
    pub fn truncate_joins(&mut self, len: usize) {
        if len >= self.join_ids.len() {
            return;
        }
        self.join_ids.truncate(len);
        self.path.tables.truncate(len + 1);
        self.path.joins.truncate(len);
        self.forget_rows();
    }

    /// Foreign keys that could be added as the next join.
    pub fn available_joins(
        &self,
        catalog: &Catalog,
        db: &mut dyn Database,
    ) -> Result<Vec<(ConstraintId, ForeignKey)>> {
        available_joins(catalog, db, &self.path)
    }

    /* ──────────────────────── preferences ──────────────────────── */

    /// Preferences for `<schema>.<table>.<column>`. Takes effect on the
    /// next load.
    pub fn set_pref(&mut self, qualified: &str, pref: ColumnPref) {
        self.prefs.insert(qualified.to_string(), pref);
    }

    pub fn pref(&self, qualified: &str) -> ColumnPref {
        self.prefs.get(qualified).cloned().unwrap_or_default()
    }

    fn layout(&self, catalog: &Catalog, db: &mut dyn Database) -> Result<Vec<DbColumn>> {
        let mut layout = Vec::new();
        for table in &self.path.tables {
            let mut visible: Vec<(i64, DbColumn)> = catalog
                .columns(db, table)?
                .iter()
                .map(|column| DbColumn {
                    table: table.clone(),
                    column: column.clone(),
                })
                .filter_map(|col| {
                    let pref = self.prefs.get(&col.qualified());
                    if pref.is_some_and(|p| p.hide) {
                        return None;
                    }
                    let key = pref.and_then(|p| p.index).unwrap_or(col.column.index);
                    Some((key, col))
                })
                .collect();
            visible.sort_by_key(|(key, _)| *key);
            layout.extend(visible.into_iter().map(|(_, col)| col));
        }
        Ok(layout)
    }

    /// Joins, filters and sort order for `columns`, ending with the base
    /// table's primary key so row numbers are stable.
    fn build_window(&self, columns: &[DbColumn], primary_key: &[String]) -> Result<Select> {
        let mut window = self.path.select();
        for col in columns {
            let Some(pref) = self.prefs.get(&col.qualified()) else {
                continue;
            };
            if let Some(filter) = pref.filter.as_deref().filter(|f| !f.trim().is_empty()) {
                window = window.filter(make_filter_clause(&col.qualified(), filter)?);
            }
        }
        for col in columns {
            match self.prefs.get(&col.qualified()) {
                Some(pref) if pref.sort_on => {
                    window = window.order_by(make_order_expr(&col.qualified(), pref.ascending)?);
                }
                _ => {}
            }
        }
        for key in primary_key {
            window = window.order_by(make_order_expr(&self.base().column(key), true)?);
        }
        Ok(window)
    }

    /* ───────────────────────── row loading ───────────────────────── */

    /// Load `limit` rows starting at `offset`, then re-evaluate every stored
    /// extra-column formula against them. Returns the number of rows.
    pub fn load_rows(
        &mut self,
        catalog: &Catalog,
        db: &mut dyn Database,
        limit: u32,
        offset: u32,
    ) -> Result<usize> {
        let span = info_span!("load_rows", table = %self.base(), limit, offset);
        let _guard = span.enter();

        let columns = self.layout(catalog, db)?;
        let primary_key = catalog.primary_key(db, self.base())?;
        let window = self.build_window(&columns, &primary_key)?;
        let projection = columns
            .iter()
            .map(|col| make_cast(&col.qualified(), Some("text"), None))
            .collect::<Result<Vec<_>>>()?;
        let sql = window.with_columns(projection).paginate().build()?;
        let rows: Vec<Vec<Cell>> = db
            .query(&sql, &Params::page(limit, offset))?
            .into_iter()
            .map(|row| row.into_iter().map(Cell::from_sql).collect())
            .collect();

        info!(rows = rows.len(), columns = columns.len(), "rows loaded");
        self.columns = columns;
        self.window = Some(window);
        self.rows = rows;
        self.offset = offset;

        let height = self.rows.len();
        for column in &mut self.extra_columns {
            if column.cells.len() < height {
                column.cells.resize(height, SheetCell::default());
            }
        }
        self.recompute(Some(db));
        Ok(self.rows.len())
    }

    /// Load the page at the current offset with the configured page size.
    pub fn reload(&mut self, catalog: &Catalog, db: &mut dyn Database) -> Result<usize> {
        let (limit, offset) = (self.config.page_size, self.offset);
        self.load_rows(catalog, db, limit, offset)
    }

    /// Re-evaluate every extra-column cell that has a formula, left to right
    /// and top to bottom. Failing cells become absent.
    pub fn recompute(&mut self, mut db: Option<&mut (dyn Database + '_)>) {
        for c in 0..self.extra_columns.len() {
            for r in 0..self.extra_columns[c].cells.len() {
                let formula = &self.extra_columns[c].cells[r].formula;
                if formula.is_empty() {
                    continue;
                }
                let formula = formula.clone();
                let result = self.evaluate(db.as_deref_mut(), &formula);
                let cell = match result {
                    Ok(evaluated) => evaluated.cell,
                    Err(err) => {
                        warn!(column = %self.extra_columns[c].name, row = r + 1, %formula, %err, "formula failed");
                        Cell::absent()
                    }
                };
                self.extra_columns[c].cells[r].cell = cell;
            }
        }
    }

    /* ─────────────────────── evaluation ─────────────────────── */

    pub fn tokenize(&self, formula: &str) -> Result<Vec<Token>> {
        Ok(Tokenizer::with_marker(formula, self.config.marker)?.items)
    }

    /// Evaluate cell text against this sheet. `db` is needed only for
    /// aggregates over database ranges.
    pub fn evaluate(&self, db: Option<&mut (dyn Database + '_)>, formula: &str) -> Result<SheetCell> {
        let tokens = self.tokenize(formula)?;
        self.evaluate_tokens(db, formula, &tokens)
    }

    fn evaluate_tokens(
        &self,
        db: Option<&mut (dyn Database + '_)>,
        formula: &str,
        tokens: &[Token],
    ) -> Result<SheetCell> {
        let token = Interpreter::new(self, db).evaluate(tokens)?;
        debug!(%formula, result = %token.value, "evaluated");
        Ok(SheetCell {
            cell: token.to_cell(),
            formula: formula.to_string(),
        })
    }

    /* ─────────────────────── extra columns ─────────────────────── */

    fn extra_index(&self, column: usize) -> Result<usize> {
        if column < self.extra_columns.len() {
            Ok(column)
        } else {
            Err(SheetError::resolution(format!("no extra column at index {column}")))
        }
    }

    fn check_unused(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(SheetError::resolution("column name may not be empty"));
        }
        if self.extra_columns.iter().any(|c| c.name == name) {
            return Err(SheetError::resolution(format!("column {name} already exists")));
        }
        Ok(())
    }

    /// Append an extra column. Without a name it gets the next default one.
    /// Returns its index.
    pub fn add_column(&mut self, name: Option<&str>) -> Result<usize> {
        let name = match name {
            Some(name) => name.to_string(),
            None => default_column_name(self.extra_columns.len()),
        };
        self.check_unused(&name)?;
        let height = self.config.extra_column_rows.max(self.rows.len());
        info!(column = %name, sheet = %self.base(), "adding column");
        self.extra_columns.push(SheetColumn {
            name,
            cells: vec![SheetCell::default(); height],
        });
        Ok(self.extra_columns.len() - 1)
    }

    pub fn rename_column(&mut self, column: usize, name: &str) -> Result<()> {
        let column = self.extra_index(column)?;
        if self.extra_columns[column].name == name {
            return Ok(());
        }
        self.check_unused(name)?;
        self.extra_columns[column].name = name.to_string();
        Ok(())
    }

    /// Remove an extra column; later columns move down one index.
    pub fn delete_column(&mut self, column: usize) -> Result<SheetColumn> {
        let column = self.extra_index(column)?;
        Ok(self.extra_columns.remove(column))
    }

    /// Evaluate `formula` and store it at `row` (0-based). Nothing changes
    /// when evaluation fails.
    pub fn set_cell(
        &mut self,
        db: Option<&mut (dyn Database + '_)>,
        column: usize,
        row: usize,
        formula: &str,
    ) -> Result<&SheetCell> {
        let column = self.extra_index(column)?;
        let cell = self.evaluate(db, formula)?;
        let cells = &mut self.extra_columns[column].cells;
        if row >= cells.len() {
            cells.resize(row + 1, SheetCell::default());
        }
        cells[row] = cell;
        Ok(&cells[row])
    }

    /// Write `formula` at `row` and every row below it, shifting its range
    /// references by the distance from `row`. The origin must evaluate, as
    /// with [`Sheet::set_cell`]; a row below it that fails keeps its shifted
    /// formula and reads as absent, as after [`Sheet::recompute`]. Returns
    /// the number of cells written.
    pub fn fill_column_down(
        &mut self,
        mut db: Option<&mut (dyn Database + '_)>,
        column: usize,
        row: usize,
        formula: &str,
    ) -> Result<usize> {
        let column = self.extra_index(column)?;
        let tokens = self.tokenize(formula)?;
        let height = self.extra_columns[column].cells.len().max(row + 1);

        let mut filled = Vec::with_capacity(height - row);
        for (k, target) in (row..height).enumerate() {
            let moved = translate_tokens(&tokens, k as i64)
                .map_err(|err| err.context(format!("row {}", target + 1)))?;
            let text = to_formula_with_marker(&moved, self.config.marker);
            let cell = match self.evaluate_tokens(db.as_deref_mut(), &text, &moved) {
                Ok(cell) => cell,
                Err(err) if k == 0 => return Err(err.context(format!("row {}", target + 1))),
                Err(err) => {
                    warn!(column = %self.extra_columns[column].name, row = target + 1, formula = %text, %err, "formula failed");
                    SheetCell {
                        cell: Cell::absent(),
                        formula: text,
                    }
                }
            };
            filled.push(cell);
        }

        let cells = &mut self.extra_columns[column].cells;
        cells.resize(row, SheetCell::default());
        cells.extend(filled);
        Ok(height - row)
    }
}
