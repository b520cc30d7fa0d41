//! Set functions and the few scalar functions formulas may call.
//!
//! A whole-range argument over a database column is pushed down as one
//! aggregate query over the sheet's row window; over an extra column it is
//! folded in memory, skipping absent cells. Any other argument is evaluated
//! as an expression.

use regex::Regex;
use relsheets_common::{Result, SheetError};
use relsheets_db::Params;
use relsheets_parse::{RangeRef, Token};
use relsheets_sql::{
    Aggregate, CONDITION_ALIAS, Comparison, Criterion, SafeSql, VALUE_ALIAS, aggregate_query,
    make_cast,
};
use tracing::debug_span;

use crate::interpreter::{Args, Interpreter, numeric};
use crate::resolver::Target;

/// The associative set functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fold {
    Sum,
    Max,
    Min,
    Product,
}

impl Fold {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SUM" => Some(Fold::Sum),
            "MAX" => Some(Fold::Max),
            "MIN" => Some(Fold::Min),
            "PRODUCT" => Some(Fold::Product),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Fold::Sum => "SUM",
            Fold::Max => "MAX",
            Fold::Min => "MIN",
            Fold::Product => "PRODUCT",
        }
    }

    fn aggregate(&self) -> Aggregate {
        match self {
            Fold::Sum => Aggregate::Sum,
            Fold::Max => Aggregate::Max,
            Fold::Min => Aggregate::Min,
            Fold::Product => Aggregate::Product,
        }
    }

    /// Result over no values at all. MAX and MIN report 0 rather than an
    /// infinite sentinel.
    fn empty(&self) -> f64 {
        match self {
            Fold::Product => 1.0,
            Fold::Sum | Fold::Max | Fold::Min => 0.0,
        }
    }

    /// `None` is the identity: nothing folded in yet.
    fn apply(&self, acc: Option<f64>, value: f64) -> f64 {
        match (self, acc) {
            (_, None) => value,
            (Fold::Sum, Some(a)) => a + value,
            (Fold::Max, Some(a)) => a.max(value),
            (Fold::Min, Some(a)) => a.min(value),
            (Fold::Product, Some(a)) => a * value,
        }
    }
}

/// `"<=3"` is `(Le, "3")`; a criterion without an operator means equality.
pub fn parse_criteria(criteria: &str) -> Result<(Comparison, String)> {
    let criteria = criteria.trim();
    let (op, operand) = Comparison::split_prefix(criteria).unwrap_or((Comparison::Eq, criteria));
    let operand = operand.trim();
    if operand.starts_with(['<', '>', '=']) {
        return Err(SheetError::eval(format!("unsupported operator in criteria {criteria}")));
    }
    Ok((op, operand.to_string()))
}

fn parse_number(text: &str) -> Option<f64> {
    relsheets_parse::tokenizer::parse_number(text.trim())
}

/// Whether a stored cell satisfies a criterion. Numbers compare as numbers
/// when both sides are numeric, everything else compares as text.
pub fn criteria_match(op: Comparison, operand: &str, value: &str) -> bool {
    match (op, parse_number(operand), parse_number(value)) {
        (Comparison::Like, _, _) => op.compare_text(value, operand),
        (_, Some(right), Some(left)) => op.compare_numbers(left, right),
        (_, Some(_), None) => false,
        (_, None, _) => op.compare_text(value, operand),
    }
}

fn sql_number(text: Option<String>) -> Result<Option<f64>> {
    text.map(|t| {
        parse_number(&t)
            .ok_or_else(|| SheetError::eval(format!("database returned a non-numeric value {t}")))
    })
    .transpose()
}

/// A lone range token in an argument.
fn range_arg(arg: &[Token]) -> Option<Result<RangeRef>> {
    match arg {
        [only] if only.is_range() => Some(RangeRef::parse(&only.value)),
        _ => None,
    }
}

/// `LIMIT`/`OFFSET` bounding `range` within the loaded page's query.
fn window_bounds(range: &RangeRef, page_offset: u32) -> (u32, u32) {
    let first = range.first_row();
    let last = range.last_row(u32::MAX);
    (last - first + 1, page_offset.saturating_add(first - 1))
}

impl Interpreter<'_, '_> {
    pub(crate) fn call(&mut self, name: &str, args: &Args) -> Result<Token> {
        if let Some(fold) = Fold::from_name(name) {
            return self.fold(fold, args);
        }
        match name {
            "AVERAGE" => self.average(args),
            "COUNTIF" | "SUMIF" | "AVERAGEIF" => self.aggregate_if(name, args),
            "REGEXMATCH" => self.regex_match(args),
            "IF" => self.if_(args),
            _ => Err(SheetError::parse(format!("unsupported function: {name}"))),
        }
    }

    /// Run aggregates over `projection` within the rows `range` covers.
    /// `criterion` filters the windowed rows and binds its operand as `$3`.
    fn push_down(
        &mut self,
        function: &str,
        range: &RangeRef,
        projection: Vec<SafeSql>,
        aggregates: &[Aggregate],
        criterion: Option<(Criterion, String)>,
    ) -> Result<Vec<Option<f64>>> {
        let span = debug_span!("pushdown", function, range = %range);
        let _guard = span.enter();

        let window = self
            .sheet
            .window()?
            .with_columns(projection)
            .paginate()
            .build()?;
        let (limit, offset) = window_bounds(range, self.sheet.offset());
        let mut bound = vec![limit.to_string(), offset.to_string()];
        let criterion = criterion.map(|(criterion, operand)| {
            bound.push(operand);
            criterion
        });
        let db = self.database()?;
        let sql = aggregate_query(&window, aggregates, criterion, db.dialect())?;
        let row = db
            .query(&sql, &Params::positional(bound))?
            .into_iter()
            .next()
            .ok_or_else(|| SheetError::internal(format!("{function} returned no row")))?;
        row.into_iter().map(sql_number).collect()
    }

    /// Numeric value of a non-range argument; `None` for an absent cell.
    fn scalar_arg(&mut self, function: &str, arg: &[Token]) -> Result<Option<f64>> {
        let token = self.expression(arg)?;
        if token.to_cell().as_str().is_none() {
            return Ok(None);
        }
        numeric(&token, function).map(Some)
    }

    /// Numbers in an extra-column range.
    fn extra_numbers(&self, function: &str, index: usize, range: &RangeRef) -> Result<Vec<f64>> {
        self.sheet
            .extra_cells(index, range)
            .into_iter()
            .map(|(row, text)| {
                parse_number(text).ok_or_else(|| {
                    SheetError::eval(format!(
                        "non-numeric value in {function}: {text} (from {}{})",
                        range.column(),
                        row + 1
                    ))
                })
            })
            .collect()
    }

    fn fold(&mut self, fold: Fold, args: &Args) -> Result<Token> {
        let sheet = self.sheet;
        let mut acc = None;
        for arg in args {
            match range_arg(arg).transpose()? {
                Some(range @ RangeRef::Span { .. }) => match sheet.resolve_column(range.column())? {
                    Target::Database { column, .. } => {
                        let value = make_cast(&column.qualified(), Some("numeric"), Some(VALUE_ALIAS))?;
                        let result =
                            self.push_down(fold.name(), &range, vec![value], &[fold.aggregate()], None)?;
                        if let Some(v) = result.into_iter().next().flatten() {
                            acc = Some(fold.apply(acc, v));
                        }
                    }
                    Target::Extra { index } => {
                        for v in self.extra_numbers(fold.name(), index, &range)? {
                            acc = Some(fold.apply(acc, v));
                        }
                    }
                },
                _ => {
                    if let Some(v) = self.scalar_arg(fold.name(), arg)? {
                        acc = Some(fold.apply(acc, v));
                    }
                }
            }
        }
        Ok(Token::number(acc.unwrap_or_else(|| fold.empty())))
    }

    fn average(&mut self, args: &Args) -> Result<Token> {
        let sheet = self.sheet;
        let (mut sum, mut count) = (0.0, 0.0);
        for arg in args {
            match range_arg(arg).transpose()? {
                Some(range @ RangeRef::Span { .. }) => match sheet.resolve_column(range.column())? {
                    Target::Database { column, .. } => {
                        let value = make_cast(&column.qualified(), Some("numeric"), Some(VALUE_ALIAS))?;
                        let result = self.push_down(
                            "AVERAGE",
                            &range,
                            vec![value],
                            &[Aggregate::Sum, Aggregate::Count],
                            None,
                        )?;
                        if let [s, c] = result.as_slice() {
                            sum += s.unwrap_or(0.0);
                            count += c.unwrap_or(0.0);
                        }
                    }
                    Target::Extra { index } => {
                        for v in self.extra_numbers("AVERAGE", index, &range)? {
                            sum += v;
                            count += 1.0;
                        }
                    }
                },
                _ => {
                    if let Some(v) = self.scalar_arg("AVERAGE", arg)? {
                        sum += v;
                        count += 1.0;
                    }
                }
            }
        }
        if count == 0.0 {
            return Err(SheetError::eval("AVERAGE of no values"));
        }
        Ok(Token::number(sum / count))
    }

    /// `COUNTIF(range, criteria)`, `SUMIF`/`AVERAGEIF(range, criteria, [values])`.
    fn aggregate_if(&mut self, name: &str, args: &Args) -> Result<Token> {
        let max_args = if name == "COUNTIF" { 2 } else { 3 };
        if args.len() < 2 || args.len() > max_args {
            return Err(SheetError::eval(format!("wrong number of arguments for {name}")));
        }
        let invalid = || SheetError::eval(format!("invalid range in {name}"));
        let condition = range_arg(&args[0]).ok_or_else(invalid)??;
        let values = match args.get(2) {
            Some(arg) => range_arg(arg).ok_or_else(invalid)??,
            None => condition.clone(),
        };
        if condition.first_row() != values.first_row()
            || condition.last_row(u32::MAX) != values.last_row(u32::MAX)
        {
            return Err(SheetError::resolution(format!(
                "condition range ({condition}) and value range ({values}) must be aligned"
            )));
        }

        let criteria = self.expression(&args[1])?;
        let (op, operand) = parse_criteria(&criteria.text_value())?;

        let sheet = self.sheet;
        let condition_target = sheet.resolve_column(condition.column())?;
        let value_target = sheet.resolve_column(values.column())?;
        let (sum, count) = match (condition_target, value_target) {
            (Target::Database { column: cond, .. }, Target::Database { column: val, .. }) => {
                let value_cast = if name == "COUNTIF" { None } else { Some("numeric") };
                let projection = vec![
                    make_cast(&val.qualified(), value_cast, Some(VALUE_ALIAS))?,
                    make_cast(&cond.qualified(), None, Some(CONDITION_ALIAS))?,
                ];
                let criterion = Criterion {
                    op,
                    numeric: parse_number(&operand).is_some(),
                };
                let aggregates: &[Aggregate] = match name {
                    "COUNTIF" => &[Aggregate::CountRows],
                    _ => &[Aggregate::Sum, Aggregate::Count],
                };
                let result =
                    self.push_down(name, &condition, projection, aggregates, Some((criterion, operand)))?;
                match result.as_slice() {
                    [count] => (0.0, count.unwrap_or(0.0)),
                    [sum, count] => (sum.unwrap_or(0.0), count.unwrap_or(0.0)),
                    _ => return Err(SheetError::internal(format!("{name} returned {} columns", result.len()))),
                }
            }
            (Target::Extra { index: cond }, Target::Extra { index: val }) => {
                self.fold_if(name, cond, val, &condition, &values, op, &operand)?
            }
            _ => {
                return Err(SheetError::resolution(format!(
                    "cannot combine database and sheet ranges in {name}"
                )));
            }
        };

        match name {
            "COUNTIF" => Ok(Token::number(count)),
            "SUMIF" => Ok(Token::number(sum)),
            _ if count == 0.0 => Err(SheetError::eval(format!("no rows match condition in {name}"))),
            _ => Ok(Token::number(sum / count)),
        }
    }

    /// In-memory `*IF`: returns the sum of matching values and how many
    /// rows were counted.
    fn fold_if(
        &self,
        name: &str,
        cond: usize,
        val: usize,
        condition: &RangeRef,
        values: &RangeRef,
        op: Comparison,
        operand: &str,
    ) -> Result<(f64, f64)> {
        let value_cells = &self.sheet.extra_columns()[val].cells;
        let (mut sum, mut count) = (0.0, 0.0);
        for (row, text) in self.sheet.extra_cells(cond, condition) {
            if !criteria_match(op, operand, text) {
                continue;
            }
            if name == "COUNTIF" {
                count += 1.0;
                continue;
            }
            let Some(value) = value_cells.get(row).and_then(|c| c.cell.as_str()) else {
                continue;
            };
            let n = parse_number(value).ok_or_else(|| {
                SheetError::eval(format!(
                    "non-numeric value in {name}: {value} (from {}{})",
                    values.column(),
                    row + 1
                ))
            })?;
            sum += n;
            count += 1.0;
        }
        Ok((sum, count))
    }

    fn regex_match(&mut self, args: &Args) -> Result<Token> {
        let [text, pattern] = args.as_slice() else {
            return Err(SheetError::eval("wrong number of arguments for REGEXMATCH"));
        };
        let text = self.expression(text)?;
        if text.is_numeric() {
            return Err(SheetError::eval("only text can be searched with REGEXMATCH"));
        }
        let pattern = self.expression(pattern)?;
        if pattern.is_numeric() {
            return Err(SheetError::eval(format!("invalid regex {}", pattern.value)));
        }
        let regex = Regex::new(&pattern.text_value())
            .map_err(|err| SheetError::eval(format!("invalid regex: {err}")))?;
        Ok(Token::logical(regex.is_match(&text.text_value())))
    }

    fn if_(&mut self, args: &Args) -> Result<Token> {
        let [condition, then, otherwise] = args.as_slice() else {
            return Err(SheetError::eval("wrong number of arguments for IF"));
        };
        if self.condition(condition)? {
            self.expression(then)
        } else {
            self.expression(otherwise)
        }
    }

    /// A single comparison between two expressions, or an expression that
    /// is itself logical.
    fn condition(&mut self, tokens: &[Token]) -> Result<bool> {
        let mut op = None;
        let mut depth = 0usize;
        for (i, token) in tokens.iter().enumerate() {
            if token.is_open() {
                depth += 1;
            } else if token.is_close() {
                depth = depth.saturating_sub(1);
            } else if depth == 0 && token.is_comparison() {
                if op.is_some() {
                    return Err(SheetError::eval("multiple logical operators in single expression"));
                }
                op = Some(i);
            }
        }

        let Some(i) = op else {
            let value = self.expression(tokens)?;
            return value
                .as_logical()
                .ok_or_else(|| SheetError::eval(format!("not a logical expression: {}", value.value)));
        };
        let left = self.expression(&tokens[..i])?;
        let right = self.expression(&tokens[i + 1..])?;
        let op = tokens[i].value.as_str();

        match op {
            "=" | "<>" => {
                let equal = match (left.number, right.number) {
                    (Some(a), Some(b)) => a == b,
                    (None, None) => left.text_value() == right.text_value(),
                    _ => false,
                };
                Ok(equal == (op == "="))
            }
            _ => {
                let a = numeric(&left, op)?;
                let b = numeric(&right, op)?;
                Comparison::parse(op)
                    .map(|c| c.compare_numbers(a, b))
                    .map_err(|_| SheetError::eval(format!("unsupported logical operator: {op}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn criteria_default_to_equality() {
        assert_eq!(parse_criteria("3").unwrap(), (Comparison::Eq, "3".to_string()));
        assert_eq!(parse_criteria(">= 1").unwrap(), (Comparison::Ge, "1".to_string()));
        assert_eq!(parse_criteria("<2").unwrap(), (Comparison::Lt, "2".to_string()));
        assert_eq!(parse_criteria("like a%").unwrap(), (Comparison::Like, "a%".to_string()));
        assert!(parse_criteria("<>3").is_err());
    }

    #[test]
    fn criteria_compare_numbers_then_text() {
        assert!(criteria_match(Comparison::Gt, "1", "2"));
        assert!(!criteria_match(Comparison::Gt, "10", "9"));
        assert!(criteria_match(Comparison::Eq, "3", "3.0"));
        assert!(!criteria_match(Comparison::Eq, "3", "three"));
        assert!(criteria_match(Comparison::Eq, "bob", "bob"));
        assert!(criteria_match(Comparison::Like, "b%", "Bob"));
    }

    #[test]
    fn empty_folds() {
        assert_eq!(Fold::Sum.empty(), 0.0);
        assert_eq!(Fold::Product.empty(), 1.0);
        assert_eq!(Fold::Max.empty(), 0.0);
        assert_eq!(Fold::Min.empty(), 0.0);
    }

    #[test]
    fn folds_start_from_the_first_value() {
        assert_eq!(Fold::Min.apply(None, 7.0), 7.0);
        assert_eq!(Fold::Max.apply(Some(-3.0), -5.0), -3.0);
        assert_eq!(Fold::Product.apply(Some(2.0), 4.0), 8.0);
        assert_eq!(Fold::from_name("AVERAGE"), None);
    }

    #[test]
    fn windows_are_relative_to_the_loaded_page() {
        let range: RangeRef = "bar2:bar3".parse().unwrap();
        assert_eq!(window_bounds(&range, 0), (2, 1));
        assert_eq!(window_bounds(&range, 100), (2, 101));
        let open: RangeRef = "bar:bar".parse().unwrap();
        assert_eq!(window_bounds(&open, 0), (u32::MAX, 0));
    }
}
