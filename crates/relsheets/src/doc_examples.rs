use crate::{Result, Sheet, TableName};

/// Evaluate a formula that reads no database columns and return the text
/// a cell would show. `None` for an absent result.
///
/// ```rust
/// # use relsheets::doc_examples::eval_literal;
/// assert_eq!(eval_literal("=SUM(1,2,3)")?.as_deref(), Some("6"));
/// assert_eq!(eval_literal("=IF(2>1,\"yes\",\"no\")")?.as_deref(), Some("yes"));
/// # Ok::<(), relsheets::SheetError>(())
/// ```
pub fn eval_literal(formula: &str) -> Result<Option<String>> {
    let sheet = Sheet::new(TableName::new("main", "scratch"));
    let evaluated = sheet.evaluate(None, formula)?;
    Ok(evaluated.cell.as_str().map(str::to_string))
}
