//! Range references: `A1`, `A1:A5`, `A:A`, `A3:A`, `test.foo.bar1`.
//!
//! A reference always names exactly one column. The column part is whatever
//! precedes the trailing row digits, so qualified names (`schema.table.col`)
//! pass through untouched and are split by the resolver.

use std::fmt::{self, Display};
use std::str::FromStr;

use relsheets_common::SheetError;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::tokenizer::Token;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RangeRef {
    /// One cell, 1-based row.
    Cell { column: String, row: u32 },
    /// A run of cells; `None` bounds mean "first row" / "last row".
    Span {
        column: String,
        start: Option<u32>,
        end: Option<u32>,
    },
}

/// `("bar", Some(12))` for `bar12`, `("bar", None)` for `bar`.
fn split_row(text: &str) -> Result<(&str, Option<u32>), SheetError> {
    let column = text.trim_end_matches(|c: char| c.is_ascii_digit());
    let digits = &text[column.len()..];
    if column.is_empty() {
        return Err(SheetError::parse(format!("missing column name in {text}")));
    }
    if digits.is_empty() {
        return Ok((column, None));
    }
    match digits.parse::<u32>() {
        Ok(0) | Err(_) => Err(SheetError::parse(format!("invalid row index in {text}"))),
        Ok(row) => Ok((column, Some(row))),
    }
}

impl RangeRef {
    pub fn parse(text: &str) -> Result<Self, SheetError> {
        match text.split_once(':') {
            None => match split_row(text)? {
                (column, Some(row)) => Ok(RangeRef::Cell {
                    column: column.to_string(),
                    row,
                }),
                (_, None) => Err(SheetError::parse(format!("invalid row index in {text}"))),
            },
            Some((from, to)) => {
                let (start_col, start) = split_row(from)?;
                let (end_col, end) = split_row(to)?;
                if start_col != end_col {
                    return Err(SheetError::parse(format!(
                        "ranges must be for a single column, got {text}"
                    )));
                }
                if matches!((start, end), (Some(s), Some(e)) if s > e) {
                    return Err(SheetError::parse(format!(
                        "range start is after its end in {text}"
                    )));
                }
                Ok(RangeRef::Span {
                    column: start_col.to_string(),
                    start,
                    end,
                })
            }
        }
    }

    pub fn column(&self) -> &str {
        match self {
            RangeRef::Cell { column, .. } | RangeRef::Span { column, .. } => column,
        }
    }

    /// First row covered, 1-based.
    pub fn first_row(&self) -> u32 {
        match self {
            RangeRef::Cell { row, .. } => *row,
            RangeRef::Span { start, .. } => start.unwrap_or(1),
        }
    }

    /// Last row covered, clamped to `max_row` for open spans.
    pub fn last_row(&self, max_row: u32) -> u32 {
        match self {
            RangeRef::Cell { row, .. } => *row,
            RangeRef::Span { end, .. } => end.unwrap_or(max_row),
        }
    }

    pub fn is_cell(&self) -> bool {
        matches!(self, RangeRef::Cell { .. })
    }

    /// Shift explicit row bounds by `offset`. Open bounds stay open.
    pub fn translate(&self, offset: i64) -> Result<Self, SheetError> {
        let shift = |row: u32| -> Result<u32, SheetError> {
            let shifted = i64::from(row) + offset;
            u32::try_from(shifted)
                .ok()
                .filter(|r| *r >= 1)
                .ok_or_else(|| {
                    SheetError::eval(format!(
                        "row {row} shifted by {offset} leaves the sheet in {self}"
                    ))
                })
        };
        Ok(match self {
            RangeRef::Cell { column, row } => RangeRef::Cell {
                column: column.clone(),
                row: shift(*row)?,
            },
            RangeRef::Span { column, start, end } => RangeRef::Span {
                column: column.clone(),
                start: start.map(shift).transpose()?,
                end: end.map(shift).transpose()?,
            },
        })
    }
}

impl FromStr for RangeRef {
    type Err = SheetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RangeRef::parse(s)
    }
}

impl Display for RangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeRef::Cell { column, row } => write!(f, "{column}{row}"),
            RangeRef::Span { column, start, end } => {
                f.write_str(column)?;
                if let Some(start) = start {
                    write!(f, "{start}")?;
                }
                write!(f, ":{column}")?;
                if let Some(end) = end {
                    write!(f, "{end}")?;
                }
                Ok(())
            }
        }
    }
}

/// Rewrite every range operand in `tokens` shifted by `offset` rows.
pub fn translate_tokens(tokens: &[Token], offset: i64) -> Result<Vec<Token>, SheetError> {
    tokens
        .iter()
        .map(|token| {
            if token.is_range() {
                let moved = RangeRef::parse(&token.value)?.translate(offset)?;
                Ok(Token::make_operand(moved.to_string()))
            } else {
                Ok(token.clone())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{to_formula, tokenize};

    #[test]
    fn parses_cells_and_spans() {
        assert_eq!(
            RangeRef::parse("A12").unwrap(),
            RangeRef::Cell {
                column: "A".into(),
                row: 12
            }
        );
        assert_eq!(
            RangeRef::parse("bar:bar").unwrap(),
            RangeRef::Span {
                column: "bar".into(),
                start: None,
                end: None
            }
        );
        assert_eq!(
            RangeRef::parse("test.foo.bar1:test.foo.bar3").unwrap(),
            RangeRef::Span {
                column: "test.foo.bar".into(),
                start: Some(1),
                end: Some(3)
            }
        );
    }

    #[test]
    fn bare_column_needs_a_row() {
        let err = RangeRef::parse("A").unwrap_err();
        assert_eq!(err.message, "invalid row index in A");
        assert!(RangeRef::parse("A0").is_err());
        assert!(RangeRef::parse("12").is_err());
    }

    #[test]
    fn spans_stay_in_one_column() {
        assert!(RangeRef::parse("A1:B2").is_err());
        assert!(RangeRef::parse("A3:A1").is_err());
    }

    #[test]
    fn open_bounds_default_to_sheet_edges() {
        let span = RangeRef::parse("A3:A").unwrap();
        assert_eq!(span.first_row(), 3);
        assert_eq!(span.last_row(40), 40);
        assert_eq!(span.to_string(), "A3:A");
    }

    #[test]
    fn translate_keeps_shape() {
        let cell = RangeRef::parse("A1").unwrap().translate(2).unwrap();
        assert_eq!(cell.to_string(), "A3");
        let span = RangeRef::parse("A1:A").unwrap().translate(4).unwrap();
        assert_eq!(span.to_string(), "A5:A");
        assert!(RangeRef::parse("A1").unwrap().translate(-1).is_err());
    }

    #[test]
    fn translate_rewrites_only_ranges() {
        let tokens = tokenize("=SUM(A1:A2)+B1*2").unwrap();
        let moved = translate_tokens(&tokens, 3).unwrap();
        assert_eq!(to_formula(&moved), "=SUM(A4:A5)+B4*2");
    }
}
