//! Formula evaluation by repeated reduction.
//!
//! Each step takes a token sequence and returns a shorter one, or the final
//! value. Rules, first match wins:
//!
//! 1. a single token is resolved directly;
//! 2. a leading `-`/`+` applies to everything after it; any other prefix
//!    operator is folded into the value right after it;
//! 3. the first parenthesised group is evaluated and spliced back;
//! 4. the first function call is dispatched and its result spliced back;
//! 5. the first `*` or `/`, then 6. the first `+` or `-`, combines its
//!    neighbours.
//!
//! Anything else is malformed.

use relsheets_common::{Result, SheetError};
use relsheets_db::Database;
use relsheets_parse::{RangeRef, Token, TokenSubType, TokenType};
use smallvec::SmallVec;

use crate::sheet::Sheet;

/// Function arguments, each a token sequence of its own.
pub type Args = SmallVec<[Vec<Token>; 4]>;

enum Step {
    Reduced(Vec<Token>),
    Done(Token),
}

/// `'a` borrows the sheet and connection; `'d` is the connection's own
/// lifetime.
pub struct Interpreter<'a, 'd> {
    pub(crate) sheet: &'a Sheet,
    db: Option<&'a mut (dyn Database + 'd)>,
}

impl<'a, 'd> Interpreter<'a, 'd> {
    pub fn new(sheet: &'a Sheet, db: Option<&'a mut (dyn Database + 'd)>) -> Self {
        Interpreter { sheet, db }
    }

    /// Connection for aggregate pushdown.
    pub(crate) fn database(&mut self) -> Result<&mut (dyn Database + 'd)> {
        match self.db.as_deref_mut() {
            Some(db) => Ok(db),
            None => Err(SheetError::resolution(
                "database ranges can only be aggregated with a connection",
            )),
        }
    }

    pub fn evaluate(&mut self, tokens: &[Token]) -> Result<Token> {
        let tokens: Vec<Token> = tokens
            .iter()
            .filter(|t| t.token_type != TokenType::Whitespace)
            .cloned()
            .collect();
        self.reduce(tokens)
    }

    fn reduce(&mut self, mut tokens: Vec<Token>) -> Result<Token> {
        loop {
            match self.step(tokens)? {
                Step::Done(token) => return Ok(token),
                Step::Reduced(next) => tokens = next,
            }
        }
    }

    fn step(&mut self, tokens: Vec<Token>) -> Result<Step> {
        match tokens.as_slice() {
            [] => return Err(SheetError::eval("empty expression")),
            [only] => return self.operand(only).map(Step::Done),
            [first, rest @ ..] if first.token_type == TokenType::OpPrefix => {
                return self.leading_prefix(first, rest).map(Step::Done);
            }
            _ => {}
        }
        if let Some(next) = self.fold_prefix(&tokens)? {
            return Ok(Step::Reduced(next));
        }
        if let Some(next) = self.paren_group(&tokens)? {
            return Ok(Step::Reduced(next));
        }
        if let Some(next) = self.function_group(&tokens)? {
            return Ok(Step::Reduced(next));
        }
        for ops in [["*", "/"], ["+", "-"]] {
            if let Some(next) = self.infix(&tokens, &ops)? {
                return Ok(Step::Reduced(next));
            }
        }
        Err(SheetError::eval(format!(
            "not implemented: {}",
            tokens.iter().map(|t| t.value.as_str()).collect::<String>()
        )))
    }

    /// The value of a single operand token. Cell references are read from
    /// the sheet; ranges cannot stand in for a value.
    pub(crate) fn operand(&self, token: &Token) -> Result<Token> {
        if !token.is_value() {
            return Err(SheetError::eval(format!("not an operand: {}", token.value)));
        }
        if !token.is_range() {
            return Ok(token.clone());
        }
        match RangeRef::parse(&token.value)? {
            RangeRef::Cell { column, row } => {
                Ok(Token::from_cell(&self.sheet.resolve_cell(&column, row)?))
            }
            span => Err(SheetError::eval(format!("range {span} used as a single value"))),
        }
    }

    /// Evaluate a whole argument or sub-expression.
    pub(crate) fn expression(&mut self, tokens: &[Token]) -> Result<Token> {
        self.reduce(tokens.to_vec())
    }

    /// Rule 2 at the start: `-2+3` is `-(2+3)`.
    fn leading_prefix(&mut self, op: &Token, rest: &[Token]) -> Result<Token> {
        let value = self.expression(rest)?;
        apply_prefix(op, value)
    }

    /// Rule 2 inside an expression: `2*-3` negates only the `3`.
    fn fold_prefix(&self, tokens: &[Token]) -> Result<Option<Vec<Token>>> {
        let found = top_level(tokens).find(|(i, t)| {
            t.token_type == TokenType::OpPrefix && tokens.get(i + 1).is_some_and(Token::is_value)
        });
        let Some((i, _)) = found else {
            return Ok(None);
        };
        let value = self.operand(&tokens[i + 1])?;
        let folded = apply_prefix(&tokens[i], value)?;
        Ok(Some(splice(tokens, i, i + 2, folded)))
    }

    /// Rule 3.
    fn paren_group(&mut self, tokens: &[Token]) -> Result<Option<Vec<Token>>> {
        let Some((open, _)) =
            top_level(tokens).find(|(_, t)| t.token_type == TokenType::Paren && t.is_open())
        else {
            return Ok(None);
        };
        let close = matching_close(tokens, open)?;
        let value = self.expression(&tokens[open + 1..close])?;
        Ok(Some(splice(tokens, open, close + 1, value)))
    }

    /// Rule 4.
    fn function_group(&mut self, tokens: &[Token]) -> Result<Option<Vec<Token>>> {
        let Some((open, _)) = top_level(tokens).find(|(_, t)| t.function_name().is_some()) else {
            return Ok(None);
        };
        let close = matching_close(tokens, open)?;
        let name = tokens[open].function_name().unwrap_or_default().to_ascii_uppercase();
        let args = split_args(&tokens[open + 1..close]);
        let value = self.call(&name, &args)?;
        Ok(Some(splice(tokens, open, close + 1, value)))
    }

    /// Rules 5 and 6.
    fn infix(&self, tokens: &[Token], ops: &[&str]) -> Result<Option<Vec<Token>>> {
        let Some((i, _)) = top_level(tokens)
            .find(|(_, t)| t.token_type == TokenType::OpInfix && ops.contains(&t.value.as_str()))
        else {
            return Ok(None);
        };
        if i == 0 || i + 1 >= tokens.len() {
            return Err(SheetError::eval(format!(
                "operator {} is missing an operand",
                tokens[i].value
            )));
        }
        let op = tokens[i].value.as_str();
        let left = numeric(&self.operand(&tokens[i - 1])?, op)?;
        let right = numeric(&self.operand(&tokens[i + 1])?, op)?;
        let result = match op {
            "*" => left * right,
            "/" if right == 0.0 => return Err(SheetError::eval("division by zero")),
            "/" => left / right,
            "+" => left + right,
            "-" => left - right,
            _ => return Err(SheetError::eval(format!("invalid infix operator {op}"))),
        };
        Ok(Some(splice(tokens, i - 1, i + 2, Token::number(result))))
    }
}

fn apply_prefix(op: &Token, value: Token) -> Result<Token> {
    match op.value.as_str() {
        "+" => Ok(value),
        "-" => Ok(Token::number(-numeric(&value, "negate")?)),
        op => Err(SheetError::eval(format!("invalid prefix operator {op}"))),
    }
}

/// Numeric value for arithmetic; an absent cell counts as zero.
pub(crate) fn numeric(token: &Token, context: &str) -> Result<f64> {
    if token.subtype == TokenSubType::Empty {
        return Ok(0.0);
    }
    token.number.ok_or_else(|| {
        SheetError::eval(format!(
            "non-numeric argument to {context}: {}",
            token.text_value()
        ))
    })
}

/// Tokens outside any parenthesised group or call. Openers at the top
/// level are included, their interiors and closers are not.
fn top_level(tokens: &[Token]) -> impl Iterator<Item = (usize, &Token)> {
    let mut depth = 0usize;
    tokens.iter().enumerate().filter(move |(_, t)| {
        let outer = depth == 0;
        if t.is_open() {
            depth += 1;
        } else if t.is_close() {
            depth = depth.saturating_sub(1);
            return false;
        }
        outer
    })
}

/// Replace `tokens[start..end]` by `value`.
fn splice(tokens: &[Token], start: usize, end: usize, value: Token) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len() - (end - start) + 1);
    out.extend_from_slice(&tokens[..start]);
    out.push(value);
    out.extend_from_slice(&tokens[end..]);
    out
}

/// Index of the closer balancing the opener at `open`.
fn matching_close(tokens: &[Token], open: usize) -> Result<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if token.is_open() {
            depth += 1;
        } else if token.is_close() {
            depth -= 1;
            if depth == 0 {
                return Ok(i);
            }
        }
    }
    Err(SheetError::parse(format!(
        "unmatched parentheses after {}",
        tokens[open].value
    )))
}

/// Split a call's interior on its top-level argument separators.
fn split_args(interior: &[Token]) -> Args {
    let mut args: Args = SmallVec::new();
    if interior.is_empty() {
        return args;
    }
    let mut current = Vec::new();
    let mut depth = 0usize;
    for token in interior {
        if token.is_open() {
            depth += 1;
        } else if token.is_close() {
            depth = depth.saturating_sub(1);
        }
        if depth == 0 && token.token_type == TokenType::Sep {
            args.push(std::mem::take(&mut current));
        } else {
            current.push(token.clone());
        }
    }
    args.push(current);
    args
}

#[cfg(test)]
mod tests {
    use relsheets_common::{ErrorKind, TableName};
    use relsheets_parse::tokenize;

    use super::*;

    fn sheet() -> Sheet {
        Sheet::new(TableName::new("test", "foo"))
    }

    fn eval(formula: &str) -> Result<String> {
        let sheet = sheet();
        let tokens = tokenize(formula)?;
        let token = Interpreter::new(&sheet, None).evaluate(&tokens)?;
        Ok(token.to_cell().value)
    }

    #[test]
    fn literal_arithmetic() {
        assert_eq!(eval("=2+3").unwrap(), "5");
        assert_eq!(eval("=2+2.5").unwrap(), "4.5");
        assert_eq!(eval("=(2+2)*3").unwrap(), "12");
        assert_eq!(eval("=2+2*3").unwrap(), "8");
        assert_eq!(eval("=10-4-3").unwrap(), "3");
        assert_eq!(eval("=8/4/2").unwrap(), "1");
        assert_eq!(eval("= 1 + 1 ").unwrap(), "2");
    }

    #[test]
    fn leading_minus_negates_the_rest() {
        assert_eq!(eval("=-2+3").unwrap(), "-5");
        assert_eq!(eval("=-2*3+1").unwrap(), "-7");
        assert_eq!(eval("=-(2+3)").unwrap(), "-5");
        assert_eq!(eval("=1+(-2+3)").unwrap(), "-4");
        assert_eq!(eval("=2*-3").unwrap(), "-6");
        assert_eq!(eval("=+4").unwrap(), "4");
        assert_eq!(eval("=--4").unwrap(), "4");
        assert_eq!(eval("=-\"a\"").unwrap_err().kind, ErrorKind::Eval);
    }

    #[test]
    fn literals_pass_through() {
        assert_eq!(eval("hello").unwrap(), "hello");
        assert_eq!(eval("12.50").unwrap(), "12.50");
        assert_eq!(eval("=\"say \"\"hi\"\"\"").unwrap(), "say \"hi\"");
        assert_eq!(eval("=TRUE").unwrap(), "TRUE");
    }

    #[test]
    fn malformed_expressions_fail() {
        assert_eq!(eval("=1/0").unwrap_err().message, "division by zero");
        assert_eq!(eval("=1+\"a\"").unwrap_err().kind, ErrorKind::Eval);
        assert!(eval("=1 2").unwrap_err().message.starts_with("not implemented"));
        assert!(eval("=1&2").is_err());
        assert!(eval("=*2").is_err());
        assert_eq!(eval("=NOPE(1)").unwrap_err().kind, ErrorKind::Parse);
    }

    #[test]
    fn ranges_are_not_values() {
        assert!(eval("=A1:A2").unwrap_err().message.contains("single value"));
    }

    #[test]
    fn args_split_at_top_level_only() {
        let tokens = tokenize("=F(1,G(2,3),(4))").unwrap();
        let close = matching_close(&tokens, 0).unwrap();
        assert_eq!(close, tokens.len() - 1);
        let args = split_args(&tokens[1..close]);
        assert_eq!(args.len(), 3);
        assert_eq!(args[1].len(), 5);
        assert!(split_args(&[]).is_empty());
    }
}
