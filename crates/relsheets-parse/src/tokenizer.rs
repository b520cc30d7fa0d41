use std::borrow::Cow;
use std::fmt::{self, Display};

use relsheets_common::{Cell, SheetError};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Leading character that turns cell text into a computed expression.
pub const FORMULA_MARKER: char = '=';

const TOKEN_ENDERS: &str = ",;{}) +-*/^&=><%";

const fn build_token_enders() -> [bool; 256] {
    let mut tbl = [false; 256];
    let bytes = TOKEN_ENDERS.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        tbl[bytes[i] as usize] = true;
        i += 1;
    }
    tbl
}
static TOKEN_ENDERS_TABLE: [bool; 256] = build_token_enders();

#[inline(always)]
fn is_token_ender(c: u8) -> bool {
    TOKEN_ENDERS_TABLE[c as usize]
}

/// The type of a token.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    /// Whole cell text without the formula marker.
    Literal,
    Operand,
    Func,
    Paren,
    Sep,
    OpPrefix,
    OpInfix,
    OpPostfix,
    Whitespace,
}

impl Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The subtype of a token.
///
/// Comparison operators carry `Logical`, so a condition can be split on
/// them without re-inspecting operator text.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenSubType {
    None,
    Text,
    Number,
    Logical,
    Range,
    /// An absent value, produced when a reference outruns its column.
    Empty,
    Open,
    Close,
    Arg,
}

impl Display for TokenSubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A token in a formula.
///
/// `value` is the exact source text (text operands keep their quotes), so
/// concatenating the values of a token sequence reproduces the formula.
/// Numeric operands are parsed once, up front, into `number`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub value: String,
    pub token_type: TokenType,
    pub subtype: TokenSubType,
    pub number: Option<f64>,
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{} subtype: {:?} value: {}>",
            self.token_type, self.subtype, self.value
        )
    }
}

/// Canonical decimal rendering: no exponent, no forced trailing zeros.
pub fn format_number(n: f64) -> String {
    if n == 0.0 {
        // folds -0 into 0
        "0".to_string()
    } else {
        format!("{n}")
    }
}

/// Parses plain decimal/scientific numbers only. Rust's float parser also
/// accepts `inf` and `NaN`, which would shadow columns with those names.
pub fn parse_number(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    if !bytes.iter().any(u8::is_ascii_digit) {
        return None;
    }
    if !bytes
        .iter()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return None;
    }
    s.parse::<f64>().ok()
}

fn is_logical_literal(s: &str) -> bool {
    s.eq_ignore_ascii_case("TRUE") || s.eq_ignore_ascii_case("FALSE")
}

impl Token {
    pub fn new(value: String, token_type: TokenType, subtype: TokenSubType) -> Self {
        Token {
            value,
            token_type,
            subtype,
            number: None,
        }
    }

    fn from_slice(source: &str, token_type: TokenType, subtype: TokenSubType, start: usize, end: usize) -> Self {
        Token::new(source[start..end].to_string(), token_type, subtype)
    }

    /// Cell text that does not start with the formula marker.
    pub fn literal(raw: &str) -> Self {
        let number = parse_number(raw);
        let subtype = if number.is_some() {
            TokenSubType::Number
        } else {
            TokenSubType::Text
        };
        Token {
            value: raw.to_string(),
            token_type: TokenType::Literal,
            subtype,
            number,
        }
    }

    /// Create an operand token, classifying it from its text.
    pub fn make_operand(value: String) -> Self {
        let mut number = None;
        let subtype = if value.starts_with('"') {
            TokenSubType::Text
        } else if is_logical_literal(&value) {
            TokenSubType::Logical
        } else if let Some(n) = parse_number(&value) {
            number = Some(n);
            TokenSubType::Number
        } else {
            TokenSubType::Range
        };
        Token {
            value,
            token_type: TokenType::Operand,
            subtype,
            number,
        }
    }

    pub fn number(n: f64) -> Self {
        Token {
            value: format_number(n),
            token_type: TokenType::Operand,
            subtype: TokenSubType::Number,
            number: Some(n),
        }
    }

    pub fn logical(b: bool) -> Self {
        Token::new(b.to_string(), TokenType::Operand, TokenSubType::Logical)
    }

    /// A text operand; the value is stored quoted so the token renders back
    /// into valid formula text.
    pub fn text(s: &str) -> Self {
        Token::new(
            format!("\"{}\"", s.replace('"', "\"\"")),
            TokenType::Operand,
            TokenSubType::Text,
        )
    }

    pub fn empty() -> Self {
        Token::new(String::new(), TokenType::Operand, TokenSubType::Empty)
    }

    /// Operand for a stored cell value: numeric text is pre-parsed, absent
    /// cells become `Empty`.
    pub fn from_cell(cell: &Cell) -> Self {
        match cell.as_str() {
            None => Token::empty(),
            Some(s) => match parse_number(s) {
                Some(n) => Token {
                    value: s.to_string(),
                    token_type: TokenType::Operand,
                    subtype: TokenSubType::Number,
                    number: Some(n),
                },
                None if is_logical_literal(s) => {
                    Token::new(s.to_string(), TokenType::Operand, TokenSubType::Logical)
                }
                None => Token::text(s),
            },
        }
    }

    /// Create a subexpression token. `value` must end with '(' or ')'.
    pub fn make_subexp(value: &str, func: bool) -> Self {
        let token_type = if func { TokenType::Func } else { TokenType::Paren };
        let subtype = if value.ends_with(')') {
            TokenSubType::Close
        } else {
            TokenSubType::Open
        };
        Token::new(value.to_string(), token_type, subtype)
    }

    /// Given an opener token, return its corresponding closer token.
    pub fn get_closer(&self) -> Result<Token, SheetError> {
        if self.subtype != TokenSubType::Open {
            return Err(SheetError::parse("token is not an opener"));
        }
        Ok(Token::make_subexp(")", self.token_type == TokenType::Func))
    }

    pub fn make_separator() -> Self {
        Token::new(",".to_string(), TokenType::Sep, TokenSubType::Arg)
    }

    pub fn is_operator(&self) -> bool {
        matches!(
            self.token_type,
            TokenType::OpPrefix | TokenType::OpInfix | TokenType::OpPostfix
        )
    }

    pub fn is_value(&self) -> bool {
        matches!(self.token_type, TokenType::Operand | TokenType::Literal)
    }

    pub fn is_range(&self) -> bool {
        self.token_type == TokenType::Operand && self.subtype == TokenSubType::Range
    }

    pub fn is_numeric(&self) -> bool {
        self.number.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.subtype == TokenSubType::Open
    }

    pub fn is_close(&self) -> bool {
        self.subtype == TokenSubType::Close
    }

    /// Comparison operator (`=`, `<`, `<=`, `>`, `>=`, `<>`).
    pub fn is_comparison(&self) -> bool {
        self.token_type == TokenType::OpInfix && self.subtype == TokenSubType::Logical
    }

    /// Name of the function a `Func` opener calls.
    pub fn function_name(&self) -> Option<&str> {
        if self.token_type == TokenType::Func && self.subtype == TokenSubType::Open {
            self.value.strip_suffix('(')
        } else {
            None
        }
    }

    /// Boolean interpretation of a logical operand.
    pub fn as_logical(&self) -> Option<bool> {
        if self.subtype != TokenSubType::Logical || self.token_type == TokenType::OpInfix {
            return None;
        }
        if self.value.eq_ignore_ascii_case("TRUE") {
            Some(true)
        } else if self.value.eq_ignore_ascii_case("FALSE") {
            Some(false)
        } else {
            None
        }
    }

    /// The value as a user sees it: text operands unquoted and unescaped.
    pub fn text_value(&self) -> Cow<'_, str> {
        if self.token_type == TokenType::Operand && self.subtype == TokenSubType::Text {
            let inner = self
                .value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(&self.value);
            if inner.contains("\"\"") {
                Cow::Owned(inner.replace("\"\"", "\""))
            } else {
                Cow::Borrowed(inner)
            }
        } else {
            Cow::Borrowed(&self.value)
        }
    }

    /// Cell for an evaluated value. Blank literal text clears the cell; an
    /// evaluated empty string (`=""`) is present.
    pub fn to_cell(&self) -> Cell {
        let blank_literal = self.token_type == TokenType::Literal && self.value.is_empty();
        if self.subtype == TokenSubType::Empty || blank_literal {
            return Cell::absent();
        }
        Cell::new(self.text_value().into_owned())
    }
}

/// A tokenizer for spreadsheet formulas.
pub struct Tokenizer {
    formula: String,
    marker: char,
    pub items: Vec<Token>,
    token_stack: Vec<Token>,
    offset: usize,      // Byte offset in formula
    token_start: usize, // Start of current token
    token_end: usize,   // End of current token
}

impl Tokenizer {
    /// Create a new tokenizer and immediately parse the formula.
    pub fn new(formula: &str) -> Result<Self, SheetError> {
        Self::with_marker(formula, FORMULA_MARKER)
    }

    pub fn with_marker(formula: &str, marker: char) -> Result<Self, SheetError> {
        let mut tokenizer = Tokenizer {
            formula: formula.to_string(),
            marker,
            items: Vec::with_capacity(formula.len() / 2),
            token_stack: Vec::with_capacity(16),
            offset: 0,
            token_start: 0,
            token_end: 0,
        };
        tokenizer.parse()?;
        Ok(tokenizer)
    }

    #[inline]
    fn has_token(&self) -> bool {
        self.token_end > self.token_start
    }

    #[inline]
    fn start_token(&mut self) {
        self.token_start = self.offset;
        self.token_end = self.offset;
    }

    #[inline]
    fn extend_token(&mut self) {
        self.token_end = self.offset;
    }

    fn error(&self, message: &str) -> SheetError {
        SheetError::parse(format!("{message} at position {} in {}", self.offset, self.formula))
    }

    fn parse(&mut self) -> Result<(), SheetError> {
        if !self.formula.starts_with(self.marker) {
            self.items.push(Token::literal(&self.formula));
            return Ok(());
        }

        self.offset = self.marker.len_utf8();
        self.start_token();

        while self.offset < self.formula.len() {
            if self.check_scientific_notation() {
                continue;
            }

            let curr_byte = self.formula.as_bytes()[self.offset];

            if is_token_ender(curr_byte) && self.has_token() {
                self.save_token();
                self.start_token();
            }

            match curr_byte {
                b'"' => self.parse_string()?,
                b' ' | b'\n' => self.parse_whitespace(),
                b'+' | b'-' | b'*' | b'/' | b'^' | b'&' | b'=' | b'>' | b'<' | b'%' => {
                    self.parse_operator()
                }
                b'(' => self.parse_opener(),
                b')' => self.parse_closer()?,
                b',' => self.parse_separator(),
                b'{' | b'}' | b';' => return Err(self.error("array formulas are not supported")),
                _ => {
                    if !self.has_token() {
                        self.start_token();
                    }
                    self.offset += 1;
                    self.extend_token();
                }
            }
        }

        if self.has_token() {
            self.save_token();
        }

        if !self.token_stack.is_empty() {
            return Err(self.error("unmatched opening parenthesis"));
        }

        Ok(())
    }

    /// If the current token looks like a number in scientific notation,
    /// consume the '+' or '-' as part of the number.
    fn check_scientific_notation(&mut self) -> bool {
        let Some(&curr_byte) = self.formula.as_bytes().get(self.offset) else {
            return false;
        };
        if (curr_byte == b'+' || curr_byte == b'-') && self.is_scientific_notation_base() {
            self.offset += 1;
            self.extend_token();
            return true;
        }
        false
    }

    /// Is the accumulated token the base of a scientific number ("1.23E", "9e")?
    fn is_scientific_notation_base(&self) -> bool {
        if !self.has_token() {
            return false;
        }
        let token_slice = &self.formula.as_bytes()[self.token_start..self.token_end];
        if token_slice.len() < 2 {
            return false;
        }
        let last = token_slice[token_slice.len() - 1];
        if !(last == b'E' || last == b'e') || !token_slice[0].is_ascii_digit() {
            return false;
        }
        let mut dot_seen = false;
        for &ch in &token_slice[1..token_slice.len() - 1] {
            match ch {
                b'0'..=b'9' => {}
                b'.' if !dot_seen => dot_seen = true,
                _ => return false,
            }
        }
        true
    }

    fn save_token(&mut self) {
        if self.has_token() {
            let value = self.formula[self.token_start..self.token_end].to_string();
            self.items.push(Token::make_operand(value));
        }
    }

    /// Parse a double-quoted text literal; `""` escapes a quote.
    fn parse_string(&mut self) -> Result<(), SheetError> {
        self.save_token();
        let string_start = self.offset;
        self.offset += 1;

        while self.offset < self.formula.len() {
            if self.formula.as_bytes()[self.offset] == b'"' {
                self.offset += 1;
                if self.formula.as_bytes().get(self.offset) == Some(&b'"') {
                    self.offset += 1;
                } else {
                    let value = self.formula[string_start..self.offset].to_string();
                    self.items.push(Token::make_operand(value));
                    self.start_token();
                    return Ok(());
                }
            } else {
                self.offset += 1;
            }
        }

        Err(self.error("reached end of formula while parsing string"))
    }

    fn parse_whitespace(&mut self) {
        self.save_token();

        let ws_start = self.offset;
        while let Some(b' ' | b'\n') = self.formula.as_bytes().get(self.offset) {
            self.offset += 1;
        }

        self.items.push(Token::from_slice(
            &self.formula,
            TokenType::Whitespace,
            TokenSubType::None,
            ws_start,
            self.offset,
        ));
        self.start_token();
    }

    fn parse_operator(&mut self) {
        self.save_token();

        if self.offset + 1 < self.formula.len() {
            let two_char = &self.formula.as_bytes()[self.offset..self.offset + 2];
            if two_char == b">=" || two_char == b"<=" || two_char == b"<>" {
                self.items.push(Token::from_slice(
                    &self.formula,
                    TokenType::OpInfix,
                    TokenSubType::Logical,
                    self.offset,
                    self.offset + 2,
                ));
                self.offset += 2;
                self.start_token();
                return;
            }
        }

        let curr_byte = self.formula.as_bytes()[self.offset];
        let (token_type, subtype) = match curr_byte {
            b'%' => (TokenType::OpPostfix, TokenSubType::None),
            b'=' | b'<' | b'>' => (TokenType::OpInfix, TokenSubType::Logical),
            b'+' | b'-' => {
                let prev = self
                    .items
                    .iter()
                    .rev()
                    .find(|t| t.token_type != TokenType::Whitespace);
                match prev {
                    Some(p)
                        if p.subtype == TokenSubType::Close
                            || p.token_type == TokenType::OpPostfix
                            || p.token_type == TokenType::Operand =>
                    {
                        (TokenType::OpInfix, TokenSubType::None)
                    }
                    _ => (TokenType::OpPrefix, TokenSubType::None),
                }
            }
            _ => (TokenType::OpInfix, TokenSubType::None),
        };

        self.items.push(Token::from_slice(
            &self.formula,
            token_type,
            subtype,
            self.offset,
            self.offset + 1,
        ));
        self.offset += 1;
        self.start_token();
    }

    /// An opener directly after an accumulated name is a function call.
    fn parse_opener(&mut self) {
        let token = if self.has_token() {
            Token::make_subexp(&self.formula[self.token_start..self.offset + 1], true)
        } else {
            Token::make_subexp("(", false)
        };

        self.items.push(token.clone());
        self.token_stack.push(token);
        self.offset += 1;
        self.start_token();
    }

    fn parse_closer(&mut self) -> Result<(), SheetError> {
        self.save_token();

        let Some(open_token) = self.token_stack.pop() else {
            return Err(self.error("no matching opener for closer"));
        };
        self.items.push(open_token.get_closer()?);
        self.offset += 1;
        self.start_token();
        Ok(())
    }

    /// Inside a function call ',' separates arguments; elsewhere it is the
    /// (unsupported) union operator.
    fn parse_separator(&mut self) {
        self.save_token();

        let in_function = self
            .token_stack
            .last()
            .is_some_and(|top| top.token_type == TokenType::Func);
        let token = if in_function {
            Token::make_separator()
        } else {
            Token::new(",".to_string(), TokenType::OpInfix, TokenSubType::None)
        };
        self.items.push(token);

        self.offset += 1;
        self.start_token();
    }

    /// Reconstruct the formula from the parsed tokens.
    pub fn render(&self) -> String {
        to_formula_with_marker(&self.items, self.marker)
    }
}

impl TryFrom<&str> for Tokenizer {
    type Error = SheetError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Tokenizer::new(value)
    }
}

/// Tokenize cell text: a single literal token unless it starts with the
/// formula marker.
pub fn tokenize(formula: &str) -> Result<Vec<Token>, SheetError> {
    Ok(Tokenizer::new(formula)?.items)
}

/// Inverse of [`tokenize`], also valid for translated or reduced sequences.
pub fn to_formula(tokens: &[Token]) -> String {
    to_formula_with_marker(tokens, FORMULA_MARKER)
}

pub fn to_formula_with_marker(tokens: &[Token], marker: char) -> String {
    match tokens {
        [only] if only.token_type == TokenType::Literal => only.value.clone(),
        _ => {
            let mut formula = String::with_capacity(tokens.iter().map(|t| t.value.len()).sum::<usize>() + 1);
            formula.push(marker);
            for token in tokens {
                formula.push_str(&token.value);
            }
            formula
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(formula: &str) -> Vec<(TokenType, TokenSubType, String)> {
        tokenize(formula)
            .unwrap()
            .into_iter()
            .map(|t| (t.token_type, t.subtype, t.value))
            .collect()
    }

    #[test]
    fn text_without_marker_is_one_literal() {
        let tokens = tokenize("12.5").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].token_type, TokenType::Literal);
        assert_eq!(tokens[0].number, Some(12.5));

        let tokens = tokenize("A1+B1").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].subtype, TokenSubType::Text);
        assert_eq!(tokens[0].number, None);
    }

    #[test]
    fn classifies_function_call() {
        use TokenSubType as S;
        use TokenType as T;
        assert_eq!(
            kinds("=SUM(A1:A2,-B1)"),
            vec![
                (T::Func, S::Open, "SUM(".to_string()),
                (T::Operand, S::Range, "A1:A2".to_string()),
                (T::Sep, S::Arg, ",".to_string()),
                (T::OpPrefix, S::None, "-".to_string()),
                (T::Operand, S::Range, "B1".to_string()),
                (T::Func, S::Close, ")".to_string()),
            ]
        );
    }

    #[test]
    fn comparisons_are_logical_operators() {
        let tokens = tokenize("=IF(A1>=2,\"big\",TRUE)").unwrap();
        let cmp = tokens.iter().find(|t| t.value == ">=").unwrap();
        assert!(cmp.is_comparison());
        let text = tokens.iter().find(|t| t.subtype == TokenSubType::Text).unwrap();
        assert_eq!(text.text_value(), "big");
        assert_eq!(tokens[tokens.len() - 2].as_logical(), Some(true));
    }

    #[test]
    fn qualified_references_stay_whole() {
        let tokens = tokenize("=test.foo.bar1*2").unwrap();
        assert_eq!(tokens[0].value, "test.foo.bar1");
        assert!(tokens[0].is_range());
        assert_eq!(tokens[2].number, Some(2.0));
    }

    #[test]
    fn scientific_notation_is_one_operand() {
        let tokens = tokenize("=1.5E+3-1").unwrap();
        assert_eq!(tokens[0].number, Some(1500.0));
        assert_eq!(tokens[1].token_type, TokenType::OpInfix);
    }

    #[test]
    fn unbalanced_parentheses_are_parse_errors() {
        assert!(tokenize("=SUM(A1").is_err());
        assert!(tokenize("=A1)").is_err());
        assert!(tokenize("=\"open").is_err());
        assert!(tokenize("={1,2}").is_err());
    }

    #[test]
    fn numbers_render_canonically() {
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(4.5), "4.5");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(Token::number(12.0).value, "12");
    }

    #[test]
    fn names_that_look_like_floats_are_references() {
        assert!(Token::make_operand("inf".to_string()).is_range());
        assert!(Token::make_operand("NaN".to_string()).is_range());
        assert!(Token::make_operand("e5".to_string()).is_range());
    }

    #[test]
    fn text_tokens_escape_quotes() {
        let token = Token::text("say \"hi\"");
        assert_eq!(token.value, "\"say \"\"hi\"\"\"");
        assert_eq!(token.text_value(), "say \"hi\"");
        assert_eq!(token.to_cell(), Cell::new("say \"hi\""));
    }

    #[test]
    fn empty_text_is_present_but_blank_literals_are_not() {
        assert_eq!(Token::text("").to_cell(), Cell::new(""));
        assert_eq!(Token::literal("").to_cell(), Cell::absent());
        assert_eq!(Token::empty().to_cell(), Cell::absent());
        let tokens = tokenize("=\"\"").unwrap();
        assert_eq!(tokens[0].to_cell(), Cell::new(""));
    }

    #[test]
    fn cells_become_typed_operands() {
        assert_eq!(Token::from_cell(&Cell::new("3")).number, Some(3.0));
        assert_eq!(Token::from_cell(&Cell::absent()).subtype, TokenSubType::Empty);
        assert_eq!(Token::from_cell(&Cell::new("abc")).text_value(), "abc");
        assert_eq!(Token::from_cell(&Cell::new("true")).as_logical(), Some(true));
    }

    #[test]
    fn custom_marker() {
        let tokenizer = Tokenizer::with_marker("+A1*2", '+').unwrap();
        assert_eq!(tokenizer.items.len(), 3);
        assert_eq!(tokenizer.render(), "+A1*2");
    }
}
