use std::fmt::{self, Display};

use relsheets_common::SheetError;

/// SQL text that is safe to send to the database.
///
/// The only ways to obtain one are the escaping/building functions of this
/// crate and [`SafeSql::from_static`] for statements written into the
/// program text itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SafeSql(String);

impl SafeSql {
    /// Fixed statement text, e.g. a catalog query.
    pub fn from_static(sql: &'static str) -> Self {
        SafeSql(sql.to_string())
    }

    pub(crate) fn trusted(sql: String) -> Self {
        SafeSql(sql)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Concatenate fragments with a fixed separator.
    pub fn join<'a, I>(parts: I, separator: &'static str) -> SafeSql
    where
        I: IntoIterator<Item = &'a SafeSql>,
    {
        let mut out = String::new();
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                out.push_str(separator);
            }
            out.push_str(&part.0);
        }
        SafeSql(out)
    }
}

impl Display for SafeSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SafeSql {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Cast targets accepted by [`make_cast`].
pub const CAST_TYPES: [&str; 2] = ["text", "numeric"];

/// Quote every dot-separated segment: `foo.bar` becomes `"foo"."bar"`.
pub fn escape_identifier(ident: &str) -> Result<SafeSql, SheetError> {
    if ident.is_empty() {
        return Err(SheetError::unsafe_sql("empty identifier"));
    }
    if ident.contains('"') {
        return Err(SheetError::unsafe_sql(format!(
            "identifier may not contain a quote: {ident}"
        )));
    }
    let mut out = String::with_capacity(ident.len() + 8);
    for (i, segment) in ident.split('.').enumerate() {
        if segment.is_empty() {
            return Err(SheetError::unsafe_sql(format!(
                "empty identifier segment in {ident}"
            )));
        }
        if i > 0 {
            out.push('.');
        }
        out.push('"');
        out.push_str(segment);
        out.push('"');
    }
    Ok(SafeSql(out))
}

fn is_number(raw: &str) -> bool {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    let (whole, frac) = match digits.split_once('.') {
        Some((whole, frac)) => (whole, Some(frac)),
        None => (digits, None),
    };
    !whole.is_empty()
        && whole.bytes().all(|b| b.is_ascii_digit())
        && frac.is_none_or(|f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()))
}

/// Integer or decimal, `'text'` without embedded quotes, or a parenthesized
/// list of constants.
pub fn is_constant(raw: &str) -> bool {
    let raw = raw.trim();
    if is_number(raw) {
        return true;
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return !raw[1..raw.len() - 1].contains('\'');
    }
    if raw.len() >= 2 && raw.starts_with('(') && raw.ends_with(')') {
        let inner = &raw[1..raw.len() - 1];
        return !inner.trim().is_empty() && inner.split(',').all(is_constant);
    }
    false
}

/// Constants pass through verbatim; anything else is an identifier.
pub fn escape_operand(raw: &str) -> Result<SafeSql, SheetError> {
    let raw = raw.trim();
    if is_constant(raw) {
        Ok(SafeSql(raw.to_string()))
    } else {
        escape_identifier(raw)
    }
}

/// `CAST("col" AS numeric) AS "alias"`; either part may be omitted.
pub fn make_cast(
    column: &str,
    cast: Option<&str>,
    alias: Option<&str>,
) -> Result<SafeSql, SheetError> {
    let mut expr = escape_identifier(column)?.into_string();
    if let Some(cast) = cast {
        if !CAST_TYPES.contains(&cast) {
            return Err(SheetError::unsafe_sql(format!("cast to {cast} is not allowed")));
        }
        expr = format!("CAST({expr} AS {cast})");
    }
    if let Some(alias) = alias {
        if alias.contains('.') {
            return Err(SheetError::unsafe_sql(format!("alias may not be qualified: {alias}")));
        }
        expr = format!("{expr} AS {}", escape_identifier(alias)?);
    }
    Ok(SafeSql(expr))
}

/// Whitelisted comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl Comparison {
    /// Longest operators first so `<=` is never read as `<`.
    const BY_LENGTH: [Comparison; 6] = [
        Comparison::Like,
        Comparison::Le,
        Comparison::Ge,
        Comparison::Eq,
        Comparison::Lt,
        Comparison::Gt,
    ];

    pub fn as_sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Like => "LIKE",
        }
    }

    pub fn parse(op: &str) -> Result<Self, SheetError> {
        Self::BY_LENGTH
            .into_iter()
            .find(|c| c.as_sql().eq_ignore_ascii_case(op.trim()))
            .ok_or_else(|| SheetError::unsafe_sql(format!("operator {op} is not allowed")))
    }

    /// Split `"<=3"` into `(Le, "3")`.
    pub fn split_prefix(input: &str) -> Option<(Self, &str)> {
        Self::BY_LENGTH.into_iter().find_map(|c| {
            let op = c.as_sql();
            let head = input.get(..op.len())?;
            head.eq_ignore_ascii_case(op).then(|| (c, &input[op.len()..]))
        })
    }

    pub fn compare_numbers(&self, left: f64, right: f64) -> bool {
        match self {
            Comparison::Eq | Comparison::Like => left == right,
            Comparison::Lt => left < right,
            Comparison::Le => left <= right,
            Comparison::Gt => left > right,
            Comparison::Ge => left >= right,
        }
    }

    pub fn compare_text(&self, left: &str, right: &str) -> bool {
        match self {
            Comparison::Eq => left == right,
            Comparison::Lt => left < right,
            Comparison::Le => left <= right,
            Comparison::Gt => left > right,
            Comparison::Ge => left >= right,
            Comparison::Like => like_match(left.as_bytes(), right.as_bytes()),
        }
    }
}

impl Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

// `%` any run, `_` one byte, ASCII case-insensitive as in SQLite. Only the
// most recent `%` is retried, which bounds the work by text × pattern.
fn like_match(text: &[u8], pattern: &[u8]) -> bool {
    let (mut t, mut p) = (0, 0);
    let mut retry: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some(b'%') => {
                retry = Some((p + 1, t));
                p += 1;
            }
            Some(b'_') => {
                t += 1;
                p += 1;
            }
            Some(c) if c.eq_ignore_ascii_case(&text[t]) => {
                t += 1;
                p += 1;
            }
            _ => match retry {
                Some((after, from)) => {
                    p = after;
                    t = from + 1;
                    retry = Some((after, from + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == b'%')
}

pub fn make_clause(left: &str, op: &str, right: &str) -> Result<SafeSql, SheetError> {
    let op = Comparison::parse(op)?;
    Ok(SafeSql(format!(
        "{} {} {}",
        escape_operand(left)?,
        op.as_sql(),
        escape_operand(right)?
    )))
}

/// `("foo", "<= 3")` becomes `"foo" <= 3`.
pub fn make_filter_clause(left: &str, filter: &str) -> Result<SafeSql, SheetError> {
    let filter = filter.trim();
    let (op, right) = Comparison::split_prefix(filter).ok_or_else(|| {
        SheetError::unsafe_sql(format!("filter must start with a comparison: {filter}"))
    })?;
    let right = right.trim();
    if right.is_empty() {
        return Err(SheetError::unsafe_sql(format!("filter has no operand: {filter}")));
    }
    Ok(SafeSql(format!(
        "{} {} {}",
        escape_operand(left)?,
        op.as_sql(),
        escape_operand(right)?
    )))
}

pub fn make_order_expr(column: &str, ascending: bool) -> Result<SafeSql, SheetError> {
    let direction = if ascending { "ASC" } else { "DESC" };
    Ok(SafeSql(format!("{} {direction}", escape_identifier(column)?)))
}
