pub mod reference;
pub mod tokenizer;

pub use reference::{RangeRef, translate_tokens};
pub use tokenizer::{FORMULA_MARKER, Token, TokenSubType, TokenType, Tokenizer, to_formula, tokenize};
