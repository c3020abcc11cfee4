// SPDX-License-Identifier: PMPL-1.0-or-later
//! Tokenizer for the canonical rule dialect.
//!
//! The lexer is an iterator so callers that only need a prefix of the token
//! stream (relation discovery) can stop at the first error instead of
//! failing outright.

use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::RuleError;
use crate::ident::{is_ident_continue, is_ident_start};
use crate::value::Value;

/// A `relation.column` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnRef {
    pub relation: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(relation: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.relation, self.column)
    }
}

/// Comparison operators of the canonical dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Whether an ordering satisfies this operator.
    pub fn holds(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CmpOp::Eq => ord == Equal,
            CmpOp::Ne => ord != Equal,
            CmpOp::Lt => ord == Less,
            CmpOp::Le => ord != Greater,
            CmpOp::Gt => ord == Greater,
            CmpOp::Ge => ord != Less,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Column(ColumnRef),
    /// A bare identifier that is not a keyword.
    Ident(String),
    Str(String),
    Number(Value),
    Op(CmpOp),
    And,
    Or,
    Not,
    Like,
    True,
    False,
    LParen,
    RParen,
}

impl TokenKind {
    /// Short description for error messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Column(c) => format!("column '{c}'"),
            TokenKind::Ident(s) => format!("identifier '{s}'"),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::Number(v) => format!("number {v}"),
            TokenKind::Op(op) => format!("operator '{op}'"),
            TokenKind::And => "AND".to_string(),
            TokenKind::Or => "OR".to_string(),
            TokenKind::Not => "NOT".to_string(),
            TokenKind::Like => "LIKE".to_string(),
            TokenKind::True => "TRUE".to_string(),
            TokenKind::False => "FALSE".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character of the token.
    pub offset: usize,
}

/// Streaming tokenizer over a canonical rule.
pub struct Lexer<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
    failed: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
            failed: false,
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some((_, ch)) = self.chars.peek() {
            if !ch.is_whitespace() {
                break;
            }
            self.chars.next();
        }
    }

    fn read_while(&mut self, start: usize, pred: impl Fn(char) -> bool) -> &'a str {
        let mut end = start;
        while let Some(&(idx, ch)) = self.chars.peek() {
            if !pred(ch) {
                break;
            }
            end = idx + ch.len_utf8();
            self.chars.next();
        }
        &self.src[start..end]
    }

    fn lex_word(&mut self, start: usize) -> TokenKind {
        let first = self.read_while(start, is_ident_continue);

        // `relation.column` only when an identifier follows the dot directly.
        let mut lookahead = self.chars.clone();
        if let Some((dot_idx, '.')) = lookahead.next() {
            if let Some((col_start, ch)) = lookahead.next() {
                if is_ident_start(ch) {
                    self.chars.next();
                    let column = self.read_while(col_start, is_ident_continue);
                    debug_assert_eq!(dot_idx + 1, col_start);
                    return TokenKind::Column(ColumnRef::new(first, column));
                }
            }
        }

        match first.to_ascii_uppercase().as_str() {
            "AND" => TokenKind::And,
            "OR" => TokenKind::Or,
            "NOT" => TokenKind::Not,
            "LIKE" => TokenKind::Like,
            "TRUE" => TokenKind::True,
            "FALSE" => TokenKind::False,
            _ => TokenKind::Ident(first.to_string()),
        }
    }

    fn lex_number(&mut self, start: usize) -> Result<TokenKind, RuleError> {
        // Optional sign was already consumed by the caller.
        self.read_while(start + 1, |c| c.is_ascii_digit());
        let mut is_float = false;
        let mut lookahead = self.chars.clone();
        if let Some((_, '.')) = lookahead.next() {
            if let Some((_, ch)) = lookahead.next() {
                if ch.is_ascii_digit() {
                    is_float = true;
                    self.chars.next();
                    let frac_start = self.chars.peek().map(|(i, _)| *i).unwrap_or(self.src.len());
                    self.read_while(frac_start, |c| c.is_ascii_digit());
                }
            }
        }
        let end = self.chars.peek().map(|(i, _)| *i).unwrap_or(self.src.len());
        let text = &self.src[start..end];

        let invalid = || RuleError::InvalidNumber {
            text: text.to_string(),
            offset: start,
        };
        if is_float {
            text.parse::<f64>().map(|f| TokenKind::Number(Value::Float(f))).map_err(|_| invalid())
        } else {
            text.parse::<i64>().map(|i| TokenKind::Number(Value::Int(i))).map_err(|_| invalid())
        }
    }

    fn lex_string(&mut self, start: usize, quote: char) -> Result<TokenKind, RuleError> {
        let mut out = String::new();
        loop {
            match self.chars.next() {
                None => return Err(RuleError::UnterminatedQuote { offset: start }),
                Some((_, ch)) if ch == quote => {
                    // A doubled quote is a literal quote character.
                    if matches!(self.chars.peek(), Some((_, next)) if *next == quote) {
                        self.chars.next();
                        out.push(quote);
                    } else {
                        return Ok(TokenKind::Str(out));
                    }
                }
                Some((_, '\\')) => match self.chars.next() {
                    // `\%` and `\_` stay escaped for LIKE.
                    Some((_, esc @ ('%' | '_'))) => {
                        out.push('\\');
                        out.push(esc);
                    }
                    Some((_, esc)) => out.push(esc),
                    None => return Err(RuleError::UnterminatedQuote { offset: start }),
                },
                Some((_, ch)) => out.push(ch),
            }
        }
    }

    fn lex_operator(&mut self, start: usize, ch: char) -> Result<TokenKind, RuleError> {
        let next = self.chars.peek().map(|(_, c)| *c);
        let (op, two_chars) = match (ch, next) {
            ('=', _) => (CmpOp::Eq, false),
            ('!', Some('=')) => (CmpOp::Ne, true),
            ('<', Some('>')) => (CmpOp::Ne, true),
            ('<', Some('=')) => (CmpOp::Le, true),
            ('<', _) => (CmpOp::Lt, false),
            ('>', Some('=')) => (CmpOp::Ge, true),
            ('>', _) => (CmpOp::Gt, false),
            (found, _) => {
                return Err(RuleError::UnexpectedChar {
                    found,
                    offset: start,
                })
            }
        };
        if two_chars {
            self.chars.next();
        }
        Ok(TokenKind::Op(op))
    }

    fn next_token(&mut self) -> Option<Result<Token, RuleError>> {
        self.skip_whitespace();
        let (offset, ch) = self.chars.next()?;

        let kind = match ch {
            '(' => Ok(TokenKind::LParen),
            ')' => Ok(TokenKind::RParen),
            '\'' | '"' => self.lex_string(offset, ch),
            c if is_ident_start(c) => Ok(self.lex_word(offset)),
            c if c.is_ascii_digit() => self.lex_number(offset),
            '-' if matches!(self.chars.peek(), Some((_, d)) if d.is_ascii_digit()) => {
                self.lex_number(offset)
            }
            '=' | '!' | '<' | '>' => self.lex_operator(offset, ch),
            found => Err(RuleError::UnexpectedChar { found, offset }),
        };

        Some(kind.map(|kind| Token { kind, offset }))
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, RuleError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.next_token();
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}

/// Tokenize a whole canonical rule, failing on the first bad character.
pub fn tokenize(src: &str) -> Result<Vec<Token>, RuleError> {
    Lexer::new(src).collect()
}
