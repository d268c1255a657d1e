//! Recursive-descent parser for the filter syntax.
//!
//! Grammar (keywords are case-insensitive):
//!
//! ```text
//! expr      := term ((AND | OR) term)*
//! term      := '(' expr ')' | atom
//! atom      := ['~'] name [NOT] op rhs
//! name      := '[' anychars ']' | ident
//! op        := '=' | '!=' | '<>' | '~=' | '<' | '<=' | '>' | '>=' | IN | REGEX | CONTAINS
//! rhs       := literal | '(' literal (',' literal)* ')'     -- list only for IN
//! literal   := quoted-string | number | NULL
//! ```
//!
//! Mixed `AND`/`OR` chains fold left-associatively. Errors carry the byte
//! position of the offending token.

use halite_types::Value;

use crate::ast::{Atom, BoolOp, CompareOp, Expr, Group, MatchMode, Rhs};
use crate::error::FilterError;

/// Parses a filter string into an [`Expr`].
pub fn parse(input: &str) -> Result<Expr, FilterError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        input_len: input.len(),
    };
    let expr = parser.parse_expr()?;
    if let Some(extra) = parser.peek() {
        return Err(FilterError::construct(extra.pos, "unexpected trailing input"));
    }
    Ok(expr)
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    LParen,
    RParen,
    Comma,
    Tilde,
    Eq,
    TildeEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Ident(String),
    Bracketed(String),
    Str(String),
    Number(String),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    pos: usize,
}

fn tokenize(input: &str) -> Result<Vec<Token>, FilterError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                i += 1;
            }
            '(' => {
                tokens.push(Token { tok: Tok::LParen, pos: start });
                i += 1;
            }
            ')' => {
                tokens.push(Token { tok: Tok::RParen, pos: start });
                i += 1;
            }
            ',' => {
                tokens.push(Token { tok: Tok::Comma, pos: start });
                i += 1;
            }
            '~' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { tok: Tok::TildeEq, pos: start });
                    i += 2;
                } else {
                    tokens.push(Token { tok: Tok::Tilde, pos: start });
                    i += 1;
                }
            }
            '=' => {
                tokens.push(Token { tok: Tok::Eq, pos: start });
                i += 1;
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { tok: Tok::Ne, pos: start });
                    i += 2;
                } else {
                    return Err(FilterError::construct(start, "expected '=' after '!'"));
                }
            }
            '<' => match bytes.get(i + 1) {
                Some(b'=') => {
                    tokens.push(Token { tok: Tok::Le, pos: start });
                    i += 2;
                }
                Some(b'>') => {
                    tokens.push(Token { tok: Tok::Ne, pos: start });
                    i += 2;
                }
                _ => {
                    tokens.push(Token { tok: Tok::Lt, pos: start });
                    i += 1;
                }
            },
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { tok: Tok::Ge, pos: start });
                    i += 2;
                } else {
                    tokens.push(Token { tok: Tok::Gt, pos: start });
                    i += 1;
                }
            }
            '\'' => {
                let (text, next) = lex_quoted(input, i)?;
                tokens.push(Token { tok: Tok::Str(text), pos: start });
                i = next;
            }
            '[' => {
                let close = input[i + 1..]
                    .find(']')
                    .ok_or_else(|| FilterError::construct(start, "unterminated '[' name"))?;
                let name = input[i + 1..i + 1 + close].to_string();
                tokens.push(Token { tok: Tok::Bracketed(name), pos: start });
                i += close + 2;
            }
            '-' | '+' => {
                let (text, next) = lex_number(input, i)
                    .ok_or_else(|| FilterError::construct(start, "expected number after sign"))?;
                tokens.push(Token { tok: Tok::Number(text), pos: start });
                i = next;
            }
            _ if c.is_ascii_digit() => {
                let (text, next) = lex_number(input, i).expect("digit starts a number");
                tokens.push(Token { tok: Tok::Number(text), pos: start });
                i = next;
            }
            _ if c.is_alphabetic() || c == '_' => {
                let mut end = i + 1;
                while end < bytes.len() {
                    let ch = bytes[end] as char;
                    if ch.is_alphanumeric() || ch == '_' {
                        end += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    tok: Tok::Ident(input[i..end].to_string()),
                    pos: start,
                });
                i = end;
            }
            _ => {
                return Err(FilterError::construct(
                    start,
                    format!("unexpected character '{c}'"),
                ));
            }
        }
    }

    Ok(tokens)
}

/// Lexes a single-quoted string with `''` escaping a literal quote.
/// Returns the unescaped text and the index just past the closing quote.
fn lex_quoted(input: &str, start: usize) -> Result<(String, usize), FilterError> {
    let bytes = input.as_bytes();
    let mut text = String::new();
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                text.push('\'');
                i += 2;
            } else {
                return Ok((text, i + 1));
            }
        } else {
            let ch = input[i..].chars().next().expect("in-bounds char");
            text.push(ch);
            i += ch.len_utf8();
        }
    }
    Err(FilterError::construct(start, "unterminated string literal"))
}

fn lex_number(input: &str, start: usize) -> Option<(String, usize)> {
    let bytes = input.as_bytes();
    let mut i = start;
    if matches!(bytes[i], b'-' | b'+') {
        i += 1;
    }
    let digits_start = i;
    let mut seen_dot = false;
    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' => i += 1,
            b'.' if !seen_dot => {
                seen_dot = true;
                i += 1;
            }
            _ => break,
        }
    }
    if i == digits_start {
        return None;
    }
    Some((input[start..i].to_string(), i))
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    input_len: usize,
}

impl Parser {
    fn parse_expr(&mut self) -> Result<Expr, FilterError> {
        let mut node = self.parse_term()?;

        while let Some(bool_op) = self.peek_bool_op() {
            self.pos += 1;
            let term = self.parse_term()?;
            node = match node {
                // Same connective extends the current group so evaluation
                // stays a flat left-to-right fold.
                Expr::Group(mut group) if group.op == bool_op => {
                    group.children.push(term);
                    Expr::Group(group)
                }
                other => Expr::Group(Group {
                    op: bool_op,
                    children: vec![other, term],
                }),
            };
        }

        Ok(node)
    }

    fn parse_term(&mut self) -> Result<Expr, FilterError> {
        if self.eat(&Tok::LParen) {
            let expr = self.parse_expr()?;
            self.expect(&Tok::RParen, "expected ')'")?;
            return Ok(expr);
        }
        self.parse_atom().map(Expr::Atom)
    }

    fn parse_atom(&mut self) -> Result<Atom, FilterError> {
        let mut match_mode = MatchMode::CaseSensitive;
        if self.eat(&Tok::Tilde) {
            match_mode = MatchMode::CaseInsensitive;
        }

        let field = match self.next() {
            Some(Token { tok: Tok::Ident(name), .. }) => name,
            Some(Token { tok: Tok::Bracketed(name), .. }) => name,
            other => {
                return Err(FilterError::construct(
                    self.pos_of(other.as_ref()),
                    "expected field name",
                ));
            }
        };

        let mut negated = self.eat_keyword("not");

        let op = match self.next() {
            Some(Token { tok: Tok::Eq, .. }) => CompareOp::Eq,
            Some(Token { tok: Tok::TildeEq, .. }) => {
                match_mode = MatchMode::CaseInsensitive;
                CompareOp::Eq
            }
            Some(Token { tok: Tok::Ne, .. }) => {
                negated = !negated;
                CompareOp::Eq
            }
            Some(Token { tok: Tok::Lt, .. }) => CompareOp::Lt,
            Some(Token { tok: Tok::Le, .. }) => CompareOp::Le,
            Some(Token { tok: Tok::Gt, .. }) => CompareOp::Gt,
            Some(Token { tok: Tok::Ge, .. }) => CompareOp::Ge,
            Some(Token { tok: Tok::Ident(word), pos }) => {
                match word.to_ascii_lowercase().as_str() {
                    "in" => CompareOp::In,
                    "regex" => CompareOp::Regex,
                    "contains" => CompareOp::Contains,
                    _ => {
                        return Err(FilterError::construct(
                            pos,
                            format!("expected operator, found '{word}'"),
                        ));
                    }
                }
            }
            other => {
                return Err(FilterError::construct(
                    self.pos_of(other.as_ref()),
                    "expected operator",
                ));
            }
        };

        let rhs = match op {
            CompareOp::In => Rhs::Set(self.parse_literal_list()?),
            CompareOp::Regex => match self.parse_literal()? {
                Value::String(pattern) => Rhs::Pattern(pattern),
                _ => {
                    return Err(FilterError::construct(
                        self.prev_pos(),
                        "REGEX requires a quoted pattern",
                    ));
                }
            },
            _ => Rhs::Value(self.parse_literal()?),
        };

        Ok(Atom {
            field,
            op,
            rhs,
            match_mode,
            negated,
        })
    }

    fn parse_literal_list(&mut self) -> Result<Vec<Value>, FilterError> {
        self.expect(&Tok::LParen, "expected '(' after IN")?;
        let mut values = vec![self.parse_literal()?];
        while self.eat(&Tok::Comma) {
            values.push(self.parse_literal()?);
        }
        self.expect(&Tok::RParen, "expected ')' closing IN list")?;
        Ok(values)
    }

    fn parse_literal(&mut self) -> Result<Value, FilterError> {
        match self.next() {
            Some(Token { tok: Tok::Str(text), .. }) => Ok(Value::String(text)),
            Some(Token { tok: Tok::Number(text), pos }) => parse_number(&text)
                .ok_or_else(|| FilterError::construct(pos, format!("bad number '{text}'"))),
            Some(Token { tok: Tok::Ident(word), pos }) => {
                if word.eq_ignore_ascii_case("null") {
                    Ok(Value::Null)
                } else {
                    Err(FilterError::construct(
                        pos,
                        format!("expected literal, found '{word}'"),
                    ))
                }
            }
            other => Err(FilterError::construct(
                self.pos_of(other.as_ref()),
                "expected literal",
            )),
        }
    }

    // ------------------------------------------------------------------
    // Token stream helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek().is_some_and(|t| &t.tok == tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if let Some(Token { tok: Tok::Ident(word), .. }) = self.peek()
            && word.eq_ignore_ascii_case(keyword)
        {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect(&mut self, tok: &Tok, message: &str) -> Result<(), FilterError> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(FilterError::construct(self.current_pos(), message))
        }
    }

    fn peek_bool_op(&self) -> Option<BoolOp> {
        if let Some(Token { tok: Tok::Ident(word), .. }) = self.peek() {
            if word.eq_ignore_ascii_case("and") {
                return Some(BoolOp::And);
            }
            if word.eq_ignore_ascii_case("or") {
                return Some(BoolOp::Or);
            }
        }
        None
    }

    fn current_pos(&self) -> usize {
        self.peek().map_or(self.input_len, |t| t.pos)
    }

    fn prev_pos(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or(self.input_len, |t| t.pos)
    }

    fn pos_of(&self, token: Option<&Token>) -> usize {
        token.map_or(self.input_len, |t| t.pos)
    }
}

/// Parses a numeric literal: integral values become `Int64`, anything with
/// a fractional part becomes `Float64`. The evaluator coerces to the
/// field's type when the filter is compiled.
fn parse_number(text: &str) -> Option<Value> {
    if text.contains('.') {
        text.parse::<f64>().ok().map(Value::Float64)
    } else {
        text.parse::<i64>()
            .ok()
            .map(Value::Int64)
            .or_else(|| text.parse::<f64>().ok().map(Value::Float64))
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn atom(expr: &Expr) -> &Atom {
        match expr {
            Expr::Atom(a) => a,
            Expr::Group(_) => panic!("expected atom, got group"),
        }
    }

    #[test]
    fn simple_equality() {
        let expr = parse("Name = 'ann'").unwrap();
        let a = atom(&expr);
        assert_eq!(a.field, "Name");
        assert_eq!(a.op, CompareOp::Eq);
        assert_eq!(a.rhs, Rhs::Value(Value::String("ann".into())));
        assert!(!a.negated);
        assert_eq!(a.match_mode, MatchMode::CaseSensitive);
    }

    #[test]
    fn tilde_prefix_and_tilde_eq() {
        let a1 = parse("~Name = 'ann'").unwrap();
        assert_eq!(atom(&a1).match_mode, MatchMode::CaseInsensitive);

        let a2 = parse("Name ~= 'ann'").unwrap();
        assert_eq!(atom(&a2).match_mode, MatchMode::CaseInsensitive);
        assert_eq!(atom(&a2).op, CompareOp::Eq);
    }

    #[test_case("Age != 30"; "bang form")]
    #[test_case("Age <> 30"; "angle form")]
    fn not_equal_sugar(text: &str) {
        let expr = parse(text).unwrap();
        let a = atom(&expr);
        assert_eq!(a.op, CompareOp::Eq);
        assert!(a.negated);
    }

    #[test]
    fn not_before_operator() {
        let expr = parse("Id NOT IN (1, 2, 3)").unwrap();
        let a = atom(&expr);
        assert_eq!(a.op, CompareOp::In);
        assert!(a.negated);
        assert_eq!(
            a.rhs,
            Rhs::Set(vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)])
        );
    }

    #[test]
    fn quoted_string_escapes() {
        let expr = parse("Name = 'O''Brien'").unwrap();
        assert_eq!(
            atom(&expr).rhs,
            Rhs::Value(Value::String("O'Brien".into()))
        );
    }

    #[test]
    fn bracketed_name() {
        let expr = parse("[Last Name] CONTAINS 'smi'").unwrap();
        assert_eq!(atom(&expr).field, "Last Name");
        assert_eq!(atom(&expr).op, CompareOp::Contains);
    }

    #[test]
    fn null_literal() {
        let expr = parse("Comment = null").unwrap();
        assert_eq!(atom(&expr).rhs, Rhs::Value(Value::Null));
    }

    #[test]
    fn negative_and_float_numbers() {
        let expr = parse("Delta >= -2.5").unwrap();
        assert_eq!(atom(&expr).rhs, Rhs::Value(Value::Float64(-2.5)));
    }

    #[test]
    fn groups_fold_left_associatively() {
        let expr = parse("a = 1 AND b = 2 OR c = 3").unwrap();
        let Expr::Group(or_group) = expr else {
            panic!("expected group");
        };
        assert_eq!(or_group.op, BoolOp::Or);
        assert_eq!(or_group.children.len(), 2);
        let Expr::Group(and_group) = &or_group.children[0] else {
            panic!("expected nested AND group");
        };
        assert_eq!(and_group.op, BoolOp::And);
        assert_eq!(and_group.children.len(), 2);
    }

    #[test]
    fn parenthesised_grouping() {
        let expr = parse("(~first = 'ann' AND last ~= 'lee') OR age > 35").unwrap();
        let Expr::Group(group) = expr else {
            panic!("expected group");
        };
        assert_eq!(group.op, BoolOp::Or);
        assert_eq!(group.children.len(), 2);
    }

    #[test]
    fn same_connective_extends_group() {
        let expr = parse("a = 1 AND b = 2 AND c = 3").unwrap();
        let Expr::Group(group) = expr else {
            panic!("expected group");
        };
        assert_eq!(group.children.len(), 3);
    }

    #[test]
    fn error_positions() {
        let err = parse("Name $ 'x'").unwrap_err();
        assert_eq!(
            err,
            FilterError::InvalidFilterConstruct {
                position: 5,
                message: "unexpected character '$'".into()
            }
        );

        assert!(matches!(
            parse("Name = ").unwrap_err(),
            FilterError::InvalidFilterConstruct { .. }
        ));
        assert!(matches!(
            parse("Name = 'open").unwrap_err(),
            FilterError::InvalidFilterConstruct { .. }
        ));
        assert!(matches!(
            parse("Name = 'a' extra").unwrap_err(),
            FilterError::InvalidFilterConstruct { .. }
        ));
    }
}
