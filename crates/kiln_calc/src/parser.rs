//! Recursive-descent parser for `.calc` units.
//!
//! A unit is any text holding one `name = expr` definition per line: a whole
//! file, or a single definition carved out of one. Precedence, lowest first:
//! `+ -`, then `* /`, then unary `-`. Binary operators associate left.
//!
//! Expression trees are capped at [`MAX_DEPTH`] levels, as is the nesting
//! of parentheses and negations, so evaluating or dropping a parsed tree
//! never recurses deeper than that.

use crate::ast::{BinOp, Definition, Expr, SyntaxError};
use crate::lexer::{lex, Token};

/// Deepest expression accepted, in tree levels and in nesting.
pub const MAX_DEPTH: usize = 256;

/// Parses every definition in `text`.
///
/// Blank and comment-only lines are skipped. Fails on the first malformed line.
pub fn parse_unit(text: &str) -> Result<Vec<Definition>, SyntaxError> {
    let mut definitions = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let error = |message: String| SyntaxError {
            line: idx + 1,
            message,
        };
        let tokens = lex(line).map_err(error)?;
        if tokens.is_empty() {
            continue;
        }
        definitions.push(parse_definition(tokens).map_err(error)?);
    }
    Ok(definitions)
}

fn parse_definition(tokens: Vec<Token>) -> Result<Definition, String> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        nesting: 0,
    };
    let name = match parser.advance() {
        Some(Token::Ident(name)) => name,
        Some(other) => return Err(format!("expected a name, found {other}")),
        None => return Err("expected a name".to_string()),
    };
    match parser.advance() {
        Some(Token::Eq) => {}
        Some(other) => return Err(format!("expected `=` after `{name}`, found {other}")),
        None => return Err(format!("expected `=` after `{name}`")),
    }
    let (expr, _) = parser.expr()?;
    if let Some(extra) = parser.peek() {
        return Err(format!("unexpected {extra} after expression"));
    }
    Ok(Definition { name, expr })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
}

/// A parsed expression and the depth of its tree.
type Measured = (Expr, usize);

fn too_deep() -> String {
    format!("expression nested more than {MAX_DEPTH} levels deep")
}

fn grow(depth: usize) -> Result<usize, String> {
    if depth >= MAX_DEPTH {
        return Err(too_deep());
    }
    Ok(depth + 1)
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn enter(&mut self) -> Result<(), String> {
        if self.nesting >= MAX_DEPTH {
            return Err(too_deep());
        }
        self.nesting += 1;
        Ok(())
    }

    fn expr(&mut self) -> Result<Measured, String> {
        let (mut lhs, mut depth) = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok((lhs, depth)),
            };
            self.pos += 1;
            let (rhs, rhs_depth) = self.term()?;
            depth = grow(depth.max(rhs_depth))?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<Measured, String> {
        let (mut lhs, mut depth) = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => return Ok((lhs, depth)),
            };
            self.pos += 1;
            let (rhs, rhs_depth) = self.unary()?;
            depth = grow(depth.max(rhs_depth))?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Measured, String> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            self.enter()?;
            let (inner, depth) = self.unary()?;
            self.nesting -= 1;
            return Ok((Expr::Neg(Box::new(inner)), grow(depth)?));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Measured, String> {
        match self.advance() {
            Some(Token::Int(n)) => Ok((Expr::Int(n), 1)),
            Some(Token::Ident(name)) => Ok((Expr::Name(name), 1)),
            Some(Token::LParen) => {
                self.enter()?;
                let inner = self.expr()?;
                self.nesting -= 1;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(format!("expected `)`, found {other}")),
                    None => Err("expected `)`".to_string()),
                }
            }
            Some(other) => Err(format!("expected an expression, found {other}")),
            None => Err("expected an expression".to_string()),
        }
    }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(text: &str) -> Expr {
        let mut defs = parse_unit(text).unwrap();
        assert_eq!(defs.len(), 1);
        defs.remove(0).expr
    }

    fn name(s: &str) -> Box<Expr> {
        Box::new(Expr::Name(s.to_string()))
    }

    #[test]
    fn precedence() {
        assert_eq!(
            one("x = a + b * c"),
            Expr::Binary {
                op: BinOp::Add,
                lhs: name("a"),
                rhs: Box::new(binary(BinOp::Mul, Expr::Name("b".into()), Expr::Name("c".into()))),
            }
        );
    }

    #[test]
    fn left_associative() {
        assert_eq!(
            one("x = a - b - c"),
            binary(
                BinOp::Sub,
                binary(BinOp::Sub, Expr::Name("a".into()), Expr::Name("b".into())),
                Expr::Name("c".into())
            )
        );
    }

    #[test]
    fn parentheses_and_negation() {
        assert_eq!(
            one("x = -(a + 1)"),
            Expr::Neg(Box::new(binary(BinOp::Add, Expr::Name("a".into()), Expr::Int(1))))
        );
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        let defs = parse_unit("# header\n\na = 1\n  # note\nb = a\n").unwrap();
        let names: Vec<_> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn error_reports_line() {
        let err = parse_unit("a = 1\nb = (a + 2\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.message, "expected `)`");
    }

    #[test]
    fn missing_equals() {
        let err = parse_unit("a 1").unwrap_err();
        assert!(err.message.contains("expected `=`"));
    }

    #[test]
    fn deep_parentheses_are_a_syntax_error() {
        let depth = 200_000;
        let line = format!("x = {}1{}", "(".repeat(depth), ")".repeat(depth));
        let err = parse_unit(&line).unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("nested more than 256"), "{}", err.message);
    }

    #[test]
    fn long_operator_chains_are_capped() {
        let chain = vec!["a"; 1000].join(" + ");
        let err = parse_unit(&format!("x = {chain}")).unwrap_err();
        assert!(err.message.contains("nested"));

        let negations = "-".repeat(1000);
        assert!(parse_unit(&format!("x = {negations}1")).is_err());
    }

    #[test]
    fn nesting_within_the_cap_parses() {
        let depth = 100;
        let line = format!("x = {}1{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(one(&line), Expr::Int(1));
        let chain = vec!["1"; 100].join(" + ");
        assert!(parse_unit(&format!("x = {chain}")).is_ok());
    }

    #[test]
    fn trailing_tokens() {
        let err = parse_unit("a = 1 2").unwrap_err();
        assert!(err.message.contains("unexpected `2`"));
    }
}
