//! Lexical analyzer for a single `.calc` line.
//!
//! Comments (`#` to end of line) and whitespace are skipped. Unlike a full
//! compiler lexer there is no recovery: the first bad character ends the line.

use std::fmt;

/// A lexical token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// An integer literal.
    Int(i64),
    /// An identifier.
    Ident(String),
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `=`
    Eq,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Int(n) => write!(f, "`{n}`"),
            Token::Ident(s) => write!(f, "`{s}`"),
            Token::Plus => f.write_str("`+`"),
            Token::Minus => f.write_str("`-`"),
            Token::Star => f.write_str("`*`"),
            Token::Slash => f.write_str("`/`"),
            Token::LParen => f.write_str("`(`"),
            Token::RParen => f.write_str("`)`"),
            Token::Eq => f.write_str("`=`"),
        }
    }
}

/// Strips a trailing `#` comment.
pub fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Returns `true` if `s` is a valid identifier.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Lexes one line into tokens.
pub fn lex(line: &str) -> Result<Vec<Token>, String> {
    let bytes = strip_comment(line).as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let b = bytes[pos];
        let single = match b {
            b'+' => Some(Token::Plus),
            b'-' => Some(Token::Minus),
            b'*' => Some(Token::Star),
            b'/' => Some(Token::Slash),
            b'(' => Some(Token::LParen),
            b')' => Some(Token::RParen),
            b'=' => Some(Token::Eq),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push(token);
            pos += 1;
        } else if b.is_ascii_whitespace() {
            pos += 1;
        } else if b.is_ascii_digit() {
            let start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            let text = &line[start..pos];
            let value = text
                .parse::<i64>()
                .map_err(|_| format!("integer literal `{text}` is out of range"))?;
            tokens.push(Token::Int(value));
        } else if b.is_ascii_alphabetic() || b == b'_' {
            let start = pos;
            while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
                pos += 1;
            }
            tokens.push(Token::Ident(line[start..pos].to_string()));
        } else {
            let c = line[pos..].chars().next().unwrap_or('?');
            return Err(format!("unexpected character `{c}`"));
        }
    }
    Ok(tokens)
}
