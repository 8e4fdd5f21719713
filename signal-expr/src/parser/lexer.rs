//! Tokenizer for the expression grammar

use crate::types::{ProcessingError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    LParen,
    RParen,
    Comma,
    Dot,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Int(v) => v.to_string(),
            Token::Float(v) => v.to_string(),
            Token::Ident(name) => name.clone(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::DoubleStar => "**".into(),
            Token::Slash => "/".into(),
            Token::DoubleSlash => "//".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::Comma => ",".into(),
            Token::Dot => ".".into(),
        }
    }
}

pub fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

pub fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Split an expression into tokens
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let (token, next) = lex_number(&chars, i)?;
            tokens.push(token);
            i = next;
            continue;
        }

        if is_ident_start(c) {
            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (token, width) = match (c, next) {
            ('*', Some('*')) => (Token::DoubleStar, 2),
            ('/', Some('/')) => (Token::DoubleSlash, 2),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            (',', _) => (Token::Comma, 1),
            ('.', _) => (Token::Dot, 1),
            _ => {
                return Err(ProcessingError::malformed(format!(
                    "unexpected character '{}' at position {}",
                    c, i
                )))
            }
        };
        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

fn lex_number(chars: &[char], start: usize) -> Result<(Token, usize)> {
    let mut i = start;
    let mut is_float = false;

    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' {
        // `1.` is a float, `key0.time` never reaches here
        is_float = true;
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        let mut j = i + 1;
        if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
            j += 1;
        }
        if j < chars.len() && chars[j].is_ascii_digit() {
            is_float = true;
            i = j;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    if i < chars.len() && is_ident_char(chars[i]) {
        return Err(ProcessingError::malformed(format!(
            "invalid numeric literal at position {}",
            start
        )));
    }

    let text: String = chars[start..i].iter().collect();
    let token = if is_float {
        Token::Float(
            text.parse::<f64>()
                .map_err(|_| ProcessingError::malformed(format!("invalid number '{}'", text)))?,
        )
    } else {
        Token::Int(
            text.parse::<i64>()
                .map_err(|_| ProcessingError::malformed(format!("integer literal '{}' is too large", text)))?,
        )
    };
    Ok((token, i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_arithmetic() {
        let tokens = tokenize("key0 + 2.5*sin(key1) // 3").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("key0".into()),
                Token::Plus,
                Token::Float(2.5),
                Token::Star,
                Token::Ident("sin".into()),
                Token::LParen,
                Token::Ident("key1".into()),
                Token::RParen,
                Token::DoubleSlash,
                Token::Int(3),
            ]
        );
    }

    #[test]
    fn test_tokenize_attribute_and_exponent() {
        let tokens = tokenize("key0.time - 1e3").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("key0".into()),
                Token::Dot,
                Token::Ident("time".into()),
                Token::Minus,
                Token::Float(1000.0),
            ]
        );
        assert_eq!(tokenize(".5").unwrap(), vec![Token::Float(0.5)]);
    }

    #[test]
    fn test_power_is_a_token() {
        assert_eq!(tokenize("2**3").unwrap()[1], Token::DoubleStar);
    }

    #[test]
    fn test_rejects_foreign_characters() {
        for bad in ["a = 1", "'ls'", "a[0]", "a:b", "x == y", "3x"] {
            let err = tokenize(bad).unwrap_err();
            assert!(err.is_invalid_expression(), "{}", bad);
        }
        assert!(tokenize("99999999999999999999").is_err());
    }
}
