//! Expression tree and recursive-descent parser
//!
//! The grammar only knows numbers, names, unary and binary arithmetic, calls of
//! named functions and attribute access:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '//') unary)*
//! unary   := ('+' | '-') unary | postfix
//! postfix := primary ('(' args ')' | '.' IDENT)*
//! primary := INT | FLOAT | IDENT | '(' expr ')'
//! ```

use super::lexer::Token;
use crate::buffer::BinaryOp;
use crate::types::{ProcessingError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Name(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: String,
        args: Vec<Expr>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
}

impl Expr {
    /// Number of nodes in the tree
    pub fn node_count(&self) -> usize {
        1 + match self {
            Expr::Int(_) | Expr::Float(_) | Expr::Name(_) => 0,
            Expr::Unary { operand, .. } => operand.node_count(),
            Expr::Binary { lhs, rhs, .. } => lhs.node_count() + rhs.node_count(),
            Expr::Call { args, .. } => args.iter().map(Expr::node_count).sum(),
            Expr::Attribute { value, .. } => value.node_count(),
        }
    }

    /// Height of the tree
    pub fn depth(&self) -> usize {
        1 + match self {
            Expr::Int(_) | Expr::Float(_) | Expr::Name(_) => 0,
            Expr::Unary { operand, .. } => operand.depth(),
            Expr::Binary { lhs, rhs, .. } => lhs.depth().max(rhs.depth()),
            Expr::Call { args, .. } => args.iter().map(Expr::depth).max().unwrap_or(0),
            Expr::Attribute { value, .. } => value.depth(),
        }
    }

    /// Visit every node, parents before children
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr) -> Result<()>) -> Result<()> {
        visit(self)?;
        match self {
            Expr::Int(_) | Expr::Float(_) | Expr::Name(_) => Ok(()),
            Expr::Unary { operand, .. } => operand.walk(visit),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.walk(visit)?;
                rhs.walk(visit)
            }
            Expr::Call { args, .. } => args.iter().try_for_each(|a| a.walk(visit)),
            Expr::Attribute { value, .. } => value.walk(visit),
        }
    }
}

/// Parse a token stream into a single expression
pub fn parse(tokens: &[Token], max_depth: usize) -> Result<Expr> {
    let mut parser = TreeBuilder {
        tokens,
        pos: 0,
        depth: 0,
        max_depth,
    };
    let expr = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(ProcessingError::malformed(format!(
            "unexpected '{}' after end of expression",
            token.describe()
        )));
    }
    Ok(expr)
}

struct TreeBuilder<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl<'a> TreeBuilder<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.advance() {
            Some(token) if *token == expected => Ok(()),
            Some(token) => Err(ProcessingError::malformed(format!(
                "expected '{}' but found '{}'",
                expected.describe(),
                token.describe()
            ))),
            None => Err(ProcessingError::malformed(format!(
                "expected '{}' but the expression ended",
                expected.describe()
            ))),
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(ProcessingError::limit_exceeded(format!(
                "expression nesting deeper than {}",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn expr(&mut self) -> Result<Expr> {
        self.enter()?;
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.leave();
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::DoubleSlash) => BinaryOp::FloorDiv,
                Some(Token::DoubleStar) => {
                    return Err(ProcessingError::disallowed("power operator '**' is not allowed"))
                }
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Some(Token::Plus) => UnaryOp::Plus,
            Some(Token::Minus) => UnaryOp::Minus,
            _ => return self.postfix(),
        };
        self.pos += 1;
        self.enter()?;
        let operand = self.unary()?;
        self.leave();
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> Result<Expr> {
        // Only a bare identifier may be called, never `(f)(x)` or `f(x)(y)`
        let mut callable = matches!(self.peek(), Some(Token::Ident(_)));
        let mut node = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::LParen) => {
                    let func = match &node {
                        Expr::Name(name) if callable => name.clone(),
                        _ => return Err(ProcessingError::disallowed("only named functions can be called")),
                    };
                    self.pos += 1;
                    let args = self.arguments()?;
                    node = Expr::Call { func, args };
                    callable = false;
                }
                Some(Token::Dot) => {
                    callable = false;
                    self.pos += 1;
                    match self.advance() {
                        Some(Token::Ident(attr)) => {
                            node = Expr::Attribute {
                                value: Box::new(node),
                                attr: attr.clone(),
                            };
                        }
                        _ => return Err(ProcessingError::malformed("expected an attribute name after '.'")),
                    }
                }
                Some(Token::DoubleStar) => {
                    return Err(ProcessingError::disallowed("power operator '**' is not allowed"))
                }
                _ => return Ok(node),
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(token) => {
                    return Err(ProcessingError::malformed(format!(
                        "expected ',' or ')' but found '{}'",
                        token.describe()
                    )))
                }
                None => return Err(ProcessingError::malformed("unclosed argument list")),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Int(v)) => Ok(Expr::Int(*v)),
            Some(Token::Float(v)) => Ok(Expr::Float(*v)),
            Some(Token::Ident(name)) => Ok(Expr::Name(name.clone())),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(token) => Err(ProcessingError::malformed(format!(
                "unexpected '{}'",
                token.describe()
            ))),
            None => Err(ProcessingError::malformed("unexpected end of expression")),
        }
    }
}
