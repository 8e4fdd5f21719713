//! Core types for the signal expression engine
//!
//! This module defines the error taxonomy shared by the parser, the
//! environment and the context, plus the crate-wide `Result` alias.

use std::collections::BTreeSet;
use std::fmt;

/// Result type for signal processing operations
pub type Result<T> = std::result::Result<T, ProcessingError>;

/// Classification of an invalid expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionErrorKind {
    /// Unbalanced, nested or misordered placeholder markers, or a grammar error
    Malformed,
    /// Power operator, loop/conditional keywords, dunder tokens, empty literals
    Disallowed,
    /// A name, attribute or function outside the allow-listed namespace
    UndefinedName,
    /// Arithmetic or type failure while evaluating
    Evaluation,
    /// Expression length, AST size/depth or evaluation step budget exceeded
    LimitExceeded,
}

impl fmt::Display for ExpressionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressionErrorKind::Malformed => write!(f, "malformed expression"),
            ExpressionErrorKind::Disallowed => write!(f, "disallowed construct"),
            ExpressionErrorKind::UndefinedName => write!(f, "undefined name"),
            ExpressionErrorKind::Evaluation => write!(f, "evaluation failure"),
            ExpressionErrorKind::LimitExceeded => write!(f, "limit exceeded"),
        }
    }
}

/// Errors that can occur while parsing, resolving or evaluating signals
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessingError {
    #[error("Invalid expression ({kind}): {message}")]
    InvalidExpression {
        kind: ExpressionErrorKind,
        message: String,
    },

    #[error("Following keys are undefined {missing:?}")]
    InvalidVariable { missing: BTreeSet<String> },

    #[error("Unbound signal: {0}")]
    UnboundSignal(String),

    #[error("Alias chain starting at '{0}' does not terminate")]
    AliasCycle(String),

    #[error("Cyclic signal definition: {0}")]
    CyclicDefinition(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid table: {0}")]
    InvalidTable(String),

    #[error("Data access failed: {0}")]
    DataAccess(String),
}

impl ProcessingError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::InvalidExpression {
            kind: ExpressionErrorKind::Malformed,
            message: message.into(),
        }
    }

    pub fn disallowed(message: impl Into<String>) -> Self {
        Self::InvalidExpression {
            kind: ExpressionErrorKind::Disallowed,
            message: message.into(),
        }
    }

    pub fn undefined_name(name: impl fmt::Display) -> Self {
        Self::InvalidExpression {
            kind: ExpressionErrorKind::UndefinedName,
            message: format!("Undefined name {}", name),
        }
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::InvalidExpression {
            kind: ExpressionErrorKind::Evaluation,
            message: message.into(),
        }
    }

    pub fn limit_exceeded(message: impl Into<String>) -> Self {
        Self::InvalidExpression {
            kind: ExpressionErrorKind::LimitExceeded,
            message: message.into(),
        }
    }

    /// Kind of an invalid expression, `None` for every other error
    pub fn expression_kind(&self) -> Option<ExpressionErrorKind> {
        match self {
            ProcessingError::InvalidExpression { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True for errors caused by the expression text itself
    pub fn is_invalid_expression(&self) -> bool {
        matches!(self, ProcessingError::InvalidExpression { .. })
    }

    /// True when a registry lookup dead-ended ("waiting for data" rather than broken)
    pub fn is_unbound(&self) -> bool {
        matches!(self, ProcessingError::UnboundSignal(_))
    }
}
