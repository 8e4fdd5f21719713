//! Context configuration types
//!
//! This module defines the knobs a [`crate::Context`] is created with: how
//! signals are aligned by default, whether data is fetched on demand, and the
//! budget every expression evaluation has to stay within.

use crate::alignment::{AlignmentMode, InterpolationKind};
use serde::{Deserialize, Serialize};

/// Resource budget for parsing and evaluating one expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalLimits {
    /// Longest accepted expression text, in bytes
    #[serde(default = "default_max_expression_len")]
    pub max_expression_len: usize,

    /// Deepest accepted nesting of the expression tree
    #[serde(default = "default_max_ast_depth")]
    pub max_ast_depth: usize,

    /// Largest accepted number of tree nodes
    #[serde(default = "default_max_ast_nodes")]
    pub max_ast_nodes: usize,

    /// Maximum number of nodes visited while evaluating
    #[serde(default = "default_max_eval_steps")]
    pub max_eval_steps: usize,

    /// Largest array an expression may construct (`arange`, `zeros`, ...)
    #[serde(default = "default_max_array_len")]
    pub max_array_len: usize,
}

fn default_max_expression_len() -> usize {
    4096
}

fn default_max_ast_depth() -> usize {
    64
}

fn default_max_ast_nodes() -> usize {
    1024
}

fn default_max_eval_steps() -> usize {
    10_000
}

fn default_max_array_len() -> usize {
    10_000_000
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self {
            max_expression_len: default_max_expression_len(),
            max_ast_depth: default_max_ast_depth(),
            max_ast_nodes: default_max_ast_nodes(),
            max_eval_steps: default_max_eval_steps(),
            max_array_len: default_max_array_len(),
        }
    }
}

/// Configuration for a [`crate::Context`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Alignment applied to signals created by the environment
    #[serde(default)]
    pub alignment: AlignmentMode,

    /// Interpolation applied to signals created by the environment
    #[serde(default)]
    pub interpolation: InterpolationKind,

    /// Fetch base signals through the data access layer while evaluating
    #[serde(default = "default_true")]
    pub fetch_on_demand: bool,

    /// Longest alias chain followed before giving up
    #[serde(default = "default_max_alias_hops")]
    pub max_alias_hops: usize,

    /// Expression budget
    #[serde(flatten)]
    pub limits: EvalLimits,
}

fn default_true() -> bool {
    true
}

fn default_max_alias_hops() -> usize {
    64
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            alignment: AlignmentMode::default(),
            interpolation: InterpolationKind::default(),
            fetch_on_demand: true,
            max_alias_hops: default_max_alias_hops(),
            limits: EvalLimits::default(),
        }
    }
}

impl ContextConfig {
    /// Create a new context configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the default alignment
    pub fn with_alignment(mut self, mode: AlignmentMode) -> Self {
        self.alignment = mode;
        self
    }

    /// Builder method: set the default interpolation
    pub fn with_interpolation(mut self, kind: InterpolationKind) -> Self {
        self.interpolation = kind;
        self
    }

    /// Builder method: enable or disable fetching on demand
    pub fn with_fetch_on_demand(mut self, enabled: bool) -> Self {
        self.fetch_on_demand = enabled;
        self
    }

    /// Builder method: limit alias chains
    pub fn with_max_alias_hops(mut self, hops: usize) -> Self {
        self.max_alias_hops = hops;
        self
    }

    /// Builder method: replace the whole expression budget
    pub fn with_limits(mut self, limits: EvalLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Builder method: limit the expression length
    pub fn with_max_expression_len(mut self, len: usize) -> Self {
        self.limits.max_expression_len = len;
        self
    }

    /// Builder method: limit the evaluation steps
    pub fn with_max_eval_steps(mut self, steps: usize) -> Self {
        self.limits.max_eval_steps = steps;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_config_builder() {
        let config = ContextConfig::new()
            .with_alignment(AlignmentMode::Union)
            .with_interpolation(InterpolationKind::Previous)
            .with_fetch_on_demand(false)
            .with_max_alias_hops(4)
            .with_max_expression_len(128);

        assert_eq!(config.alignment, AlignmentMode::Union);
        assert_eq!(config.interpolation, InterpolationKind::Previous);
        assert!(!config.fetch_on_demand);
        assert_eq!(config.max_alias_hops, 4);
        assert_eq!(config.limits.max_expression_len, 128);
        assert_eq!(config.limits.max_eval_steps, 10_000);
    }

    #[test]
    fn test_defaults() {
        let config = ContextConfig::default();
        assert!(config.fetch_on_demand);
        assert_eq!(config.alignment, AlignmentMode::Intersection);
        assert_eq!(config.interpolation, InterpolationKind::Linear);
        assert_eq!(config.limits, EvalLimits::default());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ContextConfig =
            serde_json::from_str(r#"{"alignment": "union", "max_eval_steps": 50}"#).unwrap();
        assert_eq!(config.alignment, AlignmentMode::Union);
        assert_eq!(config.limits.max_eval_steps, 50);
        assert_eq!(config.limits.max_ast_depth, 64);
        assert!(config.fetch_on_demand);
    }
}
