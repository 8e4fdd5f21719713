//! Tree-walking evaluator

use super::ast::{Expr, UnaryOp};
use super::namespace;
use crate::config::EvalLimits;
use crate::types::{ProcessingError, Result};
use crate::value::Value;
use std::collections::HashMap;

pub struct Evaluator<'a> {
    locals: &'a HashMap<String, Value>,
    limits: &'a EvalLimits,
    steps: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(locals: &'a HashMap<String, Value>, limits: &'a EvalLimits) -> Self {
        Self {
            locals,
            limits,
            steps: 0,
        }
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.limits.max_eval_steps {
            return Err(ProcessingError::limit_exceeded(format!(
                "evaluation exceeded {} steps",
                self.limits.max_eval_steps
            )));
        }
        Ok(())
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value> {
        self.tick()?;
        match expr {
            Expr::Int(v) => Ok(Value::Int(*v)),
            Expr::Float(v) => Ok(Value::Float(*v)),
            Expr::Name(name) => {
                if let Some(value) = self.locals.get(name) {
                    return Ok(value.clone());
                }
                namespace::constant(name)
                    .map(Value::Float)
                    .ok_or_else(|| ProcessingError::undefined_name(name))
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Plus => Ok(value),
                    UnaryOp::Minus => value.negate(),
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                lhs.binary(*op, &rhs)
            }
            Expr::Call { func, args } => {
                let spec = namespace::function(func).ok_or_else(|| ProcessingError::undefined_name(func))?;
                let values = args.iter().map(|a| self.eval(a)).collect::<Result<Vec<_>>>()?;
                namespace::call(spec, values, self.limits)
            }
            Expr::Attribute { value, attr } => {
                if !namespace::is_attribute(attr) {
                    return Err(ProcessingError::undefined_name(attr));
                }
                self.eval(value)?.attribute(attr)
            }
        }
    }
}
