//! Values produced while evaluating expressions

use crate::buffer::{floor_div, BinaryOp, Buffer, Values};
use crate::signal::Signal;
use crate::types::{ProcessingError, Result};
use crate::units::TimeUnit;
use ndarray::{ArrayD, IxDyn};
use std::fmt;

/// A count of time units, e.g. `365D`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Duration {
    pub count: i64,
    pub unit: TimeUnit,
}

impl Duration {
    pub fn new(count: i64, unit: TimeUnit) -> Self {
        Self { count, unit }
    }

    /// Express this duration in `unit`, which must be at least as fine
    pub fn to_unit(&self, unit: TimeUnit) -> Result<i64> {
        let factor = self.unit.factor_to(unit).ok_or_else(|| {
            ProcessingError::evaluation(format!("cannot express {} in '{}'", self, unit))
        })?;
        self.count
            .checked_mul(factor)
            .ok_or_else(|| duration_overflow(format!("{} in '{}'", self, unit)))
    }

    /// This duration repeated `n` times
    pub fn times(&self, n: i64) -> Result<Duration> {
        self.count
            .checked_mul(n)
            .map(|count| Duration::new(count, self.unit))
            .ok_or_else(|| duration_overflow(format!("{} * {}", self, n)))
    }
}

fn duration_overflow(what: impl fmt::Display) -> ProcessingError {
    ProcessingError::evaluation(format!("duration overflows a 64-bit count: {}", what))
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit)
    }
}

/// Any value an expression can evaluate to
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Buffer(Buffer),
    Duration(Duration),
    Signal(Box<Signal>),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Buffer> for Value {
    fn from(v: Buffer) -> Self {
        Value::Buffer(v)
    }
}

impl From<Signal> for Value {
    fn from(v: Signal) -> Self {
        Value::Signal(Box::new(v))
    }
}

impl From<Duration> for Value {
    fn from(v: Duration) -> Self {
        Value::Duration(v)
    }
}

fn unsupported(op: &str, lhs: &Value, rhs: &Value) -> ProcessingError {
    ProcessingError::evaluation(format!(
        "unsupported operand types for {}: '{}' and '{}'",
        op,
        lhs.type_name(),
        rhs.type_name()
    ))
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Buffer(_) => "buffer",
            Value::Duration(_) => "duration",
            Value::Signal(_) => "signal",
        }
    }

    pub fn as_signal(&self) -> Option<&Signal> {
        match self {
            Value::Signal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            Value::Buffer(b) => Some(b),
            _ => None,
        }
    }

    /// Numeric scalar as `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Scalars become 0-D buffers; durations and signals are rejected
    pub fn to_buffer(&self) -> Result<Buffer> {
        match self {
            Value::Int(v) => Ok(Buffer::scalar_i64(*v)),
            Value::Float(v) => Ok(Buffer::scalar_f64(*v)),
            Value::Buffer(b) => Ok(b.clone()),
            other => Err(ProcessingError::evaluation(format!(
                "expected a number or buffer, got {}",
                other.type_name()
            ))),
        }
    }

    /// The buffer view used by callers that want plain data
    ///
    /// Signals yield their primary data.
    pub fn into_buffer(self) -> Result<Buffer> {
        match self {
            Value::Signal(s) => Ok(s.data_primary().clone()),
            other => other.to_buffer(),
        }
    }

    /// Signal attribute access (`.time`, `.data`, ...)
    pub fn attribute(&self, name: &str) -> Result<Value> {
        let Value::Signal(sig) = self else {
            return Err(ProcessingError::evaluation(format!(
                "'{}' has no attribute '{}'",
                self.type_name(),
                name
            )));
        };
        let buffer = match name {
            "time" => sig.time(),
            "data" | "data_primary" => sig.data_primary(),
            "data_secondary" => sig.data_secondary(),
            other => return Err(ProcessingError::undefined_name(other)),
        };
        Ok(Value::Buffer(buffer.clone()))
    }

    pub fn negate(&self) -> Result<Value> {
        Ok(match self {
            Value::Int(v) => Value::Int(v.wrapping_neg()),
            Value::Float(v) => Value::Float(-v),
            Value::Buffer(b) => Value::Buffer(b.negated()),
            Value::Duration(d) => Value::Duration(Duration::new(d.count.wrapping_neg(), d.unit)),
            Value::Signal(s) => Value::from(s.try_map_slots(|b| Ok(b.negated()))?),
        })
    }

    /// Apply a floating-point function elementwise
    pub fn map_f64(&self, name: &str, f: fn(f64) -> f64) -> Result<Value> {
        Ok(match self {
            Value::Int(_) | Value::Float(_) => {
                let x = self.as_f64().unwrap_or(f64::NAN);
                Value::Float(f(x))
            }
            Value::Buffer(b) => Value::Buffer(b.map_f64(f)),
            Value::Signal(s) => Value::from(s.try_map_slots(|b| Ok(b.map_f64(f)))?),
            Value::Duration(_) => {
                return Err(ProcessingError::evaluation(format!("{} is not defined for durations", name)))
            }
        })
    }

    /// Combine two values elementwise with a floating-point function
    pub fn zip_f64(&self, other: &Value, name: &str, f: fn(f64, f64) -> f64) -> Result<Value> {
        match (self, other) {
            (Value::Signal(a), Value::Signal(b)) => Ok(Value::from(a.zip_with(b, |x, y| x.zip_f64(y, f))?)),
            (Value::Signal(s), v) => {
                let operand = v.to_buffer()?;
                Ok(Value::from(s.try_map_slots(|slot| slot.zip_f64(&operand, f))?))
            }
            (v, Value::Signal(s)) => {
                let operand = v.to_buffer()?;
                Ok(Value::from(s.try_map_slots(|slot| operand.zip_f64(slot, f))?))
            }
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Ok(Value::Float(f(x, y))),
                _ => {
                    if matches!(a, Value::Duration(_)) || matches!(b, Value::Duration(_)) {
                        return Err(unsupported(name, a, b));
                    }
                    Ok(Value::Buffer(a.to_buffer()?.zip_f64(&b.to_buffer()?, f)?))
                }
            },
        }
    }

    /// `self op rhs`
    pub fn binary(&self, op: BinaryOp, rhs: &Value) -> Result<Value> {
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => int_op(op, *a, *b),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                let a = self.as_f64().unwrap_or(f64::NAN);
                let b = rhs.as_f64().unwrap_or(f64::NAN);
                if b == 0.0 && matches!(op, BinaryOp::Div | BinaryOp::FloorDiv) {
                    return Err(ProcessingError::evaluation("float division by zero"));
                }
                Ok(Value::Float(op.apply_f64(a, b)))
            }
            (Value::Duration(a), Value::Duration(b)) => {
                duration_op(op, *a, *b).ok_or_else(|| unsupported(op.symbol(), self, rhs))?
            }
            (Value::Duration(d), Value::Int(n)) => match op {
                BinaryOp::Mul => Ok(Value::Duration(d.times(*n)?)),
                BinaryOp::FloorDiv if *n != 0 => Ok(Value::Duration(Duration::new(floor_div(d.count, *n), d.unit))),
                _ => Err(unsupported(op.symbol(), self, rhs)),
            },
            (Value::Int(n), Value::Duration(d)) if op == BinaryOp::Mul => {
                Ok(Value::Duration(d.times(*n)?))
            }
            (Value::Buffer(b), Value::Duration(d)) if matches!(op, BinaryOp::Add | BinaryOp::Sub) => {
                Ok(Value::Buffer(shift_time(b, *d, op)?))
            }
            (Value::Duration(d), Value::Buffer(b)) if op == BinaryOp::Add => Ok(Value::Buffer(shift_time(b, *d, op)?)),
            (Value::Duration(_), _) | (_, Value::Duration(_)) => Err(unsupported(op.symbol(), self, rhs)),
            (Value::Signal(a), Value::Signal(b)) => Ok(Value::from(a.binary(op, b)?)),
            (Value::Signal(s), v) => Ok(Value::from(s.apply(op, &v.to_buffer()?)?)),
            (v, Value::Signal(s)) => Ok(Value::from(s.apply_reflected(op, &v.to_buffer()?)?)),
            (a, b) => Ok(Value::Buffer(a.to_buffer()?.binary(op, &b.to_buffer()?)?)),
        }
    }
}

fn int_op(op: BinaryOp, a: i64, b: i64) -> Result<Value> {
    match op {
        BinaryOp::Div if b == 0 => Err(ProcessingError::evaluation("division by zero")),
        BinaryOp::Div => Ok(Value::Float(a as f64 / b as f64)),
        BinaryOp::FloorDiv if b == 0 => Err(ProcessingError::evaluation("integer division by zero")),
        _ => Ok(Value::Int(op.apply_i64(a, b))),
    }
}

/// Finer of two units together with both conversion factors
fn common_unit(a: TimeUnit, b: TimeUnit) -> Result<(TimeUnit, i64, i64)> {
    let fine = a.max(b);
    match (a.factor_to(fine), b.factor_to(fine)) {
        (Some(fa), Some(fb)) => Ok((fine, fa, fb)),
        _ => Err(ProcessingError::evaluation(format!(
            "cannot combine time units '{}' and '{}'",
            a, b
        ))),
    }
}

fn duration_op(op: BinaryOp, a: Duration, b: Duration) -> Option<Result<Value>> {
    if op == BinaryOp::Mul {
        return None;
    }
    let converted = common_unit(a.unit, b.unit).and_then(|(unit, _, _)| Ok((unit, a.to_unit(unit)?, b.to_unit(unit)?)));
    let (unit, x, y) = match converted {
        Ok(c) => c,
        Err(e) => return Some(Err(e)),
    };
    let overflow = || duration_overflow(format!("{} {} {}", a, op.symbol(), b));
    let value = match op {
        BinaryOp::Add => x
            .checked_add(y)
            .map(|count| Value::Duration(Duration::new(count, unit)))
            .ok_or_else(overflow),
        BinaryOp::Sub => x
            .checked_sub(y)
            .map(|count| Value::Duration(Duration::new(count, unit)))
            .ok_or_else(overflow),
        BinaryOp::Div | BinaryOp::FloorDiv if y == 0 => Err(ProcessingError::evaluation("division by zero duration")),
        BinaryOp::Div => Ok(Value::Float(x as f64 / y as f64)),
        BinaryOp::FloorDiv => Ok(Value::Int(floor_div(x, y))),
        BinaryOp::Mul => return None,
    };
    Some(value)
}

/// Shift a time buffer by a duration; the result is an integer buffer in the
/// finer of the two units
fn shift_time(time: &Buffer, delta: Duration, op: BinaryOp) -> Result<Buffer> {
    let unit = TimeUnit::from_symbol(time.unit()).ok_or_else(|| {
        ProcessingError::evaluation(format!(
            "cannot add a duration to a buffer with unit '{}'",
            time.unit()
        ))
    })?;
    let (fine, time_factor, _) = common_unit(unit, delta.unit)?;
    let step = delta.to_unit(fine)?;
    let ticks = time
        .to_i64_vec()
        .unwrap_or_else(|| time.to_f64_vec().into_iter().map(|v| v as i64).collect());

    let shifted = ticks
        .into_iter()
        .map(|t| {
            let t = t.checked_mul(time_factor)?;
            match op {
                BinaryOp::Sub => t.checked_sub(step),
                _ => t.checked_add(step),
            }
        })
        .collect::<Option<Vec<i64>>>()
        .ok_or_else(|| duration_overflow(format!("'{}' time {} {}", time.unit(), op.symbol(), delta)))?;

    let array = ArrayD::from_shape_vec(IxDyn(time.shape()), shifted)
        .map_err(|e| ProcessingError::InvalidData(format!("Bad buffer shape {:?}: {}", time.shape(), e)))?;
    Ok(Buffer::new(Values::Int(array), fine.symbol()))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Buffer(b) => write!(f, "{}", b),
            Value::Duration(d) => write!(f, "{}", d),
            Value::Signal(s) => write!(f, "{}", s),
        }
    }
}
