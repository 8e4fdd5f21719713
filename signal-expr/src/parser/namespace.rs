//! Allow-listed names an expression may reference
//!
//! Everything an expression can touch is enumerated here. There is no
//! reflection: a name that is not in these tables does not exist.

use crate::buffer::{Buffer, Values};
use crate::config::EvalLimits;
use crate::types::{ProcessingError, Result};
use crate::units::TimeUnit;
use crate::value::{Duration, Value};
use ndarray::{ArrayD, IxDyn};
use std::f64::consts;

/// Named constants
pub const CONSTANTS: &[(&str, f64)] = &[
    ("pi", consts::PI),
    ("e", consts::E),
    ("inf", f64::INFINITY),
    ("nan", f64::NAN),
];

/// Attributes readable on a signal
pub const ATTRIBUTES: &[&str] = &["time", "data", "data_primary", "data_secondary"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Between(usize, usize),
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match *self {
            Arity::Exact(k) => n == k,
            Arity::Between(lo, hi) => (lo..=hi).contains(&n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Std,
    Var,
    Ptp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constructor {
    Arange,
    Linspace,
    Zeros,
    Ones,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOp {
    Diff,
    Cumsum,
}

#[derive(Debug, Clone, Copy)]
pub enum FunctionKind {
    Elementwise(fn(f64) -> f64),
    Binary(fn(f64, f64) -> f64),
    Reduction(Reduction),
    Constructor(Constructor),
    Sequence(SequenceOp),
    Duration(TimeUnit),
}

#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub arity: Arity,
    pub kind: FunctionKind,
}

const fn elementwise(name: &'static str, f: fn(f64) -> f64) -> FunctionSpec {
    FunctionSpec {
        name,
        arity: Arity::Exact(1),
        kind: FunctionKind::Elementwise(f),
    }
}

const fn binary(name: &'static str, f: fn(f64, f64) -> f64) -> FunctionSpec {
    FunctionSpec {
        name,
        arity: Arity::Exact(2),
        kind: FunctionKind::Binary(f),
    }
}

const fn reduction(name: &'static str, r: Reduction) -> FunctionSpec {
    FunctionSpec {
        name,
        arity: Arity::Exact(1),
        kind: FunctionKind::Reduction(r),
    }
}

const fn duration(name: &'static str, unit: TimeUnit) -> FunctionSpec {
    FunctionSpec {
        name,
        arity: Arity::Exact(1),
        kind: FunctionKind::Duration(unit),
    }
}

fn sign(x: f64) -> f64 {
    if x.is_nan() {
        f64::NAN
    } else if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn minimum(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.min(b)
    }
}

fn maximum(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

/// Every callable function
pub const FUNCTIONS: &[FunctionSpec] = &[
    elementwise("sin", f64::sin),
    elementwise("cos", f64::cos),
    elementwise("tan", f64::tan),
    elementwise("arcsin", f64::asin),
    elementwise("arccos", f64::acos),
    elementwise("arctan", f64::atan),
    elementwise("sinh", f64::sinh),
    elementwise("cosh", f64::cosh),
    elementwise("tanh", f64::tanh),
    elementwise("exp", f64::exp),
    elementwise("log", f64::ln),
    elementwise("log10", f64::log10),
    elementwise("log2", f64::log2),
    elementwise("sqrt", f64::sqrt),
    elementwise("abs", f64::abs),
    elementwise("absolute", f64::abs),
    elementwise("floor", f64::floor),
    elementwise("ceil", f64::ceil),
    elementwise("round", f64::round_ties_even),
    elementwise("sign", sign),
    elementwise("deg2rad", f64::to_radians),
    elementwise("rad2deg", f64::to_degrees),
    binary("arctan2", f64::atan2),
    binary("hypot", f64::hypot),
    binary("minimum", minimum),
    binary("maximum", maximum),
    reduction("sum", Reduction::Sum),
    reduction("mean", Reduction::Mean),
    reduction("median", Reduction::Median),
    reduction("min", Reduction::Min),
    reduction("max", Reduction::Max),
    reduction("std", Reduction::Std),
    reduction("var", Reduction::Var),
    reduction("ptp", Reduction::Ptp),
    FunctionSpec {
        name: "arange",
        arity: Arity::Between(1, 3),
        kind: FunctionKind::Constructor(Constructor::Arange),
    },
    FunctionSpec {
        name: "linspace",
        arity: Arity::Exact(3),
        kind: FunctionKind::Constructor(Constructor::Linspace),
    },
    FunctionSpec {
        name: "zeros",
        arity: Arity::Exact(1),
        kind: FunctionKind::Constructor(Constructor::Zeros),
    },
    FunctionSpec {
        name: "ones",
        arity: Arity::Exact(1),
        kind: FunctionKind::Constructor(Constructor::Ones),
    },
    FunctionSpec {
        name: "diff",
        arity: Arity::Exact(1),
        kind: FunctionKind::Sequence(SequenceOp::Diff),
    },
    FunctionSpec {
        name: "cumsum",
        arity: Arity::Exact(1),
        kind: FunctionKind::Sequence(SequenceOp::Cumsum),
    },
    duration("timedelta_Y", TimeUnit::Year),
    duration("timedelta_M", TimeUnit::Month),
    duration("timedelta_W", TimeUnit::Week),
    duration("timedelta_D", TimeUnit::Day),
    duration("timedelta_h", TimeUnit::Hour),
    duration("timedelta_m", TimeUnit::Minute),
    duration("timedelta_s", TimeUnit::Second),
    duration("timedelta_ms", TimeUnit::Millisecond),
    duration("timedelta_us", TimeUnit::Microsecond),
    duration("timedelta_ns", TimeUnit::Nanosecond),
    duration("timedelta_ps", TimeUnit::Picosecond),
    duration("timedelta_fs", TimeUnit::Femtosecond),
    duration("timedelta_as", TimeUnit::Attosecond),
];

pub fn constant(name: &str) -> Option<f64> {
    CONSTANTS.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
}

pub fn function(name: &str) -> Option<&'static FunctionSpec> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

pub fn is_attribute(name: &str) -> bool {
    ATTRIBUTES.contains(&name)
}

/// Name of the constructor call a duration literal is rewritten to
pub fn duration_constructor(unit: TimeUnit) -> String {
    format!("timedelta_{}", unit.symbol())
}

/// Call an allow-listed function with already evaluated arguments
pub fn call(spec: &FunctionSpec, args: Vec<Value>, limits: &EvalLimits) -> Result<Value> {
    if !spec.arity.accepts(args.len()) {
        return Err(ProcessingError::evaluation(format!(
            "{}() got {} arguments",
            spec.name,
            args.len()
        )));
    }
    match spec.kind {
        FunctionKind::Elementwise(f) => args[0].map_f64(spec.name, f),
        FunctionKind::Binary(f) => args[0].zip_f64(&args[1], spec.name, f),
        FunctionKind::Reduction(r) => reduce(spec.name, r, &args[0]),
        FunctionKind::Constructor(c) => construct(spec.name, c, &args, limits),
        FunctionKind::Sequence(op) => sequence(spec.name, op, &args[0]),
        FunctionKind::Duration(unit) => match args[0] {
            Value::Int(count) => Ok(Value::Duration(Duration::new(count, unit))),
            ref other => Err(ProcessingError::evaluation(format!(
                "{}() expects an integer, got {}",
                spec.name,
                other.type_name()
            ))),
        },
    }
}

fn reduction_input(name: &str, value: &Value) -> Result<Buffer> {
    match value {
        Value::Signal(s) => Ok(s.data_primary().clone()),
        Value::Duration(_) => Err(ProcessingError::evaluation(format!("{}() is not defined for durations", name))),
        other => other.to_buffer(),
    }
}

fn reduce(name: &str, reduction: Reduction, value: &Value) -> Result<Value> {
    let buffer = reduction_input(name, value)?;

    if let (Some(ints), Reduction::Sum | Reduction::Min | Reduction::Max | Reduction::Ptp) =
        (buffer.to_i64_vec(), reduction)
    {
        return reduce_ints(name, reduction, &ints);
    }

    let values = buffer.to_f64_vec();
    let n = values.len() as f64;
    let needs_data = matches!(reduction, Reduction::Min | Reduction::Max | Reduction::Ptp);
    if values.is_empty() && needs_data {
        return Err(ProcessingError::evaluation(format!(
            "zero-size array to reduction operation {}",
            name
        )));
    }
    let has_nan = values.iter().any(|v| v.is_nan());
    let mean = values.iter().sum::<f64>() / n;

    let result = match reduction {
        Reduction::Sum => values.iter().sum(),
        Reduction::Mean => mean,
        Reduction::Median => {
            if values.is_empty() || has_nan {
                f64::NAN
            } else {
                let mut sorted = values.clone();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
        }
        Reduction::Min | Reduction::Max | Reduction::Ptp if has_nan => f64::NAN,
        Reduction::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        Reduction::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Reduction::Ptp => {
            let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            hi - lo
        }
        Reduction::Var | Reduction::Std => {
            let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
            if reduction == Reduction::Std {
                var.sqrt()
            } else {
                var
            }
        }
    };
    Ok(Value::Float(result))
}

fn reduce_ints(name: &str, reduction: Reduction, values: &[i64]) -> Result<Value> {
    if reduction == Reduction::Sum {
        return Ok(Value::Int(values.iter().fold(0i64, |acc, v| acc.wrapping_add(*v))));
    }
    let (Some(lo), Some(hi)) = (values.iter().min(), values.iter().max()) else {
        return Err(ProcessingError::evaluation(format!(
            "zero-size array to reduction operation {}",
            name
        )));
    };
    Ok(Value::Int(match reduction {
        Reduction::Min => *lo,
        Reduction::Max => *hi,
        _ => hi.wrapping_sub(*lo),
    }))
}

fn as_count(name: &str, value: &Value, limits: &EvalLimits) -> Result<usize> {
    let n = match value {
        Value::Int(n) if *n >= 0 => *n as usize,
        _ => {
            return Err(ProcessingError::evaluation(format!(
                "{}() expects a non-negative integer count",
                name
            )))
        }
    };
    check_len(name, n, limits)?;
    Ok(n)
}

fn check_len(name: &str, n: usize, limits: &EvalLimits) -> Result<()> {
    if n > limits.max_array_len {
        return Err(ProcessingError::limit_exceeded(format!(
            "{}() would create {} elements (limit {})",
            name, n, limits.max_array_len
        )));
    }
    Ok(())
}

fn scalar_arg(name: &str, value: &Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| ProcessingError::evaluation(format!("{}() expects numbers, got {}", name, value.type_name())))
}

fn construct(name: &str, constructor: Constructor, args: &[Value], limits: &EvalLimits) -> Result<Value> {
    match constructor {
        Constructor::Zeros => Ok(Value::Buffer(Buffer::from_f64(vec![0.0; as_count(name, &args[0], limits)?]))),
        Constructor::Ones => Ok(Value::Buffer(Buffer::from_f64(vec![1.0; as_count(name, &args[0], limits)?]))),
        Constructor::Linspace => {
            let start = scalar_arg(name, &args[0])?;
            let stop = scalar_arg(name, &args[1])?;
            let num = as_count(name, &args[2], limits)?;
            Ok(Value::Buffer(Buffer::from_f64(crate::alignment::linspace(start, stop, num))))
        }
        Constructor::Arange => {
            let (start, stop, step) = match args {
                [stop] => (Value::Int(0), stop.clone(), Value::Int(1)),
                [start, stop] => (start.clone(), stop.clone(), Value::Int(1)),
                [start, stop, step] => (start.clone(), stop.clone(), step.clone()),
                _ => return Err(ProcessingError::evaluation("arange() got too many arguments")),
            };
            if let (Value::Int(a), Value::Int(b), Value::Int(s)) = (&start, &stop, &step) {
                return arange_int(*a, *b, *s, limits);
            }
            let (a, b, s) = (scalar_arg(name, &start)?, scalar_arg(name, &stop)?, scalar_arg(name, &step)?);
            if s == 0.0 || !s.is_finite() {
                return Err(ProcessingError::evaluation("arange() step must be finite and non-zero"));
            }
            let n = ((b - a) / s).ceil().max(0.0);
            if !n.is_finite() || n > limits.max_array_len as f64 {
                return Err(ProcessingError::limit_exceeded("arange() would create too many elements"));
            }
            let values = (0..n as usize).map(|k| a + k as f64 * s).collect();
            Ok(Value::Buffer(Buffer::from_f64(values)))
        }
    }
}

fn arange_int(start: i64, stop: i64, step: i64, limits: &EvalLimits) -> Result<Value> {
    if step == 0 {
        return Err(ProcessingError::evaluation("arange() step must be non-zero"));
    }
    let span = stop as i128 - start as i128;
    let step_wide = step as i128;
    let n = if (span > 0 && step > 0) || (span < 0 && step < 0) {
        ((span.abs() + step_wide.abs() - 1) / step_wide.abs()) as u128
    } else {
        0
    };
    if n > limits.max_array_len as u128 {
        return Err(ProcessingError::limit_exceeded("arange() would create too many elements"));
    }
    let values = (0..n as i64).map(|k| start + k * step).collect();
    Ok(Value::Buffer(Buffer::from_i64(values)))
}

fn sequence(name: &str, op: SequenceOp, value: &Value) -> Result<Value> {
    let buffer = match value {
        Value::Buffer(b) => b.flattened(),
        Value::Int(_) | Value::Float(_) => value.to_buffer()?.flattened(),
        other => {
            return Err(ProcessingError::evaluation(format!(
                "{}() expects a buffer, got {}",
                name,
                other.type_name()
            )))
        }
    };
    let unit = buffer.unit().to_string();
    let values = match (op, buffer.into_values()) {
        (SequenceOp::Diff, Values::Int(a)) => Values::Int(one_d(diff(a.iter().copied(), |x, y| y.wrapping_sub(x)))),
        (SequenceOp::Diff, Values::Float(a)) => Values::Float(one_d(diff(a.iter().copied(), |x, y| y - x))),
        (SequenceOp::Cumsum, Values::Int(a)) => Values::Int(one_d(
            a.iter()
                .scan(0i64, |acc, v| {
                    *acc = acc.wrapping_add(*v);
                    Some(*acc)
                })
                .collect(),
        )),
        (SequenceOp::Cumsum, Values::Float(a)) => Values::Float(one_d(
            a.iter()
                .scan(0.0, |acc, v| {
                    *acc += v;
                    Some(*acc)
                })
                .collect(),
        )),
    };
    Ok(Value::Buffer(Buffer::new(values, unit)))
}

fn diff<T: Copy>(values: impl Iterator<Item = T>, f: impl Fn(T, T) -> T) -> Vec<T> {
    let values: Vec<T> = values.collect();
    values.windows(2).map(|w| f(w[0], w[1])).collect()
}

fn one_d<T>(values: Vec<T>) -> ArrayD<T> {
    let n = values.len();
    match ArrayD::from_shape_vec(IxDyn(&[n]), values) {
        Ok(array) => array,
        Err(_) => unreachable!("1-D shape of the vector's own length"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn call_named(name: &str, args: Vec<Value>) -> Result<Value> {
        let spec = function(name).expect("function is allow-listed");
        call(spec, args, &EvalLimits::default())
    }

    #[test]
    fn test_table_is_unique() {
        for (i, f) in FUNCTIONS.iter().enumerate() {
            assert!(FUNCTIONS[i + 1..].iter().all(|g| g.name != f.name), "{}", f.name);
        }
        assert!(function("eval").is_none());
        assert!(function("__import__").is_none());
    }

    #[test]
    fn test_constants() {
        assert_eq!(constant("pi"), Some(std::f64::consts::PI));
        assert!(constant("nan").unwrap().is_nan());
        assert_eq!(constant("tau"), None);
        assert!(is_attribute("data_secondary"));
        assert!(!is_attribute("__class__"));
    }

    #[test]
    fn test_elementwise_and_binary() {
        let v = call_named("sin", vec![Value::Float(std::f64::consts::FRAC_PI_2)]).unwrap();
        assert_relative_eq!(v.as_f64().unwrap(), 1.0);
        let v = call_named("hypot", vec![Value::Int(3), Value::Int(4)]).unwrap();
        assert_eq!(v, Value::Float(5.0));
        let v = call_named("round", vec![Value::Float(2.5)]).unwrap();
        assert_eq!(v, Value::Float(2.0));
        let v = call_named("maximum", vec![Value::Buffer(Buffer::from_f64(vec![1.0, 5.0])), Value::Int(3)]).unwrap();
        assert_eq!(v.as_buffer().unwrap().to_f64_vec(), vec![3.0, 5.0]);
    }

    #[test]
    fn test_arity_is_checked() {
        assert!(call_named("sin", vec![]).is_err());
        assert!(call_named("arctan2", vec![Value::Int(1)]).is_err());
        assert!(call_named("arange", vec![Value::Int(1); 4]).is_err());
    }

    #[test]
    fn test_reductions() {
        let ints = Value::Buffer(Buffer::from_i64(vec![4, 1, 3, 2]));
        assert_eq!(call_named("sum", vec![ints.clone()]).unwrap(), Value::Int(10));
        assert_eq!(call_named("ptp", vec![ints.clone()]).unwrap(), Value::Int(3));
        assert_eq!(call_named("median", vec![ints.clone()]).unwrap(), Value::Float(2.5));
        assert_eq!(call_named("mean", vec![ints.clone()]).unwrap(), Value::Float(2.5));
        assert_eq!(call_named("var", vec![ints.clone()]).unwrap(), Value::Float(1.25));
        let empty = Value::Buffer(Buffer::empty());
        assert!(call_named("max", vec![empty.clone()]).is_err());
        assert_eq!(call_named("sum", vec![empty]).unwrap(), Value::Float(0.0));
    }

    #[test]
    fn test_constructors() {
        let v = call_named("arange", vec![Value::Int(2), Value::Int(10), Value::Int(3)]).unwrap();
        assert_eq!(v.as_buffer().unwrap().to_i64_vec(), Some(vec![2, 5, 8]));
        let v = call_named("arange", vec![Value::Int(3)]).unwrap();
        assert_eq!(v.as_buffer().unwrap().to_i64_vec(), Some(vec![0, 1, 2]));
        let v = call_named("arange", vec![Value::Float(0.0), Value::Float(1.0), Value::Float(0.25)]).unwrap();
        assert_eq!(v.as_buffer().unwrap().to_f64_vec(), vec![0.0, 0.25, 0.5, 0.75]);
        let v = call_named("linspace", vec![Value::Int(0), Value::Int(1), Value::Int(5)]).unwrap();
        assert_eq!(v.as_buffer().unwrap().len(), 5);
        let v = call_named("ones", vec![Value::Int(2)]).unwrap();
        assert_eq!(v.as_buffer().unwrap().to_f64_vec(), vec![1.0, 1.0]);
        assert!(call_named("zeros", vec![Value::Int(-1)]).is_err());
    }

    #[test]
    fn test_array_budget() {
        let limits = EvalLimits {
            max_array_len: 10,
            ..EvalLimits::default()
        };
        let spec = function("zeros").unwrap();
        let err = call(spec, vec![Value::Int(11)], &limits).unwrap_err();
        assert!(err.to_string().contains("limit"));
        let spec = function("arange").unwrap();
        assert!(call(spec, vec![Value::Int(1_000_000)], &limits).is_err());
    }

    #[test]
    fn test_sequences() {
        let b = Value::Buffer(Buffer::from_i64(vec![1, 4, 9, 16]).with_unit("m"));
        let d = call_named("diff", vec![b.clone()]).unwrap();
        assert_eq!(d.as_buffer().unwrap().to_i64_vec(), Some(vec![3, 5, 7]));
        assert_eq!(d.as_buffer().unwrap().unit(), "m");
        let c = call_named("cumsum", vec![b]).unwrap();
        assert_eq!(c.as_buffer().unwrap().to_i64_vec(), Some(vec![1, 5, 14, 30]));
    }

    #[test]
    fn test_duration_constructors() {
        for unit in crate::units::TIME_UNITS {
            assert!(function(&duration_constructor(unit)).is_some(), "{}", unit);
        }
        let d = call_named("timedelta_D", vec![Value::Int(365)]).unwrap();
        assert_eq!(d, Value::Duration(Duration::new(365, TimeUnit::Day)));
        assert!(call_named("timedelta_D", vec![Value::Float(1.5)]).is_err());
    }
}
