//! Unit-tagged numeric buffers
//!
//! A [`Buffer`] pairs an N-D array with a physical unit string. Integer and
//! floating-point storage are kept apart so integer time stamps survive
//! untouched until an operation really needs floating point.

use crate::types::{ProcessingError, Result};
use ndarray::{ArrayD, IxDyn, Zip};
use std::fmt;

/// Elementwise binary operators supported on buffers and signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
        }
    }

    pub(crate) fn apply_f64(&self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::FloorDiv => (a / b).floor(),
        }
    }

    /// Integer arithmetic wraps on overflow; `Div` is never routed here
    pub(crate) fn apply_i64(&self, a: i64, b: i64) -> i64 {
        match self {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div | BinaryOp::FloorDiv => floor_div(a, b),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

pub(crate) fn floor_div(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

/// Typed storage of a buffer
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    Int(ArrayD<i64>),
    Float(ArrayD<f64>),
}

impl Values {
    pub fn len(&self) -> usize {
        match self {
            Values::Int(a) => a.len(),
            Values::Float(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ndim(&self) -> usize {
        match self {
            Values::Int(a) => a.ndim(),
            Values::Float(a) => a.ndim(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Values::Int(a) => a.shape(),
            Values::Float(a) => a.shape(),
        }
    }

    /// Floating-point copy of the values
    pub fn to_f64(&self) -> ArrayD<f64> {
        match self {
            Values::Int(a) => a.mapv(|v| v as f64),
            Values::Float(a) => a.clone(),
        }
    }
}

/// A numeric array carrying a physical unit
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    values: Values,
    unit: String,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::empty()
    }
}

impl Buffer {
    /// An empty 1-D floating-point buffer without unit
    pub fn empty() -> Self {
        Self {
            values: Values::Float(ArrayD::zeros(IxDyn(&[0]))),
            unit: String::new(),
        }
    }

    pub fn new(values: Values, unit: impl Into<String>) -> Self {
        Self {
            values,
            unit: unit.into(),
        }
    }

    /// 1-D floating-point buffer
    pub fn from_f64(values: Vec<f64>) -> Self {
        let n = values.len();
        Self::new(Values::Float(vec_to_array(values, n)), "")
    }

    /// 1-D integer buffer
    pub fn from_i64(values: Vec<i64>) -> Self {
        let n = values.len();
        Self::new(Values::Int(vec_to_array(values, n)), "")
    }

    /// N-D floating-point buffer
    pub fn from_shape_f64(shape: &[usize], values: Vec<f64>) -> Result<Self> {
        let array = ArrayD::from_shape_vec(IxDyn(shape), values)
            .map_err(|e| ProcessingError::InvalidData(format!("Bad buffer shape {:?}: {}", shape, e)))?;
        Ok(Self::new(Values::Float(array), ""))
    }

    /// 0-D floating-point buffer
    pub fn scalar_f64(value: f64) -> Self {
        Self::new(Values::Float(ArrayD::from_elem(IxDyn(&[]), value)), "")
    }

    /// 0-D integer buffer
    pub fn scalar_i64(value: i64) -> Self {
        Self::new(Values::Int(ArrayD::from_elem(IxDyn(&[]), value)), "")
    }

    /// Builder method: set the unit
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn set_unit(&mut self, unit: impl Into<String>) {
        self.unit = unit.into();
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn into_values(self) -> Values {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn ndim(&self) -> usize {
        self.values.ndim()
    }

    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    pub fn is_float(&self) -> bool {
        matches!(self.values, Values::Float(_))
    }

    /// Floating-point copy of the values
    pub fn to_f64(&self) -> ArrayD<f64> {
        self.values.to_f64()
    }

    /// Values in logical order as a flat `Vec<f64>`
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match &self.values {
            Values::Int(a) => a.iter().map(|&v| v as f64).collect(),
            Values::Float(a) => a.iter().copied().collect(),
        }
    }

    /// Integer values in logical order, `None` for floating-point storage
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        match &self.values {
            Values::Int(a) => Some(a.iter().copied().collect()),
            Values::Float(_) => None,
        }
    }

    /// Element `index` of the flattened buffer
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        match &self.values {
            Values::Int(a) => a.iter().nth(index).map(|&v| v as f64),
            Values::Float(a) => a.iter().nth(index).copied(),
        }
    }

    /// A 1-D copy of this buffer, keeping dtype and unit
    pub fn flattened(&self) -> Buffer {
        let values = match &self.values {
            Values::Int(a) => {
                let v: Vec<i64> = a.iter().copied().collect();
                let n = v.len();
                Values::Int(vec_to_array(v, n))
            }
            Values::Float(a) => {
                let v: Vec<f64> = a.iter().copied().collect();
                let n = v.len();
                Values::Float(vec_to_array(v, n))
            }
        };
        Buffer::new(values, self.unit.clone())
    }

    /// Apply a floating-point function elementwise; the unit is kept
    pub fn map_f64(&self, f: impl Fn(f64) -> f64) -> Buffer {
        let array = match &self.values {
            Values::Int(a) => a.mapv(|v| f(v as f64)),
            Values::Float(a) => a.mapv(&f),
        };
        Buffer::new(Values::Float(array), self.unit.clone())
    }

    /// Elementwise negation, integer storage stays integer
    pub fn negated(&self) -> Buffer {
        let values = match &self.values {
            Values::Int(a) => Values::Int(a.mapv(|v| v.wrapping_neg())),
            Values::Float(a) => Values::Float(a.mapv(|v| -v)),
        };
        Buffer::new(values, self.unit.clone())
    }

    /// Multiply integer storage by an exact factor (floats are scaled too)
    pub fn scaled_i64(&self, factor: i64) -> Buffer {
        let values = match &self.values {
            Values::Int(a) => Values::Int(a.mapv(|v| v.wrapping_mul(factor))),
            Values::Float(a) => Values::Float(a.mapv(|v| v * factor as f64)),
        };
        Buffer::new(values, self.unit.clone())
    }

    /// Elementwise binary operation with numpy-style broadcasting
    ///
    /// The result carries the left operand's unit, or the right one's when the
    /// left is unitless. Units are never converted.
    pub fn binary(&self, op: BinaryOp, other: &Buffer) -> Result<Buffer> {
        let values = match (&self.values, &other.values, op) {
            (Values::Int(a), Values::Int(b), BinaryOp::FloorDiv) => {
                if b.iter().any(|&v| v == 0) {
                    return Err(ProcessingError::evaluation("integer division by zero"));
                }
                Values::Int(zip_broadcast(a, b, |x, y| op.apply_i64(x, y))?)
            }
            (Values::Int(a), Values::Int(b), BinaryOp::Div) => {
                Values::Float(zip_broadcast(a, b, |x, y| x as f64 / y as f64)?)
            }
            (Values::Int(a), Values::Int(b), _) => {
                Values::Int(zip_broadcast(a, b, |x, y| op.apply_i64(x, y))?)
            }
            (a, b, _) => {
                let a = a.to_f64();
                let b = b.to_f64();
                Values::Float(zip_broadcast(&a, &b, |x, y| op.apply_f64(x, y))?)
            }
        };
        Ok(Buffer::new(values, self.result_unit(other)))
    }

    fn result_unit(&self, other: &Buffer) -> String {
        if self.unit.is_empty() {
            other.unit.clone()
        } else {
            self.unit.clone()
        }
    }

    /// Elementwise binary operation of two floating-point views (e.g. `arctan2`)
    pub fn zip_f64(&self, other: &Buffer, f: impl Fn(f64, f64) -> f64) -> Result<Buffer> {
        let a = self.to_f64();
        let b = other.to_f64();
        let array = zip_broadcast(&a, &b, f)?;
        Ok(Buffer::new(Values::Float(array), self.result_unit(other)))
    }
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dtype = if self.is_float() { "float64" } else { "int64" };
        write!(f, "Buffer(shape={:?}, dtype={}", self.shape(), dtype)?;
        if !self.unit.is_empty() {
            write!(f, ", unit={}", self.unit)?;
        }
        write!(f, ")")
    }
}

fn vec_to_array<T>(values: Vec<T>, n: usize) -> ArrayD<T> {
    // A flat vector always matches a 1-D shape of its own length
    match ArrayD::from_shape_vec(IxDyn(&[n]), values) {
        Ok(array) => array,
        Err(_) => unreachable!("1-D shape of the vector's own length"),
    }
}

/// Result shape of broadcasting two shapes, numpy rules
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let ndim = a.len().max(b.len());
    let mut shape = vec![0; ndim];
    for i in 0..ndim {
        let da = if i < ndim - a.len() { 1 } else { a[i - (ndim - a.len())] };
        let db = if i < ndim - b.len() { 1 } else { b[i - (ndim - b.len())] };
        shape[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(shape)
}

fn zip_broadcast<A, B, C>(a: &ArrayD<A>, b: &ArrayD<B>, f: impl Fn(A, B) -> C) -> Result<ArrayD<C>>
where
    A: Copy,
    B: Copy,
{
    if a.shape() == b.shape() {
        return Ok(Zip::from(a).and(b).map_collect(|&x, &y| f(x, y)));
    }
    let shape = broadcast_shape(a.shape(), b.shape()).ok_or_else(|| {
        ProcessingError::evaluation(format!(
            "operands could not be broadcast together with shapes {:?} {:?}",
            a.shape(),
            b.shape()
        ))
    })?;
    let dim = IxDyn(&shape);
    let (av, bv) = match (a.broadcast(dim.clone()), b.broadcast(dim)) {
        (Some(av), Some(bv)) => (av, bv),
        _ => {
            return Err(ProcessingError::evaluation(format!(
                "cannot broadcast to shape {:?}",
                shape
            )))
        }
    };
    Ok(Zip::from(av).and(bv).map_collect(|&x, &y| f(x, y)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buffer() {
        let b = Buffer::empty();
        assert!(b.is_empty());
        assert_eq!(b.ndim(), 1);
        assert_eq!(b.unit(), "");
    }

    #[test]
    fn test_scalar_buffer() {
        let b = Buffer::scalar_i64(1).with_unit("A");
        assert_eq!(b.shape(), &[] as &[usize]);
        assert_eq!(b.len(), 1);
        assert_eq!(b.unit(), "A");
    }

    #[test]
    fn test_2d_buffer() {
        let b = Buffer::from_shape_f64(&[3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
            .unwrap()
            .with_unit("C");
        assert_eq!(b.shape(), &[3, 2]);
        assert_eq!(b.len(), 6);
        assert_eq!(b.flattened().shape(), &[6]);
        assert_eq!(b.flattened().unit(), "C");
        assert!(Buffer::from_shape_f64(&[4, 2], vec![1.0]).is_err());
    }

    #[test]
    fn test_integer_arithmetic_stays_integer() {
        let a = Buffer::from_i64(vec![1, 2, 3]).with_unit("ns");
        let b = Buffer::from_i64(vec![10, 20, 30]);
        let sum = a.binary(BinaryOp::Add, &b).unwrap();
        assert_eq!(sum.to_i64_vec(), Some(vec![11, 22, 33]));
        assert_eq!(sum.unit(), "ns");

        let quotient = b.binary(BinaryOp::Div, &a).unwrap();
        assert!(quotient.is_float());
        assert_eq!(quotient.to_f64_vec(), vec![10.0, 10.0, 10.0]);
    }

    #[test]
    fn test_floor_division() {
        let a = Buffer::from_i64(vec![7, -7, 7, -7]);
        let b = Buffer::from_i64(vec![2, 2, -2, -2]);
        let q = a.binary(BinaryOp::FloorDiv, &b).unwrap();
        assert_eq!(q.to_i64_vec(), Some(vec![3, -4, -4, 3]));

        let zero = Buffer::scalar_i64(0);
        assert!(a.binary(BinaryOp::FloorDiv, &zero).is_err());

        let f = Buffer::from_f64(vec![7.5]).binary(BinaryOp::FloorDiv, &Buffer::scalar_f64(2.0)).unwrap();
        assert_eq!(f.to_f64_vec(), vec![3.0]);
    }

    #[test]
    fn test_broadcasting() {
        let a = Buffer::from_shape_f64(&[2, 3], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        let row = Buffer::from_f64(vec![10.0, 20.0, 30.0]);
        let sum = a.binary(BinaryOp::Add, &row).unwrap();
        assert_eq!(sum.shape(), &[2, 3]);
        assert_eq!(sum.to_f64_vec(), vec![10.0, 21.0, 32.0, 13.0, 24.0, 35.0]);

        let scaled = a.binary(BinaryOp::Mul, &Buffer::scalar_i64(2)).unwrap();
        assert_eq!(scaled.to_f64_vec(), vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
    }

    #[test]
    fn test_shape_mismatch_is_an_error() {
        let a = Buffer::from_f64(vec![1.0, 2.0, 3.0]);
        let b = Buffer::from_f64(vec![1.0, 2.0]);
        let err = a.binary(BinaryOp::Add, &b).unwrap_err();
        assert!(err.is_invalid_expression());
    }

    #[test]
    fn test_broadcast_shape_rules() {
        assert_eq!(broadcast_shape(&[3], &[]), Some(vec![3]));
        assert_eq!(broadcast_shape(&[2, 1], &[1, 4]), Some(vec![2, 4]));
        assert_eq!(broadcast_shape(&[0], &[0]), Some(vec![0]));
        assert_eq!(broadcast_shape(&[2], &[3]), None);
    }

    #[test]
    fn test_result_unit_prefers_left() {
        let a = Buffer::from_f64(vec![1.0]).with_unit("V");
        let b = Buffer::from_f64(vec![2.0]).with_unit("A");
        assert_eq!(a.binary(BinaryOp::Mul, &b).unwrap().unit(), "V");
        let scalar = Buffer::scalar_f64(2.0);
        assert_eq!(scalar.binary(BinaryOp::Mul, &b).unwrap().unit(), "A");
    }

    #[test]
    fn test_map_keeps_unit() {
        let b = Buffer::from_i64(vec![0, 1]).with_unit("rad");
        let s = b.map_f64(f64::sin);
        assert_eq!(s.unit(), "rad");
        assert!(s.is_float());
        assert_eq!(s.get_f64(0), Some(0.0));
    }
}
