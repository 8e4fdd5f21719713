//! Signal data model
//!
//! A [`Signal`] couples a 1-D time buffer with primary and secondary data
//! buffers, plus the identity (source, name, parameters) the environment hashes
//! into an identifier. Arithmetic between signals aligns private copies of both
//! operands first, so the operands themselves are never modified.

use crate::alignment::{align, AlignmentMode, InterpolationKind};
use crate::buffer::{BinaryOp, Buffer};
use crate::parser::Parser;
use crate::types::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Expression a signal evaluates to when none is given
pub const SELF_EXPRESSION: &str = "${self}";

/// Identity-relevant signal parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalParams {
    /// Pulse (shot) number
    #[serde(default)]
    pub pulse_nb: Option<i64>,
    /// Window start, integer nanoseconds
    #[serde(default)]
    pub ts_start: Option<i64>,
    /// Window end, integer nanoseconds
    #[serde(default)]
    pub ts_end: Option<i64>,
    /// Decimation request, `-1` means the caller manages decimation
    #[serde(default)]
    pub dec_samples: Option<i64>,
}

impl SignalParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the pulse number
    pub fn with_pulse(mut self, pulse_nb: i64) -> Self {
        self.pulse_nb = Some(pulse_nb);
        self
    }

    /// Builder method: set the time window
    pub fn with_time_range(mut self, ts_start: i64, ts_end: i64) -> Self {
        self.ts_start = Some(ts_start);
        self.ts_end = Some(ts_end);
        self
    }

    /// Builder method: set the decimation
    pub fn with_dec_samples(mut self, dec_samples: i64) -> Self {
        self.dec_samples = Some(dec_samples);
        self
    }

    /// These parameters with every field set in `overrides` replaced
    pub fn overlaid(&self, overrides: &SignalParams) -> SignalParams {
        SignalParams {
            pulse_nb: overrides.pulse_nb.or(self.pulse_nb),
            ts_start: overrides.ts_start.or(self.ts_start),
            ts_end: overrides.ts_end.or(self.ts_end),
            dec_samples: overrides.dec_samples.or(self.dec_samples),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &SignalParams::default()
    }
}

/// Expressions producing a signal's x, y and z axes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisExpressions {
    #[serde(default = "default_x")]
    pub x: String,
    #[serde(default = "default_y")]
    pub y: String,
    #[serde(default = "default_z")]
    pub z: String,
}

fn default_x() -> String {
    "${self}.time".to_string()
}

fn default_y() -> String {
    "${self}.data".to_string()
}

fn default_z() -> String {
    "${self}.data_secondary".to_string()
}

impl Default for AxisExpressions {
    fn default() -> Self {
        Self {
            x: default_x(),
            y: default_y(),
            z: default_z(),
        }
    }
}

impl AxisExpressions {
    /// Build from optional table cells; blank cells fall back to the defaults
    pub fn from_cells(x: Option<&str>, y: Option<&str>, z: Option<&str>) -> Self {
        fn pick(cell: Option<&str>, fallback: String) -> String {
            match cell {
                Some(v) if !v.trim().is_empty() => v.trim().to_string(),
                _ => fallback,
            }
        }
        Self {
            x: pick(x, default_x()),
            y: pick(y, default_y()),
            z: pick(z, default_z()),
        }
    }
}

/// A time series with primary and secondary data
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    /// Name of the data source
    pub source: String,
    /// Variable name, possibly an expression such as `${a} + ${b}`
    pub name: String,
    /// Identity-relevant parameters
    pub params: SignalParams,
    /// Axis expressions used by [`crate::Context::get_data`]
    pub axes: AxisExpressions,
    /// Alignment mode used when this signal is the left operand
    pub alignment: AlignmentMode,
    /// Interpolation used when this signal is the left operand
    pub interpolation: InterpolationKind,
    expression: String,
    var_names: Vec<String>,
    time: Buffer,
    data_primary: Buffer,
    data_secondary: Buffer,
    fetched_with: Option<SignalParams>,
}

impl Default for Signal {
    fn default() -> Self {
        Self {
            source: String::new(),
            name: String::new(),
            params: SignalParams::default(),
            axes: AxisExpressions::default(),
            alignment: AlignmentMode::default(),
            interpolation: InterpolationKind::default(),
            expression: SELF_EXPRESSION.to_string(),
            var_names: Vec::new(),
            time: Buffer::empty(),
            data_primary: Buffer::empty(),
            data_secondary: Buffer::empty(),
            fetched_with: None,
        }
    }
}

impl Signal {
    pub fn new(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder method: set identity parameters
    pub fn with_params(mut self, params: SignalParams) -> Self {
        self.params = params;
        self
    }

    /// Builder method: set axis expressions
    pub fn with_axes(mut self, axes: AxisExpressions) -> Self {
        self.axes = axes;
        self
    }

    /// Builder method: set the alignment used by arithmetic
    pub fn with_alignment(mut self, mode: AlignmentMode, kind: InterpolationKind) -> Self {
        self.alignment = mode;
        self.interpolation = kind;
        self
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Set the expression; blank input resets it to `${self}`
    pub fn set_expression(&mut self, expression: impl Into<String>) {
        let expression = expression.into();
        self.expression = if expression.trim().is_empty() {
            SELF_EXPRESSION.to_string()
        } else {
            expression
        };
    }

    /// Constituent variable names, in order of first appearance
    pub fn var_names(&self) -> &[String] {
        &self.var_names
    }

    /// Replace the constituent names, dropping repeats
    pub fn set_var_names<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.var_names.clear();
        for name in names {
            self.push_var_name(name);
        }
    }

    pub fn push_var_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.var_names.contains(&name) {
            self.var_names.push(name);
        }
    }

    /// Two or more constituents
    pub fn is_composite(&self) -> bool {
        self.var_names.len() > 1
    }

    /// The name holds at least one well-formed placeholder
    pub fn is_expression(&self) -> bool {
        Parser::is_expression(&self.name)
    }

    pub fn time(&self) -> &Buffer {
        &self.time
    }

    /// Set the time buffer; it is always stored flattened to 1-D
    pub fn set_time(&mut self, time: Buffer) {
        self.time = if time.ndim() == 1 { time } else { time.flattened() };
    }

    pub fn data_primary(&self) -> &Buffer {
        &self.data_primary
    }

    pub fn set_data_primary(&mut self, data: Buffer) {
        self.data_primary = data;
    }

    /// Shorthand for the primary data
    pub fn data(&self) -> &Buffer {
        &self.data_primary
    }

    pub fn data_secondary(&self) -> &Buffer {
        &self.data_secondary
    }

    pub fn set_data_secondary(&mut self, data: Buffer) {
        self.data_secondary = data;
    }

    pub fn time_unit(&self) -> &str {
        self.time.unit()
    }

    pub fn set_time_unit(&mut self, unit: impl Into<String>) {
        self.time.set_unit(unit);
    }

    pub fn data_primary_unit(&self) -> &str {
        self.data_primary.unit()
    }

    pub fn set_data_primary_unit(&mut self, unit: impl Into<String>) {
        self.data_primary.set_unit(unit);
    }

    pub fn data_secondary_unit(&self) -> &str {
        self.data_secondary.unit()
    }

    pub fn set_data_secondary_unit(&mut self, unit: impl Into<String>) {
        self.data_secondary.set_unit(unit);
    }

    /// Sum of the dimensions of the non-empty data slots
    pub fn rank(&self) -> usize {
        [&self.data_primary, &self.data_secondary]
            .iter()
            .filter(|b| !b.is_empty())
            .map(|b| b.ndim())
            .sum()
    }

    /// True when the identity parameters changed since the last call
    ///
    /// Records the current parameters as fetched. A signal with
    /// `dec_samples == -1` never asks for a refresh.
    pub fn needs_refresh(&mut self) -> bool {
        if self.fetched_with.as_ref() == Some(&self.params) {
            return false;
        }
        self.fetched_with = Some(self.params.clone());
        self.params.dec_samples != Some(-1)
    }

    /// Forget the recorded fetch so the next [`Signal::needs_refresh`] asks again
    pub fn mark_stale(&mut self) {
        self.fetched_with = None;
    }

    /// Copy time and data buffers into `other`, leaving its identity alone
    pub fn copy_buffers_to(&self, other: &mut Signal) {
        other.time = self.time.clone();
        other.data_primary = self.data_primary.clone();
        other.data_secondary = self.data_secondary.clone();
    }

    fn derived(&self, time: Buffer, primary: Buffer, secondary: Buffer) -> Signal {
        Signal {
            alignment: self.alignment,
            interpolation: self.interpolation,
            time,
            data_primary: primary,
            data_secondary: secondary,
            ..Signal::default()
        }
    }

    /// `self op other` after aligning copies of both signals
    pub fn binary(&self, op: BinaryOp, other: &Signal) -> Result<Signal> {
        self.zip_with(other, |a, b| a.binary(op, b))
    }

    /// Combine matching data slots of two signals after aligning copies of both
    ///
    /// A slot that is empty on either side stays empty.
    pub fn zip_with(&self, other: &Signal, f: impl Fn(&Buffer, &Buffer) -> Result<Buffer>) -> Result<Signal> {
        let mut pair = [self.clone(), other.clone()];
        align(&mut pair, self.alignment, self.interpolation)?;
        let [lhs, rhs] = pair;

        let combine = |a: &Buffer, b: &Buffer| -> Result<Buffer> {
            if a.is_empty() || b.is_empty() {
                Ok(Buffer::empty().with_unit(a.unit()))
            } else {
                f(a, b)
            }
        };
        let primary = combine(&lhs.data_primary, &rhs.data_primary)?;
        let secondary = combine(&lhs.data_secondary, &rhs.data_secondary)?;
        Ok(self.derived(lhs.time, primary, secondary))
    }

    /// `self op operand` on every non-empty data slot, without alignment
    pub fn apply(&self, op: BinaryOp, operand: &Buffer) -> Result<Signal> {
        self.try_map_slots(|slot| slot.binary(op, operand))
    }

    /// `operand op self` on every non-empty data slot
    pub fn apply_reflected(&self, op: BinaryOp, operand: &Buffer) -> Result<Signal> {
        self.try_map_slots(|slot| {
            let mut out = operand.binary(op, slot)?;
            if operand.unit().is_empty() {
                out.set_unit(slot.unit());
            }
            Ok(out)
        })
    }

    /// Apply `f` to every non-empty data slot; time is shared
    pub fn try_map_slots(&self, f: impl Fn(&Buffer) -> Result<Buffer>) -> Result<Signal> {
        let map = |slot: &Buffer| -> Result<Buffer> {
            if slot.is_empty() {
                Ok(slot.clone())
            } else {
                f(slot)
            }
        };
        let primary = map(&self.data_primary)?;
        let secondary = map(&self.data_secondary)?;
        Ok(self.derived(self.time.clone(), primary, secondary))
    }

    /// Debug-friendly description, one line per field
    pub fn log_lines(&self) -> Vec<String> {
        vec![
            format!("source: {}", self.source),
            format!("name: {}", self.name),
            format!("expression: {}", self.expression),
            format!("var_names: {:?}", self.var_names),
            format!("params: {:?}", self.params),
            format!("time: {}", self.time),
            format!("data_primary: {}", self.data_primary),
            format!("data_secondary: {}", self.data_secondary),
            format!("is_composite: {}", self.is_composite()),
        ]
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signal({}:{}", self.source, self.name)?;
        if let Some(pulse) = self.params.pulse_nb {
            write!(f, ", pulse={}", pulse)?;
        }
        write!(f, ", samples={})", self.time.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(time: Vec<i64>, data: Vec<f64>) -> Signal {
        let mut sig = Signal::default();
        sig.set_time(Buffer::from_i64(time).with_unit("s"));
        sig.set_data_primary(Buffer::from_f64(data).with_unit("V"));
        sig
    }

    #[test]
    fn test_default_signal() {
        let s = Signal::new("codacuda", "VAR-123-XYZ");
        assert!(s.time().is_empty());
        assert_eq!(s.time_unit(), "");
        assert!(s.data_primary().is_empty());
        assert_eq!(s.data_secondary_unit(), "");
        assert_eq!(s.rank(), 0);
        assert!(!s.is_expression());
        assert_eq!(s.expression(), "${self}");
    }

    #[test]
    fn test_is_expression() {
        let cases = [
            ("${ml0004}", true),
            ("CWS-SCSU-HR00:ML0004-LT-XI", false),
            ("${CWS-SCSU-HR00:ML0004-LT-XI}", true),
            ("${ml0004}-{ml0002}", false),
            ("{ml0004}-{ml0002}", false),
            ("${ml0004}-${ml0002}", true),
        ];
        for (name, expected) in cases {
            assert_eq!(Signal::new("", name).is_expression(), expected, "{}", name);
        }
    }

    #[test]
    fn test_blank_expression_resets_to_self() {
        let mut s = Signal::default();
        s.set_expression("${a} + 1");
        assert_eq!(s.expression(), "${a} + 1");
        s.set_expression("   ");
        assert_eq!(s.expression(), SELF_EXPRESSION);
    }

    #[test]
    fn test_var_names_are_repeat_free() {
        let mut s = Signal::default();
        s.set_var_names(["a", "b", "a"]);
        assert_eq!(s.var_names(), &["a".to_string(), "b".to_string()]);
        assert!(s.is_composite());
        s.set_var_names(["a"]);
        assert!(!s.is_composite());
    }

    #[test]
    fn test_time_is_flattened() {
        let mut s = Signal::default();
        s.set_time(Buffer::from_shape_f64(&[2, 2], vec![0.0, 1.0, 2.0, 3.0]).unwrap().with_unit("ms"));
        assert_eq!(s.time().shape(), &[4]);
        assert_eq!(s.time_unit(), "ms");
    }

    #[test]
    fn test_rank() {
        let mut s = ramp(vec![0, 1, 2], vec![0.0, 1.0, 2.0]);
        assert_eq!(s.rank(), 1);
        s.set_data_secondary(Buffer::from_shape_f64(&[3, 2], vec![0.0; 6]).unwrap());
        assert_eq!(s.rank(), 3);
    }

    #[test]
    fn test_needs_refresh() {
        let mut s = Signal::default().with_params(SignalParams::new().with_pulse(42));
        assert!(s.needs_refresh());
        assert!(!s.needs_refresh());
        s.params.ts_start = Some(10);
        assert!(s.needs_refresh());

        let mut managed = Signal::default().with_params(SignalParams::new().with_dec_samples(-1));
        assert!(!managed.needs_refresh());
        assert!(!managed.needs_refresh());
    }

    #[test]
    fn test_signal_addition_leaves_operands_untouched() {
        let a = ramp(vec![0, 10, 20, 40, 50], vec![0.0, 1.0, 2.0, 4.0, 5.0]);
        let b = ramp(vec![30, 50], vec![3.0, 5.0]);
        let a_before = a.clone();
        let b_before = b.clone();

        let sum = a.binary(BinaryOp::Add, &b).unwrap();
        assert_eq!(a, a_before);
        assert_eq!(b, b_before);

        assert_eq!(sum.time().to_i64_vec(), Some(vec![30, 34, 38, 42, 46, 50]));
        assert_eq!(sum.time_unit(), "s");
        assert_eq!(sum.data_primary_unit(), "V");
        // both inputs are data = t / 10 on the overlap
        for (t, v) in sum.time().to_f64_vec().iter().zip(sum.data().to_f64_vec()) {
            assert_relative_eq!(v, t / 5.0, epsilon = 1e-12);
        }
        assert!(sum.data_secondary().is_empty());
    }

    #[test]
    fn test_union_sum_of_identical_signals() {
        let make = || {
            ramp(vec![0, 1, 2, 3], vec![0.0, 1.0, 2.0, 3.0])
                .with_alignment(AlignmentMode::Union, InterpolationKind::Linear)
        };
        let s1 = make();
        let s2 = make();
        let s3 = make();
        let total = s1.binary(BinaryOp::Add, &s2).unwrap().binary(BinaryOp::Add, &s3).unwrap();
        // 8 points after the first sum, then 8 + 4 against the third operand
        assert_eq!(total.time().len(), 12);
        assert_eq!(total.data().get_f64(0), Some(0.0));
        assert_eq!(total.data().get_f64(11), Some(9.0));
    }

    #[test]
    fn test_scalar_application() {
        let s = ramp(vec![0, 1], vec![1.0, 2.0]);
        let doubled = s.apply(BinaryOp::Mul, &Buffer::scalar_i64(2)).unwrap();
        assert_eq!(doubled.data().to_f64_vec(), vec![2.0, 4.0]);
        assert_eq!(doubled.time(), s.time());
        assert_eq!(doubled.data_primary_unit(), "V");
        assert!(doubled.data_secondary().is_empty());

        let reflected = s.apply_reflected(BinaryOp::Sub, &Buffer::scalar_f64(10.0)).unwrap();
        assert_eq!(reflected.data().to_f64_vec(), vec![9.0, 8.0]);
        assert_eq!(reflected.data_primary_unit(), "V");
    }

    #[test]
    fn test_copy_buffers_keeps_identity() {
        let src = ramp(vec![0, 1], vec![5.0, 6.0]);
        let mut dst = Signal::new("ds", "target");
        src.copy_buffers_to(&mut dst);
        assert_eq!(dst.name, "target");
        assert_eq!(dst.data().to_f64_vec(), vec![5.0, 6.0]);
        assert_eq!(dst.time_unit(), "s");
    }

    #[test]
    fn test_axis_defaults() {
        let axes = AxisExpressions::from_cells(Some(""), Some("${cws4}.data"), None);
        assert_eq!(axes.x, "${self}.time");
        assert_eq!(axes.y, "${cws4}.data");
        assert_eq!(axes.z, "${self}.data_secondary");
    }

    #[test]
    fn test_param_overlay() {
        let base = SignalParams::new().with_pulse(1).with_dec_samples(1000);
        let merged = base.overlaid(&SignalParams::new().with_pulse(7));
        assert_eq!(merged.pulse_nb, Some(7));
        assert_eq!(merged.dec_samples, Some(1000));
        assert!(SignalParams::new().is_empty());
    }
}
