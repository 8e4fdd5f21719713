//! Time alignment
//!
//! Computes a common time grid for a group of signals and rebases every
//! signal's data onto it by interpolation. All functions here are pure with
//! respect to anything but the signals handed in.

use crate::buffer::{Buffer, Values};
use crate::signal::Signal;
use crate::types::{ProcessingError, Result};
use crate::units::{coarsest_time_unit, finest_time_unit, TimeUnit};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

/// How time bases are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlignmentMode {
    /// Overlap of all time ranges, `max(len) + 1` points
    #[default]
    Intersection,
    /// Span of all time ranges, `sum(len)` evenly spaced points
    Union,
}

/// Interpolation used when rebasing data onto a new grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationKind {
    /// Piecewise linear, extrapolating beyond the sample range
    #[default]
    Linear,
    /// Closest sample; ties go to the earlier sample
    Nearest,
    /// Last sample at or before the grid point
    Previous,
    /// First sample at or after the grid point
    Next,
}

/// Evenly spaced values between `start` and `stop` (both included)
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            let mut values: Vec<f64> = (0..num).map(|k| k as f64 * step + start).collect();
            values[num - 1] = stop;
            values
        }
    }
}

fn grid_buffer(start: f64, stop: f64, num: usize, integer: bool) -> Buffer {
    let values = linspace(start, stop, num);
    if integer {
        Buffer::from_i64(values.into_iter().map(|v| v.floor() as i64).collect())
    } else {
        Buffer::from_f64(values)
    }
}

fn time_bounds(time: &Buffer) -> Option<(f64, f64)> {
    let values = time.to_f64_vec();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if values.is_empty() {
        None
    } else {
        Some((min, max))
    }
}

/// Common grid over the overlap of all non-empty time vectors
///
/// Returns an empty buffer when no signal carries time samples.
pub fn intersection_grid(signals: &[Signal]) -> Buffer {
    let mut tmin = f64::NEG_INFINITY;
    let mut tmax = f64::INFINITY;
    let mut num_points = 0usize;
    let mut integer = true;
    let mut seen = false;

    for sig in signals {
        let Some((lo, hi)) = time_bounds(sig.time()) else {
            continue;
        };
        seen = true;
        tmin = tmin.max(lo);
        tmax = tmax.min(hi);
        num_points = num_points.max(sig.time().len());
        integer &= !sig.time().is_float();
    }

    if !seen {
        return Buffer::empty();
    }
    grid_buffer(tmin, tmax, num_points + 1, integer)
}

/// Common grid spanning every non-empty time vector
pub fn union_grid(signals: &[Signal]) -> Buffer {
    let mut tmin = f64::INFINITY;
    let mut tmax = f64::NEG_INFINITY;
    let mut num_points = 0usize;
    let mut integer = true;

    for sig in signals {
        let Some((lo, hi)) = time_bounds(sig.time()) else {
            continue;
        };
        tmin = tmin.min(lo);
        tmax = tmax.max(hi);
        num_points += sig.time().len();
        integer &= !sig.time().is_float();
    }

    if num_points == 0 {
        return Buffer::empty();
    }
    grid_buffer(tmin, tmax, num_points, integer)
}

/// Finest time unit over the signals' time buffers
pub fn finest_signal_time_unit(signals: &[Signal]) -> Option<TimeUnit> {
    finest_time_unit(signals.iter().map(|s| s.time_unit()))
}

/// Coarsest time unit over the signals' time buffers
pub fn coarsest_signal_time_unit(signals: &[Signal]) -> Option<TimeUnit> {
    coarsest_time_unit(signals.iter().map(|s| s.time_unit()))
}

/// Resample `(time, data)` pairs at `grid`
///
/// `time` and `data` must have the same length. Pairs are sorted by time
/// first so unordered inputs interpolate correctly.
pub fn interpolate(time: &[f64], data: &[f64], grid: &[f64], kind: InterpolationKind) -> Result<Vec<f64>> {
    if time.len() != data.len() {
        return Err(ProcessingError::InvalidData(format!(
            "time has {} samples but data has {}",
            time.len(),
            data.len()
        )));
    }
    if time.is_empty() {
        return Err(ProcessingError::InvalidData("cannot interpolate without samples".to_string()));
    }

    let mut pairs: Vec<(f64, f64)> = time.iter().copied().zip(data.iter().copied()).collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let xs: Vec<f64> = pairs.iter().map(|p| p.0).collect();
    let ys: Vec<f64> = pairs.iter().map(|p| p.1).collect();

    if xs.len() == 1 {
        return Ok(vec![ys[0]; grid.len()]);
    }

    let last = xs.len() - 1;
    let out = grid
        .iter()
        .map(|&x| {
            // Index of the first sample strictly greater than x
            let upper = xs.partition_point(|&t| t <= x);
            match kind {
                InterpolationKind::Linear => {
                    let i = upper.clamp(1, last) - 1;
                    let (x0, x1) = (xs[i], xs[i + 1]);
                    if x1 == x0 {
                        ys[i]
                    } else {
                        ys[i] + (x - x0) * (ys[i + 1] - ys[i]) / (x1 - x0)
                    }
                }
                InterpolationKind::Previous => ys[upper.clamp(1, last + 1) - 1],
                InterpolationKind::Next => {
                    let lower = xs.partition_point(|&t| t < x);
                    ys[lower.min(last)]
                }
                InterpolationKind::Nearest => {
                    if upper == 0 {
                        ys[0]
                    } else if upper > last {
                        ys[last]
                    } else {
                        let (i, j) = (upper - 1, upper);
                        if x - xs[i] <= xs[j] - x {
                            ys[i]
                        } else {
                            ys[j]
                        }
                    }
                }
            }
        })
        .collect();
    Ok(out)
}

fn rebase_slot(time: &[f64], slot: &Buffer, grid: &[f64], kind: InterpolationKind) -> Result<Buffer> {
    if slot.ndim() != 1 || slot.is_empty() || time.is_empty() {
        return Ok(Buffer::empty().with_unit(slot.unit()));
    }
    let resampled = interpolate(time, &slot.to_f64_vec(), grid, kind)?;
    let n = resampled.len();
    let array = ArrayD::from_shape_vec(IxDyn(&[n]), resampled)
        .map_err(|e| ProcessingError::InvalidData(e.to_string()))?;
    Ok(Buffer::new(Values::Float(array), slot.unit()))
}

/// Align every signal onto one common time grid
///
/// The grid's time unit is the finest known unit among the inputs (left empty
/// when none is known). Data slots that are not 1-D, or belong to a signal
/// without time samples, become empty.
pub fn align(signals: &mut [Signal], mode: AlignmentMode, kind: InterpolationKind) -> Result<()> {
    let grid = match mode {
        AlignmentMode::Intersection => intersection_grid(signals),
        AlignmentMode::Union => union_grid(signals),
    };
    let time_unit = finest_signal_time_unit(signals)
        .map(|u| u.symbol().to_string())
        .unwrap_or_default();
    let grid_values = grid.to_f64_vec();

    log::trace!(
        "Aligning {} signals ({:?}, {:?}) onto {} points",
        signals.len(),
        mode,
        kind,
        grid_values.len()
    );

    for sig in signals.iter_mut() {
        let old_time = sig.time().to_f64_vec();
        let primary = rebase_slot(&old_time, sig.data_primary(), &grid_values, kind)?;
        let secondary = rebase_slot(&old_time, sig.data_secondary(), &grid_values, kind)?;
        sig.set_time(grid.clone().with_unit(time_unit.clone()));
        sig.set_data_primary(primary);
        sig.set_data_secondary(secondary);
    }
    Ok(())
}
