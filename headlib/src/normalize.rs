//! Snapping and clamping for operator-entered setpoints.
//!
//! Every value headed for the wire goes through [FieldPolicy::normalize],
//! which always snaps to the step grid first and clamps second.

/// Largest number of decimal places we will try to clean up after
/// snapping. Results on a finer step keep the raw `round(v / step) * step`.
const MAX_STEP_DECIMALS: i32 = 9;

/// Clamp `value` into `[min, max]`.
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.min(max).max(min)
}

/// Round `value` to the nearest integer multiple of `step`.
///
/// Exact half-steps round to the even multiple, so with a step of `1.0`,
/// `0.5` snaps to `0.0` and `1.5` snaps to `2.0`.
///
/// The result is the closest `f64` to the decimal multiple, so a step of
/// `0.01` produces `1.15` and not `1.1500000000000001`.
pub fn snap_to_step(value: f64, step: f64) -> f64 {
    let snapped = (value / step).round_ties_even() * step;

    // multiplying by step drags in representation noise, so round
    // again at the precision the step itself is written with
    let snapped = match step_decimals(step) {
        Some(decimals) => {
            let scale = 10f64.powi(decimals);
            let cleaned = (snapped * scale).round() / scale;
            if cleaned.is_finite() {
                cleaned
            } else {
                snapped
            }
        }
        None => snapped,
    };

    // no negative zero on the wire
    snapped + 0.0
}

/// How many decimal places are needed to write `step` exactly, if it
/// takes no more than [MAX_STEP_DECIMALS].
fn step_decimals(step: f64) -> Option<i32> {
    let mut scale = 1.0;
    for decimals in 0..=MAX_STEP_DECIMALS {
        let scaled = step * scale;
        let whole = scaled.round();
        // a step that is still below one unit here is not written yet
        if whole >= 1.0 && (scaled - whole).abs() <= 1e-9 * scaled {
            return Some(decimals);
        }
        scale *= 10.0;
    }
    None
}

/// Errors from constructing a [FieldPolicy].
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("policy bounds and step must be finite")]
    NotFinite,
    #[error("policy minimum {min} is above maximum {max}")]
    InvertedRange { min: f64, max: f64 },
    #[error("policy step must be positive, got {0}")]
    NonPositiveStep(f64),
}

/// The valid range and granularity of a single setpoint field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldPolicy {
    pub(crate) min: f64,
    pub(crate) max: f64,
    pub(crate) step: f64,
}

impl FieldPolicy {
    pub fn new(min: f64, max: f64, step: f64) -> Result<Self, PolicyError> {
        if !(min.is_finite() && max.is_finite() && step.is_finite()) {
            return Err(PolicyError::NotFinite);
        }
        if min > max {
            return Err(PolicyError::InvertedRange { min, max });
        }
        if step <= 0.0 {
            return Err(PolicyError::NonPositiveStep(step));
        }
        Ok(Self { min, max, step })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Snap `value` to this policy's step, then clamp it into range.
    pub fn normalize(&self, value: f64) -> f64 {
        clamp(snap_to_step(value, self.step), self.min, self.max)
    }
}
