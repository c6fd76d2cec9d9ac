use crate::{CoreError, CoreResult, State};

/// Floating point type used throughout system
pub type Real = f64;

/// Absolute/relative pair used for scalar comparisons.
#[derive(Clone, Copy, Debug)]
pub struct Tolerances {
    pub abs: Real,
    pub rel: Real,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            abs: 1e-12,
            rel: 1e-9,
        }
    }
}

pub fn nearly_equal(a: Real, b: Real, tol: Tolerances) -> bool {
    let diff = (a - b).abs();
    if diff <= tol.abs {
        return true;
    }
    diff <= tol.rel * a.abs().max(b.abs())
}

pub fn ensure_finite(v: Real, what: &'static str) -> CoreResult<Real> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(CoreError::NonFinite { what, value: v })
    }
}

/// Check every component of a state vector.
pub fn ensure_finite_state(y: &State, what: &'static str) -> CoreResult<()> {
    match y.iter().find(|v| !v.is_finite()) {
        Some(&value) => Err(CoreError::NonFinite { what, value }),
        None => Ok(()),
    }
}

/// Integration tolerance: one value for all components, or one per component.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Tolerance {
    Scalar(Real),
    PerComponent(Vec<Real>),
}

impl Tolerance {
    /// Validate against a state dimension. Values must be finite and positive.
    pub fn validate(&self, dim: usize, what: &'static str) -> CoreResult<()> {
        match self {
            Tolerance::Scalar(v) => {
                if !v.is_finite() || *v <= 0.0 {
                    return Err(CoreError::InvalidArg { what });
                }
            }
            Tolerance::PerComponent(values) => {
                if values.len() != dim {
                    return Err(CoreError::DimensionMismatch {
                        what,
                        expected: dim,
                        found: values.len(),
                    });
                }
                if values.iter().any(|v| !v.is_finite() || *v <= 0.0) {
                    return Err(CoreError::InvalidArg { what });
                }
            }
        }
        Ok(())
    }

    /// Value for component `i`.
    pub fn component(&self, i: usize) -> Real {
        match self {
            Tolerance::Scalar(v) => *v,
            Tolerance::PerComponent(values) => values[i],
        }
    }
}

impl From<Real> for Tolerance {
    fn from(v: Real) -> Self {
        Tolerance::Scalar(v)
    }
}

/// Error weights `atol + rtol * |y|`, component-wise.
pub fn error_scale(atol: &Tolerance, rtol: &Tolerance, y: &State) -> State {
    State::from_iterator(
        y.len(),
        y.iter()
            .enumerate()
            .map(|(i, yi)| atol.component(i) + rtol.component(i) * yi.abs()),
    )
}

/// Root-mean-square norm of `v / scale`.
pub fn weighted_rms_norm(v: &State, scale: &State) -> Real {
    let n = v.len();
    if n == 0 {
        return 0.0;
    }
    let sum: Real = v
        .iter()
        .zip(scale.iter())
        .map(|(vi, si)| (vi / si).powi(2))
        .sum();
    (sum / n as Real).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearly_equal_basic() {
        let tol = Tolerances {
            abs: 1e-12,
            rel: 1e-9,
        };
        assert!(nearly_equal(1.0, 1.0 + 1e-12, tol));
        assert!(nearly_equal(0.0, 1e-13, tol));
        assert!(!nearly_equal(1.0, 1.0 + 1e-6, tol));
    }

    #[test]
    fn ensure_finite_detects_nan() {
        let err = ensure_finite(Real::NAN, "test").unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("Non-finite"));
    }

    #[test]
    fn per_component_tolerance_checks_length() {
        let tol = Tolerance::PerComponent(vec![1e-6, 1e-6]);
        assert!(tol.validate(2, "atol").is_ok());
        assert!(matches!(
            tol.validate(3, "atol"),
            Err(CoreError::DimensionMismatch { expected: 3, found: 2, .. })
        ));
        assert!(Tolerance::Scalar(-1.0).validate(2, "atol").is_err());
    }

    #[test]
    fn weighted_norm_of_unit_ratios_is_one() {
        let y = State::from_vec(vec![2.0, -4.0]);
        let scale = error_scale(&Tolerance::Scalar(0.0), &Tolerance::Scalar(0.5), &y);
        let v = State::from_vec(vec![1.0, 2.0]);
        assert!((weighted_rms_norm(&v, &scale) - 1.0).abs() < 1e-15);
    }
}
