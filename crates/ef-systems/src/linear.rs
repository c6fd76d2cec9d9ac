//! Linear test systems with closed-form solutions.

use ef_core::{CoreError, CoreResult, Matrix, ParamSystem, Real, State};

/// Componentwise decay `y_i' = -k_i y_i`.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearDecayParams {
    pub rates: Vec<Real>,
}

impl LinearDecayParams {
    pub fn new(rates: Vec<Real>) -> CoreResult<Self> {
        if rates.is_empty() {
            return Err(CoreError::InvalidArg {
                what: "decay needs at least one rate",
            });
        }
        if rates.iter().any(|k| !k.is_finite()) {
            return Err(CoreError::InvalidArg {
                what: "decay rates must be finite",
            });
        }
        Ok(Self { rates })
    }

    /// Exact state at `t` from `y0` at time zero.
    pub fn exact(&self, t: Real, y0: &State) -> State {
        State::from_iterator(
            y0.len(),
            y0.iter().zip(&self.rates).map(|(y, k)| y * (-k * t).exp()),
        )
    }
}

fn decay_rhs(_t: Real, y: &State, p: &LinearDecayParams) -> State {
    State::from_iterator(y.len(), y.iter().zip(&p.rates).map(|(y, k)| -k * y))
}

fn decay_jac(_t: Real, _y: &State, p: &LinearDecayParams) -> Matrix {
    let diag = State::from_iterator(p.rates.len(), p.rates.iter().map(|k| -k));
    Matrix::from_diagonal(&diag)
}

pub fn linear_decay(params: LinearDecayParams) -> CoreResult<ParamSystem<LinearDecayParams>> {
    let dim = params.rates.len();
    Ok(ParamSystem::new(dim, params, decay_rhs)?.with_jacobian(decay_jac))
}

/// Undamped oscillator `x' = v`, `v' = -omega^2 x`.
#[derive(Clone, Debug, PartialEq)]
pub struct HarmonicParams {
    pub omega: Real,
}

impl HarmonicParams {
    pub fn new(omega: Real) -> CoreResult<Self> {
        if !(omega.is_finite() && omega > 0.0) {
            return Err(CoreError::InvalidArg {
                what: "angular frequency must be positive",
            });
        }
        Ok(Self { omega })
    }

    pub fn period(&self) -> Real {
        std::f64::consts::TAU / self.omega
    }

    pub fn exact(&self, t: Real, y0: &State) -> State {
        let (x0, v0) = (y0[0], y0[1]);
        let (s, c) = (self.omega * t).sin_cos();
        State::from_vec(vec![
            x0 * c + v0 / self.omega * s,
            -x0 * self.omega * s + v0 * c,
        ])
    }
}

fn harmonic_rhs(_t: Real, y: &State, p: &HarmonicParams) -> State {
    State::from_vec(vec![y[1], -p.omega * p.omega * y[0]])
}

fn harmonic_jac(_t: Real, _y: &State, p: &HarmonicParams) -> Matrix {
    Matrix::from_row_slice(2, 2, &[0.0, 1.0, -p.omega * p.omega, 0.0])
}

pub fn harmonic_oscillator(params: HarmonicParams) -> CoreResult<ParamSystem<HarmonicParams>> {
    Ok(ParamSystem::new(2, params, harmonic_rhs)?.with_jacobian(harmonic_jac))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ef_core::OdeSystem;

    #[test]
    fn decay_rhs_and_jacobian() {
        let sys = linear_decay(LinearDecayParams::new(vec![1.0, 10.0]).unwrap()).unwrap();
        let y = State::from_vec(vec![2.0, 3.0]);
        let f = sys.rhs(0.0, &y).unwrap();
        assert_eq!(f, State::from_vec(vec![-2.0, -30.0]));

        let j = sys.jacobian(0.0, &y).unwrap().unwrap();
        assert_eq!(j[(1, 1)], -10.0);
        assert_eq!(j[(0, 1)], 0.0);
    }

    #[test]
    fn empty_decay_is_rejected() {
        assert!(LinearDecayParams::new(vec![]).is_err());
    }

    #[test]
    fn harmonic_exact_solution_is_periodic() {
        let p = HarmonicParams::new(2.0).unwrap();
        let y0 = State::from_vec(vec![1.0, 0.5]);
        let y = p.exact(p.period(), &y0);
        assert!((y - y0).norm() < 1e-12);
    }

    #[test]
    fn harmonic_rejects_non_positive_frequency() {
        assert!(HarmonicParams::new(0.0).is_err());
        assert!(harmonic_oscillator(HarmonicParams::new(1.0).unwrap()).is_ok());
    }
}
