//! OdeSystem trait and the parameterized system adapter.

use crate::error::{CoreError, CoreResult};
use crate::state::{Matrix, State};

/// Trait for right-hand sides `dy/dt = f(t, y)`.
///
/// Implementations must be referentially transparent: integrators call
/// `rhs` several times per step (Newton iterations, step retries) and expect
/// identical values for identical inputs.
pub trait OdeSystem {
    /// Number of state variables.
    fn dimension(&self) -> usize;

    /// Evaluate the derivative at `(t, y)`.
    ///
    /// Physical systems never fail; derived systems (e.g. a period map built
    /// on a nested integration) report evaluation failures here.
    fn rhs(&self, t: f64, y: &State) -> CoreResult<State>;

    /// Analytic Jacobian `df/dy`, if the system provides one.
    fn jacobian(&self, _t: f64, _y: &State) -> CoreResult<Option<Matrix>> {
        Ok(None)
    }

    /// Whether `jacobian` returns a matrix.
    fn has_jacobian(&self) -> bool {
        false
    }
}

impl<S: OdeSystem + ?Sized> OdeSystem for &S {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn rhs(&self, t: f64, y: &State) -> CoreResult<State> {
        (**self).rhs(t, y)
    }

    fn jacobian(&self, t: f64, y: &State) -> CoreResult<Option<Matrix>> {
        (**self).jacobian(t, y)
    }

    fn has_jacobian(&self) -> bool {
        (**self).has_jacobian()
    }
}

/// Right-hand side with explicit fixed parameters.
pub type RhsFn<P> = fn(f64, &State, &P) -> State;

/// Jacobian with explicit fixed parameters.
pub type JacFn<P> = fn(f64, &State, &P) -> Matrix;

/// Partial application of a parameterized right-hand side.
///
/// The parameters are owned and immutable for the lifetime of the adapter,
/// so `F(t, y) = f(t, y, params)` is a pure function of `(t, y)`.
#[derive(Clone, Debug)]
pub struct ParamSystem<P> {
    dim: usize,
    params: P,
    rhs: RhsFn<P>,
    jac: Option<JacFn<P>>,
}

impl<P> ParamSystem<P> {
    /// Create an adapter for a system of `dim` state variables.
    pub fn new(dim: usize, params: P, rhs: RhsFn<P>) -> CoreResult<Self> {
        if dim == 0 {
            return Err(CoreError::InvalidArg {
                what: "system dimension must be positive",
            });
        }
        Ok(Self {
            dim,
            params,
            rhs,
            jac: None,
        })
    }

    /// Attach an analytic Jacobian.
    pub fn with_jacobian(mut self, jac: JacFn<P>) -> Self {
        self.jac = Some(jac);
        self
    }

    pub fn params(&self) -> &P {
        &self.params
    }
}

impl<P> OdeSystem for ParamSystem<P> {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn rhs(&self, t: f64, y: &State) -> CoreResult<State> {
        if y.len() != self.dim {
            return Err(CoreError::DimensionMismatch {
                what: "state",
                expected: self.dim,
                found: y.len(),
            });
        }
        let dydt = (self.rhs)(t, y, &self.params);
        if dydt.len() != self.dim {
            return Err(CoreError::DimensionMismatch {
                what: "derivative",
                expected: self.dim,
                found: dydt.len(),
            });
        }
        Ok(dydt)
    }

    fn jacobian(&self, t: f64, y: &State) -> CoreResult<Option<Matrix>> {
        let Some(jac) = self.jac else {
            return Ok(None);
        };
        let m = jac(t, y, &self.params);
        if m.nrows() != self.dim || m.ncols() != self.dim {
            return Err(CoreError::DimensionMismatch {
                what: "jacobian",
                expected: self.dim,
                found: if m.nrows() != self.dim {
                    m.nrows()
                } else {
                    m.ncols()
                },
            });
        }
        Ok(Some(m))
    }

    fn has_jacobian(&self) -> bool {
        self.jac.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Decay {
        k: f64,
    }

    fn decay_rhs(_t: f64, y: &State, p: &Decay) -> State {
        -p.k * y
    }

    fn decay_jac(_t: f64, _y: &State, p: &Decay) -> Matrix {
        Matrix::from_element(1, 1, -p.k)
    }

    fn bad_jac(_t: f64, _y: &State, _p: &Decay) -> Matrix {
        Matrix::zeros(2, 2)
    }

    #[test]
    fn adapter_applies_parameters() {
        let sys = ParamSystem::new(1, Decay { k: 3.0 }, decay_rhs).unwrap();
        let y = State::from_element(1, 2.0);
        assert_eq!(sys.rhs(0.0, &y).unwrap()[0], -6.0);
        assert!(!sys.has_jacobian());
        assert!(sys.jacobian(0.0, &y).unwrap().is_none());
    }

    #[test]
    fn adapter_is_referentially_transparent() {
        let sys = ParamSystem::new(1, Decay { k: 0.5 }, decay_rhs).unwrap();
        let y = State::from_element(1, 1.25);
        let a = sys.rhs(1.0, &y).unwrap();
        let b = sys.rhs(1.0, &y).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn jacobian_dimension_is_checked() {
        let y = State::from_element(1, 1.0);
        let good = ParamSystem::new(1, Decay { k: 2.0 }, decay_rhs)
            .unwrap()
            .with_jacobian(decay_jac);
        assert_eq!(good.jacobian(0.0, &y).unwrap().unwrap()[(0, 0)], -2.0);

        let bad = ParamSystem::new(1, Decay { k: 2.0 }, decay_rhs)
            .unwrap()
            .with_jacobian(bad_jac);
        assert!(matches!(
            bad.jacobian(0.0, &y),
            Err(CoreError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn state_dimension_is_checked() {
        let sys = ParamSystem::new(1, Decay { k: 1.0 }, decay_rhs).unwrap();
        let y = State::from_element(2, 1.0);
        assert!(sys.rhs(0.0, &y).is_err());
        assert!(ParamSystem::new(0, Decay { k: 1.0 }, decay_rhs).is_err());
    }
}
