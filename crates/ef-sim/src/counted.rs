use std::cell::Cell;

use ef_core::{CoreResult, Matrix, OdeSystem, State};

/// Wraps a system and counts its evaluations for the solve statistics.
pub(crate) struct Counted<'a, S: ?Sized> {
    inner: &'a S,
    rhs: Cell<usize>,
    jac: Cell<usize>,
}

impl<'a, S: OdeSystem + ?Sized> Counted<'a, S> {
    pub fn new(inner: &'a S) -> Self {
        Self {
            inner,
            rhs: Cell::new(0),
            jac: Cell::new(0),
        }
    }

    pub fn rhs_evals(&self) -> usize {
        self.rhs.get()
    }

    pub fn jacobian_evals(&self) -> usize {
        self.jac.get()
    }
}

impl<S: OdeSystem + ?Sized> OdeSystem for Counted<'_, S> {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn rhs(&self, t: f64, y: &State) -> CoreResult<State> {
        self.rhs.set(self.rhs.get() + 1);
        self.inner.rhs(t, y)
    }

    fn jacobian(&self, t: f64, y: &State) -> CoreResult<Option<Matrix>> {
        if self.inner.has_jacobian() {
            self.jac.set(self.jac.get() + 1);
        }
        self.inner.jacobian(t, y)
    }

    fn has_jacobian(&self) -> bool {
        self.inner.has_jacobian()
    }
}
