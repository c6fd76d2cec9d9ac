//! Finite difference Jacobian computation.

use crate::error::SolverResult;
use ef_core::{Matrix, OdeSystem, State};

/// Relative perturbation for forward differences (about sqrt of machine epsilon).
pub const FORWARD_EPS: f64 = 1.490_116_119_384_765_6e-8;

/// Relative perturbation for central differences (about cbrt of machine epsilon).
pub const CENTRAL_EPS: f64 = 6.055_454_452_393_343e-6;

/// Compute Jacobian using forward finite differences.
///
/// Column j is `(f(x + dx e_j) - f(x)) / dx` with `dx = epsilon * max(|x_j|, 1)`.
/// `f_x` may be supplied when `f(x)` is already known.
pub fn finite_difference_jacobian<F>(
    x: &State,
    f_x: Option<&State>,
    f: F,
    epsilon: f64,
) -> SolverResult<Matrix>
where
    F: Fn(&State) -> SolverResult<State>,
{
    let n = x.len();
    let owned;
    let f_x = match f_x {
        Some(v) => v,
        None => {
            owned = f(x)?;
            &owned
        }
    };
    let m = f_x.len();

    let mut jac = Matrix::zeros(m, n);
    let mut x_perturbed = x.clone();

    for j in 0..n {
        let dx = epsilon * x[j].abs().max(1.0);
        x_perturbed[j] = x[j] + dx;
        // Use the representable perturbation
        let dx = x_perturbed[j] - x[j];

        let f_perturbed = f(&x_perturbed)?;
        jac.set_column(j, &((f_perturbed - f_x) / dx));
        x_perturbed[j] = x[j];
    }

    Ok(jac)
}

/// Compute Jacobian using central finite differences (more accurate but 2x cost).
pub fn central_difference_jacobian<F>(x: &State, f: F, epsilon: f64) -> SolverResult<Matrix>
where
    F: Fn(&State) -> SolverResult<State>,
{
    let n = x.len();
    let mut columns = Vec::with_capacity(n);
    let mut x_shift = x.clone();

    for j in 0..n {
        let dx = epsilon * x[j].abs().max(1.0);

        x_shift[j] = x[j] + dx;
        let f_plus = f(&x_shift)?;

        x_shift[j] = x[j] - dx;
        let f_minus = f(&x_shift)?;

        x_shift[j] = x[j];
        columns.push((f_plus - f_minus) / (2.0 * dx));
    }

    if columns.is_empty() {
        return Ok(Matrix::zeros(0, 0));
    }
    Ok(Matrix::from_columns(&columns))
}

/// Jacobian of a system at `(t, y)`: analytic when the system provides one,
/// forward differences otherwise. Returns the matrix and whether it was analytic.
pub fn system_jacobian<S: OdeSystem + ?Sized>(
    system: &S,
    t: f64,
    y: &State,
    f_y: Option<&State>,
) -> SolverResult<(Matrix, bool)> {
    if let Some(jac) = system.jacobian(t, y)? {
        return Ok((jac, true));
    }
    let jac = finite_difference_jacobian(
        y,
        f_y,
        |v: &State| Ok(system.rhs(t, v)?),
        FORWARD_EPS,
    )?;
    Ok((jac, false))
}
