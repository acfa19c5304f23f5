use std::ops::ControlFlow;

use crate::cancel::StopToken;
use crate::solver::Problem;

/// Mutable column-major view of a dense Jacobian (residuals x free parameters).
pub struct JacobianMut<'a> {
    values: &'a mut [f64],
    nrows: usize,
    ncols: usize,
}

impl<'a> JacobianMut<'a> {
    pub(crate) fn new(values: &'a mut [f64], nrows: usize, ncols: usize) -> Self {
        debug_assert_eq!(values.len(), nrows * ncols);
        Self {
            values,
            nrows,
            ncols,
        }
    }

    /// Number of residuals (rows in J).
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of free parameters (columns in J).
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Partial derivatives of every residual with respect to parameter `col`.
    pub fn col_mut(&mut self, col: usize) -> &mut [f64] {
        let m = self.nrows;
        &mut self.values[col * m..(col + 1) * m]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.values[row + col * self.nrows] = value;
    }

    pub fn fill(&mut self, value: f64) {
        self.values.fill(value);
    }
}

/// Finite-difference formula used when the problem has no analytic Jacobian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DifferenceScheme {
    /// `(f(x + h) - f(x - h)) / 2h`, two evaluations per parameter.
    #[default]
    Central,
    /// `(f(x + h) - f(x)) / h`, one evaluation per parameter.
    Forward,
}

impl DifferenceScheme {
    /// Residual evaluations needed for one Jacobian of `ncols` columns.
    pub fn evaluations(self, ncols: usize) -> usize {
        match self {
            Self::Central => 2 * ncols,
            Self::Forward => ncols,
        }
    }
}

/// Scratch and settings for one finite-difference Jacobian.
pub(crate) struct Difference<'a> {
    pub scheme: DifferenceScheme,
    pub epsfcn: f64,
    pub epsmch: f64,
    pub stop: &'a StopToken,
}

impl Difference<'_> {
    /// Fill `jac` by differencing `problem` around `x`.
    ///
    /// `x` is perturbed one component at a time and restored before returning.
    /// `fvec` must hold the residuals at `x`; it is only read by the forward
    /// scheme. Breaks as soon as a stop is observed after an evaluation,
    /// reporting the number of evaluations spent either way.
    pub fn fdjac2<P: Problem + ?Sized>(
        &self,
        problem: &mut P,
        x: &mut [f64],
        fvec: &[f64],
        jac: &mut JacobianMut<'_>,
        wa_plus: &mut [f64],
        wa_minus: &mut [f64],
    ) -> ControlFlow<usize, usize> {
        let eps = self.epsfcn.max(self.epsmch).sqrt();
        let mut nfev = 0;

        for j in 0..jac.ncols() {
            let temp = x[j];
            let mut h = eps * temp.abs();
            if h == 0.0 {
                h = eps;
            }

            x[j] = temp + h;
            problem.residuals(x, wa_plus);
            nfev += 1;
            if self.stop.is_stopped() {
                x[j] = temp;
                return ControlFlow::Break(nfev);
            }

            match self.scheme {
                DifferenceScheme::Central => {
                    x[j] = temp - h;
                    problem.residuals(x, wa_minus);
                    nfev += 1;
                    x[j] = temp;
                    if self.stop.is_stopped() {
                        return ControlFlow::Break(nfev);
                    }
                    for (d, (p, q)) in jac
                        .col_mut(j)
                        .iter_mut()
                        .zip(wa_plus.iter().zip(wa_minus.iter()))
                    {
                        *d = (p - q) / (2.0 * h);
                    }
                }
                DifferenceScheme::Forward => {
                    x[j] = temp;
                    for (d, (p, f)) in jac.col_mut(j).iter_mut().zip(wa_plus.iter().zip(fvec)) {
                        *d = (p - f) / h;
                    }
                }
            }
        }
        ControlFlow::Continue(nfev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Cubic;

    impl Problem for Cubic {
        fn residual_count(&self) -> usize {
            2
        }

        fn residuals(&mut self, x: &[f64], residuals: &mut [f64]) {
            residuals[0] = x[0] * x[0] * x[0] + x[1];
            residuals[1] = (x[1] - 1.0) * 4.0;
        }
    }

    fn jacobian_at(scheme: DifferenceScheme, x0: [f64; 2]) -> (Vec<f64>, usize) {
        let stop = StopToken::new();
        let diff = Difference {
            scheme,
            epsfcn: 0.0,
            epsmch: f64::EPSILON,
            stop: &stop,
        };
        let mut problem = Cubic;
        let mut x = x0;
        let mut fvec = [0.0; 2];
        problem.residuals(&x, &mut fvec);
        let mut values = vec![0.0; 4];
        let mut jac = JacobianMut::new(&mut values, 2, 2);
        let (mut p, mut q) = ([0.0; 2], [0.0; 2]);
        let flow = diff.fdjac2(&mut problem, &mut x, &fvec, &mut jac, &mut p, &mut q);
        assert_eq!(x, x0);
        match flow {
            ControlFlow::Continue(n) => (values, n),
            ControlFlow::Break(_) => panic!("unexpected stop"),
        }
    }

    #[test]
    fn central_difference_is_accurate() {
        let (jac, nfev) = jacobian_at(DifferenceScheme::Central, [2.0, 0.0]);
        assert_eq!(nfev, 4);
        assert_eq!(nfev, DifferenceScheme::Central.evaluations(2));
        assert!((jac[0] - 12.0).abs() <= 1e-6);
        assert!(jac[1].abs() <= 1e-6);
        assert!((jac[2] - 1.0).abs() <= 1e-6);
        assert!((jac[3] - 4.0).abs() <= 1e-6);
    }

    #[test]
    fn forward_difference_uses_one_evaluation_per_column() {
        let (jac, nfev) = jacobian_at(DifferenceScheme::Forward, [2.0, 0.0]);
        assert_eq!(nfev, DifferenceScheme::Forward.evaluations(2));
        assert!((jac[0] - 12.0).abs() <= 1e-5);
        assert!((jac[3] - 4.0).abs() <= 1e-6);
    }

    #[test]
    fn stops_at_evaluation_boundary() {
        let stop = StopToken::new();
        stop.stop();
        let diff = Difference {
            scheme: DifferenceScheme::Central,
            epsfcn: 0.0,
            epsmch: f64::EPSILON,
            stop: &stop,
        };
        let mut problem = Cubic;
        let mut x = [1.0, 1.0];
        let mut values = vec![0.0; 4];
        let mut jac = JacobianMut::new(&mut values, 2, 2);
        let (mut p, mut q) = ([0.0; 2], [0.0; 2]);
        let flow = diff.fdjac2(&mut problem, &mut x, &[0.0; 2], &mut jac, &mut p, &mut q);
        assert_eq!(flow, ControlFlow::Break(1));
        assert_eq!(x, [1.0, 1.0]);
    }
}
