//! Box-constrained nonlinear least squares with a Levenberg-Marquardt (LM) step.
//!
//! This crate minimizes `||r(x)||^2` for residuals `r(x)` over a handful of
//! parameters, each optionally restricted to `[lower, upper]`. It is a dense
//! implementation of the MINPACK `lmdif` scheme: a scaled trust region
//! controls the damping parameter, pivoted Householder QR solves the damped
//! normal equations, and the Jacobian comes from central differences unless
//! the problem supplies one.
//!
//! How it works (high level):
//! - Difference the residuals to get `J`, freezing columns of parameters that
//!   sit on a bound with the gradient pointing outward.
//! - Factor `J P = Q R` and solve `[J; sqrt(par) D] p = [-r; 0]` for the
//!   step whose scaled length matches the trust radius.
//! - Shrink the whole step so it stays inside the box, then accept or reject
//!   it from the ratio of actual to predicted reduction.
//!
//! Calling it:
//! - Implement `Problem` to fill residuals (and optionally the Jacobian).
//! - Either call `LmSolver::solve_bounded` on a raw parameter vector, or wrap
//!   the problem in an `Optimizer` together with a `ParameterSet` to get fixed
//!   parameters and MINPACK status codes.
//! - Stop a long solve from another thread through a `StopToken`.
//!
//! Example:
//! ```rust,no_run
//! use bounded_lm::{LmSolver, Problem, SolverOptions};
//!
//! struct Shifted;
//! impl Problem for Shifted {
//!     fn residual_count(&self) -> usize {
//!         2
//!     }
//!     fn residuals(&mut self, x: &[f64], r: &mut [f64]) {
//!         r[0] = x[0] - 3.0;
//!         r[1] = x[1] + 2.0;
//!     }
//! }
//!
//! let mut solver = LmSolver::new(2, 2).unwrap();
//! let mut x = vec![0.0, 0.0];
//! let (lower, upper) = ([0.0, f64::NEG_INFINITY], [2.0, f64::INFINITY]);
//! let stats = solver
//!     .solve_bounded(&mut Shifted, &mut x, &lower, &upper, &SolverOptions::default(), None)
//!     .unwrap();
//! assert_eq!(x[0], 2.0);
//! assert!(stats.status.info() > 0);
//! ```

mod cancel;
mod enorm;
mod jacobian;
mod lmpar;
mod optimizer;
mod params;
mod qr;
mod report;
mod solver;

pub use cancel::StopToken;
pub use enorm::enorm;
pub use jacobian::{DifferenceScheme, JacobianMut};
pub use lmpar::LmParSearch;
pub use optimizer::Optimizer;
pub use params::{Parameter, ParameterError, ParameterSet};
pub use qr::QrFactorization;
pub use report::{IterationReport, Reporter, SolveStatus, SolverStats, StdoutReporter};
pub use solver::{LmSolver, MachinePrecision, Problem, SolveError, SolverError, SolverOptions};
