use core::fmt;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use crate::cancel::StopToken;
use crate::enorm::enorm;
use crate::jacobian::{Difference, DifferenceScheme, JacobianMut};
use crate::lmpar::LmParSearch;
use crate::params::ParameterError;
use crate::qr::QrFactorization;
use crate::report::{emit_line, IterationReport, Reporter, SolveStatus, SolverStats, StdoutReporter};

/// Errors while constructing the solver.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    /// No free parameters, or fewer residuals than free parameters.
    InvalidDimensions { nrows: usize, ncols: usize },
}

impl SolverError {
    /// MINPACK status code for this error, always 0 (improper input).
    pub fn info(&self) -> i32 {
        0
    }
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDimensions { nrows, ncols } => {
                write!(f, "invalid dimensions: nrows={nrows}, ncols={ncols}")
            }
        }
    }
}

impl std::error::Error for SolverError {}

/// Improper input detected before a solve starts iterating.
///
/// Every variant corresponds to MINPACK status code 0, see [`SolveError::info`].
#[derive(Debug, Clone, PartialEq)]
pub enum SolveError {
    /// The solver could not be built for the problem's dimensions.
    Solver(SolverError),
    /// The parameter set is inconsistent.
    Parameter(ParameterError),
    /// The provided x has the wrong length.
    DimensionMismatch { expected: usize, actual: usize },
    /// The problem reports a different number of residuals than the solver was built for.
    ResidualCountMismatch { expected: usize, actual: usize },
    /// A bound slice has the wrong length.
    BoundsLength { expected: usize, actual: usize },
    /// A starting value lies outside its bounds.
    StartOutOfBounds {
        index: usize,
        value: f64,
        lower: f64,
        upper: f64,
    },
    /// ftol, xtol or gtol is negative or NaN.
    InvalidTolerance { name: &'static str, value: f64 },
    /// The initial step bound factor is not positive.
    NonPositiveFactor { value: f64 },
    /// The evaluation budget is zero.
    ZeroEvaluationBudget,
    /// User scaling has the wrong length.
    ScalingLength { expected: usize, actual: usize },
    /// A user scaling entry is not positive.
    NonPositiveScaling { index: usize, value: f64 },
}

impl SolveError {
    /// MINPACK status code for this error, always 0 (improper input).
    pub fn info(&self) -> i32 {
        0
    }
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Solver(err) => write!(f, "{err}"),
            Self::Parameter(err) => write!(f, "{err}"),
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "x length {actual} does not match expected {expected}")
            }
            Self::ResidualCountMismatch { expected, actual } => {
                write!(f, "problem has {actual} residuals, solver expects {expected}")
            }
            Self::BoundsLength { expected, actual } => {
                write!(f, "bounds length {actual} does not match expected {expected}")
            }
            Self::StartOutOfBounds {
                index,
                value,
                lower,
                upper,
            } => {
                write!(f, "x[{index}] = {value} lies outside [{lower}, {upper}]")
            }
            Self::InvalidTolerance { name, value } => {
                write!(f, "{name} must be non-negative (got {value})")
            }
            Self::NonPositiveFactor { value } => {
                write!(f, "step bound factor must be positive (got {value})")
            }
            Self::ZeroEvaluationBudget => write!(f, "maximum number of evaluations is zero"),
            Self::ScalingLength { expected, actual } => {
                write!(f, "scaling length {actual} does not match expected {expected}")
            }
            Self::NonPositiveScaling { index, value } => {
                write!(f, "scaling[{index}] must be positive (got {value})")
            }
        }
    }
}

impl std::error::Error for SolveError {}

impl From<SolverError> for SolveError {
    fn from(err: SolverError) -> Self {
        Self::Solver(err)
    }
}

impl From<ParameterError> for SolveError {
    fn from(err: ParameterError) -> Self {
        Self::Parameter(err)
    }
}

/// Machine-dependent constants used by the solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachinePrecision {
    /// Relative machine precision.
    pub epsmch: f64,
    /// Smallest positive magnitude.
    pub dwarf: f64,
}

impl Default for MachinePrecision {
    fn default() -> Self {
        Self {
            epsmch: f64::EPSILON,
            dwarf: f64::MIN_POSITIVE,
        }
    }
}

/// Options controlling the Levenberg-Marquardt solve.
#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Converge when actual and predicted relative reductions in the sum of
    /// squares are at most ftol.
    pub ftol: f64,
    /// Converge when the relative error between two consecutive iterates is at most xtol.
    pub xtol: f64,
    /// Converge when the cosine between the residuals and any Jacobian column is at most gtol.
    pub gtol: f64,
    /// Residual evaluation budget; `None` means `500 * (n + 1)`.
    pub max_fev: Option<usize>,
    /// Initial step bound is `factor * ||diag * x||`, or `factor` if that is zero.
    pub factor: f64,
    /// Relative error of the residual function, sets the finite-difference step.
    pub epsfcn: f64,
    /// Fixed positive per-parameter scaling. `None` scales by the Jacobian column norms.
    pub scaling: Option<Vec<f64>>,
    /// Finite-difference formula for problems without an analytic Jacobian.
    pub difference: DifferenceScheme,
    pub precision: MachinePrecision,
    /// Emit per-iteration diagnostics to stdout by default.
    pub verbose: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            max_fev: None,
            factor: 100.0,
            epsfcn: 0.0,
            scaling: None,
            difference: DifferenceScheme::Central,
            precision: MachinePrecision::default(),
            verbose: false,
        }
    }
}

impl SolverOptions {
    /// Evaluation budget for `ncols` free parameters.
    pub fn evaluation_budget(&self, ncols: usize) -> usize {
        self.max_fev.unwrap_or(500 * (ncols + 1))
    }
}

/// Nonlinear least squares problem with residuals r(x) over the free parameters.
pub trait Problem {
    /// Number of residuals (observations).
    fn residual_count(&self) -> usize;

    /// Fill residuals r(x).
    fn residuals(&mut self, x: &[f64], residuals: &mut [f64]);

    /// Whether [`Problem::jacobian`] fills an analytic Jacobian. When false,
    /// the solver differences [`Problem::residuals`] instead.
    fn provides_jacobian(&self) -> bool {
        false
    }

    /// Fill the dense Jacobian of r at x. Entries start out zero.
    fn jacobian(&mut self, _x: &[f64], _jacobian: &mut JacobianMut<'_>) {}
}

#[derive(Clone, Copy)]
enum Bounds<'a> {
    Unbounded,
    Box { lower: &'a [f64], upper: &'a [f64] },
}

impl Bounds<'_> {
    fn lower(&self, j: usize) -> f64 {
        match self {
            Self::Unbounded => f64::NEG_INFINITY,
            Self::Box { lower, .. } => lower[j],
        }
    }

    fn upper(&self, j: usize) -> f64 {
        match self {
            Self::Unbounded => f64::INFINITY,
            Self::Box { upper, .. } => upper[j],
        }
    }
}

/// Dense, box-constrained Levenberg-Marquardt solver for min ||r(x)||^2.
///
/// Working storage for an `nrows` x `ncols` problem is allocated once and
/// reused by every solve. A solver is not reentrant; run concurrent solves on
/// separate instances.
pub struct LmSolver {
    nrows: usize,
    ncols: usize,
    qr: QrFactorization,
    lmpar: LmParSearch,
    stop: StopToken,
    fvec: Vec<f64>,
    trial_fvec: Vec<f64>,
    fd_work: Vec<f64>,
    rhs: Vec<f64>,
    qtf: Vec<f64>,
    diag: Vec<f64>,
    step: Vec<f64>,
    x_trial: Vec<f64>,
    scaled: Vec<f64>,
    lower_peg: Vec<bool>,
    upper_peg: Vec<bool>,
}

enum ReporterSlot<'a> {
    External(&'a mut dyn Reporter),
    Local(StdoutReporter),
    None,
}

impl<'a> ReporterSlot<'a> {
    fn new(reporter: Option<&'a mut dyn Reporter>, verbose: bool) -> Self {
        match reporter {
            Some(r) => Self::External(r),
            None if verbose => Self::Local(StdoutReporter::new()),
            None => Self::None,
        }
    }

    fn as_mut(&mut self) -> Option<&mut dyn Reporter> {
        match self {
            Self::External(r) => Some(*r),
            Self::Local(r) => Some(r),
            Self::None => None,
        }
    }
}

impl LmSolver {
    /// Create a solver for `nrows` residuals and `ncols` free parameters.
    pub fn new(nrows: usize, ncols: usize) -> Result<Self, SolverError> {
        if ncols == 0 || nrows < ncols {
            return Err(SolverError::InvalidDimensions { nrows, ncols });
        }
        let dwarf = MachinePrecision::default().dwarf;
        Ok(Self {
            nrows,
            ncols,
            qr: QrFactorization::new(nrows, ncols),
            lmpar: LmParSearch::new(ncols, dwarf),
            stop: StopToken::new(),
            fvec: vec![0.0; nrows],
            trial_fvec: vec![0.0; nrows],
            fd_work: vec![0.0; nrows],
            rhs: vec![0.0; nrows],
            qtf: vec![0.0; ncols],
            diag: vec![0.0; ncols],
            step: vec![0.0; ncols],
            x_trial: vec![0.0; ncols],
            scaled: vec![0.0; ncols],
            lower_peg: vec![false; ncols],
            upper_peg: vec![false; ncols],
        })
    }

    /// Share an existing stop token with this solver.
    pub fn with_stop_token(mut self, stop: StopToken) -> Self {
        self.stop = stop;
        self
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Token that stops a running solve at its next residual evaluation.
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// Request a cooperative stop.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Residuals at the parameters returned by the last solve.
    pub fn residuals(&self) -> &[f64] {
        &self.fvec
    }

    /// Solve for x in-place without bounds.
    pub fn solve(
        &mut self,
        problem: &mut impl Problem,
        x: &mut [f64],
        options: &SolverOptions,
        reporter: Option<&mut dyn Reporter>,
    ) -> Result<SolverStats, SolveError> {
        self.lmdif(problem, x, Bounds::Unbounded, options, reporter)
    }

    /// Solve for x in-place keeping `lower[j] <= x[j] <= upper[j]`.
    ///
    /// Bounds may be infinite. x must start inside its bounds.
    pub fn solve_bounded(
        &mut self,
        problem: &mut impl Problem,
        x: &mut [f64],
        lower: &[f64],
        upper: &[f64],
        options: &SolverOptions,
        reporter: Option<&mut dyn Reporter>,
    ) -> Result<SolverStats, SolveError> {
        let n = self.ncols;
        for len in [lower.len(), upper.len()] {
            if len != n {
                return Err(SolveError::BoundsLength {
                    expected: n,
                    actual: len,
                });
            }
        }
        self.lmdif(problem, x, Bounds::Box { lower, upper }, options, reporter)
    }

    fn validate(
        &self,
        problem: &impl Problem,
        x: &[f64],
        bounds: Bounds<'_>,
        options: &SolverOptions,
    ) -> Result<(), SolveError> {
        let n = self.ncols;
        if x.len() != n {
            return Err(SolveError::DimensionMismatch {
                expected: n,
                actual: x.len(),
            });
        }
        if problem.residual_count() != self.nrows {
            return Err(SolveError::ResidualCountMismatch {
                expected: self.nrows,
                actual: problem.residual_count(),
            });
        }
        for (name, value) in [("ftol", options.ftol), ("xtol", options.xtol), ("gtol", options.gtol)] {
            if value.is_nan() || value < 0.0 {
                return Err(SolveError::InvalidTolerance { name, value });
            }
        }
        if options.factor.is_nan() || options.factor <= 0.0 {
            return Err(SolveError::NonPositiveFactor {
                value: options.factor,
            });
        }
        if options.max_fev == Some(0) {
            return Err(SolveError::ZeroEvaluationBudget);
        }
        if let Some(scaling) = &options.scaling {
            if scaling.len() != n {
                return Err(SolveError::ScalingLength {
                    expected: n,
                    actual: scaling.len(),
                });
            }
            let bad = scaling
                .iter()
                .enumerate()
                .find(|&(_, &v)| v.is_nan() || v <= 0.0);
            if let Some((index, &value)) = bad {
                return Err(SolveError::NonPositiveScaling { index, value });
            }
        }
        for (index, &value) in x.iter().enumerate() {
            let (lower, upper) = (bounds.lower(index), bounds.upper(index));
            if value.is_nan() || value < lower || value > upper {
                return Err(SolveError::StartOutOfBounds {
                    index,
                    value,
                    lower,
                    upper,
                });
            }
        }
        Ok(())
    }

    fn lmdif(
        &mut self,
        problem: &mut impl Problem,
        x: &mut [f64],
        bounds: Bounds<'_>,
        options: &SolverOptions,
        reporter: Option<&mut dyn Reporter>,
    ) -> Result<SolverStats, SolveError> {
        if let Err(err) = self.validate(&*problem, x, bounds, options) {
            log::warn!("improper input: {err}");
            return Err(err);
        }
        let start_time = options.verbose.then(Instant::now);
        let mut reporter = ReporterSlot::new(reporter, options.verbose);

        let n = self.ncols;
        let epsmch = options.precision.epsmch;
        let max_fev = options.evaluation_budget(n);
        let user_scaling = options.scaling.as_deref();
        if let Some(scaling) = user_scaling {
            self.diag.copy_from_slice(scaling);
        }
        self.lmpar.set_dwarf(options.precision.dwarf);

        let mut nfev = 0;
        let mut njev = 0;
        let mut iter = 1;
        let mut par = 0.0;
        let mut delta = 0.0;
        let mut xnorm = 0.0;

        problem.residuals(x, &mut self.fvec);
        nfev += 1;
        let mut fnorm = enorm(&self.fvec);

        let status = 'outer: loop {
            if self.stop.is_stopped() {
                break SolveStatus::Stopped;
            }
            if nfev >= max_fev {
                break SolveStatus::MaxEvaluations;
            }

            if problem.provides_jacobian() {
                let mut jac = self.qr.jacobian_mut();
                jac.fill(0.0);
                problem.jacobian(x, &mut jac);
            } else {
                let difference = Difference {
                    scheme: options.difference,
                    epsfcn: options.epsfcn,
                    epsmch,
                    stop: &self.stop,
                };
                let flow = difference.fdjac2(
                    problem,
                    x,
                    &self.fvec,
                    &mut self.qr.jacobian_mut(),
                    &mut self.trial_fvec,
                    &mut self.fd_work,
                );
                match flow {
                    ControlFlow::Continue(count) => nfev += count,
                    ControlFlow::Break(count) => {
                        nfev += count;
                        break SolveStatus::Stopped;
                    }
                }
            }
            njev += 1;

            // A parameter sitting on a bound whose gradient would push it
            // further out is frozen for this iteration.
            for j in 0..n {
                self.lower_peg[j] = x[j] == bounds.lower(j);
                self.upper_peg[j] = x[j] == bounds.upper(j);
                if !self.lower_peg[j] && !self.upper_peg[j] {
                    continue;
                }
                let sum = dot(&self.fvec, self.qr.column(j));
                if (self.lower_peg[j] && sum > 0.0) || (self.upper_peg[j] && sum < 0.0) {
                    self.qr.jacobian_mut().col_mut(j).fill(0.0);
                }
            }

            self.qr.factorize(true, epsmch);

            if iter == 1 {
                if user_scaling.is_none() {
                    for (d, &norm) in self.diag.iter_mut().zip(self.qr.acnorm()) {
                        *d = if norm == 0.0 { 1.0 } else { norm };
                    }
                }
                scale(&mut self.scaled, &self.diag, x);
                xnorm = enorm(&self.scaled);
                delta = options.factor * xnorm;
                if delta == 0.0 {
                    delta = options.factor;
                }
            }

            self.rhs.copy_from_slice(&self.fvec);
            self.qr.transform_rhs(&mut self.rhs, &mut self.qtf);

            // Largest cosine between the residuals and a Jacobian column.
            let mut gnorm: f64 = 0.0;
            if fnorm != 0.0 {
                for j in 0..n {
                    let l = self.qr.ipvt()[j];
                    let norm = self.qr.acnorm()[l];
                    if norm != 0.0 {
                        let mut sum = 0.0;
                        for i in 0..=j {
                            sum += self.qr.r(i, j) * (self.qtf[i] / fnorm);
                        }
                        gnorm = gnorm.max((sum / norm).abs());
                    }
                }
            }
            if gnorm <= options.gtol {
                break SolveStatus::ConvergedGradient;
            }

            if user_scaling.is_none() {
                for (d, &norm) in self.diag.iter_mut().zip(self.qr.acnorm()) {
                    *d = d.max(norm);
                }
            }

            loop {
                par = self
                    .lmpar
                    .solve(&mut self.qr, &self.diag, &self.qtf, delta, par, &mut self.step);

                // Descent direction; pegged parameters may only move inward.
                for j in 0..n {
                    let mut s = -self.step[j];
                    if self.lower_peg[j] {
                        s = s.max(0.0);
                    }
                    if self.upper_peg[j] {
                        s = s.min(0.0);
                    }
                    self.step[j] = s;
                }

                let alpha = clip_factor(x, &self.step, bounds);
                for j in 0..n {
                    self.step[j] *= alpha;
                    self.x_trial[j] =
                        snap_to_bounds(x[j] + self.step[j], bounds.lower(j), bounds.upper(j), epsmch);
                }
                scale(&mut self.scaled, &self.diag, &self.step);
                let pnorm = enorm(&self.scaled);

                if iter == 1 {
                    delta = delta.min(pnorm);
                }

                problem.residuals(&self.x_trial, &mut self.trial_fvec);
                nfev += 1;
                if self.stop.is_stopped() {
                    break 'outer SolveStatus::Stopped;
                }
                let fnorm1 = enorm(&self.trial_fvec);

                let mut actred = -1.0;
                if 0.1 * fnorm1 < fnorm {
                    let r = fnorm1 / fnorm;
                    actred = 1.0 - r * r;
                }

                // Predicted reduction and directional derivative of the linear model.
                self.scaled.fill(0.0);
                for j in 0..n {
                    let temp = self.step[self.qr.ipvt()[j]];
                    for i in 0..=j {
                        self.scaled[i] += self.qr.r(i, j) * temp;
                    }
                }
                let temp1 = enorm(&self.scaled) / fnorm;
                let temp2 = (par.sqrt() * pnorm) / fnorm;
                let prered = temp1 * temp1 + temp2 * temp2 / 0.5;
                let dirder = -(temp1 * temp1 + temp2 * temp2);

                let ratio = if prered != 0.0 { actred / prered } else { 0.0 };

                if ratio <= 0.25 {
                    let mut temp = if actred >= 0.0 {
                        0.5
                    } else {
                        0.5 * dirder / (dirder + 0.5 * actred)
                    };
                    if 0.1 * fnorm1 >= fnorm || temp < 0.1 {
                        temp = 0.1;
                    }
                    delta = temp * delta.min(pnorm / 0.1);
                    par /= temp;
                } else if par == 0.0 || ratio >= 0.75 {
                    delta = pnorm / 0.5;
                    par *= 0.5;
                }

                let accepted = ratio >= 1e-4;
                if let Some(reporter) = reporter.as_mut() {
                    reporter.on_iteration(&IterationReport {
                        iteration: iter,
                        nfev,
                        fnorm,
                        trial_fnorm: fnorm1,
                        ratio,
                        par,
                        delta,
                        pnorm,
                        gnorm,
                        accepted,
                    });
                }

                if accepted {
                    x.copy_from_slice(&self.x_trial);
                    self.fvec.copy_from_slice(&self.trial_fvec);
                    scale(&mut self.scaled, &self.diag, x);
                    xnorm = enorm(&self.scaled);
                    fnorm = fnorm1;
                    iter += 1;
                }

                // An exact fit leaves no relative reduction to make.
                let cost_converged = (actred.abs() <= options.ftol
                    && prered <= options.ftol
                    && 0.5 * ratio <= 1.0)
                    || (accepted && fnorm == 0.0);
                let step_converged = delta <= options.xtol * xnorm;
                match (cost_converged, step_converged) {
                    (true, true) => break 'outer SolveStatus::ConvergedBoth,
                    (true, false) => break 'outer SolveStatus::ConvergedCost,
                    (false, true) => break 'outer SolveStatus::ConvergedStep,
                    (false, false) => {}
                }

                let mut status = None;
                if nfev >= max_fev {
                    status = Some(SolveStatus::MaxEvaluations);
                }
                if actred.abs() <= epsmch && prered <= epsmch && 0.5 * ratio <= 1.0 {
                    status = Some(SolveStatus::CostToleranceTooSmall);
                }
                if delta <= epsmch * xnorm {
                    status = Some(SolveStatus::StepToleranceTooSmall);
                }
                if gnorm <= epsmch {
                    status = Some(SolveStatus::GradientToleranceTooSmall);
                }
                if let Some(status) = status {
                    break 'outer status;
                }

                if accepted {
                    break;
                }
            }
        };

        let stats = SolverStats {
            status,
            iterations: iter - 1,
            nfev,
            njev,
            fnorm,
            minimum: fnorm * fnorm,
            par,
            delta,
        };
        Ok(finish_stats(stats, start_time, &mut reporter))
    }
}

/// Largest `alpha` in `[0, 1]` keeping `x + alpha * step` inside the bounds.
fn clip_factor(x: &[f64], step: &[f64], bounds: Bounds<'_>) -> f64 {
    let mut alpha: f64 = 1.0;
    for (j, (&xj, &sj)) in x.iter().zip(step).enumerate() {
        if sj == 0.0 {
            continue;
        }
        let target = xj + sj;
        let lower = bounds.lower(j);
        let upper = bounds.upper(j);
        if target < lower {
            alpha = alpha.min((lower - xj) / sj);
        } else if target > upper {
            alpha = alpha.min((upper - xj) / sj);
        }
    }
    alpha.max(0.0)
}

/// Clamp into `[lower, upper]`, moving values within relative `epsmch` of a bound onto it.
fn snap_to_bounds(value: f64, lower: f64, upper: f64, epsmch: f64) -> f64 {
    if value >= upper - epsmch * upper.abs() {
        upper
    } else if value <= lower + epsmch * lower.abs() {
        lower
    } else {
        value
    }
}

fn scale(out: &mut [f64], diag: &[f64], v: &[f64]) {
    for (o, (d, x)) in out.iter_mut().zip(diag.iter().zip(v)) {
        *o = d * x;
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    let mut sum = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        sum += x * y;
    }
    sum
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 1.0 {
        format!("{:.3} s", secs)
    } else if secs >= 1e-3 {
        format!("{:.3} ms", secs * 1e3)
    } else if secs >= 1e-6 {
        format!("{:.3} us", secs * 1e6)
    } else {
        format!("{:.0} ns", secs * 1e9)
    }
}

fn finish_stats(
    stats: SolverStats,
    start_time: Option<Instant>,
    reporter: &mut ReporterSlot<'_>,
) -> SolverStats {
    if let Some(reporter) = reporter.as_mut() {
        reporter.on_finish();
    }
    log::debug!(
        "terminated with info {} ({:?}) after {} evaluations, fnorm {:e}",
        stats.status.info(),
        stats.status,
        stats.nfev,
        stats.fnorm
    );
    if let Some(start) = start_time {
        let elapsed = format_duration(start.elapsed());
        emit_line(&format!("time: {elapsed}"));
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Shifted;

    impl Problem for Shifted {
        fn residual_count(&self) -> usize {
            2
        }

        fn residuals(&mut self, x: &[f64], residuals: &mut [f64]) {
            residuals[0] = x[0] - 3.0;
            residuals[1] = x[1] + 2.0;
        }
    }

    #[test]
    fn solves_shifted_identity() {
        let mut solver = LmSolver::new(2, 2).unwrap();
        let mut x = [0.0, 0.0];
        let stats = solver
            .solve(&mut Shifted, &mut x, &SolverOptions::default(), None)
            .unwrap();
        assert!(matches!(
            stats.status,
            SolveStatus::ConvergedCost | SolveStatus::ConvergedStep | SolveStatus::ConvergedBoth
        ));
        assert!((x[0] - 3.0).abs() < 1e-8);
        assert!((x[1] + 2.0).abs() < 1e-8);
    }

    #[test]
    fn rejects_bad_dimensions() {
        assert_eq!(
            LmSolver::new(1, 2).err(),
            Some(SolverError::InvalidDimensions { nrows: 1, ncols: 2 })
        );
        assert!(LmSolver::new(3, 0).is_err());
    }

    #[test]
    fn clip_factor_scales_whole_step() {
        let lower = [0.0, f64::NEG_INFINITY];
        let upper = [2.0, f64::INFINITY];
        let bounds = Bounds::Box {
            lower: &lower,
            upper: &upper,
        };
        let alpha = clip_factor(&[1.0, 0.0], &[4.0, -8.0], bounds);
        assert!((alpha - 0.25).abs() < 1e-15);
        assert_eq!(clip_factor(&[1.0, 0.0], &[0.5, -8.0], bounds), 1.0);
        assert_eq!(clip_factor(&[1.0, 0.0], &[1.0, 1.0], Bounds::Unbounded), 1.0);
    }

    #[test]
    fn snap_moves_near_bound_values_onto_bound() {
        let eps = f64::EPSILON;
        assert_eq!(snap_to_bounds(2.0 - 1e-17, 0.0, 2.0, eps), 2.0);
        assert_eq!(snap_to_bounds(2.5, 0.0, 2.0, eps), 2.0);
        assert_eq!(snap_to_bounds(-1.0, -1.0 + 1e-17, 2.0, eps), -1.0 + 1e-17);
        assert_eq!(snap_to_bounds(1.0, 0.0, 2.0, eps), 1.0);
        assert_eq!(snap_to_bounds(1e300, f64::NEG_INFINITY, f64::INFINITY, eps), 1e300);
    }
}
