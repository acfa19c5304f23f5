use crate::cancel::StopToken;
use crate::params::ParameterSet;
use crate::report::SolverStats;
use crate::solver::{LmSolver, Problem, SolveError, SolverOptions};

/// Fits the free parameters of a [`ParameterSet`] against a [`Problem`].
///
/// This is the stateful front end of [`LmSolver`]: configure it through the
/// setters, call [`Optimizer::optimize`] and read the outcome back through
/// [`Optimizer::best`], [`Optimizer::minimum`] and [`Optimizer::info`].
/// The problem's residual function receives the free parameter values only,
/// in parameter-set order.
pub struct Optimizer<P> {
    problem: P,
    parameters: ParameterSet,
    options: SolverOptions,
    stop: StopToken,
    info: i32,
    stats: Option<SolverStats>,
}

impl<P: Problem> Optimizer<P> {
    pub fn new(problem: P, parameters: ParameterSet) -> Self {
        Self {
            problem,
            parameters,
            options: SolverOptions::default(),
            stop: StopToken::new(),
            info: 0,
            stats: None,
        }
    }

    pub fn with_options(mut self, options: SolverOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    pub fn set_x_tolerance(&mut self, xtol: f64) {
        self.options.xtol = xtol;
    }

    pub fn set_f_tolerance(&mut self, ftol: f64) {
        self.options.ftol = ftol;
    }

    pub fn set_g_tolerance(&mut self, gtol: f64) {
        self.options.gtol = gtol;
    }

    pub fn set_max_evaluations(&mut self, max_fev: usize) {
        self.options.max_fev = Some(max_fev);
    }

    pub fn set_factor(&mut self, factor: f64) {
        self.options.factor = factor;
    }

    /// Relative error in the residuals, sets the finite-difference step.
    pub fn set_epsfcn(&mut self, epsfcn: f64) {
        self.options.epsfcn = epsfcn;
    }

    /// Use fixed per-parameter scaling instead of Jacobian column norms.
    pub fn set_scaling(&mut self, scaling: Vec<f64>) -> Result<(), SolveError> {
        let expected = self.parameters.free_count();
        if scaling.len() != expected {
            return Err(SolveError::ScalingLength {
                expected,
                actual: scaling.len(),
            });
        }
        self.options.scaling = Some(scaling);
        Ok(())
    }

    pub fn unset_scaling(&mut self) {
        self.options.scaling = None;
    }

    /// Request a cooperative stop, honoured at the next residual evaluation.
    ///
    /// The request stays in force: every later [`Optimizer::optimize`] ends
    /// with info 9 after its first evaluation until [`Optimizer::reset_stop`].
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Clear a stop request so the next [`Optimizer::optimize`] runs normally.
    pub fn reset_stop(&self) {
        self.stop.reset();
    }

    /// Token for stopping a running [`Optimizer::optimize`] from elsewhere.
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// Run the solve to termination and write the result into the parameter set.
    ///
    /// On improper input the parameters are left untouched and [`Optimizer::info`]
    /// reports 0.
    pub fn optimize(&mut self) -> Result<SolverStats, SolveError> {
        let result = self.run();
        match &result {
            Ok(stats) => {
                self.info = stats.status.info();
                self.stats = Some(stats.clone());
            }
            Err(err) => {
                self.info = err.info();
                self.stats = None;
            }
        }
        result
    }

    fn run(&mut self) -> Result<SolverStats, SolveError> {
        let n = self.parameters.free_count();
        let m = self.problem.residual_count();
        let mut solver = LmSolver::new(m, n)?.with_stop_token(self.stop.clone());

        let mut x = self.parameters.free_values();
        let lower = self.parameters.free_lower_bounds();
        let upper = self.parameters.free_upper_bounds();
        let stats = solver.solve_bounded(&mut self.problem, &mut x, &lower, &upper, &self.options, None)?;
        self.parameters.set_free_values(&x)?;
        Ok(stats)
    }

    /// Free parameter values, in free-parameter order.
    pub fn best(&self) -> Vec<f64> {
        self.parameters.free_values()
    }

    /// Sum of squared residuals at the current parameters.
    pub fn minimum(&mut self) -> f64 {
        let x = self.parameters.free_values();
        let mut residuals = vec![0.0; self.problem.residual_count()];
        self.problem.residuals(&x, &mut residuals);
        residuals.iter().map(|r| r * r).sum()
    }

    /// Status code of the last [`Optimizer::optimize`] call.
    pub fn info(&self) -> i32 {
        self.info
    }

    pub fn stats(&self) -> Option<&SolverStats> {
        self.stats.as_ref()
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    pub fn problem(&self) -> &P {
        &self.problem
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.free_count()
    }

    pub fn observation_count(&self) -> usize {
        self.problem.residual_count()
    }

    pub fn into_parts(self) -> (P, ParameterSet) {
        (self.problem, self.parameters)
    }
}
