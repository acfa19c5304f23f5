use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets};

/// Why a solve terminated.
///
/// [`SolveStatus::info`] gives the MINPACK-compatible status code. Code 0
/// (improper input) is reported as an error instead, see
/// [`crate::SolveError::info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Relative reduction in the sum of squares is at most `ftol`.
    ConvergedCost,
    /// Relative error between two consecutive iterates is at most `xtol`.
    ConvergedStep,
    /// Both `ConvergedCost` and `ConvergedStep` hold.
    ConvergedBoth,
    /// Residuals are orthogonal to the Jacobian columns within `gtol`.
    ConvergedGradient,
    /// The residual evaluation budget is used up.
    MaxEvaluations,
    /// `ftol` is too small; no further reduction in the sum of squares is possible.
    CostToleranceTooSmall,
    /// `xtol` is too small; no further improvement in x is possible.
    StepToleranceTooSmall,
    /// `gtol` is too small; the gradient is at the noise floor.
    GradientToleranceTooSmall,
    /// A stop was requested through the [`crate::StopToken`].
    Stopped,
}

impl SolveStatus {
    pub fn info(self) -> i32 {
        match self {
            Self::ConvergedCost => 1,
            Self::ConvergedStep => 2,
            Self::ConvergedBoth => 3,
            Self::ConvergedGradient => 4,
            Self::MaxEvaluations => 5,
            Self::CostToleranceTooSmall => 6,
            Self::StepToleranceTooSmall => 7,
            Self::GradientToleranceTooSmall => 8,
            Self::Stopped => 9,
        }
    }

    /// Inverse of [`SolveStatus::info`]; `None` for 0 and unknown codes.
    pub fn from_info(info: i32) -> Option<Self> {
        Some(match info {
            1 => Self::ConvergedCost,
            2 => Self::ConvergedStep,
            3 => Self::ConvergedBoth,
            4 => Self::ConvergedGradient,
            5 => Self::MaxEvaluations,
            6 => Self::CostToleranceTooSmall,
            7 => Self::StepToleranceTooSmall,
            8 => Self::GradientToleranceTooSmall,
            9 => Self::Stopped,
            _ => return None,
        })
    }

    /// True for codes 1 through 4.
    pub fn is_converged(self) -> bool {
        matches!(
            self,
            Self::ConvergedCost | Self::ConvergedStep | Self::ConvergedBoth | Self::ConvergedGradient
        )
    }
}

#[derive(Debug, Clone)]
pub struct SolverStats {
    pub status: SolveStatus,
    /// Accepted steps taken.
    pub iterations: usize,
    /// Residual evaluations, including finite-difference ones.
    pub nfev: usize,
    /// Jacobian computations.
    pub njev: usize,
    /// Euclidean norm of the residuals at the returned parameters.
    pub fnorm: f64,
    /// Sum of squared residuals at the returned parameters.
    pub minimum: f64,
    pub par: f64,
    pub delta: f64,
}

#[derive(Debug, Clone)]
pub struct IterationReport {
    pub iteration: usize,
    pub nfev: usize,
    pub fnorm: f64,
    pub trial_fnorm: f64,
    pub ratio: f64,
    pub par: f64,
    pub delta: f64,
    pub pnorm: f64,
    pub gnorm: f64,
    pub accepted: bool,
}

pub(crate) fn emit_line(line: &str) {
    if log::log_enabled!(log::Level::Info) {
        log::info!("{line}");
    } else {
        println!("{line}");
    }
}

/// Receives one report per trial step.
pub trait Reporter {
    fn on_iteration(&mut self, report: &IterationReport);
    fn on_finish(&mut self) {}
}

/// Collects trial steps and prints them as a table when the solve ends.
pub struct StdoutReporter {
    rows: Vec<IterationReport>,
}

impl StdoutReporter {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }
}

impl Default for StdoutReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for StdoutReporter {
    fn on_iteration(&mut self, report: &IterationReport) {
        self.rows.push(report.clone());
    }

    fn on_finish(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        if !log::log_enabled!(log::Level::Info) {
            println!();
        }
        let mut table = Table::new();
        table.load_preset(presets::UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("iter").set_alignment(CellAlignment::Right),
            Cell::new("nfev").set_alignment(CellAlignment::Right),
            Cell::new("fnorm").set_alignment(CellAlignment::Right),
            Cell::new("trial").set_alignment(CellAlignment::Right),
            Cell::new("ratio").set_alignment(CellAlignment::Right),
            Cell::new("par").set_alignment(CellAlignment::Right),
            Cell::new("delta").set_alignment(CellAlignment::Right),
            Cell::new("pnorm").set_alignment(CellAlignment::Right),
            Cell::new("gnorm").set_alignment(CellAlignment::Right),
            Cell::new("accepted"),
        ]);
        for row in &self.rows {
            table.add_row(vec![
                Cell::new(row.iteration).set_alignment(CellAlignment::Right),
                Cell::new(row.nfev).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.4e}", row.fnorm)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.4e}", row.trial_fnorm)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.3}", row.ratio)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.1e}", row.par)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.1e}", row.delta)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.1e}", row.pnorm)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.1e}", row.gnorm)).set_alignment(CellAlignment::Right),
                Cell::new(if row.accepted { "yes" } else { "no" }),
            ]);
        }

        for line in table.to_string().lines() {
            emit_line(line);
        }
        self.rows.clear();
    }
}
