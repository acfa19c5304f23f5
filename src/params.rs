use core::fmt;

/// A single model parameter with box bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub value: f64,
    pub fixed: bool,
    pub lower: f64,
    pub upper: f64,
}

impl Parameter {
    /// Free, unbounded parameter.
    pub fn free(value: f64) -> Self {
        Self {
            value,
            fixed: false,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }
    }

    /// Free parameter restricted to `[lower, upper]`.
    pub fn bounded(value: f64, lower: f64, upper: f64) -> Self {
        Self {
            value,
            fixed: false,
            lower,
            upper,
        }
    }

    /// Parameter held at `value` and excluded from the solve.
    pub fn fixed(value: f64) -> Self {
        Self {
            value,
            fixed: true,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }
}

/// Validation errors for a [`ParameterSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterError {
    /// A value or bound is NaN.
    NotANumber { index: usize },
    /// The lower bound exceeds the upper bound.
    EmptyBounds { index: usize, lower: f64, upper: f64 },
    /// A free parameter starts outside its bounds.
    OutOfBounds {
        index: usize,
        value: f64,
        lower: f64,
        upper: f64,
    },
    /// A free-parameter vector has the wrong length.
    LengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for ParameterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotANumber { index } => write!(f, "parameter {index} has a NaN value or bound"),
            Self::EmptyBounds {
                index,
                lower,
                upper,
            } => {
                write!(f, "parameter {index} has lower bound {lower} above upper bound {upper}")
            }
            Self::OutOfBounds {
                index,
                value,
                lower,
                upper,
            } => {
                write!(f, "parameter {index} value {value} lies outside [{lower}, {upper}]")
            }
            Self::LengthMismatch { expected, actual } => {
                write!(f, "free parameter vector length {actual} does not match expected {expected}")
            }
        }
    }
}

impl std::error::Error for ParameterError {}

/// Ordered parameters of a model, only the free ones take part in a solve.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    params: Vec<Parameter>,
}

impl ParameterSet {
    /// Validates every parameter.
    ///
    /// Requirements:
    /// - no value or bound is NaN
    /// - `lower <= upper`
    /// - free parameters satisfy `lower <= value <= upper`
    pub fn new(params: Vec<Parameter>) -> Result<Self, ParameterError> {
        for (index, p) in params.iter().enumerate() {
            check_parameter(index, p)?;
        }
        Ok(Self { params })
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Parameter> {
        self.params.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    /// Number of parameters that are not fixed.
    pub fn free_count(&self) -> usize {
        self.params.iter().filter(|p| !p.fixed).count()
    }

    /// Current values of the free parameters, in order.
    pub fn free_values(&self) -> Vec<f64> {
        self.free().map(|p| p.value).collect()
    }

    pub fn free_lower_bounds(&self) -> Vec<f64> {
        self.free().map(|p| p.lower).collect()
    }

    pub fn free_upper_bounds(&self) -> Vec<f64> {
        self.free().map(|p| p.upper).collect()
    }

    /// Write back solved free values; fixed parameters are left untouched.
    pub fn set_free_values(&mut self, values: &[f64]) -> Result<(), ParameterError> {
        let expected = self.free_count();
        if values.len() != expected {
            return Err(ParameterError::LengthMismatch {
                expected,
                actual: values.len(),
            });
        }
        for (p, &v) in self.params.iter_mut().filter(|p| !p.fixed).zip(values) {
            p.value = v;
        }
        Ok(())
    }

    /// Full parameter vector with `free` substituted for the free entries.
    pub fn expand(&self, free: &[f64], out: &mut [f64]) {
        let mut free = free.iter();
        for (slot, p) in out.iter_mut().zip(&self.params) {
            *slot = if p.fixed {
                p.value
            } else {
                free.next().copied().unwrap_or(p.value)
            };
        }
    }

    fn free(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter().filter(|p| !p.fixed)
    }
}

fn check_parameter(index: usize, p: &Parameter) -> Result<(), ParameterError> {
    if p.value.is_nan() || p.lower.is_nan() || p.upper.is_nan() {
        return Err(ParameterError::NotANumber { index });
    }
    if p.lower > p.upper {
        return Err(ParameterError::EmptyBounds {
            index,
            lower: p.lower,
            upper: p.upper,
        });
    }
    if !p.fixed && (p.value < p.lower || p.value > p.upper) {
        return Err(ParameterError::OutOfBounds {
            index,
            value: p.value,
            lower: p.lower,
            upper: p.upper,
        });
    }
    Ok(())
}
