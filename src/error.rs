use crate::solver::Solution;

/// Why a solve did not converge.
#[derive(Debug, thiserror::Error)]
pub enum OptimError {
    #[error(
        "The line search failed to find a suitable step and the loss stopped decreasing. The best solution found is returned."
    )]
    LineSearchFailed {
        /// The iterate at which the solver gave up.
        last_solution: Box<Solution>,
    },
    #[error(
        "Maximum number of iterations reached without converging. The last solution found is returned."
    )]
    MaxIterationsReached {
        /// The last iterate before the iteration limit was reached.
        last_solution: Box<Solution>,
    },
    #[error("The loss or gradient norm became NaN or infinite, indicating numerical instability.")]
    NumericalError {
        /// The iterate at which a non-finite value appeared.
        last_solution: Box<Solution>,
    },
    #[error("Invalid option `{name}`: {reason}")]
    InvalidOption { name: &'static str, reason: String },
}

impl OptimError {
    /// The solution carried by a failed solve, if there is one.
    pub fn last_solution(&self) -> Option<&Solution> {
        match self {
            OptimError::LineSearchFailed { last_solution }
            | OptimError::MaxIterationsReached { last_solution }
            | OptimError::NumericalError { last_solution } => Some(last_solution),
            OptimError::InvalidOption { .. } => None,
        }
    }
}
