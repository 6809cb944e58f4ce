//! Error taxonomy of the coupling core.
//!
//! Soft non-convergence (sweep budget exhausted, inner fixed point not
//! reached) is never an error: it is logged with `log::warn!` and the step
//! continues. Everything in this enum aborts the current step.

use thiserror::Error;

pub type SolverResult<T> = Result<T, SolverError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    /// An option combination that cannot be discretised correctly.
    #[error("configuration error in {component}: {details}")]
    ConfigurationFatal {
        component: &'static str,
        details: String,
    },

    /// The linear back end broke down or diverged.
    #[error(
        "{solver} breakdown on system '{system}' (preconditioner {preconditioner}) \
         at iteration {iteration}, residual {residual:.3e}"
    )]
    SolverBreakdown {
        solver: &'static str,
        preconditioner: &'static str,
        system: String,
        iteration: usize,
        residual: f64,
    },

    /// A persistent buffer could not follow a topology change.
    #[error("failed to resize '{buffer}' to {required} entries (has {actual})")]
    ResizeFailed {
        buffer: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("{what}: expected {expected} entries, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("volume zone '{0}' not found")]
    ZoneNotFound(String),
}

impl SolverError {
    pub fn configuration(component: &'static str, details: impl Into<String>) -> Self {
        Self::ConfigurationFatal {
            component,
            details: details.into(),
        }
    }

    pub fn breakdown(
        solver: &'static str,
        preconditioner: &'static str,
        system: impl Into<String>,
        iteration: usize,
        residual: f64,
    ) -> Self {
        Self::SolverBreakdown {
            solver,
            preconditioner,
            system: system.into(),
            iteration,
            residual,
        }
    }

    pub fn dimension(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            what,
            expected,
            actual,
        }
    }

    /// Returns `Err(DimensionMismatch)` unless `actual == expected`.
    pub fn check_len(what: &'static str, expected: usize, actual: usize) -> SolverResult<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::dimension(what, expected, actual))
        }
    }

    pub fn is_fatal_configuration(&self) -> bool {
        matches!(self, Self::ConfigurationFatal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakdown_message_names_solver_and_system() {
        let err = SolverError::breakdown("BiCGStab", "jacobi", "Velocity", 12, 3.5e11);
        let msg = err.to_string();
        assert!(msg.contains("BiCGStab"));
        assert!(msg.contains("'Velocity'"));
        assert!(msg.contains("iteration 12"));
    }

    #[test]
    fn check_len_accepts_matching_sizes() {
        assert!(SolverError::check_len("dt", 4, 4).is_ok());
        let err = SolverError::check_len("dt", 4, 3).unwrap_err();
        assert_eq!(err, SolverError::dimension("dt", 4, 3));
    }
}
