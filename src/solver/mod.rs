pub mod boundary;
pub mod equation;
pub mod error;
pub mod field;
pub mod fvm;
pub mod hydrostatic;
pub mod linear_solver;
pub mod mass_flux_prediction;
pub mod mesh;
pub mod options;
pub mod parallel;
pub mod piso;
pub mod pressure_correction;
pub mod source_terms;
pub mod turbomachinery;
pub mod velocity_prediction;
pub mod velocity_update;

pub use boundary::{BoundaryConditions, PressureCondition, VelocityCondition, ZoneCondition};
pub use error::{SolverError, SolverResult};
pub use field::FlowFields;
pub use options::{HydrostaticMode, NavierStokesConfig, VelocityReconstruction};
pub use parallel::{Backend, DispatchContext};
pub use piso::{IterationReport, PisoSolver, StepReport};
pub use pressure_correction::{PressureCorrection, RhieChowCorrection};
pub use source_terms::SourceTerms;
