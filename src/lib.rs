//! Velocity-pressure coupling core for a collocated finite-volume
//! Navier-Stokes solver on polyhedral meshes.
//!
//! [`solver::PisoSolver`] drives one SIMPLE/PISO time step: velocity
//! prediction, an optional hydrostatic pre-solve, Rhie-Chow pressure
//! correction and the velocity/flux update, repeated as outer fixed-point
//! iterations until the velocity increment falls below tolerance.

pub mod solver;
pub mod trace;
