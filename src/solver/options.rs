//! Parameter records for the velocity-pressure coupling.
//!
//! Field names are descriptive; the historical short knob names are
//! accepted as serde aliases so existing setup files keep working.

use crate::solver::error::{SolverError, SolverResult};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// How gravity is balanced against the pressure gradient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HydrostaticMode {
    #[default]
    Off,
    /// External forces partially balanced by the pressure gradient (`iphydr = 1`).
    ExternalForces,
    /// A-priori hydrostatic pressure solve (`iphydr = 2`).
    Predictor,
}

/// Final velocity reconstruction after the pressure correction (`irevmc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VelocityReconstruction {
    #[default]
    PressureGradient,
    /// Lowest-order Raviart-Thomas reconstruction from face fluxes.
    FaceFluxRt0,
}

/// Interpolation of a cell coefficient to faces (`imvisf`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FaceMean {
    #[default]
    Arithmetic,
    Harmonic,
}

/// Diffusion operator shape (`idften`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DiffusionKind {
    #[default]
    Isotropic,
    Anisotropic,
}

/// Density variation model (`idilat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Dilatation {
    /// Constant density with a linearised buoyancy term.
    Boussinesq,
    /// Density may vary, but the continuity equation ignores it.
    #[default]
    Standard,
    /// Unsteady dilatation term in the continuity equation.
    Dilatable,
    /// Low-Mach algorithm.
    LowMach,
}

impl Dilatation {
    pub fn index(self) -> u8 {
        match self {
            Dilatation::Boussinesq => 0,
            Dilatation::Standard => 1,
            Dilatation::Dilatable => 2,
            Dilatation::LowMach => 3,
        }
    }

    pub fn is_dilatable(self) -> bool {
        self.index() > 1
    }
}

/// Which flow model drives density handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlowRegime {
    #[default]
    Incompressible,
    /// Volume-of-fluid mixture.
    Vof,
    /// Density-based compressible algorithm; density comes from the previous level.
    Compressible,
    /// Compressible homogeneous two-phase model solved with the incompressible corrector.
    CompressibleHomogeneous,
}

impl FlowRegime {
    pub fn is_compressible(self) -> bool {
        matches!(self, FlowRegime::Compressible | FlowRegime::CompressibleHomogeneous)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityPressureParams {
    #[serde(alias = "nterup")]
    pub n_inner_iterations: usize,
    #[serde(alias = "epsup")]
    pub inner_tolerance: f64,
    #[serde(alias = "iphydr")]
    pub hydrostatic: HydrostaticMode,
    #[serde(alias = "iprco")]
    pub pressure_correction: bool,
    #[serde(alias = "irevmc")]
    pub reconstruction: VelocityReconstruction,
    /// Rhie-Chow with the inverse momentum tensor instead of `dt` (`rcfact`).
    #[serde(alias = "rcfact")]
    pub rhie_chow_tensor: bool,
    /// Reinforced velocity-pressure coupling through a tensorial time step (`ipucou`).
    #[serde(alias = "ipucou")]
    pub coupled_time_step: bool,
    #[serde(alias = "ipredfl")]
    pub predict_mass_flux: bool,
    /// Density collocated with velocity in time (`itpcol`).
    #[serde(alias = "itpcol")]
    pub collocated_density: bool,
    #[serde(alias = "igpust")]
    pub user_sources_in_pressure: bool,
    #[serde(alias = "igprij")]
    pub reynolds_stress_in_pressure: bool,
    #[serde(alias = "arak")]
    pub rhie_chow_factor: f64,
    pub estimators: EstimatorFlags,
    #[serde(alias = "iforbr")]
    pub boundary_forces: bool,
}

impl Default for VelocityPressureParams {
    fn default() -> Self {
        Self {
            n_inner_iterations: 1,
            inner_tolerance: 1e-5,
            hydrostatic: HydrostaticMode::Off,
            pressure_correction: true,
            reconstruction: VelocityReconstruction::PressureGradient,
            rhie_chow_tensor: false,
            coupled_time_step: false,
            predict_mass_flux: true,
            collocated_density: false,
            user_sources_in_pressure: false,
            reynolds_stress_in_pressure: false,
            rhie_chow_factor: 1.0,
            estimators: EstimatorFlags::default(),
            boundary_forces: false,
        }
    }
}

/// Error estimators computed during a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorFlags {
    pub prediction: bool,
    pub correction: bool,
    pub total: bool,
}

impl EstimatorFlags {
    pub fn all() -> Self {
        Self {
            prediction: true,
            correction: true,
            total: true,
        }
    }
}

/// Per-equation numerical options handed to the linear-equation solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EquationParams {
    pub name: String,
    /// Unsteady term enabled.
    #[serde(alias = "istat")]
    pub unsteady: bool,
    #[serde(alias = "iconv")]
    pub convection: bool,
    #[serde(alias = "idiff")]
    pub diffusion: bool,
    /// Include the turbulent viscosity in the face diffusivity.
    #[serde(alias = "idifft")]
    pub turbulent_diffusion: bool,
    #[serde(alias = "idften")]
    pub diffusion_kind: DiffusionKind,
    #[serde(alias = "imvisf")]
    pub face_mean: FaceMean,
    /// Maximum reconstruction sweeps; a negative value asks for a single
    /// non-reconstructed balance evaluation.
    #[serde(alias = "nswrsm")]
    pub n_sweeps: i32,
    /// Relative tolerance of the linear solver.
    #[serde(alias = "epsilo")]
    pub solver_tolerance: f64,
    /// Relative tolerance of the sweep loop.
    #[serde(alias = "epsrsm")]
    pub sweep_tolerance: f64,
    /// Gradient reconstruction sweeps.
    #[serde(alias = "nswrgr")]
    pub gradient_sweeps: usize,
    #[serde(alias = "epsrgr")]
    pub gradient_tolerance: f64,
    /// Time-blending factor of the convection/diffusion operator.
    pub theta: f64,
    #[serde(alias = "relaxv")]
    pub relaxation: f64,
    /// Reconstruct face values in the balance (`ircflu`).
    #[serde(alias = "ircflu")]
    pub flux_reconstruction: bool,
    pub max_linear_iterations: usize,
}

impl Default for EquationParams {
    fn default() -> Self {
        Self {
            name: String::from("Variable"),
            unsteady: true,
            convection: true,
            diffusion: true,
            turbulent_diffusion: true,
            diffusion_kind: DiffusionKind::Isotropic,
            face_mean: FaceMean::Arithmetic,
            n_sweeps: 1,
            solver_tolerance: 1e-8,
            sweep_tolerance: 1e-7,
            gradient_sweeps: 1,
            gradient_tolerance: 1e-5,
            theta: 1.0,
            relaxation: 1.0,
            flux_reconstruction: true,
            max_linear_iterations: 1000,
        }
    }
}

impl EquationParams {
    pub fn velocity() -> Self {
        Self {
            name: String::from("Velocity"),
            ..Self::default()
        }
    }

    pub fn pressure() -> Self {
        Self {
            name: String::from("Pressure"),
            unsteady: false,
            convection: false,
            n_sweeps: 2,
            ..Self::default()
        }
    }

    /// Balance-only mode used by the total estimator.
    pub fn balance_only(&self) -> Self {
        Self {
            unsteady: false,
            n_sweeps: -1,
            ..self.clone()
        }
    }
}

/// Time scheme (`time_order`, `isno2t`, `thetsn`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeScheme {
    pub time_order: u8,
    /// Extrapolate explicit source terms in time.
    #[serde(alias = "isno2t")]
    pub extrapolate_sources: bool,
    /// Weight of the extrapolated sources.
    #[serde(alias = "thetsn")]
    pub source_theta: f64,
}

impl Default for TimeScheme {
    fn default() -> Self {
        Self {
            time_order: 1,
            extrapolate_sources: false,
            source_theta: 0.0,
        }
    }
}

impl TimeScheme {
    pub fn second_order() -> Self {
        Self {
            time_order: 2,
            extrapolate_sources: true,
            source_theta: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FluidProperties {
    pub ro0: f64,
    pub p0: f64,
    pub pred0: f64,
    pub xyzp0: Vector3<f64>,
    pub t0: f64,
    /// Thermal expansion coefficient for the Boussinesq term.
    pub beta: f64,
    #[serde(alias = "irovar")]
    pub variable_density: bool,
    #[serde(alias = "idilat")]
    pub dilatation: Dilatation,
    pub regime: FlowRegime,
}

impl Default for FluidProperties {
    fn default() -> Self {
        Self {
            ro0: 1.0,
            p0: 101_325.0,
            pred0: 0.0,
            xyzp0: Vector3::zeros(),
            t0: 293.15,
            beta: 0.0,
            variable_density: false,
            dilatation: Dilatation::Standard,
            regime: FlowRegime::Incompressible,
        }
    }
}

impl FluidProperties {
    /// Density is tracked through the dedicated mass-coherent field.
    pub fn uses_mass_density(&self) -> bool {
        self.variable_density
            && (self.dilatation.is_dilatable()
                || self.regime == FlowRegime::Vof
                || self.regime == FlowRegime::CompressibleHomogeneous)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalConstants {
    pub gravity: Vector3<f64>,
}

impl Default for PhysicalConstants {
    fn default() -> Self {
        Self {
            gravity: Vector3::zeros(),
        }
    }
}

/// Full configuration of the coupled solve.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NavierStokesConfig {
    pub velocity_pressure: VelocityPressureParams,
    pub velocity: EquationParams,
    pub pressure: EquationParams,
    pub time_scheme: TimeScheme,
    pub fluid: FluidProperties,
    pub constants: PhysicalConstants,
}

impl NavierStokesConfig {
    pub fn new() -> Self {
        Self {
            velocity: EquationParams::velocity(),
            pressure: EquationParams::pressure(),
            ..Self::default()
        }
    }

    /// Single predictor-corrector pass per step.
    pub fn steady_piso() -> Self {
        Self::new()
    }

    /// `n` velocity-pressure inner iterations with tolerance `eps`.
    pub fn inner_iterations(n: usize, eps: f64) -> Self {
        let mut config = Self::new();
        config.velocity_pressure.n_inner_iterations = n;
        config.velocity_pressure.inner_tolerance = eps;
        config
    }

    pub fn with_gravity(mut self, gravity: Vector3<f64>) -> Self {
        self.constants.gravity = gravity;
        self
    }

    pub fn validate(&self) -> SolverResult<()> {
        let vp = &self.velocity_pressure;
        if vp.n_inner_iterations == 0 {
            return Err(SolverError::configuration(
                "velocity-pressure",
                "at least one inner iteration is required",
            ));
        }
        if vp.n_inner_iterations > 1 && !(vp.inner_tolerance > 0.0) {
            return Err(SolverError::configuration(
                "velocity-pressure",
                format!("inner tolerance must be positive, got {}", vp.inner_tolerance),
            ));
        }
        if vp.rhie_chow_tensor && vp.coupled_time_step {
            return Err(SolverError::configuration(
                "velocity-pressure",
                "tensorial Rhie-Chow and reinforced coupling are mutually exclusive",
            ));
        }
        if vp.reconstruction == VelocityReconstruction::FaceFluxRt0
            && vp.hydrostatic == HydrostaticMode::ExternalForces
        {
            return Err(SolverError::configuration(
                "velocity update",
                "face-flux reconstruction cannot carry partially balanced external forces",
            ));
        }
        if self.fluid.regime == FlowRegime::Compressible && vp.pressure_correction {
            return Err(SolverError::configuration(
                "pressure correction",
                "the density-based compressible algorithm has its own mass balance solve",
            ));
        }
        for eq in [&self.velocity, &self.pressure] {
            if !(eq.theta > 0.0 && eq.theta <= 1.0) {
                return Err(SolverError::configuration(
                    "equation parameters",
                    format!("{}: theta must lie in (0, 1], got {}", eq.name, eq.theta),
                ));
            }
            if !(eq.relaxation > 0.0 && eq.relaxation <= 1.0) {
                return Err(SolverError::configuration(
                    "equation parameters",
                    format!("{}: relaxation must lie in (0, 1], got {}", eq.name, eq.relaxation),
                ));
            }
        }
        if self.time_scheme.time_order == 0 || self.time_scheme.time_order > 2 {
            return Err(SolverError::configuration(
                "time scheme",
                format!("unsupported time order {}", self.time_scheme.time_order),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        NavierStokesConfig::new().validate().unwrap();
        NavierStokesConfig::inner_iterations(10, 1e-4).validate().unwrap();
    }

    #[test]
    fn zero_inner_iterations_is_fatal() {
        let config = NavierStokesConfig::inner_iterations(0, 1e-4);
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal_configuration());
    }

    #[test]
    fn short_knob_names_are_accepted() {
        let json = r#"{"nterup": 4, "epsup": 1e-3, "iphydr": "ExternalForces", "irevmc": "FaceFluxRt0"}"#;
        let vp: VelocityPressureParams = serde_json::from_str(json).unwrap();
        assert_eq!(vp.n_inner_iterations, 4);
        assert_eq!(vp.inner_tolerance, 1e-3);
        assert_eq!(vp.hydrostatic, HydrostaticMode::ExternalForces);
        assert_eq!(vp.reconstruction, VelocityReconstruction::FaceFluxRt0);
        assert!(vp.pressure_correction);
    }

    #[test]
    fn balance_only_disables_sweeps_and_unsteady_term() {
        let eq = EquationParams::velocity().balance_only();
        assert_eq!(eq.n_sweeps, -1);
        assert!(!eq.unsteady);
        assert_eq!(eq.name, "Velocity");
    }

    #[test]
    fn dilatation_index_matches_model_order() {
        assert_eq!(Dilatation::Boussinesq.index(), 0);
        assert!(!Dilatation::Standard.is_dilatable());
        assert!(Dilatation::LowMach.is_dilatable());
    }
}
