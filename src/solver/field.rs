//! Physical fields with their time levels, and the per-call density views.

use crate::solver::boundary::{ScalarBc, VectorBc};
use crate::solver::error::{SolverError, SolverResult};
use crate::solver::mesh::Mesh;
use crate::solver::options::{FlowRegime, NavierStokesConfig};
use nalgebra::{Matrix3, Vector3};
use std::borrow::Cow;

/// Cell or face values with the previous time-step values.
#[derive(Clone, Debug)]
pub struct Field<T> {
    pub name: &'static str,
    pub val: Vec<T>,
    pub val_pre: Vec<T>,
    /// Second previous level, kept only for fields that need it (density).
    pub val_pre2: Option<Vec<T>>,
}

impl<T: Copy> Field<T> {
    pub fn new(name: &'static str, n: usize, init: T) -> Self {
        Self {
            name,
            val: vec![init; n],
            val_pre: vec![init; n],
            val_pre2: None,
        }
    }

    pub fn with_two_previous_levels(mut self) -> Self {
        self.val_pre2 = Some(self.val_pre.clone());
        self
    }

    pub fn len(&self) -> usize {
        self.val.len()
    }

    pub fn is_empty(&self) -> bool {
        self.val.is_empty()
    }

    pub fn fill(&mut self, value: T) {
        self.val.iter_mut().for_each(|v| *v = value);
        self.val_pre.iter_mut().for_each(|v| *v = value);
        if let Some(pre2) = &mut self.val_pre2 {
            pre2.iter_mut().for_each(|v| *v = value);
        }
    }

    /// `pre2 <- pre`, `pre <- val`.
    pub fn shift_time_levels(&mut self) {
        if let Some(pre2) = &mut self.val_pre2 {
            pre2.copy_from_slice(&self.val_pre);
        }
        self.val_pre.copy_from_slice(&self.val);
    }

    /// Second previous level, or the previous one when not tracked.
    pub fn before_previous(&self) -> &[T] {
        self.val_pre2.as_deref().unwrap_or(&self.val_pre)
    }

    /// Resizes every level; new entries take `fill`.
    pub fn resize(&mut self, n: usize, fill: T) {
        self.val.resize(n, fill);
        self.val_pre.resize(n, fill);
        if let Some(pre2) = &mut self.val_pre2 {
            pre2.resize(n, fill);
        }
    }
}

pub type ScalarField = Field<f64>;
pub type VectorField = Field<Vector3<f64>>;

/// Turbulent kinetic energy supplied by a turbulence model.
#[derive(Clone, Debug)]
pub struct TurbulentEnergy {
    pub k: Vec<f64>,
    pub bc: ScalarBc,
}

/// Face diffusion bounds of a Rusanov-stabilised Reynolds-stress model.
#[derive(Clone, Debug)]
pub struct RusanovDiffusion {
    pub interior: Vec<f64>,
    pub boundary: Vec<f64>,
}

/// Per-cell error estimators, each allocated on demand.
#[derive(Clone, Debug, Default)]
pub struct Estimators {
    pub prediction: Option<Vec<f64>>,
    pub correction: Option<Vec<f64>>,
    pub total: Option<Vec<f64>>,
}

/// Everything the coupling reads and writes across a time step.
#[derive(Clone, Debug)]
pub struct FlowFields {
    pub velocity: VectorField,
    pub velocity_bc: VectorBc,
    pub pressure: ScalarField,
    pub pressure_bc: ScalarBc,
    /// Last pressure increment, consumed by the velocity update.
    pub pressure_increment: Vec<f64>,
    pub pressure_increment_bc: ScalarBc,

    /// Cell density at `n+1`, `n`, `n-1`.
    pub density: ScalarField,
    pub b_density: ScalarField,
    /// Mass-coherent density used by dilatable and VOF models.
    pub density_mass: Vec<f64>,

    pub viscosity: Vec<f64>,
    pub turbulent_viscosity: Vec<f64>,

    pub i_mass_flux: ScalarField,
    pub b_mass_flux: ScalarField,

    pub total_pressure: Vec<f64>,
    pub temperature: Option<Vec<f64>>,
    pub turbulent_energy: Option<TurbulentEnergy>,
    /// Divergence of the Reynolds-stress tensor `div(rho R)` when a
    /// second-moment closure is active.
    pub reynolds_stress_divergence: Option<Vec<Vector3<f64>>>,
    /// Boundary flux of the Reynolds stresses, added to `boundary_forces`.
    pub reynolds_stress_boundary_flux: Option<Vec<Vector3<f64>>>,

    /// Minimum face diffusion imposed on the velocity operator.
    pub rusanov: Option<RusanovDiffusion>,
    /// Cell tensor scaling the viscosity for anisotropic diffusion
    /// (tensorial porosity); identity when absent.
    pub diffusion_tensor: Option<Vec<Matrix3<f64>>>,

    /// Per-cell time step.
    pub dt: Vec<f64>,
    /// External forces balanced by the pressure gradient (`frcxt`).
    pub volume_forces: Vec<Vector3<f64>>,
    /// Extrapolated explicit momentum sources (`c_st`), persistent across steps.
    pub extrapolated_sources: Vec<Vector3<f64>>,
    /// Inverse momentum operator for the tensorial Rhie-Chow (`da_uu`).
    pub da_uu: Vec<Matrix3<f64>>,
    /// Tensorial time step for the reinforced coupling (`dttens`).
    pub dttens: Vec<Matrix3<f64>>,
    /// A-priori hydrostatic pressure and its gradient.
    pub hydrostatic_pressure: Vec<f64>,
    pub hydrostatic_gradient: Vec<Vector3<f64>>,
    /// Boundary stresses (`forbr`).
    pub boundary_forces: Vec<Vector3<f64>>,
    pub estimators: Estimators,
}

impl FlowFields {
    /// Fluid at rest with uniform density and viscosity. Boundary bundles
    /// are homogeneous Neumann until the boundary conditions are applied.
    pub fn new(mesh: &Mesh, density: f64, viscosity: f64, dt: f64) -> Self {
        let n = mesh.n_cells_ext;
        let n_i = mesh.n_i_faces();
        let n_b = mesh.n_b_faces();
        Self {
            velocity: Field::new("velocity", n, Vector3::zeros()),
            velocity_bc: VectorBc::new(n_b),
            pressure: Field::new("pressure", n, 0.0),
            pressure_bc: ScalarBc::new(n_b),
            pressure_increment: vec![0.0; n],
            pressure_increment_bc: ScalarBc::new(n_b),
            density: Field::new("density", n, density).with_two_previous_levels(),
            b_density: Field::new("boundary_density", n_b, density),
            density_mass: vec![density; n],
            viscosity: vec![viscosity; n],
            turbulent_viscosity: vec![0.0; n],
            i_mass_flux: Field::new("inner_mass_flux", n_i, 0.0),
            b_mass_flux: Field::new("boundary_mass_flux", n_b, 0.0),
            total_pressure: vec![0.0; n],
            temperature: None,
            turbulent_energy: None,
            reynolds_stress_divergence: None,
            reynolds_stress_boundary_flux: None,
            rusanov: None,
            diffusion_tensor: None,
            dt: vec![dt; n],
            volume_forces: vec![Vector3::zeros(); n],
            extrapolated_sources: vec![Vector3::zeros(); n],
            da_uu: vec![Matrix3::zeros(); n],
            dttens: vec![Matrix3::zeros(); n],
            hydrostatic_pressure: vec![0.0; n],
            hydrostatic_gradient: vec![Vector3::zeros(); n],
            boundary_forces: vec![Vector3::zeros(); n_b],
            estimators: Estimators::default(),
        }
    }

    /// Sets a per-cell density and copies it to every time level and to
    /// the boundary faces.
    pub fn set_density(&mut self, mesh: &Mesh, rho: impl Fn(&Vector3<f64>) -> f64) {
        for c in 0..mesh.n_cells_ext {
            self.density.val[c] = rho(&mesh.cell_cen[c]);
        }
        mesh.sync(&mut self.density.val);
        let current = self.density.val.clone();
        self.density.val_pre.copy_from_slice(&current);
        if let Some(pre2) = &mut self.density.val_pre2 {
            pre2.copy_from_slice(&current);
        }
        self.density_mass.copy_from_slice(&current);
        for f in 0..mesh.n_b_faces() {
            let rho_b = current[mesh.b_face_cells[f]];
            self.b_density.val[f] = rho_b;
            self.b_density.val_pre[f] = rho_b;
        }
    }

    /// Shifts every time-dependent field to the next step.
    pub fn shift_time_levels(&mut self) {
        self.velocity.shift_time_levels();
        self.pressure.shift_time_levels();
        self.density.shift_time_levels();
        self.b_density.shift_time_levels();
        self.i_mass_flux.shift_time_levels();
        self.b_mass_flux.shift_time_levels();
    }

    /// Read-only view of a named field at a time level, as exposed to
    /// restart writers and post-processing.
    pub fn view(&self, id: FieldId, level: TimeLevel) -> Option<FieldView<'_>> {
        fn scalar(f: &ScalarField, level: TimeLevel) -> &[f64] {
            match level {
                TimeLevel::Current => &f.val,
                TimeLevel::Previous => &f.val_pre,
                TimeLevel::BeforePrevious => f.before_previous(),
            }
        }
        match (id, level) {
            (FieldId::Velocity, TimeLevel::Current) => Some(FieldView::Vector(&self.velocity.val)),
            (FieldId::Velocity, TimeLevel::Previous) => Some(FieldView::Vector(&self.velocity.val_pre)),
            (FieldId::Pressure, TimeLevel::BeforePrevious) => None,
            (FieldId::Pressure, _) => Some(FieldView::Scalar(scalar(&self.pressure, level))),
            (FieldId::Density, _) => Some(FieldView::Scalar(scalar(&self.density, level))),
            (FieldId::InnerMassFlux, TimeLevel::BeforePrevious) => None,
            (FieldId::InnerMassFlux, _) => Some(FieldView::Scalar(scalar(&self.i_mass_flux, level))),
            (FieldId::BoundaryMassFlux, TimeLevel::BeforePrevious) => None,
            (FieldId::BoundaryMassFlux, _) => Some(FieldView::Scalar(scalar(&self.b_mass_flux, level))),
            (FieldId::Viscosity, TimeLevel::Current) => Some(FieldView::Scalar(&self.viscosity)),
            (FieldId::TurbulentViscosity, TimeLevel::Current) => {
                Some(FieldView::Scalar(&self.turbulent_viscosity))
            }
            (FieldId::TotalPressure, TimeLevel::Current) => Some(FieldView::Scalar(&self.total_pressure)),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldId {
    Velocity,
    Pressure,
    Density,
    InnerMassFlux,
    BoundaryMassFlux,
    Viscosity,
    TurbulentViscosity,
    TotalPressure,
}

impl FieldId {
    pub const ALL: [FieldId; 8] = [
        FieldId::Velocity,
        FieldId::Pressure,
        FieldId::Density,
        FieldId::InnerMassFlux,
        FieldId::BoundaryMassFlux,
        FieldId::Viscosity,
        FieldId::TurbulentViscosity,
        FieldId::TotalPressure,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FieldId::Velocity => "velocity",
            FieldId::Pressure => "pressure",
            FieldId::Density => "density",
            FieldId::InnerMassFlux => "inner_mass_flux",
            FieldId::BoundaryMassFlux => "boundary_mass_flux",
            FieldId::Viscosity => "molecular_viscosity",
            FieldId::TurbulentViscosity => "turbulent_viscosity",
            FieldId::TotalPressure => "total_pressure",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.name() == name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeLevel {
    Current,
    Previous,
    BeforePrevious,
}

#[derive(Clone, Copy, Debug)]
pub enum FieldView<'a> {
    Scalar(&'a [f64]),
    Vector(&'a [Vector3<f64>]),
}

impl FieldView<'_> {
    pub fn len(&self) -> usize {
        match self {
            FieldView::Scalar(v) => v.len(),
            FieldView::Vector(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Densities used by one predictor call. Resolved once at call entry and
/// never re-resolved, so a later reallocation cannot alias them.
#[derive(Debug)]
pub struct DensityViews<'a> {
    /// Density of the unsteady term.
    pub unsteady: Cow<'a, [f64]>,
    /// Density of the other terms (buoyancy, diffusion weights).
    pub cell: &'a [f64],
    pub boundary: &'a [f64],
    /// Density at the previous and second previous levels.
    pub previous: &'a [f64],
    pub before_previous: &'a [f64],
    /// Equation-of-state density at `n+1`.
    pub current: &'a [f64],
}

/// Mass fluxes used by one predictor call, possibly θ-interpolated.
#[derive(Debug)]
pub struct MassFluxView<'a> {
    pub interior: Cow<'a, [f64]>,
    pub boundary: Cow<'a, [f64]>,
}

impl FlowFields {
    pub fn density_views(
        &self,
        config: &NavierStokesConfig,
        iterns: usize,
        call: u8,
    ) -> DensityViews<'_> {
        let fluid = &config.fluid;
        let vp = &config.velocity_pressure;
        let theta = config.velocity.theta;

        let current = self.density.val.as_slice();
        let (previous, b_previous) = if fluid.variable_density {
            (self.density.val_pre.as_slice(), self.b_density.val_pre.as_slice())
        } else {
            (current, self.b_density.val.as_slice())
        };
        let before_previous = if fluid.variable_density {
            self.density.before_previous()
        } else {
            current
        };
        let dilatable = fluid.dilatation.is_dilatable();

        let mut unsteady = Cow::Borrowed(current);
        if fluid.variable_density {
            if fluid.regime == FlowRegime::Compressible || (dilatable && vp.predict_mass_flux) {
                unsteady = Cow::Borrowed(previous);
            } else if dilatable
                || fluid.regime == FlowRegime::Vof
                || fluid.regime == FlowRegime::CompressibleHomogeneous
            {
                unsteady = if !vp.collocated_density && iterns == 1 {
                    Cow::Borrowed(before_previous)
                } else {
                    Cow::Borrowed(previous)
                };
            }
        }

        let (cell, boundary) = if theta < 1.0 {
            (previous, b_previous)
        } else {
            (current, self.b_density.val.as_slice())
        };

        if self.blends_in_time(config, iterns, call) && fluid.variable_density {
            unsteady = Cow::Owned(
                previous
                    .iter()
                    .zip(before_previous)
                    .map(|(&ra, &raa)| theta * ra + (1.0 - theta) * raa)
                    .collect(),
            );
        }

        DensityViews {
            unsteady,
            cell,
            boundary,
            previous,
            before_previous,
            current,
        }
    }

    /// Mass flux interpolated to `n+1/2` on later inner iterations of a
    /// second-order scheme, the stored flux otherwise.
    pub fn mass_flux_view(&self, config: &NavierStokesConfig, iterns: usize, call: u8) -> MassFluxView<'_> {
        if !self.blends_in_time(config, iterns, call) {
            return MassFluxView {
                interior: Cow::Borrowed(&self.i_mass_flux.val),
                boundary: Cow::Borrowed(&self.b_mass_flux.val),
            };
        }
        let theta = config.velocity.theta;
        let blend = |f: &ScalarField| -> Vec<f64> {
            f.val
                .iter()
                .zip(&f.val_pre)
                .map(|(&m, &ma)| theta * m + (1.0 - theta) * ma)
                .collect()
        };
        MassFluxView {
            interior: Cow::Owned(blend(&self.i_mass_flux)),
            boundary: Cow::Owned(blend(&self.b_mass_flux)),
        }
    }

    fn blends_in_time(&self, config: &NavierStokesConfig, iterns: usize, call: u8) -> bool {
        config.velocity.theta < 1.0
            && call == 1
            && iterns > 1
            && !config.velocity_pressure.collocated_density
    }
}

/// Persistent buffers that must follow a topology change.
pub trait Resizable {
    fn resize_to(&mut self, mesh: &Mesh) -> SolverResult<()>;
}

fn check_owned(buffer: &'static str, len: usize, mesh: &Mesh) -> SolverResult<()> {
    if len < mesh.n_cells {
        return Err(SolverError::ResizeFailed {
            buffer,
            required: mesh.n_cells_ext,
            actual: len,
        });
    }
    Ok(())
}

impl Resizable for FlowFields {
    /// Cell buffers keep their owned values and get fresh ghosts; face
    /// buffers are reallocated since face numbering is not preserved.
    fn resize_to(&mut self, mesh: &Mesh) -> SolverResult<()> {
        let n = mesh.n_cells_ext;
        let n_i = mesh.n_i_faces();
        let n_b = mesh.n_b_faces();

        check_owned("velocity", self.velocity.len(), mesh)?;
        check_owned("pressure", self.pressure.len(), mesh)?;
        check_owned("density", self.density.len(), mesh)?;

        self.velocity.resize(n, Vector3::zeros());
        self.pressure.resize(n, 0.0);
        self.density.resize(n, 0.0);
        for buf in [
            &mut self.pressure_increment,
            &mut self.density_mass,
            &mut self.viscosity,
            &mut self.turbulent_viscosity,
            &mut self.total_pressure,
            &mut self.dt,
            &mut self.hydrostatic_pressure,
        ] {
            buf.resize(n, 0.0);
            mesh.sync(buf);
        }
        if let Some(t) = &mut self.temperature {
            t.resize(n, 0.0);
            mesh.sync(t);
        }
        if let Some(k) = &mut self.turbulent_energy {
            k.k.resize(n, 0.0);
            mesh.sync(&mut k.k);
            k.bc.resize(n_b);
        }
        for buf in [
            &mut self.volume_forces,
            &mut self.extrapolated_sources,
            &mut self.hydrostatic_gradient,
        ] {
            buf.resize(n, Vector3::zeros());
            mesh.sync(buf);
        }
        if let Some(divr) = &mut self.reynolds_stress_divergence {
            divr.resize(n, Vector3::zeros());
            mesh.sync(divr);
        }
        if let Some(t) = &mut self.diffusion_tensor {
            t.resize(n, Matrix3::identity());
            mesh.sync(t);
        }
        for buf in [&mut self.da_uu, &mut self.dttens] {
            buf.resize(n, Matrix3::zeros());
            mesh.sync(buf);
        }
        for level in [&mut self.velocity.val, &mut self.velocity.val_pre] {
            mesh.sync(level);
        }
        for level in [&mut self.pressure.val, &mut self.pressure.val_pre] {
            mesh.sync(level);
        }
        mesh.sync(&mut self.density.val);
        mesh.sync(&mut self.density.val_pre);
        if let Some(pre2) = &mut self.density.val_pre2 {
            mesh.sync(pre2);
        }

        if self.i_mass_flux.len() != n_i {
            self.i_mass_flux = Field::new("inner_mass_flux", n_i, 0.0);
        }
        if self.b_mass_flux.len() != n_b {
            self.b_mass_flux = Field::new("boundary_mass_flux", n_b, 0.0);
        }
        self.b_density.resize(n_b, 0.0);
        for f in 0..n_b {
            let c = mesh.b_face_cells[f];
            self.b_density.val[f] = self.density.val[c];
            self.b_density.val_pre[f] = self.density.val_pre[c];
        }
        self.velocity_bc.resize(n_b);
        self.pressure_bc.resize(n_b);
        self.pressure_increment_bc.resize(n_b);
        self.boundary_forces.resize(n_b, Vector3::zeros());
        if let Some(flux) = &mut self.reynolds_stress_boundary_flux {
            flux.resize(n_b, Vector3::zeros());
        }
        if let Some(r) = &mut self.rusanov {
            r.interior.resize(n_i, 0.0);
            r.boundary.resize(n_b, 0.0);
        }
        for est in [
            &mut self.estimators.prediction,
            &mut self.estimators.correction,
            &mut self.estimators.total,
        ]
        .into_iter()
        .flatten()
        {
            est.resize(mesh.n_cells, 0.0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::mesh::{generate_box_mesh, generate_periodic_x_box_mesh, BoxSides};
    use crate::solver::options::Dilatation;

    #[test]
    fn shift_moves_each_level_back() {
        let mut f = Field::new("rho", 2, 1.0).with_two_previous_levels();
        f.val[0] = 2.0;
        f.shift_time_levels();
        f.val[0] = 3.0;
        f.shift_time_levels();
        assert_eq!(f.val[0], 3.0);
        assert_eq!(f.val_pre[0], 3.0);
        assert_eq!(f.before_previous()[0], 2.0);
    }

    #[test]
    fn named_views_resolve_levels() {
        let mesh = generate_box_mesh(2, 2, 2, 1.0, 1.0, 1.0, &BoxSides::wall()).unwrap();
        let mut fields = FlowFields::new(&mesh, 1.0, 1e-3, 0.1);
        fields.pressure.val[0] = 5.0;
        for id in FieldId::ALL {
            assert_eq!(FieldId::from_name(id.name()), Some(id));
            assert!(fields.view(id, TimeLevel::Current).is_some());
        }
        match fields.view(FieldId::Pressure, TimeLevel::Current) {
            Some(FieldView::Scalar(p)) => assert_eq!(p[0], 5.0),
            other => panic!("unexpected view {:?}", other),
        }
        match fields.view(FieldId::Pressure, TimeLevel::Previous) {
            Some(FieldView::Scalar(p)) => assert_eq!(p[0], 0.0),
            other => panic!("unexpected view {:?}", other),
        }
        assert!(fields.view(FieldId::Viscosity, TimeLevel::Previous).is_none());
    }

    #[test]
    fn unsteady_density_follows_model() {
        let mesh = generate_box_mesh(2, 1, 1, 1.0, 1.0, 1.0, &BoxSides::wall()).unwrap();
        let mut fields = FlowFields::new(&mesh, 1.0, 1e-3, 0.1);
        fields.density.val = vec![3.0, 3.0];
        fields.density.val_pre = vec![2.0, 2.0];
        fields.density.val_pre2 = Some(vec![1.0, 1.0]);

        let mut config = NavierStokesConfig::new();
        let views = fields.density_views(&config, 1, 1);
        assert_eq!(views.unsteady[0], 3.0);

        config.fluid.variable_density = true;
        config.fluid.dilatation = Dilatation::Dilatable;
        config.velocity_pressure.predict_mass_flux = false;
        assert_eq!(fields.density_views(&config, 1, 1).unsteady[0], 1.0);
        assert_eq!(fields.density_views(&config, 2, 1).unsteady[0], 2.0);

        config.velocity_pressure.predict_mass_flux = true;
        assert_eq!(fields.density_views(&config, 1, 1).unsteady[0], 2.0);
    }

    #[test]
    fn second_order_blends_flux_on_later_iterations() {
        let mesh = generate_box_mesh(2, 1, 1, 1.0, 1.0, 1.0, &BoxSides::wall()).unwrap();
        let mut fields = FlowFields::new(&mesh, 1.0, 1e-3, 0.1);
        fields.i_mass_flux.val[0] = 4.0;
        fields.i_mass_flux.val_pre[0] = 2.0;
        let mut config = NavierStokesConfig::new();
        config.velocity.theta = 0.5;
        assert_eq!(fields.mass_flux_view(&config, 1, 1).interior[0], 4.0);
        assert_eq!(fields.mass_flux_view(&config, 2, 1).interior[0], 3.0);
        assert_eq!(fields.mass_flux_view(&config, 2, 2).interior[0], 4.0);
    }

    #[test]
    fn resize_keeps_owned_values_and_refreshes_ghosts() {
        let mesh = generate_periodic_x_box_mesh(3, 1, 1, 3.0, 1.0, 1.0, &BoxSides::walls_2d()).unwrap();
        let plain = generate_box_mesh(3, 1, 1, 3.0, 1.0, 1.0, &BoxSides::walls_2d()).unwrap();
        let mut fields = FlowFields::new(&plain, 1.0, 1e-3, 0.1);
        fields.pressure.val = vec![1.0, 2.0, 3.0];
        fields.resize_to(&mesh).unwrap();
        assert_eq!(fields.pressure.len(), mesh.n_cells_ext);
        assert_eq!(&fields.pressure.val[..3], &[1.0, 2.0, 3.0]);
        let halo = mesh.halo.as_ref().unwrap();
        for (k, &src) in halo.ghost_sources.iter().enumerate() {
            assert_eq!(fields.pressure.val[3 + k], fields.pressure.val[src]);
        }
        assert_eq!(fields.i_mass_flux.len(), mesh.n_i_faces());
        assert_eq!(fields.velocity_bc.len(), mesh.n_b_faces());
    }

    #[test]
    fn resize_fails_when_owned_cells_are_missing() {
        let small = generate_box_mesh(2, 1, 1, 1.0, 1.0, 1.0, &BoxSides::wall()).unwrap();
        let large = generate_box_mesh(4, 1, 1, 1.0, 1.0, 1.0, &BoxSides::wall()).unwrap();
        let mut fields = FlowFields::new(&small, 1.0, 1e-3, 0.1);
        let err = fields.resize_to(&large).unwrap_err();
        assert!(matches!(err, SolverError::ResizeFailed { buffer: "velocity", .. }));
    }
}
