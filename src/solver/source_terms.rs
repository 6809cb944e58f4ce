//! Momentum source terms.
//!
//! Every physical contribution to the velocity predictor is a
//! [`MomentumSource`]. The predictor walks the registered sources in a fixed
//! order and lets each one write into the explicit accumulators, the implicit
//! block matrix, the assembled right-hand side and, with hydrostatic
//! balancing, the balanced force `dfrcxt`.

use crate::solver::error::{SolverError, SolverResult};
use crate::solver::field::FlowFields;
use crate::solver::fvm::scalar_gradient;
use crate::solver::mesh::Mesh;
use crate::solver::options::{HydrostaticMode, NavierStokesConfig};
use crate::solver::parallel::DispatchContext;
use crate::solver::turbomachinery::{Rotation, TurbomachineryState};
use log::debug;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Where an explicit contribution lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceTarget {
    /// Computed once per time step. Goes to the extrapolated store when
    /// sources are extrapolated in time, otherwise to the inner-iteration
    /// accumulator (or the working term when there is only one iteration).
    FirstIteration,
    /// Computed once per time step and kept across inner iterations.
    InnerAccumulator,
    /// Recomputed each inner iteration unless sources are extrapolated, in
    /// which case it is stored once per time step.
    EveryIteration,
}

/// The three explicit accumulators of the velocity predictor.
pub struct SourceBuffers<'a> {
    trav: &'a mut [Vector3<f64>],
    trava: Option<&'a mut [Vector3<f64>]>,
    c_st: &'a mut [Vector3<f64>],
    iterns: usize,
    extrapolate: bool,
}

impl<'a> SourceBuffers<'a> {
    /// `trava` is present exactly when more than one inner iteration runs.
    pub fn new(
        trav: &'a mut [Vector3<f64>],
        trava: Option<&'a mut [Vector3<f64>]>,
        c_st: &'a mut [Vector3<f64>],
        iterns: usize,
        extrapolate: bool,
    ) -> Self {
        Self {
            trav,
            trava,
            c_st,
            iterns,
            extrapolate,
        }
    }

    fn accumulator(&mut self) -> &mut [Vector3<f64>] {
        match self.trava.as_deref_mut() {
            Some(t) => t,
            None => &mut *self.trav,
        }
    }

    /// Buffer for `target` on this iteration, `None` when nothing is due.
    pub fn target(&mut self, target: SourceTarget) -> Option<&mut [Vector3<f64>]> {
        let first = self.iterns == 1;
        match target {
            SourceTarget::FirstIteration if !first => None,
            SourceTarget::FirstIteration if self.extrapolate => Some(&mut *self.c_st),
            SourceTarget::FirstIteration => Some(self.accumulator()),
            SourceTarget::InnerAccumulator if first => Some(self.accumulator()),
            SourceTarget::InnerAccumulator => None,
            SourceTarget::EveryIteration if self.extrapolate => first.then_some(&mut *self.c_st),
            SourceTarget::EveryIteration => Some(&mut *self.trav),
        }
    }
}

/// Read-only inputs shared by every source.
pub struct SourceContext<'a> {
    pub dispatch: &'a DispatchContext,
    pub mesh: &'a Mesh,
    pub config: &'a NavierStokesConfig,
    pub fields: &'a FlowFields,
    pub iterns: usize,
    /// Cell density of the predictor.
    pub density: &'a [f64],
    /// Velocity at the previous time step.
    pub velocity_previous: &'a [Vector3<f64>],
}

impl SourceContext<'_> {
    #[inline]
    pub fn first_iteration(&self) -> bool {
        self.iterns == 1
    }

    /// True when external forces are balanced against the pressure.
    #[inline]
    pub fn balances_forces(&self) -> bool {
        self.config.velocity_pressure.hydrostatic == HydrostaticMode::ExternalForces
    }

    #[inline]
    pub fn theta(&self) -> f64 {
        self.config.velocity.theta
    }
}

/// Application order; sources of a lower rank write first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceRank {
    TurbulentEnergyGradient,
    HeadLoss,
    Coriolis,
    ReynoldsStress,
    User,
    SurfaceTension,
    MassInjection,
    Lagrangian,
    Laplace,
}

/// A contribution to the momentum equation.
pub trait MomentumSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn rank(&self) -> SourceRank;

    /// Explicit parts, routed through [`SourceBuffers::target`]. Called on
    /// both predictor calls.
    fn explicit(&self, _st: &SourceContext, _buffers: &mut SourceBuffers) {}

    /// Implicit block, first predictor call only.
    fn implicit(&self, _st: &SourceContext, _fimp: &mut [Matrix3<f64>]) {}

    /// Terms added straight to the assembled right-hand side.
    fn rhs(&self, _st: &SourceContext, _smbr: &mut [Vector3<f64>]) {}

    /// Force per unit volume balanced by the pressure gradient.
    fn balanced_force(&self, _st: &SourceContext, _dfrcxt: &mut [Vector3<f64>]) {}

    /// Boundary stress contributions, first iteration only.
    fn boundary_forces(&self, _st: &SourceContext, _forbr: &mut [Vector3<f64>]) {}

    /// Adds the injected mass rate `V Gamma` per cell.
    fn mass_source(&self, _mesh: &Mesh, _out: &mut [f64]) {}

    /// Reselects cells after a topology change.
    fn on_mesh_update(&mut self, _mesh: &Mesh) -> SolverResult<()> {
        Ok(())
    }
}

/// Ordered registry of momentum sources.
#[derive(Default)]
pub struct SourceTerms {
    terms: Vec<Box<dyn MomentumSource>>,
}

impl SourceTerms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts keeping the application order; sources of equal rank keep
    /// their insertion order.
    pub fn push(&mut self, source: impl MomentumSource + 'static) {
        let rank = source.rank();
        let at = self.terms.partition_point(|t| t.rank() <= rank);
        debug!("registering momentum source '{}' at position {}", source.name(), at);
        self.terms.insert(at, Box::new(source));
    }

    pub fn with(mut self, source: impl MomentumSource + 'static) -> Self {
        self.push(source);
        self
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.terms.iter().map(|t| t.name()).collect()
    }

    pub fn explicit(&self, st: &SourceContext, buffers: &mut SourceBuffers) {
        for t in &self.terms {
            t.explicit(st, buffers);
        }
    }

    pub fn implicit(&self, st: &SourceContext, fimp: &mut [Matrix3<f64>]) {
        for t in &self.terms {
            t.implicit(st, fimp);
        }
    }

    pub fn rhs(&self, st: &SourceContext, smbr: &mut [Vector3<f64>]) {
        for t in &self.terms {
            t.rhs(st, smbr);
        }
    }

    pub fn balanced_force(&self, st: &SourceContext, dfrcxt: &mut [Vector3<f64>]) {
        for t in &self.terms {
            t.balanced_force(st, dfrcxt);
        }
    }

    pub fn boundary_forces(&self, st: &SourceContext, forbr: &mut [Vector3<f64>]) {
        for t in &self.terms {
            t.boundary_forces(st, forbr);
        }
    }

    /// Mass rate per cell, `None` when no source injects or removes mass.
    pub fn mass_source(&self, mesh: &Mesh) -> Option<Vec<f64>> {
        let mut out = vec![0.0; mesh.n_cells];
        for t in &self.terms {
            t.mass_source(mesh, &mut out);
        }
        out.iter().any(|&g| g != 0.0).then_some(out)
    }

    pub fn on_mesh_update(&mut self, mesh: &Mesh) -> SolverResult<()> {
        for t in &mut self.terms {
            t.on_mesh_update(mesh)?;
        }
        Ok(())
    }
}

fn check_cells(component: &'static str, mesh: &Mesh, cells: &[usize]) -> SolverResult<()> {
    match cells.iter().find(|&&c| c >= mesh.n_cells) {
        Some(c) => Err(SolverError::configuration(
            component,
            format!("cell {} outside the {} owned cells", c, mesh.n_cells),
        )),
        None => Ok(()),
    }
}

/// Head loss `-rho K u` over a set of cells, `K` symmetric in 1/s.
#[derive(Clone, Debug)]
pub struct HeadLoss {
    zone: Option<String>,
    cells: Vec<usize>,
    coefficients: Vec<Matrix3<f64>>,
}

impl HeadLoss {
    pub fn new(mesh: &Mesh, cells: Vec<usize>, coefficients: Vec<Matrix3<f64>>) -> SolverResult<Self> {
        SolverError::check_len("head loss coefficients", cells.len(), coefficients.len())?;
        check_cells("head loss", mesh, &cells)?;
        if let Some(k) = coefficients.iter().find(|k| (*k - k.transpose()).amax() > 1e-12 * k.amax()) {
            return Err(SolverError::configuration(
                "head loss",
                format!("coefficient tensor is not symmetric: {}", k),
            ));
        }
        Ok(Self {
            zone: None,
            cells,
            coefficients,
        })
    }

    /// Uniform tensor over a named volume zone.
    pub fn in_zone(mesh: &Mesh, zone: &str, k: Matrix3<f64>) -> SolverResult<Self> {
        let cells = mesh.select_cells(zone)?.to_vec();
        let n = cells.len();
        let mut hl = Self::new(mesh, cells, vec![k; n])?;
        hl.zone = Some(zone.to_string());
        Ok(hl)
    }

    pub fn cells(&self) -> &[usize] {
        &self.cells
    }
}

impl MomentumSource for HeadLoss {
    fn name(&self) -> &'static str {
        "head_loss"
    }

    fn rank(&self) -> SourceRank {
        SourceRank::HeadLoss
    }

    fn explicit(&self, st: &SourceContext, buffers: &mut SourceBuffers) {
        if st.balances_forces() {
            return;
        }
        let Some(t) = buffers.target(SourceTarget::InnerAccumulator) else {
            return;
        };
        for (&c, k) in self.cells.iter().zip(&self.coefficients) {
            let vol = st.mesh.cell_vol[c];
            t[c] -= k * st.velocity_previous[c] * (st.density[c] * vol);
        }
    }

    fn implicit(&self, st: &SourceContext, fimp: &mut [Matrix3<f64>]) {
        let theta = st.theta();
        for (&c, k) in self.cells.iter().zip(&self.coefficients) {
            fimp[c] += k * (st.density[c] * st.mesh.cell_vol[c] * theta);
        }
    }

    fn balanced_force(&self, st: &SourceContext, dfrcxt: &mut [Vector3<f64>]) {
        for (&c, k) in self.cells.iter().zip(&self.coefficients) {
            dfrcxt[c] -= k * st.velocity_previous[c] * st.density[c];
        }
    }

    fn on_mesh_update(&mut self, mesh: &Mesh) -> SolverResult<()> {
        if let Some(zone) = &self.zone {
            let k = self.coefficients.first().copied().unwrap_or_else(Matrix3::zeros);
            self.cells = mesh.select_cells(zone)?.to_vec();
            self.coefficients = vec![k; self.cells.len()];
        }
        Ok(())
    }
}

/// Coriolis force of a rotating reference frame, optionally with frozen
/// rotors contributing their own rotation.
#[derive(Clone, Debug)]
pub struct Coriolis {
    frame: Rotation,
    rotors: Option<(Vec<Rotation>, Vec<usize>)>,
}

impl Coriolis {
    pub fn reference_frame(frame: Rotation) -> Self {
        Self { frame, rotors: None }
    }

    /// Frame rotation plus the rotors of a frozen-rotor layout.
    pub fn frozen_rotors(state: &TurbomachineryState) -> Self {
        Self {
            frame: *state.frame(),
            rotors: Some((state.rotations.clone(), state.cell_rotor.clone())),
        }
    }

    fn rotor(&self, c: usize) -> Option<&Rotation> {
        let (rotations, cell_rotor) = self.rotors.as_ref()?;
        match cell_rotor.get(c) {
            Some(&r) if r > 0 => rotations.get(r),
            _ => None,
        }
    }

    /// `2 Omega0 x u`, plus `Omega_r x u` inside a frozen rotor.
    fn acceleration(&self, c: usize, u: &Vector3<f64>) -> Vector3<f64> {
        let mut a = self.frame.coriolis(u) * 2.0;
        if let Some(r) = self.rotor(c) {
            a += r.coriolis(u);
        }
        a
    }

    fn tensor(&self, c: usize) -> Matrix3<f64> {
        let mut t = self.frame.coriolis_tensor() * 2.0;
        if let Some(r) = self.rotor(c) {
            t += r.coriolis_tensor();
        }
        t
    }
}

impl MomentumSource for Coriolis {
    fn name(&self) -> &'static str {
        "coriolis"
    }

    fn rank(&self) -> SourceRank {
        SourceRank::Coriolis
    }

    fn explicit(&self, st: &SourceContext, buffers: &mut SourceBuffers) {
        if st.balances_forces() {
            return;
        }
        let Some(t) = buffers.target(SourceTarget::InnerAccumulator) else {
            return;
        };
        let mesh = st.mesh;
        st.dispatch.parallel_for(&mut t[..mesh.n_cells], |c, t| {
            let romvol = st.density[c] * mesh.cell_vol[c];
            *t -= self.acceleration(c, &st.velocity_previous[c]) * romvol;
        });
    }

    fn implicit(&self, st: &SourceContext, fimp: &mut [Matrix3<f64>]) {
        let theta = st.theta();
        let mesh = st.mesh;
        st.dispatch.parallel_for(&mut fimp[..mesh.n_cells], |c, m| {
            *m += self.tensor(c) * (st.density[c] * mesh.cell_vol[c] * theta);
        });
    }

    fn balanced_force(&self, st: &SourceContext, dfrcxt: &mut [Vector3<f64>]) {
        st.dispatch.parallel_for(&mut dfrcxt[..st.mesh.n_cells], |c, d| {
            *d -= self.acceleration(c, &st.velocity_previous[c]) * st.density[c];
        });
    }
}

/// `-2/3 rho grad(k)` for turbulence models whose stress has no explicit
/// isotropic part.
#[derive(Clone, Copy, Debug, Default)]
pub struct TurbulentEnergyGradient;

impl TurbulentEnergyGradient {
    fn gradient(st: &SourceContext) -> Option<Vec<Vector3<f64>>> {
        let k = st.fields.turbulent_energy.as_ref()?;
        let eq = &st.config.velocity;
        Some(scalar_gradient(
            st.dispatch,
            st.mesh,
            &k.k,
            &k.bc,
            eq.gradient_sweeps,
            eq.gradient_tolerance,
        ))
    }
}

impl MomentumSource for TurbulentEnergyGradient {
    fn name(&self) -> &'static str {
        "turbulent_energy_gradient"
    }

    fn rank(&self) -> SourceRank {
        SourceRank::TurbulentEnergyGradient
    }

    fn explicit(&self, st: &SourceContext, buffers: &mut SourceBuffers) {
        let Some(t) = buffers.target(SourceTarget::FirstIteration) else {
            return;
        };
        let Some(grad_k) = Self::gradient(st) else {
            return;
        };
        let mesh = st.mesh;
        st.dispatch.parallel_for(&mut t[..mesh.n_cells], |c, t| {
            *t -= grad_k[c] * (2.0 / 3.0 * st.density[c] * mesh.cell_vol[c]);
        });
    }

    fn boundary_forces(&self, st: &SourceContext, forbr: &mut [Vector3<f64>]) {
        let (Some(k), Some(grad_k)) = (st.fields.turbulent_energy.as_ref(), Self::gradient(st)) else {
            return;
        };
        let mesh = st.mesh;
        let rho_b = &st.fields.b_density.val;
        st.dispatch.parallel_for_b_faces(mesh, forbr, |f, out| {
            let c = mesh.b_face_cells[f];
            let k_ip = k.k[c] + grad_k[c].dot(&mesh.diipb[f]);
            let k_b = k.bc.face_value(f, k_ip);
            *out += mesh.b_face_normal[f] * (2.0 / 3.0 * rho_b[f] * k_b);
        });
    }
}

/// Divergence of the Reynolds stress for second-moment closures. The
/// divergence itself is computed by the turbulence model and read from
/// [`FlowFields::reynolds_stress_divergence`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ReynoldsStressDivergence;

impl MomentumSource for ReynoldsStressDivergence {
    fn name(&self) -> &'static str {
        "reynolds_stress_divergence"
    }

    fn rank(&self) -> SourceRank {
        SourceRank::ReynoldsStress
    }

    fn explicit(&self, st: &SourceContext, buffers: &mut SourceBuffers) {
        if st.balances_forces() && st.config.velocity_pressure.reynolds_stress_in_pressure {
            return;
        }
        let Some(divr) = st.fields.reynolds_stress_divergence.as_deref() else {
            return;
        };
        if let Some(t) = buffers.target(SourceTarget::FirstIteration) {
            for (t, d) in t[..st.mesh.n_cells].iter_mut().zip(divr) {
                *t -= d;
            }
        }
    }

    fn balanced_force(&self, st: &SourceContext, dfrcxt: &mut [Vector3<f64>]) {
        if !st.config.velocity_pressure.reynolds_stress_in_pressure {
            return;
        }
        let Some(divr) = st.fields.reynolds_stress_divergence.as_deref() else {
            return;
        };
        let vol = &st.mesh.cell_vol;
        st.dispatch.parallel_for(&mut dfrcxt[..st.mesh.n_cells], |c, d| {
            *d -= divr[c] / vol[c];
        });
    }

    fn boundary_forces(&self, st: &SourceContext, forbr: &mut [Vector3<f64>]) {
        if let Some(flux) = st.fields.reynolds_stress_boundary_flux.as_deref() {
            for (f, q) in forbr.iter_mut().zip(flux) {
                *f += q;
            }
        }
    }
}

/// User source `tsexp + tsimp u`, both integrated over the cell.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserMomentumSource {
    /// Explicit part in N.
    pub explicit: Vec<Vector3<f64>>,
    /// Implicit part in kg/s.
    pub implicit: Vec<Matrix3<f64>>,
}

impl UserMomentumSource {
    pub fn new(mesh: &Mesh) -> Self {
        Self {
            explicit: vec![Vector3::zeros(); mesh.n_cells],
            implicit: vec![Matrix3::zeros(); mesh.n_cells],
        }
    }
}

impl MomentumSource for UserMomentumSource {
    fn name(&self) -> &'static str {
        "user_momentum_source"
    }

    fn rank(&self) -> SourceRank {
        SourceRank::User
    }

    fn explicit(&self, st: &SourceContext, buffers: &mut SourceBuffers) {
        let n = st.mesh.n_cells;
        if let Some(t) = buffers.target(SourceTarget::InnerAccumulator) {
            for (c, t) in t[..n].iter_mut().enumerate() {
                *t += self.implicit[c] * st.velocity_previous[c];
            }
        }
        if st.balances_forces() && st.config.velocity_pressure.user_sources_in_pressure {
            return;
        }
        if let Some(t) = buffers.target(SourceTarget::EveryIteration) {
            for (t, e) in t[..n].iter_mut().zip(&self.explicit) {
                *t += e;
            }
        }
    }

    fn implicit(&self, st: &SourceContext, fimp: &mut [Matrix3<f64>]) {
        let n = st.mesh.n_cells;
        if st.config.time_scheme.extrapolate_sources {
            let thetv = st.theta();
            for (m, s) in fimp[..n].iter_mut().zip(&self.implicit) {
                *m -= s * thetv;
            }
        } else {
            for (m, s) in fimp[..n].iter_mut().zip(&self.implicit) {
                *m += s.map(|v| (-v).max(0.0));
            }
        }
    }

    fn balanced_force(&self, st: &SourceContext, dfrcxt: &mut [Vector3<f64>]) {
        if !st.config.velocity_pressure.user_sources_in_pressure {
            return;
        }
        for (c, d) in dfrcxt[..st.mesh.n_cells].iter_mut().enumerate() {
            *d += self.explicit[c] / st.mesh.cell_vol[c];
        }
    }

    fn on_mesh_update(&mut self, mesh: &Mesh) -> SolverResult<()> {
        self.explicit.resize(mesh.n_cells, Vector3::zeros());
        self.implicit.resize(mesh.n_cells, Matrix3::zeros());
        Ok(())
    }
}

/// Integrated surface tension force, computed by the interface model.
#[derive(Clone, Debug)]
pub struct SurfaceTension {
    pub force: Vec<Vector3<f64>>,
}

impl MomentumSource for SurfaceTension {
    fn name(&self) -> &'static str {
        "surface_tension"
    }

    fn rank(&self) -> SourceRank {
        SourceRank::SurfaceTension
    }

    fn explicit(&self, st: &SourceContext, buffers: &mut SourceBuffers) {
        if st.balances_forces() {
            return;
        }
        if let Some(t) = buffers.target(SourceTarget::EveryIteration) {
            for (t, f) in t[..st.mesh.n_cells].iter_mut().zip(&self.force) {
                *t += f;
            }
        }
    }

    fn balanced_force(&self, st: &SourceContext, dfrcxt: &mut [Vector3<f64>]) {
        for (c, d) in dfrcxt[..st.mesh.n_cells].iter_mut().enumerate() {
            *d += self.force[c] / st.mesh.cell_vol[c];
        }
    }
}

/// What velocity injected mass carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InjectionKind {
    /// The local velocity; momentum is unchanged.
    Ambient,
    /// A prescribed velocity.
    Imposed,
}

/// Volumetric mass injection `Gamma` (kg/m3/s) on a set of cells. Negative
/// rates remove mass at the local velocity.
#[derive(Clone, Debug)]
pub struct MassInjection {
    zone: Option<String>,
    pub cells: Vec<usize>,
    pub rate: Vec<f64>,
    pub kind: InjectionKind,
    pub velocity: Vec<Vector3<f64>>,
}

impl MassInjection {
    pub fn new(
        mesh: &Mesh,
        cells: Vec<usize>,
        rate: Vec<f64>,
        kind: InjectionKind,
        velocity: Vec<Vector3<f64>>,
    ) -> SolverResult<Self> {
        SolverError::check_len("mass injection rates", cells.len(), rate.len())?;
        SolverError::check_len("mass injection velocities", cells.len(), velocity.len())?;
        check_cells("mass injection", mesh, &cells)?;
        Ok(Self {
            zone: None,
            cells,
            rate,
            kind,
            velocity,
        })
    }

    pub fn in_zone(
        mesh: &Mesh,
        zone: &str,
        rate: f64,
        kind: InjectionKind,
        velocity: Vector3<f64>,
    ) -> SolverResult<Self> {
        let cells = mesh.select_cells(zone)?.to_vec();
        let n = cells.len();
        let mut inj = Self::new(mesh, cells, vec![rate; n], kind, vec![velocity; n])?;
        inj.zone = Some(zone.to_string());
        Ok(inj)
    }

    fn injecting(&self) -> impl Iterator<Item = (usize, f64, &Vector3<f64>)> {
        let imposed = self.kind == InjectionKind::Imposed;
        self.cells
            .iter()
            .zip(&self.rate)
            .zip(&self.velocity)
            .filter(move |((_, g), _)| imposed && **g > 0.0)
            .map(|((&c, &g), u)| (c, g, u))
    }
}

impl MomentumSource for MassInjection {
    fn name(&self) -> &'static str {
        "mass_injection"
    }

    fn rank(&self) -> SourceRank {
        SourceRank::MassInjection
    }

    fn explicit(&self, st: &SourceContext, buffers: &mut SourceBuffers) {
        let vol = &st.mesh.cell_vol;
        if let Some(t) = buffers.target(SourceTarget::InnerAccumulator) {
            for (c, g, _) in self.injecting() {
                t[c] -= st.velocity_previous[c] * (vol[c] * g);
            }
        }
        if let Some(t) = buffers.target(SourceTarget::FirstIteration) {
            for (c, g, u) in self.injecting() {
                t[c] += u * (vol[c] * g);
            }
        }
    }

    fn implicit(&self, st: &SourceContext, fimp: &mut [Matrix3<f64>]) {
        for (c, g, _) in self.injecting() {
            fimp[c] += Matrix3::identity() * (st.mesh.cell_vol[c] * g);
        }
    }

    fn mass_source(&self, mesh: &Mesh, out: &mut [f64]) {
        for (&c, &g) in self.cells.iter().zip(&self.rate) {
            out[c] += mesh.cell_vol[c] * g;
        }
    }

    fn on_mesh_update(&mut self, mesh: &Mesh) -> SolverResult<()> {
        if let Some(zone) = &self.zone {
            let g = self.rate.first().copied().unwrap_or(0.0);
            let u = self.velocity.first().copied().unwrap_or_else(Vector3::zeros);
            self.cells = mesh.select_cells(zone)?.to_vec();
            self.rate = vec![g; self.cells.len()];
            self.velocity = vec![u; self.cells.len()];
        }
        Ok(())
    }
}

/// Two-way coupling with a particle phase: explicit momentum exchange in N
/// and its implicit coefficient in kg/s.
#[derive(Clone, Debug)]
pub struct LagrangianCoupling {
    pub momentum: Vec<Vector3<f64>>,
    pub implicit: Vec<f64>,
}

impl MomentumSource for LagrangianCoupling {
    fn name(&self) -> &'static str {
        "lagrangian_coupling"
    }

    fn rank(&self) -> SourceRank {
        SourceRank::Lagrangian
    }

    fn rhs(&self, st: &SourceContext, smbr: &mut [Vector3<f64>]) {
        for (s, m) in smbr[..st.mesh.n_cells].iter_mut().zip(&self.momentum) {
            *s += m;
        }
    }

    fn implicit(&self, st: &SourceContext, fimp: &mut [Matrix3<f64>]) {
        for (m, &s) in fimp[..st.mesh.n_cells].iter_mut().zip(&self.implicit) {
            let d = (-s).max(0.0);
            for k in 0..3 {
                m[(k, k)] += d;
            }
        }
    }
}

/// Lorentz force density `j x B` in N/m3.
#[derive(Clone, Debug)]
pub struct LaplaceForce {
    pub force_density: Vec<Vector3<f64>>,
}

impl MomentumSource for LaplaceForce {
    fn name(&self) -> &'static str {
        "laplace_force"
    }

    fn rank(&self) -> SourceRank {
        SourceRank::Laplace
    }

    fn rhs(&self, st: &SourceContext, smbr: &mut [Vector3<f64>]) {
        let vol = &st.mesh.cell_vol;
        for (c, s) in smbr[..st.mesh.n_cells].iter_mut().enumerate() {
            *s += self.force_density[c] * vol[c];
        }
    }
}
