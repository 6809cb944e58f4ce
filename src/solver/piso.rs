//! Outer velocity-pressure fixed point.
//!
//! One call to [`PisoSolver::solve_time_step`] runs one inner iteration:
//! optional mass-flux and hydrostatic predictions, the velocity predictor,
//! the pressure correction, the velocity update, the estimators and the
//! convergence test. [`PisoSolver::advance`] repeats it over the inner
//! iterations of each time step.

use crate::solver::boundary::BoundaryConditions;
use crate::solver::equation::SweepReport;
use crate::solver::error::{SolverError, SolverResult};
use crate::solver::field::{FlowFields, Resizable};
use crate::solver::fvm::{divergence, mass_flux};
use crate::solver::hydrostatic::HydrostaticPredictor;
use crate::solver::mass_flux_prediction::MassFluxPredictor;
use crate::solver::mesh::Mesh;
use crate::solver::options::{HydrostaticMode, NavierStokesConfig};
use crate::solver::parallel::DispatchContext;
use crate::solver::pressure_correction::{CorrectionInput, CorrectionReport, PressureCorrection, RhieChowCorrection};
use crate::solver::source_terms::SourceTerms;
use crate::solver::turbomachinery::{MeshUpdater, StaticMesh, TurbomachineryModel, TurbomachineryState};
use crate::solver::velocity_prediction::{StepBuffers, VelocityPredictor};
use crate::solver::velocity_update::VelocityUpdater;
use log::{debug, info, warn};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Scratch state shared by the inner iterations of one time step.
#[derive(Clone, Debug)]
pub struct TimeStepContext {
    /// Explicit sources frozen at the first inner iteration; only present
    /// with several inner iterations.
    pub trava: Option<Vec<Vector3<f64>>>,
    /// Velocity at the start of the current inner iteration.
    pub velk: Vec<Vector3<f64>>,
    /// Reference norm of the convergence test.
    pub xnrmu0: f64,
    /// External force increment.
    pub dfrcxt: Vec<Vector3<f64>>,
}

impl TimeStepContext {
    fn new(mesh: &Mesh, n_inner_iterations: usize) -> Self {
        let n = mesh.n_cells_ext;
        Self {
            trava: (n_inner_iterations > 1).then(|| vec![Vector3::zeros(); n]),
            velk: vec![Vector3::zeros(); n],
            xnrmu0: 0.0,
            dfrcxt: vec![Vector3::zeros(); n],
        }
    }
}

impl Resizable for TimeStepContext {
    fn resize_to(&mut self, mesh: &Mesh) -> SolverResult<()> {
        let n = mesh.n_cells_ext;
        for (buffer, values) in [("trava", self.trava.as_mut()), ("velk", Some(&mut self.velk)), ("dfrcxt", Some(&mut self.dfrcxt))] {
            let Some(values) = values else { continue };
            if values.len() < mesh.n_cells {
                return Err(SolverError::ResizeFailed {
                    buffer,
                    required: n,
                    actual: values.len(),
                });
            }
            values.resize(n, Vector3::zeros());
            mesh.sync(values);
        }
        Ok(())
    }
}

/// Field extrema written by the norm log at the end of each iteration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowNorms {
    pub pressure_max: f64,
    pub velocity_min: f64,
    pub velocity_min_cell: usize,
    pub velocity_max: f64,
    pub velocity_max_cell: usize,
    /// Face velocity `|m| / (rho_f S)` over interior faces.
    pub i_face_velocity: [f64; 2],
    pub b_face_velocity: [f64; 2],
    /// Net outflow through the boundary.
    pub boundary_mass_balance: f64,
}

/// Volume-weighted L2 norms of the per-cell estimators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimatorNorms {
    pub prediction: Option<f64>,
    pub correction: Option<f64>,
    pub total: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IterationReport {
    pub iterns: usize,
    pub velocity_sweeps: usize,
    pub velocity_residual: f64,
    pub pressure_sweeps: Option<usize>,
    pub pressure_residual: Option<f64>,
    /// Sweeps of the dilatable mass-flux prediction, when it ran.
    #[serde(default)]
    pub mass_flux_sweeps: Option<usize>,
    /// Continuity defect of the predicted flux.
    pub continuity_defect: Option<f64>,
    /// `sqrt(sum |u - u_k|^2 V)`; only measured with several inner iterations.
    pub xnrmu: Option<f64>,
    pub xnrmu0: f64,
    pub converged: bool,
    pub estimators: EstimatorNorms,
    pub norms: Option<FlowNorms>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepReport {
    pub step: u64,
    pub time: f64,
    pub inner_iterations: usize,
    pub converged: bool,
    pub iterations: Vec<IterationReport>,
}

pub struct PisoSolver {
    pub ctx: DispatchContext,
    pub mesh: Mesh,
    pub config: NavierStokesConfig,
    pub boundary: BoundaryConditions,
    pub sources: SourceTerms,
    pub fields: FlowFields,
    pub turbomachinery: Option<TurbomachineryState>,
    mesh_updater: Box<dyn MeshUpdater>,
    correction: Box<dyn PressureCorrection>,
    step_context: Option<TimeStepContext>,
    pub time_step: u64,
    pub time: f64,
    local_time_step_reported: bool,
}

impl PisoSolver {
    pub fn new(mesh: Mesh, config: NavierStokesConfig, fields: FlowFields) -> SolverResult<Self> {
        config.validate()?;
        if fields.velocity.len() != mesh.n_cells_ext {
            return Err(SolverError::dimension("velocity", mesh.n_cells_ext, fields.velocity.len()));
        }
        let unreached = mesh.check_connectivity();
        if unreached > 0 {
            warn!("{} of {} cells are not connected to cell 0", unreached, mesh.n_cells);
        }
        let boundary = BoundaryConditions::from_mesh(&mesh);
        let mut solver = Self {
            ctx: DispatchContext::threaded(),
            mesh,
            config,
            boundary,
            sources: SourceTerms::new(),
            fields,
            turbomachinery: None,
            mesh_updater: Box::new(StaticMesh),
            correction: Box::new(RhieChowCorrection),
            step_context: None,
            time_step: 0,
            time: 0.0,
            local_time_step_reported: false,
        };
        solver.refresh_boundary_coefficients();
        Ok(solver)
    }

    pub fn with_dispatch(mut self, ctx: DispatchContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn with_boundary_conditions(mut self, boundary: BoundaryConditions) -> Self {
        self.boundary = boundary;
        self.refresh_boundary_coefficients();
        self
    }

    pub fn with_sources(mut self, sources: SourceTerms) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_pressure_correction(mut self, correction: impl PressureCorrection + 'static) -> Self {
        self.correction = Box::new(correction);
        self
    }

    pub fn with_turbomachinery(mut self, state: TurbomachineryState, updater: impl MeshUpdater + 'static) -> Self {
        self.turbomachinery = Some(state);
        self.mesh_updater = Box::new(updater);
        self.refresh_boundary_coefficients();
        self
    }

    pub fn step_context(&self) -> Option<&TimeStepContext> {
        self.step_context.as_ref()
    }

    /// Rebuilds the coefficient bundles from the zone conditions, the
    /// current viscosity and time step.
    pub fn refresh_boundary_coefficients(&mut self) {
        let fields = &mut self.fields;
        self.boundary.velocity_coefficients(
            &self.mesh,
            &fields.viscosity,
            &fields.turbulent_viscosity,
            &mut fields.velocity_bc,
        );
        self.boundary.pressure_coefficients(
            &self.mesh,
            &fields.dt,
            &mut fields.pressure_bc,
            &mut fields.pressure_increment_bc,
        );
        if let Some(turbo) = &self.turbomachinery {
            turbo.update_wall_velocity_bc(&self.mesh, &fields.viscosity, &fields.turbulent_viscosity, &mut fields.velocity_bc);
        }
    }

    /// Runs `n_steps` time steps, each with up to `n_inner_iterations` inner
    /// iterations.
    ///
    /// `time` advances by the time step of the cells. With a local time step
    /// the cells do not share a clock and `time` follows the smallest step.
    pub fn advance(&mut self, n_steps: usize) -> SolverResult<Vec<StepReport>> {
        let nterup = self.config.velocity_pressure.n_inner_iterations;
        let mut reports = Vec::with_capacity(n_steps);
        for _ in 0..n_steps {
            self.fields.shift_time_levels();
            self.time_step += 1;
            let mut iterations = Vec::with_capacity(nterup);
            for iterns in 1..=nterup {
                let report = self.solve_time_step(iterns)?;
                let converged = report.converged;
                iterations.push(report);
                if converged {
                    break;
                }
            }
            self.time += self.time_increment();
            let converged = iterations.last().is_some_and(|r| r.converged);
            reports.push(StepReport {
                step: self.time_step,
                time: self.time,
                inner_iterations: iterations.len(),
                converged,
                iterations,
            });
        }
        Ok(reports)
    }

    fn time_increment(&mut self) -> f64 {
        let dt = &self.fields.dt[..self.mesh.n_cells];
        let Some(&first) = dt.first() else {
            return 0.0;
        };
        let (lo, hi) = dt.iter().fold((first, first), |(lo, hi), &d| (lo.min(d), hi.max(d)));
        if hi - lo > 1e-12 * hi.abs() && !self.local_time_step_reported {
            warn!(
                "local time step in [{:.6e}, {:.6e}]: physical time follows the smallest step",
                lo, hi
            );
            self.local_time_step_reported = true;
        }
        lo
    }

    /// One inner iteration `iterns` (1-based) of the current time step.
    pub fn solve_time_step(&mut self, iterns: usize) -> SolverResult<IterationReport> {
        let nterup = self.config.velocity_pressure.n_inner_iterations;
        let mut step = match self.step_context.take() {
            Some(step) if iterns > 1 => step,
            _ => TimeStepContext::new(&self.mesh, nterup),
        };
        let result = self.iterate(iterns, &mut step);
        let continues = iterns < nterup && result.as_ref().is_ok_and(|r| !r.converged);
        if !continues {
            step.trava = None;
        }
        self.step_context = Some(step);
        result
    }

    fn iterate(&mut self, iterns: usize, step: &mut TimeStepContext) -> SolverResult<IterationReport> {
        let vp = self.config.velocity_pressure.clone();
        let fluid = self.config.fluid.clone();
        let nterup = vp.n_inner_iterations;
        let n = self.mesh.n_cells;

        if iterns == 1 {
            self.refresh_boundary_coefficients();
        }

        step.velk.clone_from(if nterup > 1 {
            &self.fields.velocity.val
        } else {
            &self.fields.velocity.val_pre
        });
        if iterns == 1 || step.xnrmu0 <= 0.0 {
            let vel = &self.fields.velocity.val;
            let mesh = &self.mesh;
            step.xnrmu0 = self.ctx.sum(n, |c| vel[c].norm_squared() * mesh.cell_vol[c]).sqrt();
        }

        let isostd = self.boundary.standard_outlets(&self.mesh);

        let mut mass_flux_sweeps = None;
        if fluid.dilatation.is_dilatable() && self.time_step > 1 && vp.predict_mass_flux {
            let report = MassFluxPredictor {
                ctx: &self.ctx,
                mesh: &self.mesh,
                config: &self.config,
                sources: &self.sources,
            }
            .predict(&mut self.fields)?;
            debug!("mass flux prediction: {} sweep(s)", report.sweeps);
            mass_flux_sweeps = Some(report.sweeps);
        }

        if vp.hydrostatic == HydrostaticMode::Predictor {
            HydrostaticPredictor {
                ctx: &self.ctx,
                mesh: &self.mesh,
                config: &self.config,
            }
            .predict(&mut self.fields)?;
        }

        let prediction = VelocityPredictor {
            ctx: &self.ctx,
            mesh: &self.mesh,
            config: &self.config,
            sources: &self.sources,
        }
        .predict(
            &mut self.fields,
            iterns,
            StepBuffers {
                trava: step.trava.as_deref_mut(),
                velk: &step.velk,
                dfrcxt: &mut step.dfrcxt,
            },
        )?;

        if !vp.pressure_correction {
            self.flux_from_velocity();
            let mut report = self.report(iterns, &prediction, None, None, step.xnrmu0, true);
            report.mass_flux_sweeps = mass_flux_sweeps;
            return Ok(report);
        }

        if iterns == 1 && self.turbomachinery.as_ref().is_some_and(|t| t.model == TurbomachineryModel::Transient) {
            self.update_rotor_mesh(step)?;
        }

        let cromk1 = if fluid.uses_mass_density() {
            self.fields.density_mass.clone()
        } else {
            self.fields.density.val.clone()
        };

        let correction = self.correction.correct(
            &self.ctx,
            &self.mesh,
            &self.config,
            &self.sources,
            &mut self.fields,
            &CorrectionInput {
                iterns,
                standard_outlets: &isostd,
                dfrcxt: &step.dfrcxt,
            },
        )?;

        VelocityUpdater {
            ctx: &self.ctx,
            mesh: &self.mesh,
            config: &self.config,
        }
        .update(&mut self.fields, &cromk1, &step.dfrcxt, &isostd)?;

        if let Some(turbo) = &self.turbomachinery {
            let fields = &mut self.fields;
            turbo.correct_mass_flux(
                &self.ctx,
                &self.mesh,
                &fields.density.val,
                &fields.b_density.val,
                &mut fields.i_mass_flux.val,
                &mut fields.b_mass_flux.val,
            );
        }

        if fluid.variable_density && fluid.dilatation.is_dilatable() {
            self.fields.density_mass.copy_from_slice(&self.fields.density.val);
        }

        if vp.estimators.correction {
            self.fields.estimators.correction = Some(self.correction_estimator());
        }
        if vp.estimators.total {
            let predictor = VelocityPredictor {
                ctx: &self.ctx,
                mesh: &self.mesh,
                config: &self.config,
                sources: &self.sources,
            };
            predictor.estimate_total(&mut self.fields, iterns, step.trava.as_deref());
        }

        let xnrmu = (nterup > 1).then(|| {
            let vel = &self.fields.velocity.val;
            let velk = &step.velk;
            let mesh = &self.mesh;
            self.ctx
                .sum(n, |c| (vel[c] - velk[c]).norm_squared() * mesh.cell_vol[c])
                .sqrt()
        });
        let converged = match xnrmu {
            Some(x) => x < vp.inner_tolerance * step.xnrmu0,
            None => true,
        };
        if let Some(x) = xnrmu {
            info!(
                "inner iteration {}: |u - u_k| = {:.6e}, tolerance {:.3e} x {:.6e}",
                iterns, x, vp.inner_tolerance, step.xnrmu0
            );
            if !converged && iterns == nterup {
                warn!(
                    "velocity-pressure coupling not converged after {} inner iterations ({:.6e} >= {:.3e} x {:.6e})",
                    nterup, x, vp.inner_tolerance, step.xnrmu0
                );
            }
        }

        self.finalize();
        let mut report = self.report(iterns, &prediction, Some(&correction), xnrmu, step.xnrmu0, converged);
        report.mass_flux_sweeps = mass_flux_sweeps;
        report.norms = Some(self.log_norm());
        Ok(report)
    }

    fn report(
        &self,
        iterns: usize,
        prediction: &SweepReport,
        correction: Option<&CorrectionReport>,
        xnrmu: Option<f64>,
        xnrmu0: f64,
        converged: bool,
    ) -> IterationReport {
        let volume_norm = |e: &Option<Vec<f64>>| e.as_ref().map(|v| v.iter().map(|x| x * x).sum::<f64>().sqrt());
        let estimators = &self.fields.estimators;
        IterationReport {
            iterns,
            velocity_sweeps: prediction.sweeps,
            velocity_residual: prediction.residual,
            pressure_sweeps: correction.map(|c| c.solve.sweeps),
            pressure_residual: correction.map(|c| c.solve.residual),
            mass_flux_sweeps: None,
            continuity_defect: correction.map(|c| c.initial_defect),
            xnrmu,
            xnrmu0,
            converged,
            estimators: EstimatorNorms {
                prediction: volume_norm(&estimators.prediction),
                correction: volume_norm(&estimators.correction),
                total: volume_norm(&estimators.total),
            },
            norms: None,
        }
    }

    /// Mass flux straight from the predicted velocity, used when no
    /// pressure correction runs.
    fn flux_from_velocity(&mut self) {
        let crom: &[f64] = if self.config.fluid.uses_mass_density() {
            &self.fields.density_mass
        } else {
            &self.fields.density.val
        };
        let fields = &self.fields;
        let mut i_flux = vec![0.0; self.mesh.n_i_faces()];
        let mut b_flux = vec![0.0; self.mesh.n_b_faces()];
        mass_flux(
            &self.ctx,
            &self.mesh,
            crom,
            &fields.b_density.val,
            &fields.velocity.val,
            &fields.velocity_bc,
            None,
            &mut i_flux,
            &mut b_flux,
        );
        if let Some(turbo) = &self.turbomachinery {
            turbo.correct_mass_flux(&self.ctx, &self.mesh, crom, &fields.b_density.val, &mut i_flux, &mut b_flux);
        }
        self.fields.i_mass_flux.val = i_flux;
        self.fields.b_mass_flux.val = b_flux;
    }

    /// Moves the rotors: new topology, every persistent buffer resized,
    /// rotating walls recomputed. Any resize failure aborts the step.
    fn update_rotor_mesh(&mut self, step: &mut TimeStepContext) -> SolverResult<()> {
        let Some(turbo) = self.turbomachinery.as_mut() else {
            return Ok(());
        };
        let topology = self.mesh_updater.update(&self.mesh, turbo)?;
        self.mesh.replace_topology(topology)?;
        self.fields.resize_to(&self.mesh)?;
        turbo.resize_to(&self.mesh)?;
        step.resize_to(&self.mesh)?;
        self.sources.on_mesh_update(&self.mesh)?;
        debug!(
            "rotor mesh revision {}: {} cells, {} interior faces",
            self.mesh.revision,
            self.mesh.n_cells,
            self.mesh.n_i_faces()
        );
        self.refresh_boundary_coefficients();
        Ok(())
    }

    /// `|div(m) - V Gamma| / V` of the flux rebuilt from the corrected
    /// velocity.
    fn correction_estimator(&self) -> Vec<f64> {
        let (ctx, mesh, fields) = (&self.ctx, &self.mesh, &self.fields);
        let crom: &[f64] = if self.config.fluid.uses_mass_density() {
            &fields.density_mass
        } else {
            &fields.density.val
        };
        let mut i_flux = vec![0.0; mesh.n_i_faces()];
        let mut b_flux = vec![0.0; mesh.n_b_faces()];
        mass_flux(
            ctx,
            mesh,
            crom,
            &fields.b_density.val,
            &fields.velocity.val,
            &fields.velocity_bc,
            None,
            &mut i_flux,
            &mut b_flux,
        );
        let div = divergence(ctx, mesh, &i_flux, &b_flux);
        let gamma = self.sources.mass_source(mesh);
        let mut esflum = vec![0.0; mesh.n_cells];
        ctx.parallel_for(&mut esflum, |c, e| {
            let g = gamma.as_ref().map_or(0.0, |g| g[c]);
            *e = (div[c] - g).abs() / mesh.cell_vol[c];
        });
        esflum
    }

    /// Shifts the pressure level when no Dirichlet face pins it and
    /// refreshes the total pressure.
    fn finalize(&mut self) {
        let (ctx, mesh) = (&self.ctx, &self.mesh);
        let fluid = &self.config.fluid;
        let n = mesh.n_cells;
        let fields = &mut self.fields;

        let ndircl = fields.pressure_bc.n_dirichlet() as isize;
        let ndircp = if ndircl == 1 { ndircl } else { ndircl - 1 };
        if ndircp <= 0 {
            let p = &fields.pressure.val;
            let mean = ctx.sum(n, |c| p[c] * mesh.cell_vol[c]) / mesh.total_volume();
            let shift = fluid.pred0 - mean;
            fields.pressure.val.iter_mut().for_each(|p| *p += shift);
        }

        let g = self.config.constants.gravity;
        let p = &fields.pressure.val;
        let k = fields.turbulent_energy.as_ref().map(|k| k.k.as_slice());
        let rho = &fields.density.val;
        ctx.parallel_for(&mut fields.total_pressure, |c, pt| {
            *pt = p[c] + fluid.ro0 * (mesh.cell_cen[c] - fluid.xyzp0).dot(&g) + fluid.p0 - fluid.pred0;
            if let Some(kc) = k.and_then(|k| k.get(c)) {
                *pt -= 2.0 / 3.0 * rho[c] * kc;
            }
        });
        ctx.wait();
    }

    /// Logs and returns the field extrema of the current state.
    pub fn log_norm(&self) -> FlowNorms {
        let (ctx, mesh, fields) = (&self.ctx, &self.mesh, &self.fields);
        let n = mesh.n_cells;
        let mut norms = FlowNorms {
            pressure_max: ctx.max(n, |c| fields.pressure.val[c].abs()),
            velocity_min: f64::MAX,
            velocity_max: f64::MIN,
            i_face_velocity: [f64::MAX, f64::MIN],
            b_face_velocity: [f64::MAX, f64::MIN],
            ..FlowNorms::default()
        };
        for (c, u) in fields.velocity.val[..n].iter().enumerate() {
            let speed = u.norm();
            if speed < norms.velocity_min {
                norms.velocity_min = speed;
                norms.velocity_min_cell = c;
            }
            if speed > norms.velocity_max {
                norms.velocity_max = speed;
                norms.velocity_max_cell = c;
            }
        }
        let rho = &fields.density.val;
        for (f, m) in fields.i_mass_flux.val.iter().enumerate() {
            let [i, j] = mesh.i_face_cells[f];
            let pond = mesh.weight[f];
            let rho_f = pond * rho[i] + (1.0 - pond) * rho[j];
            let v = m.abs() / (mesh.i_face_surf[f] * rho_f);
            norms.i_face_velocity = [norms.i_face_velocity[0].min(v), norms.i_face_velocity[1].max(v)];
        }
        for (f, m) in fields.b_mass_flux.val.iter().enumerate() {
            let v = m.abs() / (mesh.b_face_surf[f] * fields.b_density.val[f]);
            norms.b_face_velocity = [norms.b_face_velocity[0].min(v), norms.b_face_velocity[1].max(v)];
        }
        norms.boundary_mass_balance = fields.b_mass_flux.val.iter().sum();

        info!("max |p| = {:.6e}", norms.pressure_max);
        if n > 0 {
            info!(
                "|u| min {:.6e} at {:?}, max {:.6e} at {:?}",
                norms.velocity_min,
                mesh.cell_cen[norms.velocity_min_cell],
                norms.velocity_max,
                mesh.cell_cen[norms.velocity_max_cell]
            );
        }
        if mesh.n_i_faces() > 0 {
            info!(
                "interior face velocity in [{:.6e}, {:.6e}]",
                norms.i_face_velocity[0], norms.i_face_velocity[1]
            );
        }
        if mesh.n_b_faces() > 0 {
            info!(
                "boundary face velocity in [{:.6e}, {:.6e}]",
                norms.b_face_velocity[0], norms.b_face_velocity[1]
            );
        }
        info!("boundary mass balance {:.6e}", norms.boundary_mass_balance);
        norms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::mesh::{generate_box_mesh, BoxSides};

    fn cavity(config: NavierStokesConfig) -> PisoSolver {
        let mesh = generate_box_mesh(4, 4, 1, 1.0, 1.0, 0.25, &BoxSides::walls_2d()).unwrap();
        let fields = FlowFields::new(&mesh, 1.0, 1e-2, 0.05);
        PisoSolver::new(mesh, config, fields)
            .unwrap()
            .with_dispatch(DispatchContext::serial())
    }

    #[test]
    fn single_iteration_releases_step_context_buffers() {
        let mut solver = cavity(NavierStokesConfig::new());
        let report = solver.solve_time_step(1).unwrap();
        assert!(report.converged);
        assert!(report.xnrmu.is_none());
        let step = solver.step_context().unwrap();
        assert!(step.trava.is_none());
    }

    #[test]
    fn inner_iterations_keep_accumulator_until_last() {
        let mut solver = cavity(NavierStokesConfig::inner_iterations(3, 1e-12));
        solver.fields.velocity.val.iter_mut().for_each(|u| *u = Vector3::new(0.1, 0.0, 0.0));
        solver.fields.shift_time_levels();
        let first = solver.solve_time_step(1).unwrap();
        assert!(first.xnrmu.is_some());
        if !first.converged {
            assert!(solver.step_context().unwrap().trava.is_some());
        }
        solver.solve_time_step(2).unwrap();
        solver.solve_time_step(3).unwrap();
        assert!(solver.step_context().unwrap().trava.is_none());
    }

    #[test]
    fn closed_box_pressure_mean_is_reference() {
        let mut config = NavierStokesConfig::new();
        config.fluid.pred0 = 3.0;
        let mut solver = cavity(config);
        solver.fields.velocity.val.iter_mut().enumerate().for_each(|(c, u)| {
            *u = Vector3::new(0.05 * (c % 2) as f64, -0.02 * (c % 3) as f64, 0.0);
        });
        solver.solve_time_step(1).unwrap();
        let mesh = &solver.mesh;
        let mean: f64 = (0..mesh.n_cells)
            .map(|c| solver.fields.pressure.val[c] * mesh.cell_vol[c])
            .sum::<f64>()
            / mesh.total_volume();
        assert!((mean - 3.0).abs() < 1e-12, "{}", mean);
    }

    #[test]
    fn total_pressure_adds_hydrostatic_head() {
        let mut config = NavierStokesConfig::new().with_gravity(Vector3::new(0.0, -10.0, 0.0));
        config.fluid.p0 = 100.0;
        config.fluid.ro0 = 2.0;
        let mut solver = cavity(config);
        solver.finalize();
        let fields = &solver.fields;
        for c in 0..solver.mesh.n_cells {
            let expected = fields.pressure.val[c] - 20.0 * solver.mesh.cell_cen[c].y + 100.0;
            assert!((fields.total_pressure[c] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn time_follows_smallest_local_step() {
        let mut solver = cavity(NavierStokesConfig::new());
        solver.advance(1).unwrap();
        assert!((solver.time - 0.05).abs() < 1e-15);

        for (c, dt) in solver.fields.dt.iter_mut().enumerate() {
            *dt = if c % 2 == 0 { 0.02 } else { 0.08 };
        }
        solver.refresh_boundary_coefficients();
        let reports = solver.advance(2).unwrap();
        assert!((reports[0].time - 0.07).abs() < 1e-15);
        assert!((solver.time - 0.09).abs() < 1e-15);
        assert!(solver.local_time_step_reported);
    }

    #[test]
    fn no_correction_takes_flux_from_prediction() {
        let mut config = NavierStokesConfig::new();
        config.velocity_pressure.pressure_correction = false;
        let mut solver = cavity(config);
        solver.fields.velocity.val.iter_mut().for_each(|u| *u = Vector3::new(0.2, 0.0, 0.0));
        solver.fields.shift_time_levels();
        let report = solver.solve_time_step(1).unwrap();
        assert!(report.pressure_sweeps.is_none());
        assert!(solver.fields.pressure.val.iter().all(|p| *p == 0.0));
        let mesh = &solver.mesh;
        for f in 0..mesh.n_i_faces() {
            let [i, j] = mesh.i_face_cells[f];
            let u = (solver.fields.velocity.val[i] + solver.fields.velocity.val[j]) * 0.5;
            assert!((solver.fields.i_mass_flux.val[f] - u.dot(&mesh.i_face_normal[f])).abs() < 1e-12);
        }
    }
}
