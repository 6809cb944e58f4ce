//! Velocity prediction.
//!
//! Call 1 assembles the momentum balance with the current pressure and
//! solves the coupled `3 x n` system for the predicted velocity. Call 2
//! re-evaluates the same balance once the pressure has been corrected,
//! without solving, to measure the total error estimator.

use crate::solver::boundary::VectorBc;
use crate::solver::equation::{balance_vector, iterative_solve_vector, SweepReport, VectorSystem};
use crate::solver::error::{SolverError, SolverResult};
use crate::solver::field::{DensityViews, FlowFields, MassFluxView};
use crate::solver::fvm::{gradient_potential, ConvectionDiffusion, FaceDiffusivity};
use crate::solver::mesh::Mesh;
use crate::solver::options::{DiffusionKind, Dilatation, EquationParams, HydrostaticMode, NavierStokesConfig};
use crate::solver::parallel::DispatchContext;
use crate::solver::source_terms::{SourceBuffers, SourceContext, SourceTerms};
use log::debug;
use nalgebra::{Matrix3, Vector3};
use std::borrow::Cow;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredictorCall {
    /// Assemble and solve for the predicted velocity.
    Solve,
    /// Residual of the corrected state, for the total estimator.
    Estimate,
}

impl PredictorCall {
    pub fn number(self) -> u8 {
        match self {
            PredictorCall::Solve => 1,
            PredictorCall::Estimate => 2,
        }
    }
}

/// Per-time-step buffers owned by the driver.
pub struct StepBuffers<'a> {
    /// Inner-iteration accumulator; present when several inner iterations run.
    pub trava: Option<&'a mut [Vector3<f64>]>,
    /// Velocity at the start of the inner iteration, used as initial guess.
    pub velk: &'a [Vector3<f64>],
    /// External force increment, written when forces are balanced.
    pub dfrcxt: &'a mut [Vector3<f64>],
}

struct Assembly<'f> {
    smbr: Vec<Vector3<f64>>,
    fimp: Vec<Matrix3<f64>>,
    viscf: FaceDiffusivity,
    viscb: Vec<f64>,
    bc: Cow<'f, VectorBc>,
}

impl Assembly<'_> {
    fn operator<'s>(&'s self, flux: &'s MassFluxView, eq: &EquationParams) -> ConvectionDiffusion<'s> {
        ConvectionDiffusion {
            i_flux: &flux.interior,
            b_flux: &flux.boundary,
            viscf: &self.viscf,
            viscb: &self.viscb,
            convection: eq.convection,
            diffusion: eq.diffusion,
        }
    }
}

struct Prediction {
    report: SweepReport,
    da_uu: Option<Vec<Matrix3<f64>>>,
    dttens: Option<Vec<Matrix3<f64>>>,
    estimator: Option<Vec<f64>>,
}

pub struct VelocityPredictor<'a> {
    pub ctx: &'a DispatchContext,
    pub mesh: &'a Mesh,
    pub config: &'a NavierStokesConfig,
    pub sources: &'a SourceTerms,
}

impl VelocityPredictor<'_> {
    /// Call 1: predicts the velocity in place and refreshes `da_uu`,
    /// `dttens`, the boundary stresses and the prediction estimator as
    /// configured.
    pub fn predict(&self, fields: &mut FlowFields, iterns: usize, step: StepBuffers<'_>) -> SolverResult<SweepReport> {
        let mut vel = std::mem::take(&mut fields.velocity.val);
        let mut c_st = std::mem::take(&mut fields.extrapolated_sources);
        let mut forbr = (iterns == 1 && self.config.velocity_pressure.boundary_forces)
            .then(|| std::mem::take(&mut fields.boundary_forces));

        let result = self.solve_in(fields, iterns, step, &mut vel, &mut c_st, forbr.as_deref_mut());

        fields.velocity.val = vel;
        fields.extrapolated_sources = c_st;
        if let Some(f) = forbr {
            fields.boundary_forces = f;
        }
        let prediction = result?;
        if let Some(d) = prediction.da_uu {
            fields.da_uu = d;
        }
        if let Some(t) = prediction.dttens {
            fields.dttens = t;
        }
        if let Some(e) = prediction.estimator {
            fields.estimators.prediction = Some(e);
        }
        Ok(prediction.report)
    }

    /// Call 2: per-cell total estimator `sqrt(sum (r/V)^2 V)` of the
    /// momentum residual at the corrected velocity. Works on copies of the
    /// source accumulators, so nothing persistent is touched.
    pub fn estimate_total(&self, fields: &mut FlowFields, iterns: usize, trava: Option<&[Vector3<f64>]>) {
        let estimator = self.total_estimator(fields, iterns, trava);
        fields.estimators.total = Some(estimator);
    }

    fn total_estimator(&self, fields: &FlowFields, iterns: usize, trava: Option<&[Vector3<f64>]>) -> Vec<f64> {
        let (ctx, mesh) = (self.ctx, self.mesh);
        let n = mesh.n_cells;
        let eq = self.config.velocity.balance_only();
        let call = PredictorCall::Estimate;
        let views = fields.density_views(self.config, iterns, call.number());
        let flux = fields.mass_flux_view(self.config, iterns, call.number());

        let vel = &fields.velocity.val;
        let vela = &fields.velocity.val_pre;
        let rho = &fields.density.val;
        let mut trav = vec![Vector3::zeros(); mesh.n_cells_ext];
        ctx.parallel_for(&mut trav[..n], |c, t| {
            *t = (vela[c] - vel[c]) * (rho[c] * mesh.cell_vol[c] / fields.dt[c]);
        });
        let mut trava_scratch = trava.map(|t| t.to_vec());
        let mut c_st = fields.extrapolated_sources.clone();

        let asm = self.assemble(
            call,
            iterns,
            fields,
            &views,
            trav,
            trava_scratch.as_deref_mut(),
            &mut c_st,
            None,
            None,
        );
        let system = VectorSystem {
            operator: asm.operator(&flux, &eq),
            bc: &asm.bc,
            fimp: &asm.fimp,
        };
        let residual = balance_vector(ctx, mesh, &eq, &system, vel, vel, &asm.smbr);

        let mut est = vec![0.0; n];
        ctx.parallel_for(&mut est, |c, e| {
            let vol = mesh.cell_vol[c];
            *e = ((residual[c] / vol).norm_squared() * vol).sqrt();
        });
        est
    }

    #[allow(clippy::too_many_arguments)]
    fn solve_in(
        &self,
        fields: &FlowFields,
        iterns: usize,
        step: StepBuffers<'_>,
        vel: &mut [Vector3<f64>],
        c_st: &mut [Vector3<f64>],
        mut forbr: Option<&mut [Vector3<f64>]>,
    ) -> SolverResult<Prediction> {
        let (ctx, mesh) = (self.ctx, self.mesh);
        let n = mesh.n_cells;
        let vp = &self.config.velocity_pressure;
        let eq = &self.config.velocity;
        let call = PredictorCall::Solve;
        let views = fields.density_views(self.config, iterns, call.number());
        let flux = fields.mass_flux_view(self.config, iterns, call.number());
        let StepBuffers { trava, velk, dfrcxt } = step;

        if let Some(f) = forbr.as_deref_mut() {
            f.iter_mut().for_each(|v| *v = Vector3::zeros());
        }
        let trav = vec![Vector3::zeros(); mesh.n_cells_ext];
        let asm = self.assemble(call, iterns, fields, &views, trav, trava, c_st, Some(dfrcxt), forbr);

        SolverError::check_len("initial velocity", vel.len(), velk.len())?;
        vel.copy_from_slice(velk);
        let mut eswork = vp.estimators.prediction.then(|| vec![0.0; n]);
        let system = VectorSystem {
            operator: asm.operator(&flux, eq),
            bc: &asm.bc,
            fimp: &asm.fimp,
        };
        let report = iterative_solve_vector(
            ctx,
            mesh,
            eq,
            &system,
            &fields.velocity.val_pre,
            vel,
            &asm.smbr,
            eswork.as_deref_mut(),
        )?;

        let crom = views.cell;
        let da_uu = if vp.rhie_chow_tensor {
            let mut da = vec![Matrix3::zeros(); mesh.n_cells_ext];
            for c in 0..n {
                let inv = (asm.fimp[c] / crom[c]).try_inverse().ok_or_else(|| {
                    SolverError::configuration(
                        "velocity prediction",
                        format!(
                            "implicit block of cell {} is singular; the tensorial Rhie-Chow \
                             interpolation needs an unsteady or implicit source term",
                            c
                        ),
                    )
                })?;
                da[c] = inv * mesh.cell_vol[c];
            }
            mesh.sync(&mut da);
            Some(da)
        } else {
            None
        };

        let dttens = if vp.coupled_time_step {
            Some(self.coupled_time_step(&asm, &flux, crom)?)
        } else {
            None
        };

        let estimator = eswork.map(|es| {
            es.iter()
                .zip(&mesh.cell_vol)
                .map(|(e, v)| (e * v).sqrt())
                .collect()
        });

        if log::log_enabled!(log::Level::Debug) {
            let (lo, hi) = vel[..n]
                .iter()
                .map(|u| u.norm())
                .fold((f64::MAX, f64::MIN), |(lo, hi), u| (lo.min(u), hi.max(u)));
            debug!("{}: velocity norm after prediction in [{:.6e}, {:.6e}]", eq.name, lo, hi);
        }

        Ok(Prediction {
            report,
            da_uu,
            dttens,
            estimator,
        })
    }

    /// `dttens = diag(rho T)` where `T` solves the momentum operator with a
    /// right-hand side equal to the cell volume and homogeneous boundaries.
    fn coupled_time_step(
        &self,
        asm: &Assembly,
        flux: &MassFluxView,
        crom: &[f64],
    ) -> SolverResult<Vec<Matrix3<f64>>> {
        let (ctx, mesh) = (self.ctx, self.mesh);
        let n = mesh.n_cells;
        let eq = EquationParams {
            n_sweeps: 1,
            ..self.config.velocity.clone()
        };
        let mut bc = asm.bc.clone().into_owned();
        bc.a.iter_mut().for_each(|a| *a = Vector3::zeros());
        bc.af.iter_mut().for_each(|a| *a = Vector3::zeros());
        let system = VectorSystem {
            operator: asm.operator(flux, &eq),
            bc: &bc,
            fimp: &asm.fimp,
        };
        let zero = vec![Vector3::zeros(); mesh.n_cells_ext];
        let mut vect = zero.clone();
        let mut rhs = zero.clone();
        for c in 0..n {
            rhs[c] = Vector3::repeat(mesh.cell_vol[c]);
        }
        iterative_solve_vector(ctx, mesh, &eq, &system, &zero, &mut vect, &rhs, None)?;

        let mut dttens = vec![Matrix3::zeros(); mesh.n_cells_ext];
        ctx.parallel_for(&mut dttens, |c, t| {
            *t = Matrix3::from_diagonal(&(vect[c] * crom[c]));
        });
        Ok(dttens)
    }

    /// Builds the right-hand side, the implicit block and the face
    /// diffusivity shared by both calls.
    #[allow(clippy::too_many_arguments)]
    fn assemble<'f>(
        &self,
        call: PredictorCall,
        iterns: usize,
        fields: &'f FlowFields,
        views: &DensityViews,
        mut trav: Vec<Vector3<f64>>,
        mut trava: Option<&mut [Vector3<f64>]>,
        c_st: &mut [Vector3<f64>],
        dfrcxt: Option<&mut [Vector3<f64>]>,
        mut forbr: Option<&mut [Vector3<f64>]>,
    ) -> Assembly<'f> {
        let (ctx, mesh) = (self.ctx, self.mesh);
        let n = mesh.n_cells;
        let cfg = self.config;
        let eq = &cfg.velocity;
        let balanced = cfg.velocity_pressure.hydrostatic == HydrostaticMode::ExternalForces;
        let isno2t = cfg.time_scheme.extrapolate_sources;
        let thets = cfg.time_scheme.source_theta;
        let crom = views.cell;

        let grad_p = gradient_potential(
            ctx,
            mesh,
            &fields.pressure.val,
            &fields.pressure_bc,
            balanced.then_some(fields.volume_forces.as_slice()),
            cfg.pressure.gradient_sweeps,
            cfg.pressure.gradient_tolerance,
        );

        if let Some(fb) = forbr.as_deref_mut() {
            self.pressure_boundary_forces(fields, &grad_p, fb);
        }

        ctx.parallel_for(&mut trav[..n], |c, t| {
            *t += (self.potential_force(fields, views, c) - grad_p[c]) * mesh.cell_vol[c];
        });

        if iterns == 1 {
            if isno2t {
                match trava.as_deref_mut() {
                    None => ctx.parallel_for2(&mut trav[..n], &mut c_st[..n], |_, t, s| {
                        *t -= *s * thets;
                        *s = Vector3::zeros();
                    }),
                    Some(ta) => ctx.parallel_for2(&mut ta[..n], &mut c_st[..n], |_, t, s| {
                        *t = -*s * thets;
                        *s = Vector3::zeros();
                    }),
                }
            } else if let Some(ta) = trava.as_deref_mut() {
                ta.iter_mut().for_each(|t| *t = Vector3::zeros());
            }
            ctx.wait();
        }

        let mut fimp = vec![Matrix3::zeros(); mesh.n_cells_ext];
        if call == PredictorCall::Solve && eq.unsteady {
            let pcrom = &views.unsteady;
            ctx.parallel_for(&mut fimp[..n], |c, m| {
                *m = Matrix3::identity() * (pcrom[c] / fields.dt[c] * mesh.cell_vol[c]);
            });
        }

        let st = SourceContext {
            dispatch: ctx,
            mesh,
            config: cfg,
            fields,
            iterns,
            density: crom,
            velocity_previous: &fields.velocity.val_pre,
        };
        {
            let mut buffers = SourceBuffers::new(&mut trav, trava.as_deref_mut(), &mut *c_st, iterns, isno2t);
            self.sources.explicit(&st, &mut buffers);
        }
        if call == PredictorCall::Solve {
            self.sources.implicit(&st, &mut fimp);
        }
        if let Some(fb) = forbr {
            self.sources.boundary_forces(&st, fb);
        }
        if let (PredictorCall::Solve, true, Some(d)) = (call, balanced, dfrcxt) {
            self.external_force_increment(&st, views, d);
        }

        let mut smbr = vec![Vector3::zeros(); mesh.n_cells_ext];
        {
            let trava = trava.as_deref();
            let c_st = &*c_st;
            ctx.parallel_for(&mut smbr[..n], |c, s| {
                *s = trav[c];
                if let Some(ta) = trava {
                    *s += ta[c];
                }
                if isno2t {
                    *s += c_st[c] * (1.0 + thets);
                }
            });
        }
        self.sources.rhs(&st, &mut smbr);

        let (mut viscf, viscb) = self.face_diffusivity(fields);
        let mut bc = Cow::Borrowed(&fields.velocity_bc);
        if let Some(r) = &fields.rusanov {
            viscf.apply_rusanov_floor(mesh, &r.interior);
            let bc = bc.to_mut();
            for f in 0..mesh.n_b_faces() {
                let nf = mesh.b_face_u_normal[f];
                bc.bf[f] += nf * nf.transpose() * r.boundary[f];
            }
        }

        Assembly {
            smbr,
            fimp,
            viscf,
            viscb,
            bc,
        }
    }

    /// Buoyancy and balanced forces per unit volume, before the pressure
    /// gradient is subtracted.
    fn potential_force(&self, fields: &FlowFields, views: &DensityViews, c: usize) -> Vector3<f64> {
        let g = self.config.constants.gravity;
        match self.config.velocity_pressure.hydrostatic {
            HydrostaticMode::ExternalForces => fields.volume_forces[c],
            HydrostaticMode::Predictor => g * views.cell[c] - fields.hydrostatic_gradient[c],
            HydrostaticMode::Off if self.config.fluid.regime.is_compressible() => g * views.cell[c],
            HydrostaticMode::Off => g * self.density_anomaly(fields, views, c),
        }
    }

    /// Density difference driving buoyancy: Boussinesq `-rho beta (T - T0)`,
    /// otherwise `rho - ro0` (extrapolated for collocated second order).
    fn density_anomaly(&self, fields: &FlowFields, views: &DensityViews, c: usize) -> f64 {
        let fluid = &self.config.fluid;
        if fluid.dilatation == Dilatation::Boussinesq {
            let t = fields.temperature.as_ref().map_or(fluid.t0, |t| t[c]);
            -views.cell[c] * fluid.beta * (t - fluid.t0)
        } else if self.config.time_scheme.time_order == 2 && self.config.velocity_pressure.collocated_density {
            1.5 * views.previous[c] - 0.5 * views.before_previous[c] - fluid.ro0
        } else {
            views.cell[c] - fluid.ro0
        }
    }

    /// `dfrcxt = drom g - frcxt` plus the forces each source balances
    /// against the pressure.
    fn external_force_increment(&self, st: &SourceContext, views: &DensityViews, dfrcxt: &mut [Vector3<f64>]) {
        let g = self.config.constants.gravity;
        let fields = st.fields;
        self.ctx.parallel_for(&mut dfrcxt[..self.mesh.n_cells], |c, d| {
            *d = g * self.density_anomaly(fields, views, c) - fields.volume_forces[c];
        });
        self.sources.balanced_force(st, dfrcxt);
        self.ctx.wait();
        self.mesh.sync(dfrcxt);
    }

    /// Pressure part of the boundary stresses, as total pressure.
    fn pressure_boundary_forces(&self, fields: &FlowFields, grad_p: &[Vector3<f64>], forbr: &mut [Vector3<f64>]) {
        let mesh = self.mesh;
        let fluid = &self.config.fluid;
        let g = self.config.constants.gravity;
        let p = &fields.pressure.val;
        let bc = &fields.pressure_bc;
        self.ctx.parallel_for_b_faces(mesh, forbr, |f, out| {
            let c = mesh.b_face_cells[f];
            let pip = p[c] + mesh.diipb[f].dot(&grad_p[c]);
            let pfac = bc.a[f] + bc.b[f] * pip + fluid.ro0 * (mesh.b_face_cog[f] - fluid.xyzp0).dot(&g) - fluid.pred0;
            *out += mesh.b_face_normal[f] * pfac;
        });
    }

    /// Face diffusivity `mu + mu_t`; second-moment closures carry the
    /// turbulent stresses in the divergence term and keep `mu` only.
    fn face_diffusivity(&self, fields: &FlowFields) -> (FaceDiffusivity, Vec<f64>) {
        let (ctx, mesh) = (self.ctx, self.mesh);
        let eq = &self.config.velocity;
        if !eq.diffusion {
            return (
                FaceDiffusivity::Isotropic(vec![0.0; mesh.n_i_faces()]),
                vec![0.0; mesh.n_b_faces()],
            );
        }
        let idifft = if eq.turbulent_diffusion && fields.reynolds_stress_divergence.is_none() {
            1.0
        } else {
            0.0
        };
        let mut w1 = vec![0.0; mesh.n_cells_ext];
        ctx.parallel_for(&mut w1, |c, w| {
            *w = fields.viscosity[c] + idifft * fields.turbulent_viscosity[c];
        });
        let viscf = match eq.diffusion_kind {
            DiffusionKind::Isotropic => FaceDiffusivity::isotropic(ctx, mesh, &w1, eq.face_mean),
            DiffusionKind::Anisotropic => {
                let coef: Vec<Matrix3<f64>> = w1
                    .iter()
                    .enumerate()
                    .map(|(c, &w)| {
                        fields
                            .diffusion_tensor
                            .as_ref()
                            .map_or_else(Matrix3::identity, |t| t[c])
                            * w
                    })
                    .collect();
                FaceDiffusivity::anisotropic(ctx, mesh, &coef)
            }
        };
        (viscf, mesh.b_face_surf.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::boundary::BoundaryConditions;
    use crate::solver::mesh::{generate_box_mesh, BoxSides};
    use crate::solver::source_terms::HeadLoss;

    struct Case {
        mesh: Mesh,
        fields: FlowFields,
        config: NavierStokesConfig,
        ctx: DispatchContext,
        sources: SourceTerms,
    }

    impl Case {
        fn closed_box(rho: f64) -> Self {
            let mesh = generate_box_mesh(4, 4, 1, 1.0, 1.0, 0.1, &BoxSides::walls_2d()).unwrap();
            let mut fields = FlowFields::new(&mesh, rho, 1e-2, 0.05);
            let bcs = BoundaryConditions::from_mesh(&mesh);
            bcs.velocity_coefficients(&mesh, &fields.viscosity, &fields.turbulent_viscosity, &mut fields.velocity_bc);
            bcs.pressure_coefficients(
                &mesh,
                &fields.dt,
                &mut fields.pressure_bc,
                &mut fields.pressure_increment_bc,
            );
            let mut config = NavierStokesConfig::new();
            config.velocity.solver_tolerance = 1e-12;
            Self {
                mesh,
                fields,
                config,
                ctx: DispatchContext::serial(),
                sources: SourceTerms::new(),
            }
        }

        fn predict(&mut self) -> SweepReport {
            let predictor = VelocityPredictor {
                ctx: &self.ctx,
                mesh: &self.mesh,
                config: &self.config,
                sources: &self.sources,
            };
            let velk = self.fields.velocity.val.clone();
            let mut dfrcxt = vec![Vector3::zeros(); self.mesh.n_cells_ext];
            let step = StepBuffers {
                trava: None,
                velk: &velk,
                dfrcxt: &mut dfrcxt,
            };
            predictor.predict(&mut self.fields, 1, step).unwrap()
        }

        fn estimate(&mut self) -> Vec<f64> {
            let predictor = VelocityPredictor {
                ctx: &self.ctx,
                mesh: &self.mesh,
                config: &self.config,
                sources: &self.sources,
            };
            predictor.estimate_total(&mut self.fields, 1, None);
            self.fields.estimators.total.clone().unwrap()
        }
    }

    #[test]
    fn fluid_at_rest_stays_at_rest() {
        let mut case = Case::closed_box(1.0);
        let report = case.predict();
        assert!(report.converged);
        assert!(case.fields.velocity.val.iter().all(|u| u.norm() < 1e-14));
    }

    #[test]
    fn heavy_fluid_accelerates_along_gravity() {
        let mut case = Case::closed_box(2.0);
        case.config = case.config.clone().with_gravity(Vector3::new(0.0, -9.81, 0.0));
        case.predict();
        for (c, u) in case.fields.velocity.val[..case.mesh.n_cells].iter().enumerate() {
            assert!(u.y < 0.0, "cell {} moves against gravity: {}", c, u);
            assert!(u.x.abs() < 1e-10 * u.y.abs() + 1e-14);
        }
    }

    #[test]
    fn tensorial_rhie_chow_recovers_time_step() {
        let mut case = Case::closed_box(3.0);
        case.config.velocity_pressure.rhie_chow_tensor = true;
        case.predict();
        for da in &case.fields.da_uu[..case.mesh.n_cells] {
            assert!((da - Matrix3::identity() * 0.05).amax() < 1e-12);
        }
    }

    #[test]
    fn head_loss_appears_in_tensorial_inverse() {
        let mut case = Case::closed_box(1.0);
        case.config.velocity_pressure.rhie_chow_tensor = true;
        let k = Matrix3::from_diagonal(&Vector3::new(20.0, 0.0, 0.0));
        case.sources.push(HeadLoss::new(&case.mesh, vec![5], vec![k]).unwrap());
        case.predict();
        let da = case.fields.da_uu[5];
        // V inv((1/dt + theta K)) with dt = 0.05 and K_xx = 20.
        assert!((da[(0, 0)] - 1.0 / 40.0).abs() < 1e-12);
        assert!((da[(1, 1)] - 0.05).abs() < 1e-12);
        assert!((case.fields.da_uu[0][(0, 0)] - 0.05).abs() < 1e-12);
    }

    #[test]
    fn predicted_state_has_no_total_residual() {
        let mut case = Case::closed_box(2.0);
        case.config = case.config.clone().with_gravity(Vector3::new(0.0, -9.81, 0.0));
        case.config.velocity_pressure.estimators.prediction = true;
        case.predict();
        let est = case.estimate();
        let scale = 9.81 * case.mesh.cell_vol[0].sqrt();
        assert!(est.iter().all(|e| *e < 1e-6 * scale), "{:?}", est);
        assert!(case.fields.estimators.prediction.is_some());
    }

    #[test]
    fn coupled_time_step_matches_unsteady_term_at_rest() {
        let mut case = Case::closed_box(2.0);
        case.config.velocity_pressure.coupled_time_step = true;
        case.config.velocity.diffusion = false;
        case.predict();
        for t in &case.fields.dttens[..case.mesh.n_cells] {
            assert!((t - Matrix3::identity() * 0.05).amax() < 1e-9, "{}", t);
        }
    }

    #[test]
    fn boundary_forces_hold_wall_pressure() {
        let mut case = Case::closed_box(1.0);
        case.config.velocity_pressure.boundary_forces = true;
        case.fields.pressure.val.iter_mut().for_each(|p| *p = 2.0);
        case.fields.pressure.val_pre.iter_mut().for_each(|p| *p = 2.0);
        case.predict();
        let total: Vector3<f64> = case.fields.boundary_forces.iter().sum();
        assert!(total.norm() < 1e-12);
        let f = (0..case.mesh.n_b_faces())
            .find(|&f| case.mesh.b_face_u_normal[f].x > 0.5)
            .unwrap();
        let expected = case.mesh.b_face_normal[f] * 2.0;
        assert!((case.fields.boundary_forces[f] - expected).norm() < 1e-12);
    }
}
