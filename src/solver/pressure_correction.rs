//! Pressure correction.
//!
//! The predicted velocity is turned into a Rhie-Chow face flux, then a
//! pressure increment `dp` is solved so that the corrected flux satisfies
//! continuity:
//!
//! `div(tau grad dp) = div(m*) - V Gamma + (rho - rho_prev) V / dt`.
//!
//! The driver only depends on [`PressureCorrection`]; [`RhieChowCorrection`]
//! is the default implementation.

use crate::solver::boundary::ScalarBc;
use crate::solver::equation::{iterative_solve_scalar, ScalarSystem, SweepReport};
use crate::solver::error::SolverResult;
use crate::solver::field::FlowFields;
use crate::solver::fvm::{
    divergence, face_diffusion_potential, face_viscosity, face_viscosity_projected, gradient_potential,
    mass_flux, Potential,
};
use crate::solver::mesh::Mesh;
use crate::solver::options::{FaceMean, HydrostaticMode, NavierStokesConfig, VelocityPressureParams};
use crate::solver::parallel::DispatchContext;
use crate::solver::source_terms::SourceTerms;
use log::{debug, trace};
use nalgebra::{Matrix3, Vector3};

/// Time scale relating a pressure gradient to a velocity change.
#[derive(Clone, Copy, Debug)]
pub enum TimeScale<'a> {
    /// Local time step.
    Scalar(&'a [f64]),
    /// `da_uu` (tensorial Rhie-Chow) or `dttens` (reinforced coupling).
    Tensor(&'a [Matrix3<f64>]),
}

impl<'a> TimeScale<'a> {
    pub fn select(
        vp: &VelocityPressureParams,
        dt: &'a [f64],
        da_uu: &'a [Matrix3<f64>],
        dttens: &'a [Matrix3<f64>],
    ) -> Self {
        if vp.rhie_chow_tensor {
            TimeScale::Tensor(da_uu)
        } else if vp.coupled_time_step {
            TimeScale::Tensor(dttens)
        } else {
            TimeScale::Scalar(dt)
        }
    }

    #[inline]
    pub fn apply(&self, c: usize, v: &Vector3<f64>) -> Vector3<f64> {
        match self {
            TimeScale::Scalar(dt) => v * dt[c],
            TimeScale::Tensor(t) => t[c] * v,
        }
    }

    /// Face coefficients `tau_f S / d` of the pressure operator.
    pub fn face_viscosity(&self, ctx: &DispatchContext, mesh: &Mesh, mean: FaceMean) -> (Vec<f64>, Vec<f64>) {
        match self {
            TimeScale::Scalar(dt) => face_viscosity(ctx, mesh, dt, mean),
            TimeScale::Tensor(t) => face_viscosity_projected(ctx, mesh, t),
        }
    }
}

/// Per-call inputs besides the flow fields.
pub struct CorrectionInput<'a> {
    pub iterns: usize,
    /// Outlet faces with an imposed pressure (`isostd`).
    pub standard_outlets: &'a [bool],
    /// External force increment, balanced by the pressure increment when
    /// forces are handled as external forces.
    pub dfrcxt: &'a [Vector3<f64>],
}

#[derive(Clone, Debug)]
pub struct CorrectionReport {
    pub solve: SweepReport,
    /// Norm of the continuity defect of the predicted flux.
    pub initial_defect: f64,
}

/// Projects the predicted velocity and writes the corrected face mass
/// fluxes, the updated pressure, `fields.pressure_increment` and its
/// boundary bundle `fields.pressure_increment_bc`.
pub trait PressureCorrection: Send + Sync {
    fn name(&self) -> &'static str;

    fn correct(
        &self,
        ctx: &DispatchContext,
        mesh: &Mesh,
        config: &NavierStokesConfig,
        sources: &SourceTerms,
        fields: &mut FlowFields,
        input: &CorrectionInput,
    ) -> SolverResult<CorrectionReport>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RhieChowCorrection;

impl RhieChowCorrection {
    /// Increment bundle: the homogeneous bundle of the pressure, with the
    /// hydrostatic part of the force increment imposed on standard outlets.
    fn increment_bc(
        &self,
        mesh: &Mesh,
        config: &NavierStokesConfig,
        base: &ScalarBc,
        input: &CorrectionInput,
    ) -> ScalarBc {
        let mut bc = base.homogeneous();
        if config.velocity_pressure.hydrostatic == HydrostaticMode::ExternalForces {
            let x0 = config.fluid.xyzp0;
            for f in 0..mesh.n_b_faces() {
                if !(input.standard_outlets[f] && bc.is_dirichlet(f)) {
                    continue;
                }
                let c = mesh.b_face_cells[f];
                let hint = bc.bf[f];
                bc.set_dirichlet(f, input.dfrcxt[c].dot(&(mesh.b_face_cog[f] - x0)), hint);
            }
        }
        bc
    }
}

impl PressureCorrection for RhieChowCorrection {
    fn name(&self) -> &'static str {
        "rhie-chow"
    }

    fn correct(
        &self,
        ctx: &DispatchContext,
        mesh: &Mesh,
        config: &NavierStokesConfig,
        sources: &SourceTerms,
        fields: &mut FlowFields,
        input: &CorrectionInput,
    ) -> SolverResult<CorrectionReport> {
        let n = mesh.n_cells;
        let vp = &config.velocity_pressure;
        let fluid = &config.fluid;
        let eq = &config.pressure;
        let balanced = vp.hydrostatic == HydrostaticMode::ExternalForces;

        let crom: &[f64] = if fluid.uses_mass_density() {
            &fields.density_mass
        } else {
            &fields.density.val
        };
        let brom = &fields.b_density.val;
        let tau = TimeScale::select(vp, &fields.dt, &fields.da_uu, &fields.dttens);
        let (viscf, viscb) = tau.face_viscosity(ctx, mesh, eq.face_mean);

        // Predicted flux m* = rho_f (u* + arak tau/rho (grad p - f)).S
        // + arak viscf-potential(p; f)
        let frcxt = balanced.then_some(fields.volume_forces.as_slice());
        let p = &fields.pressure.val;
        let grad_p = gradient_potential(
            ctx,
            mesh,
            p,
            &fields.pressure_bc,
            frcxt,
            eq.gradient_sweeps,
            eq.gradient_tolerance,
        );
        let arak = vp.rhie_chow_factor;
        let vel = &fields.velocity.val;
        let mut trav = vec![Vector3::zeros(); mesh.n_cells_ext];
        ctx.parallel_for(&mut trav, |c, t| {
            let g = match frcxt {
                Some(f) => grad_p[c] - f[c],
                None => grad_p[c],
            };
            *t = vel[c] + tau.apply(c, &g) * (arak / crom[c]);
        });
        let mut i_flux = vec![0.0; mesh.n_i_faces()];
        let mut b_flux = vec![0.0; mesh.n_b_faces()];
        mass_flux(ctx, mesh, crom, brom, &trav, &fields.velocity_bc, None, &mut i_flux, &mut b_flux);

        let viscf_rc: Vec<f64> = viscf.iter().map(|v| v * arak).collect();
        let viscb_rc: Vec<f64> = viscb.iter().map(|v| v * arak).collect();
        let rc = Potential {
            values: p,
            bc: &fields.pressure_bc,
            f_ext: frcxt,
            grad: eq.flux_reconstruction.then_some(grad_p.as_slice()),
        };
        face_diffusion_potential(ctx, mesh, &rc, &viscf_rc, &viscb_rc, &mut i_flux, &mut b_flux);

        // Continuity defect.
        let div = divergence(ctx, mesh, &i_flux, &b_flux);
        let gamma = sources.mass_source(mesh);
        let dilatable = fluid.variable_density && fluid.dilatation.is_dilatable();
        let rho = &fields.density.val;
        let rho_pre = &fields.density.val_pre;
        let dt = &fields.dt;
        let mut smbr = vec![0.0; n];
        ctx.parallel_for(&mut smbr, |c, s| {
            *s = gamma.as_ref().map_or(0.0, |g| g[c]) - div[c];
            if dilatable {
                *s -= (rho[c] - rho_pre[c]) * mesh.cell_vol[c] / dt[c];
            }
        });
        ctx.wait();
        let initial_defect = ctx.sum(n, |c| smbr[c] * smbr[c]).sqrt();

        let dp_bc = self.increment_bc(mesh, config, &fields.pressure_increment_bc, input);
        let f_ext = balanced.then_some(input.dfrcxt);
        let system = ScalarSystem {
            viscf: &viscf,
            viscb: &viscb,
            bc: &dp_bc,
            rovsdt: None,
            f_ext,
            strengthen_diagonal: dp_bc.n_dirichlet() == 0,
        };
        let mut dp = vec![0.0; mesh.n_cells_ext];
        let mut last = vec![0.0; mesh.n_cells_ext];
        let solve = iterative_solve_scalar(ctx, mesh, eq, &system, &mut dp, &smbr, Some(&mut last))?;
        if !solve.converged {
            debug!(
                "{}: stopped after {} sweep(s), residual {:.3e} / {:.3e}",
                eq.name, solve.sweeps, solve.residual, solve.rnorm
            );
        }

        // Flux update; the last increment is applied without reconstruction
        // so the corrected flux is consistent with the solved matrix.
        let dpa: Vec<f64> = dp.iter().zip(&last).map(|(x, d)| x - d).collect();
        let reconstruct = eq.flux_reconstruction && eq.n_sweeps > 1;
        let grad = reconstruct
            .then(|| gradient_potential(ctx, mesh, &dpa, &dp_bc, f_ext, eq.gradient_sweeps, eq.gradient_tolerance));
        let homogeneous = dp_bc.homogeneous();
        let previous = Potential {
            values: &dpa,
            bc: &dp_bc,
            f_ext,
            grad: grad.as_deref(),
        };
        let increment = Potential {
            values: &last,
            bc: &homogeneous,
            f_ext: None,
            grad: None,
        };
        for potential in [&previous, &increment] {
            face_diffusion_potential(ctx, mesh, potential, &viscf, &viscb, &mut i_flux, &mut b_flux);
        }

        fields.i_mass_flux.val = i_flux;
        fields.b_mass_flux.val = b_flux;

        let relax = eq.relaxation;
        ctx.parallel_for2(&mut fields.pressure.val, &mut dp, |_, p, d| *p += relax * *d);
        mesh.sync(&mut fields.pressure.val);
        fields.pressure_increment = dp;
        fields.pressure_increment_bc = dp_bc;

        trace!(
            "iteration {}: continuity defect {:.6e}, {} pressure sweep(s)",
            input.iterns, initial_defect, solve.sweeps
        );
        Ok(CorrectionReport { solve, initial_defect })
    }
}
