//! Velocity update from the pressure increment or from the corrected face
//! mass fluxes.

use crate::solver::error::{SolverError, SolverResult};
use crate::solver::field::FlowFields;
use crate::solver::fvm::gradient_potential;
use crate::solver::mesh::Mesh;
use crate::solver::options::{HydrostaticMode, NavierStokesConfig, VelocityReconstruction};
use crate::solver::parallel::DispatchContext;
use crate::solver::pressure_correction::TimeScale;
use nalgebra::Vector3;

pub struct VelocityUpdater<'a> {
    pub ctx: &'a DispatchContext,
    pub mesh: &'a Mesh,
    pub config: &'a NavierStokesConfig,
}

impl VelocityUpdater<'_> {
    /// `cromk1` is the density of the previous inner iteration; `dfrcxt`
    /// the external force increment; `standard_outlets` flags the faces
    /// whose imposed pressure follows the increment when forces are
    /// balanced.
    pub fn update(
        &self,
        fields: &mut FlowFields,
        cromk1: &[f64],
        dfrcxt: &[Vector3<f64>],
        standard_outlets: &[bool],
    ) -> SolverResult<()> {
        let mesh = self.mesh;
        if cromk1.len() < mesh.n_cells {
            return Err(SolverError::dimension("previous-iteration density", mesh.n_cells, cromk1.len()));
        }
        let balanced = self.config.velocity_pressure.hydrostatic == HydrostaticMode::ExternalForces;
        match self.config.velocity_pressure.reconstruction {
            VelocityReconstruction::PressureGradient => self.from_pressure_increment(fields, cromk1, dfrcxt),
            VelocityReconstruction::FaceFluxRt0 => self.from_face_fluxes(fields),
        }
        mesh.sync(&mut fields.velocity.val);

        if balanced {
            let dp_bc = &fields.pressure_increment_bc;
            let p_bc = &mut fields.pressure_bc;
            for f in (0..mesh.n_b_faces()).filter(|&f| standard_outlets[f]) {
                p_bc.a[f] += dp_bc.a[f];
                p_bc.af[f] += dp_bc.af[f];
            }
            for (f, d) in fields.volume_forces.iter_mut().zip(dfrcxt) {
                *f += d;
            }
            mesh.sync(&mut fields.volume_forces);
        }
        Ok(())
    }

    /// `u = u rho_k1 / rho + theta tau / rho (dfrcxt - grad dp)`, the force
    /// increment only when it is balanced by the pressure.
    fn from_pressure_increment(&self, fields: &mut FlowFields, cromk1: &[f64], dfrcxt: &[Vector3<f64>]) {
        let (ctx, mesh, config) = (self.ctx, self.mesh, self.config);
        let eq = &config.pressure;
        let vp = &config.velocity_pressure;
        let balanced = vp.hydrostatic == HydrostaticMode::ExternalForces;
        let f_ext = balanced.then_some(dfrcxt);
        let grad = gradient_potential(
            ctx,
            mesh,
            &fields.pressure_increment,
            &fields.pressure_increment_bc,
            f_ext,
            eq.gradient_sweeps,
            eq.gradient_tolerance,
        );

        let crom: &[f64] = if config.fluid.uses_mass_density() {
            &fields.density_mass
        } else {
            &fields.density.val
        };
        let tau = TimeScale::select(vp, &fields.dt, &fields.da_uu, &fields.dttens);
        let thetap = eq.theta;
        let n = mesh.n_cells;
        ctx.parallel_for(&mut fields.velocity.val[..n], |c, u| {
            let drive = match f_ext {
                Some(f) => f[c] - grad[c],
                None => -grad[c],
            };
            *u = *u * (cromk1[c] / crom[c]) + tau.apply(c, &drive) * (thetap / crom[c]);
        });
        ctx.wait();
    }

    /// Lowest-order Raviart-Thomas reconstruction
    /// `u_i = 1/(rho_i V_i) sum_f m_f (x_f - x_i)`.
    fn from_face_fluxes(&self, fields: &mut FlowFields) {
        let (ctx, mesh) = (self.ctx, self.mesh);
        let n = mesh.n_cells;
        let crom: &[f64] = if self.config.fluid.uses_mass_density() {
            &fields.density_mass
        } else {
            &fields.density.val
        };
        let imasfl = &fields.i_mass_flux.val;
        let bmasfl = &fields.b_mass_flux.val;
        let vel = &mut fields.velocity.val;
        vel.iter_mut().for_each(|u| *u = Vector3::zeros());

        let weight = |c: usize| 1.0 / (crom[c] * mesh.cell_vol[c]);
        ctx.dispatch_sum(ctx.i_sum_type(mesh), mesh.n_i_faces(), n, vel, |f| {
            let [i, j] = mesh.i_face_cells[f];
            let xf = mesh.i_face_cog[f];
            let m = imasfl[f];
            [
                (i, (xf - mesh.cell_cen[i]) * (m * weight(i))),
                (j, (xf - mesh.cell_cen[j]) * (-m * weight(j))),
            ]
        });
        ctx.dispatch_sum(ctx.b_sum_type(mesh), mesh.n_b_faces(), n, vel, |f| {
            let c = mesh.b_face_cells[f];
            [(c, (mesh.b_face_cog[f] - mesh.cell_cen[c]) * (bmasfl[f] * weight(c)))]
        });
        ctx.wait();
    }
}
